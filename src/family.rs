use serde::{Deserialize, Serialize};
use std::fmt::{self, Write};

/// Simulators whose CMake output needs more than the plain `add_simulator`
/// stanza. Selected by program name through the `[families]` config table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Family {
    #[default]
    Basic,
    /// Needs a Cyrillic-capable font found at configure time.
    Besm6,
    /// Deep recursion; Windows links get an explicit stack size.
    Ibm650 { stack_size: u64 },
    /// Test runs pass `test_args` to skip the GUI.
    Ibm1130 { test_args: String },
    /// Front panel options.
    Ka10,
    Vax,
    Vax730,
}

const BESM6_FONT_DIRS: &[&str] = &[
    "\"/usr/share/fonts\" \"/Library/Fonts\" \"/usr/lib/jvm\"",
    "\"/System/Library/Frameworks/JavaVM.framework/Versions\"",
    "\"$ENV{WINDIR}/Fonts\")",
];
const BESM6_FONTS: &[&str] = &[
    "\"DejaVuSans.ttf\" \"LucidaSansRegular.ttf\"",
    "\"FreeSans.ttf\" \"AppleGothic.ttf\" \"tahoma.ttf\")",
];

impl Family {
    pub fn test_args(&self) -> Option<&str> {
        match self {
            Family::Ibm1130 { test_args } => Some(test_args),
            _ => None,
        }
    }

    /// BESM6 always builds its panel, whatever the makefile says.
    pub fn forces_display(&self) -> bool {
        matches!(self, Family::Besm6)
    }

    pub fn has_unit_test(&self) -> bool {
        matches!(self, Family::Vax | Family::Vax730)
    }

    /// Extra indentation of the simulator stanza inside the prologue.
    pub fn body_indent(&self) -> usize {
        match self {
            Family::Besm6 => 4,
            _ => 0,
        }
    }

    /// Defines as emitted. The BESM6 font comes from the configure-time
    /// search instead of the makefile's `FONTFILE`.
    pub fn emitted_defines(&self, defines: &[String]) -> Vec<String> {
        match self {
            Family::Besm6 => {
                const FONT_DEFINE: &str = "FONTFILE=${besm6_font}";
                std::iter::once(FONT_DEFINE.to_string())
                    .chain(
                        defines
                            .iter()
                            .filter(|d| {
                                !matches!(d.as_str(), "FONTFILE=${FONTFILE}" | FONT_DEFINE)
                            })
                            .cloned(),
                    )
                    .collect()
            }
            _ => defines.to_vec(),
        }
    }

    /// Written before the simulator stanza.
    pub fn write_prologue(&self, out: &mut impl Write) -> fmt::Result {
        match self {
            Family::Besm6 => {
                writeln!(out, "set(besm6_font)")?;
                writeln!(out, "foreach (fdir IN ITEMS")?;
                for dirs in BESM6_FONT_DIRS {
                    writeln!(out, "           {dirs}")?;
                }
                writeln!(out, "    foreach (font IN ITEMS")?;
                for fonts in BESM6_FONTS {
                    writeln!(out, "                {fonts}")?;
                }
                writeln!(out, "        if (EXISTS ${{fdir}}/${{font}})")?;
                writeln!(out, "            get_filename_component(fontfile ${{fdir}}/${{font}} ABSOLUTE)")?;
                writeln!(out, "            list(APPEND besm6_font ${{fontfile}})")?;
                writeln!(out, "        endif ()")?;
                writeln!(out, "    endforeach()")?;
                writeln!(out, "endforeach()")?;
                writeln!(out)?;
                writeln!(out, "if (besm6_font)")?;
                writeln!(out, "    list(LENGTH besm6_font besm6_font_len)")?;
                writeln!(out, "    if (besm6_font_len GREATER 1)")?;
                writeln!(out, "        message(STATUS \"BESM6: Fonts found ${{besm6_font}}\")")?;
                writeln!(out, "    endif ()")?;
                writeln!(out, "    list(GET besm6_font 0 besm6_font)")?;
                writeln!(out, "    message(STATUS \"BESM6: Using ${{besm6_font}}\")")?;
                writeln!(out, "endif (besm6_font)")?;
                writeln!(out)?;
                writeln!(out, "if (besm6_font)")
            }
            Family::Ka10 => {
                writeln!(out, "option(PANDA_LIGHTS")?;
                writeln!(out, "       \"Enable (=1)/disable (=0) KA-10/KI-11 simulator's Panda display. (def: disabled)\"")?;
                writeln!(out, "       FALSE)")?;
                writeln!(out, "option(PIDP10")?;
                writeln!(out, "       \"Enable (=1)/disable (=0) PIDP10 display options (def: disabled)\"")?;
                writeln!(out, "       FALSE)")?;
                writeln!(out)?;
                writeln!(out, "### Ensure that the options are mutually exclusive:")?;
                writeln!(out, "if (PANDA_LIGHTS AND PIDP10)")?;
                writeln!(out, "  message(FATAL_ERROR \"PANDA_LIGHTS and PIDP10 options are mutually exclusive. Choose one.\")")?;
                writeln!(out, "endif ()")?;
                writeln!(out)
            }
            _ => Ok(()),
        }
    }

    /// Written after the simulator stanza.
    pub fn write_epilogue(&self, out: &mut impl Write, name: &str) -> fmt::Result {
        match self {
            Family::Besm6 => writeln!(out, "endif ()"),
            Family::Ibm650 { stack_size } => {
                writeln!(out)?;
                writeln!(out, "if (WIN32)")?;
                writeln!(out, "    if (MSVC)")?;
                writeln!(out, "        set(I650_STACK_FLAG \"/STACK:{stack_size}\")")?;
                writeln!(out, "    else ()")?;
                writeln!(out, "        set(I650_STACK_FLAG \"-Wl,--stack,{stack_size}\")")?;
                writeln!(out, "    endif ()")?;
                writeln!(out, "    if (CMAKE_VERSION VERSION_GREATER_EQUAL \"3.13\")")?;
                writeln!(out, "        target_link_options({name} PUBLIC \"${{I650_STACK_FLAG}}\")")?;
                writeln!(out, "    else ()")?;
                writeln!(out, "        set_property(TARGET {name} LINK_FLAGS \" ${{I650_STACK_FLAG}}\")")?;
                writeln!(out, "    endif ()")?;
                writeln!(out, "endif()")
            }
            Family::Ibm1130 { .. } => {
                writeln!(out)?;
                writeln!(out, "if (WIN32)")?;
                writeln!(out, "    ## Add GUI support, compile in resources:")?;
                writeln!(out, "    target_compile_definitions({name} PRIVATE GUI_SUPPORT)")?;
                writeln!(out, "    target_sources({name} PRIVATE {name}.rc)")?;
                writeln!(out, "endif()")
            }
            Family::Ka10 => {
                writeln!(out)?;
                writeln!(out, "if (PANDA_LIGHTS)")?;
                writeln!(out, "  target_sources({name} PUBLIC kx10_lights.c)")?;
                writeln!(out, "  target_compile_definitions({name} PUBLIC PANDA_LIGHTS)")?;
                writeln!(out, "  target_link_libraries({name} PUBLIC usb-1.0)")?;
                writeln!(out, "endif ()")?;
                writeln!(out, "if (PIDP10)")?;
                writeln!(out, "  target_sources({name} PUBLIC ka10_pipanel.c)")?;
                writeln!(out, "  target_compile_definitions({name} PUBLIC PIDP10=1)")?;
                writeln!(out, "endif ()")
            }
            Family::Vax => {
                writeln!(out)?;
                writeln!(out, "set(vax_symlink_dir_src ${{CMAKE_CURRENT_BINARY_DIR}})")?;
                writeln!(out, "if (CMAKE_CONFIGURATION_TYPES)")?;
                writeln!(out, "    string(APPEND vax_symlink_dir_src \"/$<CONFIG>\")")?;
                writeln!(out, "endif (CMAKE_CONFIGURATION_TYPES)")?;
                writeln!(
                    out,
                    "add_custom_command(TARGET {name} POST_BUILD \
                     COMMAND \"${{CMAKE_COMMAND}}\" -E copy_if_different \
                     {name}${{CMAKE_EXECUTABLE_SUFFIX}} microvax3900${{CMAKE_EXECUTABLE_SUFFIX}} \
                     COMMENT \"Copy {name}${{CMAKE_EXECUTABLE_SUFFIX}} to microvax3900${{CMAKE_EXECUTABLE_SUFFIX}}\" \
                     WORKING_DIRECTORY ${{vax_symlink_dir_src}})"
                )?;
                writeln!(out, "install(FILES ${{vax_symlink_dir_src}}/microvax3900${{CMAKE_EXECUTABLE_SUFFIX}}")?;
                writeln!(out, "        DESTINATION ${{CMAKE_INSTALL_BINDIR}})")
            }
            _ => Ok(()),
        }
    }
}
