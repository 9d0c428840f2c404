use crate::config::Config;
use crate::contexts::{BannerContext, ManifestContext};
use crate::registry::{DirectoryGroup, Registry, TargetRecord, VarValue};
use crate::templates::{GENERATED_BANNER, SIMULATORS_MANIFEST, UNIT_TEST_BANNER};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::{self, Write};
use std::fs;
use std::path::{Path, PathBuf};
use tinytemplate::{TinyTemplate, format_unescaped};
use tracing::info;

const CURRENT_SOURCE_DIR: &str = "${CMAKE_CURRENT_SOURCE_DIR}";

pub fn render_template<T: Serialize>(template: &str, ctx: &T) -> Result<String> {
    let mut tt = TinyTemplate::new();
    tt.set_default_formatter(&format_unescaped);
    tt.add_template("tpl", template)?;

    // CMake text, no HTML escaping
    Ok(tt.render("tpl", ctx)?)
}

/// One `add_simulator(...)` or `add_unit_test(...)` call.
struct Stanza<'a> {
    command: &'a str,
    name: String,
    sources: Vec<String>,
    includes: Vec<String>,
    defines: Vec<String>,
    int64: bool,
    full64: bool,
    video: bool,
    video_var: Option<String>,
    build_roms: bool,
    label: &'a str,
    test: Option<&'a str>,
    test_args: Option<&'a str>,
}

impl Stanza<'_> {
    fn write(&self, out: &mut impl Write, indent: usize) -> fmt::Result {
        let pad = " ".repeat(indent);
        let pad4 = " ".repeat(indent + 4);
        let pad8 = " ".repeat(indent + 8);

        write!(out, "{pad}{}({}", self.command, self.name)?;
        write!(out, "\n{pad4}SOURCES")?;
        for src in &self.sources {
            write!(out, "\n{pad8}{src}")?;
        }
        for (keyword, items) in [("INCLUDES", &self.includes), ("DEFINES", &self.defines)] {
            if items.is_empty() {
                continue;
            }
            write!(out, "\n{pad4}{keyword}")?;
            for item in items {
                write!(out, "\n{pad8}{item}")?;
            }
        }
        for (set, keyword) in [(self.int64, "INT64"), (self.full64, "FULL64"), (self.video, "VIDEO")] {
            if set {
                write!(out, "\n{pad4}{keyword}")?;
            }
        }
        if let Some(var) = &self.video_var {
            write!(out, "\n{pad4}${{{var}}}")?;
        }
        if self.build_roms {
            write!(out, "\n{pad4}BUILDROMS")?;
        }
        write!(out, "\n{pad4}LABEL {}", self.label)?;
        if let Some(test) = self.test {
            write!(out, "\n{pad4}TEST {test}")?;
        }
        if let Some(args) = self.test_args {
            write!(out, "\n{pad4}TEST_ARGS \"{args}\"")?;
        }
        writeln!(out, ")")
    }
}

fn video_var(record: &TargetRecord) -> String {
    format!("{}_VIDEO", record.name.to_uppercase())
}

/// Sources are written relative to the simulator's directory, and the
/// directory include becomes the current source dir.
fn simulator_stanza<'a>(
    group: &'a DirectoryGroup,
    record: &'a TargetRecord,
    config: &Config,
) -> Stanza<'a> {
    let prefix = format!("{}/", record.dir_macro);
    let family = &record.family;
    Stanza {
        command: "add_simulator",
        name: record.name.clone(),
        sources: group
            .resolved_sources(record, config)
            .into_iter()
            .map(|src| src.replace(&prefix, ""))
            .collect(),
        includes: record
            .includes()
            .iter()
            .map(|inc| {
                if *inc == record.dir_macro {
                    CURRENT_SOURCE_DIR.to_string()
                } else {
                    inc.clone()
                }
            })
            .collect(),
        defines: family.emitted_defines(record.defines()),
        int64: record.flags.int64,
        full64: record.flags.full64,
        video: record.flags.has_display || family.forces_display(),
        video_var: record.flags.uses_video.then(|| video_var(record)),
        build_roms: record.build_roms,
        label: group.label(),
        test: Some(record.test_name.as_str()),
        test_args: record.test_args.as_deref(),
    }
}

fn write_simulator(
    out: &mut String,
    group: &DirectoryGroup,
    record: &TargetRecord,
    config: &Config,
) -> fmt::Result {
    let family = &record.family;
    family.write_prologue(out)?;

    let indent = family.body_indent();
    let pad = " ".repeat(indent);
    if record.flags.uses_video {
        let var = video_var(record);
        writeln!(out, "{pad}if (BUILD_WITH_VIDEO)")?;
        writeln!(out, "{pad}    set({var} \"VIDEO\")")?;
        writeln!(out, "{pad}else (BUILD_WITH_VIDEO)")?;
        writeln!(out, "{pad}    set({var} \"\")")?;
        writeln!(out, "{pad}endif (BUILD_WITH_VIDEO)")?;
        writeln!(out)?;
    }

    let stanza = simulator_stanza(group, record, config);
    if stanza.video {
        writeln!(out, "{pad}if (BUILD_WITH_VIDEO)")?;
        stanza.write(out, indent + 4)?;
        writeln!(out, "{pad}endif (BUILD_WITH_VIDEO)")?;
    } else {
        stanza.write(out, indent)?;
    }

    family.write_epilogue(out, &record.name)
}

fn directory_title(group: &DirectoryGroup) -> String {
    let plural = if group.targets.len() == 1 { "" } else { "s" };
    format!("{} simulator{plural}", group.path)
}

/// `<dir>/CMakeLists.txt` for one directory group.
pub fn render_directory(group: &DirectoryGroup, config: &Config) -> Result<String> {
    let title = directory_title(group);
    let mut out = render_template(GENERATED_BANNER, &BannerContext { title: &title })?;
    writeln!(
        out,
        "if (HAVE_UNITY_FRAMEWORK AND EXISTS \"{CURRENT_SOURCE_DIR}/unit-tests/CMakeLists.txt\")"
    )?;
    writeln!(out, "  add_subdirectory(unit-tests)")?;
    writeln!(out, "endif ()")?;

    for name in group.shared_macros(config) {
        let Some(definition) = group.source_macros.get(&name) else {
            continue;
        };
        write!(out, "\nset({name}")?;
        for item in definition {
            write!(out, "\n    {item}")?;
        }
        writeln!(out, ")")?;
    }

    for record in group.targets.values() {
        writeln!(out)?;
        write_simulator(&mut out, group, record, config)?;
    }
    Ok(out)
}

/// `<dir>/unit-tests/CMakeLists.txt`: the banner, then one stanza per
/// program with unit tests.
pub fn render_unit_tests(group: &DirectoryGroup) -> Result<String> {
    let records = group
        .targets
        .values()
        .filter(|record| record.family.has_unit_test());

    let title = directory_title(group);
    let mut out = render_template(UNIT_TEST_BANNER, &BannerContext { title: &title })?;
    for record in records {
        let stanza = Stanza {
            command: "add_unit_test",
            name: format!("vax_cc_{}", record.name),
            sources: vec!["vax_cc.c".to_string()],
            includes: record.includes().to_vec(),
            defines: record.defines().to_vec(),
            int64: record.flags.int64,
            full64: record.flags.full64,
            video: false,
            video_var: None,
            build_roms: false,
            label: group.label(),
            test: None,
            test_args: None,
        };
        writeln!(out)?;
        stanza.write(&mut out, 0)?;
    }
    Ok(out)
}

fn quoted(value: &VarValue) -> String {
    match value {
        VarValue::Text(text) => format!("\"{text}\""),
        VarValue::List(items) => items
            .iter()
            .map(|item| format!("\"{item}\""))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// `cmake/simh-simulators.cmake`: shared variables, then every directory.
pub fn render_manifest(registry: &Registry, config: &Config) -> Result<String> {
    let order = registry.emission_order(config);
    let width = order.iter().map(|name| name.len()).max().unwrap_or(0);
    let mut vars = String::new();
    for name in order {
        if let Some(value) = registry.vars.get(name) {
            writeln!(vars, "set({name:width$} {})", quoted(value))?;
        }
    }

    let banner = render_template(GENERATED_BANNER, &BannerContext { title: "" })?;
    let ctx = ManifestContext {
        banner: &banner,
        vars: &vars,
        display_macros: config.display.macros.keys().map(String::as_str).collect(),
        dirs: registry.dirs.keys().map(String::as_str).collect(),
    };
    render_template(SIMULATORS_MANIFEST, &ctx)
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    info!("Generated {}", path.display());
    Ok(())
}

/// Write every directory's CMakeLists.txt, existing unit test lists, and the
/// manifest under `root`. Returns the paths written.
pub fn write_tree(registry: &Registry, config: &Config, root: &Path) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for group in registry.dirs.values() {
        let dir = root.join(&group.path);
        let path = dir.join("CMakeLists.txt");
        write_file(&path, &render_directory(group, config)?)?;
        written.push(path);

        // Only refresh unit test lists that are already there.
        let unit_tests = dir.join("unit-tests").join("CMakeLists.txt");
        if unit_tests.exists() {
            write_file(&unit_tests, &render_unit_tests(group)?)?;
            written.push(unit_tests);
        }
    }

    let manifest = root.join("cmake").join("simh-simulators.cmake");
    write_file(&manifest, &render_manifest(registry, config)?)?;
    written.push(manifest);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::Family;

    fn config() -> Config {
        Config::builtin().unwrap()
    }

    fn pdp1_group() -> DirectoryGroup {
        let mut group = DirectoryGroup::new("${PDP1D}", "PDP1");
        let mut rec = TargetRecord::new("pdp1", "${PDP1D}", "pdp1");
        rec.add_source("${PDP1D}/pdp1_cpu.c");
        rec.add_source("${PDP1D}/pdp1_sys.c");
        rec.add_include("${PDP1D}");
        rec.add_define("PDP1");
        group.insert_target(rec);
        group
    }

    #[test]
    fn banner_renders_title_and_skips_empty_one() {
        let titled = render_template(GENERATED_BANNER, &BannerContext { title: "PDP1 simulator" }).unwrap();
        assert!(titled.starts_with("## PDP1 simulator\n##\n"));
        let bare = render_template(GENERATED_BANNER, &BannerContext { title: "" }).unwrap();
        assert!(bare.starts_with("##\n## This is an automagically generated file."));
    }

    #[test]
    fn directory_file_uses_relative_sources() {
        let out = render_directory(&pdp1_group(), &config()).unwrap();
        assert!(out.starts_with("## PDP1 simulator\n"));
        assert!(out.contains("  add_subdirectory(unit-tests)\nendif ()\n"));
        assert!(out.ends_with(
            "\nadd_simulator(pdp1\n    SOURCES\n        pdp1_cpu.c\n        pdp1_sys.c\n    \
             INCLUDES\n        ${CMAKE_CURRENT_SOURCE_DIR}\n    DEFINES\n        PDP1\n    \
             LABEL PDP1\n    TEST pdp1)\n"
        ));
    }

    #[test]
    fn shared_macro_display_and_video() {
        let mut group = DirectoryGroup::new("${PDP18BD}", "PDP18B");
        for user in ["pdp4", "pdp7"] {
            group.add_source_macro("PDP18B", vec!["${PDP18BD}/a.c".into()], user);
        }
        let mut pdp4 = TargetRecord::new("pdp4", "${PDP18BD}", "pdp4");
        pdp4.add_source("${PDP18B}");
        pdp4.flags.has_display = true;
        let mut pdp7 = TargetRecord::new("pdp7", "${PDP18BD}", "pdp7");
        pdp7.add_source("${PDP18B}");
        pdp7.flags.uses_video = true;
        pdp7.build_roms = true;
        group.insert_target(pdp4);
        group.insert_target(pdp7);

        let out = render_directory(&group, &config()).unwrap();
        assert!(out.starts_with("## PDP18B simulators\n"));
        assert!(out.contains("\nset(PDP18B\n    ${PDP18BD}/a.c)\n"));
        assert!(out.contains(
            "if (BUILD_WITH_VIDEO)\n    add_simulator(pdp4\n        SOURCES\n            ${PDP18B}\n        \
             VIDEO\n        LABEL PDP18B\n        TEST pdp4)\nendif (BUILD_WITH_VIDEO)\n"
        ));
        assert!(out.contains(
            "if (BUILD_WITH_VIDEO)\n    set(PDP7_VIDEO \"VIDEO\")\nelse (BUILD_WITH_VIDEO)\n    \
             set(PDP7_VIDEO \"\")\nendif (BUILD_WITH_VIDEO)\n\nadd_simulator(pdp7\n    SOURCES\n        \
             ${PDP18B}\n    ${PDP7_VIDEO}\n    BUILDROMS\n    LABEL PDP18B\n    TEST pdp7)\n"
        ));
    }

    #[test]
    fn besm6_is_guarded_by_font_search() {
        let mut group = DirectoryGroup::new("${BESM6D}", "BESM6");
        let mut rec = TargetRecord::new("besm6", "${BESM6D}", "besm6");
        rec.add_source("${BESM6D}/besm6_cpu.c");
        rec.add_define("FONTFILE=${FONTFILE}");
        rec.family = Family::Besm6;
        group.insert_target(rec);

        let out = render_directory(&group, &config()).unwrap();
        assert!(out.contains("if (besm6_font)\n    if (BUILD_WITH_VIDEO)\n        add_simulator(besm6\n"));
        assert!(out.contains("\n                FONTFILE=${besm6_font}\n"));
        assert!(!out.contains("FONTFILE=${FONTFILE}"));
        assert!(out.ends_with("    endif (BUILD_WITH_VIDEO)\nendif ()\n"));
    }

    #[test]
    fn test_args_are_quoted() {
        let mut group = DirectoryGroup::new("${IBM1130D}", "Ibm1130");
        let mut rec = TargetRecord::new("ibm1130", "${IBM1130D}", "ibm1130");
        rec.add_source("${IBM1130D}/ibm1130_cpu.c");
        rec.family = Family::Ibm1130 { test_args: "-g".into() };
        rec.test_args = Some("-g".into());
        group.insert_target(rec);

        let out = render_directory(&group, &config()).unwrap();
        assert!(out.contains("    TEST ibm1130\n    TEST_ARGS \"-g\")\n"));
        assert!(out.contains("target_sources(ibm1130 PRIVATE ibm1130.rc)"));
    }

    #[test]
    fn manifest_orders_vars_and_lists_directories() {
        let config = config();
        let mut registry = Registry::new(&config);
        registry.vars.insert(
            "PDP1D".into(),
            VarValue::Text("${CMAKE_SOURCE_DIR}/PDP1".into()),
        );
        registry.vars.insert(
            "DISPLAYD".into(),
            VarValue::Text("${CMAKE_SOURCE_DIR}/display".into()),
        );
        registry.dirs.insert("PDP1".into(), pdp1_group());

        let out = render_manifest(&registry, &config).unwrap();
        assert!(out.contains("set(PDP1D      \"${CMAKE_SOURCE_DIR}/PDP1\")\n"));
        assert!(out.contains("set(DISPLAYVT  \"${DISPLAYD}/vt11.c\")\n"));
        let displayd = out.find("set(DISPLAYD").unwrap();
        let display340 = out.find("set(DISPLAY340").unwrap();
        assert!(displayd < display340);
        assert!(out.contains("if (NOT WITH_VIDEO)\n"));
        assert!(out.contains("    set(DISPLAY340 \"\")\n    set(DISPLAYIII \"\")\n"));
        assert!(out.ends_with("add_subdirectory(PDP1)\n"));
    }

    #[test]
    fn write_tree_refreshes_existing_unit_test_lists_only() {
        let config = config();
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("VAX/unit-tests")).unwrap();
        fs::write(root.path().join("VAX/unit-tests/CMakeLists.txt"), "old").unwrap();

        let mut registry = Registry::new(&config);
        let mut vax_group = DirectoryGroup::new("${VAXD}", "VAX");
        let mut vax = TargetRecord::new("vax", "${VAXD}", "vax");
        vax.add_source("${VAXD}/vax_cpu.c");
        vax.family = Family::Vax;
        vax_group.insert_target(vax);
        registry.dirs.insert("VAX".into(), vax_group);
        registry.dirs.insert("PDP1".into(), pdp1_group());

        fs::create_dir_all(root.path().join("PDP11/unit-tests")).unwrap();
        fs::write(root.path().join("PDP11/unit-tests/CMakeLists.txt"), "stale").unwrap();
        let mut pdp11_group = DirectoryGroup::new("${PDP11D}", "PDP11");
        pdp11_group.insert_target(TargetRecord::new("pdp11", "${PDP11D}", "pdp11"));
        registry.dirs.insert("PDP11".into(), pdp11_group);

        let written = write_tree(&registry, &config, root.path()).unwrap();
        assert_eq!(written.len(), 6);
        let pdp11_tests =
            fs::read_to_string(root.path().join("PDP11/unit-tests/CMakeLists.txt")).unwrap();
        assert!(pdp11_tests.starts_with("## PDP11 simulator\n##\n"));
        assert!(!pdp11_tests.contains("add_unit_test"));

        let vax_file = fs::read_to_string(root.path().join("VAX/CMakeLists.txt")).unwrap();
        assert!(vax_file.contains("microvax3900"));
        let unit_tests = fs::read_to_string(root.path().join("VAX/unit-tests/CMakeLists.txt")).unwrap();
        assert!(unit_tests.contains("add_unit_test(vax_cc_vax\n    SOURCES\n        vax_cc.c\n    LABEL VAX)\n"));
        assert!(root.path().join("PDP1/CMakeLists.txt").exists());
        assert!(!root.path().join("PDP1/unit-tests").exists());
        let manifest = fs::read_to_string(root.path().join("cmake/simh-simulators.cmake")).unwrap();
        assert!(manifest.contains("add_subdirectory(PDP1)\nadd_subdirectory(VAX)\n"));
    }
}
