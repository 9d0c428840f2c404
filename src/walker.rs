use crate::config::Config;
use crate::extract::{Extractor, Invocation};
use crate::registry::Registry;
use makefile_parser::{Diagnostics, Makefile, bare_reference, normalize_variables};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use tracing::{debug, trace};

/// Simulator compile/link action.
static COMPILE_ACTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$[({]CC[)}]\s*(.*)$").unwrap());
/// `$@ $(call find_test,<dir macro>,<test name>) ...`
static TEST_REGISTRATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$@\s*\$\(call\s+find_test,\s*(.*),(.*)\)\s+\$").unwrap()
});

/// Parse result in, registry out: walk every target reachable from the root
/// rule, then carry over referenced variables and assign families.
pub fn process_makefile(makefile: &Makefile, config: &Config, diag: &mut Diagnostics) -> Registry {
    let mut registry = Registry::new(config);
    let Some(root) = makefile.rules.get(&config.root_rule) else {
        diag.report(format!(
            "\"{}\" rule not found. Cannot process.",
            config.root_rule
        ));
        return registry;
    };

    let mut walker = Walker::new(makefile, config, diag);
    for target in makefile.variables.shallow_expand(root).split_whitespace() {
        walker.walk(&normalize_variables(target), &mut registry);
    }
    if registry.is_empty() {
        debug!("no simulators found");
        return registry;
    }

    registry.collect_vars(makefile, config, diag);
    registry.assign_families(config);
    registry
}

pub struct Walker<'a> {
    makefile: &'a Makefile,
    config: &'a Config,
    diag: &'a mut Diagnostics,
    visited: BTreeSet<String>,
}

impl<'a> Walker<'a> {
    pub fn new(makefile: &'a Makefile, config: &'a Config, diag: &'a mut Diagnostics) -> Self {
        Self {
            makefile,
            config,
            diag,
            visited: BTreeSet::new(),
        }
    }

    /// Depth-first over dependencies. Targets without actions are meta
    /// targets and are descended into; targets with actions are checked for
    /// a simulator build and never descended into.
    pub fn walk(&mut self, root: &str, registry: &mut Registry) {
        let mut stack = vec![(root.to_string(), 0usize)];
        while let Some((target, depth)) = stack.pop() {
            if !self.visited.insert(target.clone()) {
                continue;
            }
            debug!("{:indent$}-- target: {target}", "", indent = depth * 2);

            let raw = self.makefile.dependencies(&target);
            let build_roms = raw.contains(&self.config.build_roms_dep.as_str());
            let deps: Vec<&str> = raw
                .into_iter()
                .filter(|dep| !self.config.ignored_deps.contains(*dep))
                .collect();

            let actions = self.makefile.actions(&target);
            if actions.is_empty() {
                let next = self.meta_dependencies(&deps);
                stack.extend(next.into_iter().rev().map(|dep| (dep, depth + 1)));
            } else {
                self.visit_leaf(&target, &deps, actions, build_roms, registry);
            }
        }
    }

    /// Dependencies of a meta target. A bare variable reference that names
    /// no rule stands for a list of targets.
    fn meta_dependencies(&self, deps: &[&str]) -> Vec<String> {
        let mut next = Vec::new();
        for dep in deps {
            match bare_reference(dep) {
                Some(_) if !self.makefile.has_rule(dep) => next.extend(
                    self.makefile
                        .variables
                        .shallow_expand(dep)
                        .split_whitespace()
                        .map(normalize_variables),
                ),
                _ => next.push(dep.to_string()),
            }
        }
        next
    }

    fn visit_leaf(
        &mut self,
        target: &str,
        deps: &[&str],
        actions: &'a [String],
        build_roms: bool,
        registry: &mut Registry,
    ) {
        let makefile = self.makefile;
        let vars = &makefile.variables;
        let expanded: Vec<String> = deps
            .iter()
            .flat_map(|dep| {
                vars.shallow_expand(dep)
                    .split_whitespace()
                    .map(String::from)
                    .collect::<Vec<_>>()
            })
            .collect();
        trace!("{target}: expanded deps {expanded:?}");
        let has_source = expanded.iter().any(|dep| self.config.is_source(dep))
            || deps.iter().any(|dep| {
                vars.deep_expand_quiet(dep)
                    .split_whitespace()
                    .any(|tok| self.config.is_source(tok))
            });
        if !has_source {
            trace!("{target}: no sources, not a simulator");
            return;
        }

        let mut command = None;
        let mut test = None;
        for act in actions {
            if let Some(cap) = COMPILE_ACTION.captures(act) {
                let (_, [args]) = cap.extract();
                command = Some(args);
            } else if let Some(cap) = TEST_REGISTRATION.captures(act) {
                let (_, [dir, name]) = cap.extract();
                test = Some((dir.trim(), name.trim()));
            }
        }

        let (Some(command), Some((dir_macro, test_name))) = (command, test) else {
            debug!("{target}: skipped, missing compile or test action");
            return;
        };
        let dir_path = vars.deep_expand(dir_macro, &mut *self.diag).replace("./", "");
        if dir_path.is_empty() || test_name.is_empty() {
            debug!("{target}: skipped, no simulator directory");
            return;
        }

        let inv = Invocation {
            program: self.config.program_name(target),
            command,
            test_name,
            dir_macro,
            dir_path,
            build_roms,
        };
        debug!("{target}: simulator {} in {}", inv.program, inv.dir_path);
        Extractor::new(makefile, self.config, &mut *self.diag).extract(&inv, registry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::Family;
    use crate::registry::VarValue;
    use makefile_parser::parse_makefile;

    fn process(text: &str) -> (Registry, Diagnostics) {
        let makefile = parse_makefile(text);
        let config = Config::builtin().unwrap();
        let mut diag = Diagnostics::new();
        let registry = process_makefile(&makefile, &config, &mut diag);
        (registry, diag)
    }

    #[test]
    fn single_use_macro_resolves_and_int64_is_flagged() {
        let text = "\
FOO = a.c b.c
all : mysim
mysim: $(FOO)
\t$(CC) $(FOO) -DUSE_INT64 -I${FOO}dir -o $@
\t$@ $(call find_test,mydir,mysim) ${TEST_ARG}
";
        let (registry, _) = process(text);
        let config = Config::builtin().unwrap();
        let group = &registry.dirs["mydir"];
        let rec = &group.targets["mysim"];
        assert_eq!(group.resolved_sources(rec, &config), ["a.c", "b.c"]);
        assert!(rec.flags.int64);
        assert!(!rec.flags.full64);
        assert!(!rec.defines().iter().any(|d| d == "USE_INT64"));
        assert_eq!(rec.includes(), ["${FOO}dir"]);
        assert_eq!(registry.vars["FOO"], VarValue::Text("a.c b.c".into()));
    }

    #[test]
    fn undefined_nested_macro_expands_empty_once() {
        let makefile = parse_makefile("BAR = $(BAZ)\n");
        let mut diag = Diagnostics::new();
        assert_eq!(makefile.variables.deep_expand("${BAR}", &mut diag), "");
        assert_eq!(makefile.variables.deep_expand("${BAR}", &mut diag), "");
        assert_eq!(diag.undefined().collect::<Vec<_>>(), vec!["BAZ"]);
        assert_eq!(diag.messages(), ["undefined macro: BAZ"]);
    }

    const PDP18B: &str = "\
SIMHD = .
PDP18BD = ${SIMHD}/PDP18B
PDP18B = ${PDP18BD}/pdp18b_cpu.c ${PDP18BD}/pdp18b_sys.c
PDP18B_OPT = -I ${PDP18BD}

all : ${ALL}
ALL = pdp4 pdp7 pdp1

pdp4 : ${BIN}pdp4${EXE}

${BIN}pdp4${EXE} : ${PDP18B} ${SIM}
\t${MKDIRBIN}
\t$(CC) ${PDP18B} ${PDP18B_OPT} -DPDP4 ${SIM} ${CC_OUTSPEC} ${LDFLAGS}
ifneq (,$(call find_test,${PDP18BD},pdp4))
\t$@ $(call find_test,${PDP18BD},pdp4) ${TEST_ARG}
endif

pdp7 : ${BIN}pdp7${EXE}

${BIN}pdp7${EXE} : ${PDP18B} ${SIM} ${BUILD_ROMS}
\t${MKDIRBIN}
\t$(CC) ${PDP18B} ${PDP18B_OPT} -DPDP7 ${SIM} ${CC_OUTSPEC} ${LDFLAGS}
\t$@ $(call find_test,${PDP18BD},pdp7) ${TEST_ARG}

pdp1 : ${BIN}pdp1${EXE}

${BIN}pdp1${EXE} : ${PDP1} ${SIM}
\t$(CC) ${PDP1} ${CC_OUTSPEC} ${LDFLAGS}
";

    #[test]
    fn macro_shared_by_two_programs_stays_symbolic() {
        let (registry, _) = process(PDP18B);
        let config = Config::builtin().unwrap();
        let group = &registry.dirs["PDP18B"];
        assert_eq!(group.targets.len(), 2);
        assert_eq!(group.source_macros.len(), 1);
        assert_eq!(
            group.macro_uses["PDP18B"].iter().collect::<Vec<_>>(),
            ["pdp4", "pdp7"]
        );
        for name in ["pdp4", "pdp7"] {
            let rec = &group.targets[name];
            assert_eq!(rec.sources(), ["${PDP18B}"]);
            assert_eq!(group.resolved_sources(rec, &config), ["${PDP18B}"]);
            assert_eq!(rec.includes(), ["${PDP18BD}"]);
        }
        assert_eq!(group.targets["pdp4"].defines(), ["PDP4"]);
        assert!(group.targets["pdp7"].build_roms);
        assert!(!group.targets["pdp4"].build_roms);
        assert_eq!(group.label(), "PDP18B");
        assert!(registry.vars.contains_key("PDP18BD"));
    }

    #[test]
    fn nested_source_macros_still_make_a_simulator() {
        let text = "\
VAXD = VAX
VAX_CORE = ${VAXD}/vax_cpu.c
VAX_IO = ${VAXD}/vax_io.c
VAX = ${VAX_CORE} ${VAX_IO}
all : vax
vax : ${BIN}vax${EXE}
${BIN}vax${EXE} : ${VAX} ${SIM}
\t$(CC) ${VAX} ${SIM} -o $@
\t$@ $(call find_test,${VAXD},vax) ${TEST_ARG}
";
        let (registry, _) = process(text);
        let config = Config::builtin().unwrap();
        let group = &registry.dirs["VAX"];
        let rec = &group.targets["vax"];
        assert_eq!(rec.family, Family::Vax);
        assert_eq!(
            group.resolved_sources(rec, &config),
            ["${VAXD}/vax_cpu.c", "${VAXD}/vax_io.c"]
        );
    }

    #[test]
    fn target_without_test_line_is_skipped() {
        let (registry, _) = process(PDP18B);
        assert!(registry.target("pdp1").is_none());
    }

    #[test]
    fn meta_only_graph_yields_empty_registry() {
        let (registry, diag) = process("all : alpha beta\nalpha : gamma\nbeta : gamma delta\n");
        assert!(registry.is_empty());
        assert!(diag.is_empty());
    }

    #[test]
    fn missing_root_rule_is_reported() {
        let (registry, diag) = process("FOO = 1\nother : thing\n");
        assert!(registry.is_empty());
        assert_eq!(diag.messages().len(), 1);
    }

    #[test]
    fn action_target_without_sources_is_inert() {
        let (registry, _) = process("all : clean\nclean :\n\trm -rf BIN\n");
        assert!(registry.is_empty());
    }

    #[test]
    fn cyclic_meta_targets_terminate() {
        let (registry, _) = process("all : alpha\nalpha : beta\nbeta : alpha\n");
        assert!(registry.is_empty());
    }

    #[test]
    fn families_are_assigned_after_the_walk() {
        let text = "\
I650D = I650
all : i650
i650 : ${BIN}i650${EXE}
${BIN}i650${EXE} : ${I650D}/i650_cpu.c
\t$(CC) ${I650D}/i650_cpu.c -o $@
\t$@ $(call find_test,${I650D},i650) ${TEST_ARG}
";
        let (registry, _) = process(text);
        let rec = registry.target("i650").unwrap();
        assert_eq!(rec.family, Family::Ibm650 { stack_size: 8 * 1024 * 1024 });
        assert_eq!(rec.sources(), ["${I650D}/i650_cpu.c"]);
        assert!(registry.dirs.contains_key("I650"));
    }
}
