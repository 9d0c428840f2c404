use crate::config::Config;
use crate::registry::{DirectoryGroup, Registry, TargetRecord, VarValue};
use makefile_parser::{Diagnostics, Makefile, bare_reference, normalize_variables};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, trace};

/// What the walker found for one program target.
#[derive(Debug)]
pub struct Invocation<'a> {
    pub program: String,
    /// Compiler arguments following `${CC}`.
    pub command: &'a str,
    pub test_name: &'a str,
    pub dir_macro: &'a str,
    /// `dir_macro` fully expanded, `./` removed.
    pub dir_path: String,
    pub build_roms: bool,
}

/// Mines a compile line for sources, include paths and defines.
pub struct Extractor<'a> {
    makefile: &'a Makefile,
    config: &'a Config,
    diag: &'a mut Diagnostics,
}

impl<'a> Extractor<'a> {
    pub fn new(makefile: &'a Makefile, config: &'a Config, diag: &'a mut Diagnostics) -> Self {
        Self {
            makefile,
            config,
            diag,
        }
    }

    pub fn extract(&mut self, inv: &Invocation<'_>, registry: &mut Registry) {
        let Registry { dirs, vars: shared } = registry;
        let group = dirs
            .entry(inv.dir_path.clone())
            .or_insert_with(|| DirectoryGroup::new(inv.dir_macro, &inv.dir_path));
        let mut record = group
            .take_target(&inv.program)
            .unwrap_or_else(|| TargetRecord::new(&inv.program, inv.dir_macro, inv.test_name));
        record.build_roms |= inv.build_roms;

        let mut comps: VecDeque<String> = inv
            .command
            .split_whitespace()
            .filter(|tok| !self.config.is_ignored_compile_elem(tok))
            .map(normalize_variables)
            .collect();
        trace!(program = %inv.program, "components after filtering: {:?}", comps);

        while let Some(comp) = comps.pop_front() {
            if self.config.is_source(&comp) {
                record.add_source(comp);
            } else if let Some(arg) = comp.strip_prefix("-I") {
                if let Some(path) = self.flag_argument(arg, &mut comps, &inv.program) {
                    self.capture_flag_vars(&path, shared);
                    record.add_include(path);
                }
            } else if let Some(arg) = comp.strip_prefix("-D") {
                if let Some(def) = self.flag_argument(arg, &mut comps, &inv.program) {
                    self.capture_flag_vars(&def, shared);
                    record.add_define(def);
                }
            } else if comp.starts_with("-L") || comp.starts_with("-l") {
                trace!("link-time argument skipped: {comp}");
            } else if let Some(name) = bare_reference(&comp) {
                if self.config.display.is_special(name) {
                    record.add_source(comp.as_str());
                } else if self.is_source_macro(name) {
                    let mut seen = BTreeSet::new();
                    self.collect_source_macros(name, group, &inv.program, &mut seen);
                    record.add_source(comp.as_str());
                } else if !self.makefile.variables.contains(name) {
                    self.diag.undefined_macro(name);
                } else {
                    let expanded: Vec<String> = self
                        .makefile
                        .variables
                        .shallow_expand(&comp)
                        .split_whitespace()
                        .filter(|elem| !self.config.is_ignored_source_elem(elem))
                        .map(normalize_variables)
                        .collect();
                    trace!("var expanded {comp} -> {expanded:?}");
                    for elem in expanded.into_iter().rev() {
                        comps.push_front(elem);
                    }
                }
            } else {
                self.diag
                    .report(format!("{}: unknown component: {comp}", inv.program));
            }
        }

        record.scan_for_flags(&self.makefile.variables, self.config);
        record.cleanup_defines(&self.config.cleanup_defines);
        debug!(?record, "extracted");
        group.insert_target(record);
    }

    /// `-Dfoo` carries its argument, `-D foo` takes the next component.
    fn flag_argument(
        &mut self,
        joined: &str,
        comps: &mut VecDeque<String>,
        program: &str,
    ) -> Option<String> {
        if !joined.is_empty() {
            return Some(joined.to_string());
        }
        let next = comps.pop_front();
        if next.is_none() {
            self.diag
                .report(format!("{program}: flag without an argument at end of compile line"));
        }
        next
    }

    /// A flag argument that is a single variable reference, or whose
    /// `NAME` side of `NAME=value` is one, gets that variable recorded for
    /// the manifest. The value side is left alone. The flag itself is kept
    /// either way.
    fn capture_flag_vars(&mut self, arg: &str, shared: &mut BTreeMap<String, VarValue>) {
        let name_side = arg.split_once('=').map_or(arg, |(name, _)| name);
        let Some(var) = bare_reference(arg).or_else(|| bare_reference(name_side)) else {
            return;
        };
        match self.makefile.variables.get(var) {
            Some(value) => {
                shared
                    .entry(var.to_string())
                    .or_insert_with(|| VarValue::Text(value.to_string()));
            }
            None => self.diag.undefined_macro(var),
        }
    }

    /// A variable whose full expansion is a non-empty list of source files.
    fn is_source_macro(&self, name: &str) -> bool {
        let expanded = self
            .makefile
            .variables
            .deep_expand_quiet(&format!("${{{name}}}"));
        let mut tokens = expanded.split_whitespace().peekable();
        tokens.peek().is_some() && tokens.all(|tok| self.config.is_source(tok))
    }

    /// Record `name` and every source macro nested inside it with the
    /// directory group, each as its own list.
    fn collect_source_macros(
        &mut self,
        name: &str,
        group: &mut DirectoryGroup,
        program: &str,
        seen: &mut BTreeSet<String>,
    ) {
        if !seen.insert(name.to_string()) {
            return;
        }
        let makefile = self.makefile;
        let Some(value) = makefile.variables.get(name) else {
            self.diag.undefined_macro(name);
            return;
        };
        let definition: Vec<String> = value
            .split_whitespace()
            .filter(|elem| !self.config.is_ignored_source_elem(elem))
            .map(normalize_variables)
            .collect();
        trace!("source macro: {name} -> {definition:?}");

        for inner in definition.iter().filter_map(|elem| bare_reference(elem)) {
            if makefile.variables.contains(inner) {
                self.collect_source_macros(inner, group, program, seen);
            }
        }
        group.add_source_macro(name, definition, program);
    }
}
