use crate::config::Config;
use crate::family::Family;
use makefile_parser::{Diagnostics, Makefile, Variables, bare_reference, extract_references};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// A shared variable: a raw makefile value, or a list seeded from config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum VarValue {
    Text(String),
    List(Vec<String>),
}

impl VarValue {
    pub fn references(&self) -> Vec<&str> {
        match self {
            VarValue::Text(s) => extract_references(s),
            VarValue::List(items) => items.iter().flat_map(|s| extract_references(s)).collect(),
        }
    }

    fn rename_reference(&mut self, from: &str, to: &str) {
        let from = format!("${{{from}}}");
        let to = format!("${{{to}}}");
        match self {
            VarValue::Text(s) => *s = s.replace(&from, &to),
            VarValue::List(items) => {
                for item in items.iter_mut() {
                    *item = item.replace(&from, &to);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeatureFlags {
    pub int64: bool,
    pub full64: bool,
    pub has_display: bool,
    pub uses_video: bool,
    pub async_io: bool,
}

fn push_unique(list: &mut Vec<String>, item: impl Into<String>) {
    let item = item.into();
    if !list.contains(&item) {
        list.push(item);
    }
}

fn remove_item(list: &mut Vec<String>, item: &str) -> bool {
    let before = list.len();
    list.retain(|s| s != item);
    list.len() != before
}

/// One simulator program mined from the makefile.
#[derive(Debug, Clone, Serialize)]
pub struct TargetRecord {
    pub name: String,
    /// The directory macro as written in the test line, e.g. `${PDP1D}`.
    pub dir_macro: String,
    pub test_name: String,
    pub test_args: Option<String>,
    pub build_roms: bool,
    pub family: Family,
    sources: Vec<String>,
    includes: Vec<String>,
    defines: Vec<String>,
    pub flags: FeatureFlags,
}

impl TargetRecord {
    pub fn new(name: &str, dir_macro: &str, test_name: &str) -> Self {
        Self {
            name: name.to_string(),
            dir_macro: dir_macro.to_string(),
            test_name: test_name.to_string(),
            test_args: None,
            build_roms: false,
            family: Family::Basic,
            sources: Vec::new(),
            includes: Vec::new(),
            defines: Vec::new(),
            flags: FeatureFlags::default(),
        }
    }

    pub fn add_source(&mut self, src: impl Into<String>) {
        push_unique(&mut self.sources, src);
    }

    pub fn add_include(&mut self, inc: impl Into<String>) {
        push_unique(&mut self.includes, inc);
    }

    pub fn add_define(&mut self, def: impl Into<String>) {
        push_unique(&mut self.defines, def);
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn includes(&self) -> &[String] {
        &self.includes
    }

    pub fn defines(&self) -> &[String] {
        &self.defines
    }

    /// Turn marker defines and the display placeholder into feature flags.
    /// Flags only ever go from false to true, so a second scan changes
    /// nothing.
    pub fn scan_for_flags(&mut self, vars: &Variables, config: &Config) {
        let markers = &config.markers;
        let int64 = remove_item(&mut self.defines, &markers.int64);
        let addr64 = remove_item(&mut self.defines, &markers.addr64);
        if int64 || addr64 {
            self.flags.int64 = int64 && !addr64;
            self.flags.full64 = int64 && addr64;
        }

        let display = &config.display;
        let placeholder = display.placeholder();
        if self
            .sources
            .iter()
            .any(|src| *src == placeholder || vars.shallow_expand(src).contains(&display.probe))
        {
            self.flags.has_display = true;
        }
        if self.flags.has_display {
            remove_item(&mut self.sources, &placeholder);
        }

        if self.defines.contains(&markers.video) {
            self.flags.uses_video = true;
        }

        let mut async_io = false;
        for marker in &markers.async_io {
            async_io |= remove_item(&mut self.defines, marker);
        }
        self.flags.async_io |= async_io;
    }

    /// Drop defines the CMake support libraries already provide.
    pub fn cleanup_defines(&mut self, redundant: &[String]) {
        for def in redundant {
            remove_item(&mut self.defines, def);
        }
    }
}

/// The simulators that live in one source directory, plus the source macros
/// they pull in.
#[derive(Debug, Serialize)]
pub struct DirectoryGroup {
    pub dir_macro: String,
    pub path: String,
    pub source_macros: BTreeMap<String, Vec<String>>,
    /// Macro name -> programs that use it.
    pub macro_uses: BTreeMap<String, BTreeSet<String>>,
    pub targets: BTreeMap<String, TargetRecord>,
}

impl DirectoryGroup {
    pub fn new(dir_macro: &str, path: &str) -> Self {
        Self {
            dir_macro: dir_macro.to_string(),
            path: path.to_string(),
            source_macros: BTreeMap::new(),
            macro_uses: BTreeMap::new(),
            targets: BTreeMap::new(),
        }
    }

    pub fn add_source_macro(&mut self, name: &str, definition: Vec<String>, user: &str) {
        self.source_macros
            .entry(name.to_string())
            .or_insert(definition);
        self.macro_uses
            .entry(name.to_string())
            .or_default()
            .insert(user.to_string());
    }

    pub fn take_target(&mut self, name: &str) -> Option<TargetRecord> {
        self.targets.remove(name)
    }

    pub fn insert_target(&mut self, record: TargetRecord) {
        self.targets.insert(record.name.clone(), record);
    }

    /// Test label: the directory up to its first path separator.
    pub fn label(&self) -> &str {
        self.path
            .split(['/', '\\'])
            .next()
            .unwrap_or(&self.path)
    }

    /// Source macros emitted once in the directory file instead of being
    /// inlined: everything used by more than one program, display macros
    /// excepted.
    pub fn shared_macros(&self, config: &Config) -> BTreeSet<String> {
        self.macro_uses
            .iter()
            .filter(|(name, users)| users.len() > 1 && !config.display.is_special(name))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// The record's sources with single-use source macros inlined.
    pub fn resolved_sources(&self, record: &TargetRecord, config: &Config) -> Vec<String> {
        let shared = self.shared_macros(config);
        let mut out = Vec::new();
        let mut active = Vec::new();
        for src in record.sources() {
            self.inline_source(src, &shared, config, &mut active, &mut out);
        }
        out
    }

    fn inline_source(
        &self,
        src: &str,
        shared: &BTreeSet<String>,
        config: &Config,
        active: &mut Vec<String>,
        out: &mut Vec<String>,
    ) {
        let inlinable = bare_reference(src).filter(|name| {
            !shared.contains(*name)
                && !config.display.is_special(name)
                && !active.iter().any(|a| a.as_str() == *name)
        });
        match inlinable.and_then(|name| self.source_macros.get(name).map(|def| (name, def))) {
            Some((name, definition)) => {
                active.push(name.to_string());
                for item in definition {
                    self.inline_source(item, shared, config, active, out);
                }
                active.pop();
            }
            None => push_unique(out, src),
        }
    }

    /// Variables referenced from this directory's source macros and
    /// programs. Source macro names are left out of source references since
    /// they are emitted here or inlined; display macros are always left out.
    fn referenced_vars(&self, config: &Config) -> BTreeSet<String> {
        let from_sources = self
            .source_macros
            .values()
            .flatten()
            .chain(self.targets.values().flat_map(|t| t.sources.iter()))
            .flat_map(|s| extract_references(s))
            .filter(|name| !self.source_macros.contains_key(*name));
        let from_includes = self
            .targets
            .values()
            .flat_map(|t| t.includes.iter())
            .flat_map(|s| extract_references(s));
        from_sources
            .chain(from_includes)
            .filter(|name| !config.display.is_special(name))
            .map(String::from)
            .collect()
    }
}

/// Everything extracted from one makefile.
#[derive(Debug, Serialize)]
pub struct Registry {
    /// Directory path -> group.
    pub dirs: BTreeMap<String, DirectoryGroup>,
    /// Variables emitted once in the shared manifest.
    pub vars: BTreeMap<String, VarValue>,
}

impl Registry {
    pub fn new(config: &Config) -> Self {
        let vars = config
            .display
            .macros
            .iter()
            .map(|(name, srcs)| (name.clone(), VarValue::List(srcs.clone())))
            .collect();
        Self {
            dirs: BTreeMap::new(),
            vars,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.values().all(|group| group.targets.is_empty())
    }

    pub fn targets(&self) -> impl Iterator<Item = &TargetRecord> {
        self.dirs.values().flat_map(|group| group.targets.values())
    }

    pub fn target(&self, name: &str) -> Option<&TargetRecord> {
        self.targets().find(|record| record.name == name)
    }

    /// Pull in every variable referenced from captured values, source macros
    /// and program lists that is not captured yet, following references
    /// until nothing new turns up. The root directory variable is renamed
    /// to the project root and never captured.
    pub fn collect_vars(&mut self, makefile: &Makefile, config: &Config, diag: &mut Diagnostics) {
        let rename = &config.root_dir;
        let mut pending: Vec<String> = self
            .vars
            .values()
            .flat_map(VarValue::references)
            .map(String::from)
            .collect();
        for group in self.dirs.values() {
            pending.extend(group.referenced_vars(config));
        }

        while let Some(name) = pending.pop() {
            if self.vars.contains_key(&name) || name == rename.from || name == rename.to {
                continue;
            }
            match makefile.variables.get(&name) {
                Some(value) => {
                    debug!("carried over {name} = {value}");
                    let value = VarValue::Text(value.to_string());
                    pending.extend(value.references().into_iter().map(String::from));
                    self.vars.insert(name, value);
                }
                None => diag.undefined_macro(&name),
            }
        }

        for value in self.vars.values_mut() {
            value.rename_reference(&rename.from, &rename.to);
        }
    }

    /// Consult the program-name dispatch table once per program.
    pub fn assign_families(&mut self, config: &Config) {
        for record in self.dirs.values_mut().flat_map(|g| g.targets.values_mut()) {
            record.family = config.family_for(&record.name);
            record.test_args = record.family.test_args().map(String::from);
        }
    }

    /// Shared variable names in emission order: variables unrelated to any
    /// other come first, then the rest with dependencies ahead of their
    /// dependents. Ties are broken by name.
    pub fn emission_order(&self, config: &Config) -> Vec<&str> {
        let deps: BTreeMap<&str, BTreeSet<&str>> = self
            .vars
            .iter()
            .map(|(name, value)| {
                let refs = value
                    .references()
                    .into_iter()
                    .filter(|r| *r != config.root_dir.to && self.vars.contains_key(*r))
                    .collect();
                (name.as_str(), refs)
            })
            .collect();
        let related: BTreeSet<&str> = deps
            .iter()
            .filter(|(_, refs)| !refs.is_empty())
            .flat_map(|(name, refs)| refs.iter().copied().chain([*name]))
            .collect();

        let mut order: Vec<&str> = deps
            .keys()
            .copied()
            .filter(|name| !related.contains(name))
            .collect();
        let mut placed: BTreeSet<&str> = order.iter().copied().collect();
        for &name in &related {
            place(name, &deps, &mut placed, &mut order);
        }
        order
    }
}

fn place<'a>(
    name: &'a str,
    deps: &BTreeMap<&'a str, BTreeSet<&'a str>>,
    placed: &mut BTreeSet<&'a str>,
    order: &mut Vec<&'a str>,
) {
    if !placed.insert(name) {
        return;
    }
    if let Some(refs) = deps.get(name) {
        for &dep in refs {
            place(dep, deps, placed, order);
        }
    }
    order.push(name);
}
