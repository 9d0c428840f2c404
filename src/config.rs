use crate::family::Family;
use anyhow::{Context, Result};
use makefile_parser::{bare_reference, normalize_variables};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

const BUILTIN: &str = include_str!("config.toml");

/// Compile-line tokens that say nothing about a simulator's sources.
#[derive(Debug, Clone, Deserialize)]
pub struct CompileConfig {
    pub ignored: BTreeSet<String>,
    /// Any `${NAME}` whose name ends with one of these is a link flag list.
    pub ignored_suffixes: Vec<String>,
}

/// The display library placeholder and the per-device display macros.
#[derive(Debug, Clone, Deserialize)]
pub struct DisplayConfig {
    pub library: String,
    /// A source whose one-level expansion contains this marks a display user.
    pub probe: String,
    pub macros: BTreeMap<String, Vec<String>>,
}

impl DisplayConfig {
    /// Display variables are never expanded into their definitions.
    pub fn is_special(&self, name: &str) -> bool {
        name == self.library || self.macros.contains_key(name)
    }

    pub fn placeholder(&self) -> String {
        format!("${{{}}}", self.library)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlagMarkers {
    pub int64: String,
    pub addr64: String,
    pub video: String,
    pub async_io: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RootDirRename {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub root_rule: String,
    pub source_suffix: String,
    pub ignored_deps: BTreeSet<String>,
    pub build_roms_dep: String,
    /// Stripped from a rule target to get the program name.
    pub target_decorations: Vec<String>,
    pub compile: CompileConfig,
    pub display: DisplayConfig,
    pub markers: FlagMarkers,
    pub cleanup_defines: Vec<String>,
    pub root_dir: RootDirRename,
    #[serde(default)]
    pub families: BTreeMap<String, Family>,
}

impl Config {
    pub fn builtin() -> Result<Self> {
        Self::from_toml(BUILTIN).context("built-in configuration is invalid")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("failed to parse config {}", path.display()))
    }

    fn from_toml(text: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(text)?;
        config.normalize();
        Ok(config)
    }

    /// Token comparisons happen against `${X}` spellings only.
    fn normalize(&mut self) {
        let norm = |set: &BTreeSet<String>| -> BTreeSet<String> {
            set.iter().map(|s| normalize_variables(s)).collect()
        };
        self.ignored_deps = norm(&self.ignored_deps);
        self.compile.ignored = norm(&self.compile.ignored);
        self.build_roms_dep = normalize_variables(&self.build_roms_dep);
        self.target_decorations = self
            .target_decorations
            .iter()
            .map(|s| normalize_variables(s))
            .collect();
    }

    pub fn is_source(&self, token: &str) -> bool {
        token.ends_with(&self.source_suffix)
    }

    pub fn is_ignored_compile_elem(&self, token: &str) -> bool {
        self.compile.ignored.contains(token)
            || bare_reference(token).is_some_and(|name| {
                self.compile
                    .ignored_suffixes
                    .iter()
                    .any(|suffix| name.ends_with(suffix.as_str()))
            })
    }

    pub fn is_ignored_source_elem(&self, token: &str) -> bool {
        self.is_ignored_compile_elem(token) || token == self.display.placeholder()
    }

    pub fn program_name(&self, target: &str) -> String {
        self.target_decorations
            .iter()
            .fold(target.to_string(), |name, deco| name.replace(deco.as_str(), ""))
    }

    pub fn family_for(&self, program: &str) -> Family {
        self.families.get(program).cloned().unwrap_or_default()
    }
}
