//! `${NAME}` / `$(NAME)` references: finding, normalizing and expanding them.
//!
//! Every reference check in the workspace goes through the patterns here so
//! there is exactly one notion of what a variable reference looks like.

use crate::diag::Diagnostics;
use crate::model::Variables;
use regex::{Captures, Regex};
use std::sync::LazyLock;

static REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$[{(]([A-Za-z][\w-]*)[)}]").unwrap());
static BARE_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$[{(]([A-Za-z][\w-]*)[)}]$").unwrap());
static PAREN_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\(([A-Za-z][\w-]*)\)").unwrap());

/// Substitutions allowed in one deep expansion before giving up on a
/// self-referencing macro.
const EXPANSION_LIMIT: usize = 10_000;

/// Every variable name referenced in `s`, left to right, duplicates kept.
pub fn extract_references(s: &str) -> Vec<&str> {
    REFERENCE
        .captures_iter(s)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect()
}

/// Rewrite `$(NAME)` into `${NAME}`; everything else is left untouched.
pub fn normalize_variables(s: &str) -> String {
    PAREN_REFERENCE
        .replace_all(s, |caps: &Captures| format!("${{{}}}", &caps[1]))
        .into_owned()
}

/// The variable name when `s` is a single reference and nothing else.
pub fn bare_reference(s: &str) -> Option<&str> {
    BARE_REFERENCE
        .captures(s)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Name inside a matched `${NAME}`/`$(NAME)`.
fn reference_name(matched: &str) -> &str {
    &matched[2..matched.len() - 1]
}

impl Variables {
    /// Replace each reference with the variable's raw value. Substituted text
    /// is not scanned again, so a value holding further references comes
    /// back with those references intact. Undefined names become "".
    pub fn shallow_expand(&self, s: &str) -> String {
        REFERENCE
            .replace_all(s, |caps: &Captures| {
                self.get(&caps[1]).unwrap_or_default().to_string()
            })
            .into_owned()
    }

    /// Expand until no reference is left anywhere in the string. Undefined
    /// names become "" and are reported to `diag`.
    pub fn deep_expand(&self, s: &str, diag: &mut Diagnostics) -> String {
        let mut undefined = Vec::new();
        let result = self.expand_until_settled(s, |name| undefined.push(name.to_string()));
        for name in &undefined {
            diag.undefined_macro(name);
        }
        result.unwrap_or_else(|partial| {
            diag.report(format!("expansion of {s:?} does not terminate"));
            partial
        })
    }

    /// Same as [`Variables::deep_expand`] without reporting anything, for
    /// probes where a missing definition is expected.
    pub fn deep_expand_quiet(&self, s: &str) -> String {
        match self.expand_until_settled(s, |_| {}) {
            Ok(out) | Err(out) => out,
        }
    }

    fn expand_until_settled(
        &self,
        s: &str,
        mut on_undefined: impl FnMut(&str),
    ) -> Result<String, String> {
        let mut out = s.to_string();
        for _ in 0..EXPANSION_LIMIT {
            let Some(m) = REFERENCE.find(&out) else {
                return Ok(out);
            };
            let range = m.range();
            let name = reference_name(m.as_str());
            let value = match self.get(name) {
                Some(value) => value.to_string(),
                None => {
                    on_undefined(name);
                    String::new()
                }
            };
            out.replace_range(range, &value);
        }
        Err(out)
    }
}
