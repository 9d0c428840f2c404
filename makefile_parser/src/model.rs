use serde::Serialize;
use std::collections::BTreeMap;

/// Variable table, name to raw value. Values are stored after `$(X)` has
/// been rewritten to `${X}`; nothing is expanded at parse time.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Variables(BTreeMap<String, String>);

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Last assignment wins.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Variables {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut vars = Variables::new();
        for (k, v) in iter {
            vars.insert(k, v);
        }
        vars
    }
}

/// Everything the parser keeps from a makefile.
#[derive(Debug, Default, Serialize)]
pub struct Makefile {
    pub variables: Variables,
    /// Normalized target -> normalized dependency string.
    pub rules: BTreeMap<String, String>,
    /// Normalized target -> action lines, left-trimmed, in file order.
    pub actions: BTreeMap<String, Vec<String>>,
}

impl Makefile {
    pub fn has_rule(&self, target: &str) -> bool {
        self.rules.contains_key(target)
    }

    pub fn dependencies(&self, target: &str) -> Vec<&str> {
        self.rules
            .get(target)
            .map(|deps| deps.split_whitespace().collect())
            .unwrap_or_default()
    }

    pub fn actions(&self, target: &str) -> &[String] {
        self.actions.get(target).map(Vec::as_slice).unwrap_or(&[])
    }
}
