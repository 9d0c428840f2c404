use std::collections::BTreeSet;
use tracing::warn;

/// Advisory diagnostics collected while reading and mining the makefile.
///
/// Nothing recorded here is fatal: messages are logged as they arrive and
/// kept so the driver (or a test) can look at them afterwards.
#[derive(Debug, Default)]
pub struct Diagnostics {
    undefined: BTreeSet<String>,
    messages: Vec<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reference to a macro with no definition. Each name is
    /// reported once.
    pub fn undefined_macro(&mut self, name: &str) {
        if self.undefined.insert(name.to_string()) {
            let msg = format!("undefined macro: {name}");
            warn!("{}", msg);
            self.messages.push(msg);
        }
    }

    pub fn report(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        warn!("{}", msg);
        self.messages.push(msg);
    }

    pub fn undefined(&self) -> impl Iterator<Item = &str> {
        self.undefined.iter().map(String::as_str)
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
