//! Tolerant reader for the subset of make syntax that describes simulator
//! builds: `NAME = value` assignments, `target : deps` rules and the action
//! lines that follow them. Conditionals, includes and pattern rules are not
//! interpreted; lines of any other shape are skipped.

mod diag;
mod expand;
mod model;
mod text;

pub use crate::diag::Diagnostics;
pub use crate::expand::{bare_reference, extract_references, normalize_variables};
pub use crate::model::{Makefile, Variables};
pub use crate::text::{LogicalLine, logical_lines};

use regex::Regex;
use std::sync::LazyLock;
use tracing::trace;

static ASSIGNMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Za-z][\w-]+)\s*=\s*(.*)$").unwrap());
static RULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^((?:(?:\$[({])*\w[\w-]+[)}]*)+)\s*:\s*(.*)$").unwrap()
});

enum Statement<'a> {
    Assign { name: &'a str, value: &'a str },
    Rule { target: &'a str, deps: &'a str },
}

/// Assignments take precedence over rules.
fn classify(line: &str) -> Option<Statement<'_>> {
    if let Some(cap) = ASSIGNMENT.captures(line) {
        let (_, [name, value]) = cap.extract();
        return Some(Statement::Assign { name, value });
    }
    RULE.captures(line).map(|cap| {
        let (_, [target, deps]) = cap.extract();
        Statement::Rule { target, deps }
    })
}

/// Integers keep their canonical spelling, `$$` is an escaped `$`.
fn assignment_value(raw: &str) -> String {
    let value = raw.trim();
    match value.parse::<i64>() {
        Ok(n) => n.to_string(),
        Err(_) => normalize_variables(&value.replace("$$", "$")).replace('\t', " "),
    }
}

/// 解析 Makefile
pub fn parse_makefile(content: &str) -> Makefile {
    let mut makefile = Makefile::default();
    let mut collecting: Option<String> = None;

    for line in logical_lines(content) {
        match classify(&line.text) {
            Some(Statement::Assign { name, value }) => {
                collecting = None;
                makefile.variables.insert(name, assignment_value(value));
            }
            Some(Statement::Rule { target, deps }) => {
                let target = normalize_variables(target);
                makefile
                    .rules
                    .insert(target.clone(), normalize_variables(deps.trim()));
                makefile.actions.insert(target.clone(), Vec::new());
                collecting = Some(target);
            }
            None => match &collecting {
                Some(target) => makefile
                    .actions
                    .entry(target.clone())
                    .or_default()
                    .push(normalize_variables(line.text.trim_start())),
                None => trace!(line = line.number, "skipped: {}", line.text),
            },
        }
    }

    makefile
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# top of file
CC = gcc
PDP1D = ${SIMHD}/PDP1
PDP1 = ${PDP1D}/pdp1_cpu.c \\
\t$(PDP1D)/pdp1_sys.c
WIDTH = 0042
PRICE = $$5

all : pdp1

pdp1 : ${BIN}pdp1${EXE}

$(BIN)pdp1$(EXE) : ${PDP1} ${SIM}
\t${MKDIRBIN}
\t$(CC) ${PDP1} ${SIM} -I ${PDP1D} ${CC_OUTSPEC} ${LDFLAGS}
ifneq (,$(call find_test,${PDP1D},pdp1))
\t$@ $(call find_test,${PDP1D},pdp1) ${TEST_ARG}
endif
CC = clang
";

    #[test]
    fn collects_variables_last_wins() {
        let mk = parse_makefile(SAMPLE);
        assert_eq!(mk.variables.get("CC"), Some("clang"));
        let pdp1 = mk.variables.get("PDP1").unwrap_or_default();
        assert_eq!(
            pdp1.split_whitespace().collect::<Vec<_>>(),
            vec!["${PDP1D}/pdp1_cpu.c", "${PDP1D}/pdp1_sys.c"]
        );
        assert!(!pdp1.contains('\t'));
        assert_eq!(mk.variables.get("WIDTH"), Some("42"));
        assert_eq!(mk.variables.get("PRICE"), Some("$5"));
    }

    #[test]
    fn rule_targets_are_normalized() {
        let mk = parse_makefile(SAMPLE);
        assert_eq!(mk.dependencies("all"), vec!["pdp1"]);
        assert_eq!(mk.dependencies("pdp1"), vec!["${BIN}pdp1${EXE}"]);
        assert_eq!(
            mk.dependencies("${BIN}pdp1${EXE}"),
            vec!["${PDP1}", "${SIM}"]
        );
        assert!(mk.actions("pdp1").is_empty());
    }

    #[test]
    fn action_block_runs_to_next_statement() {
        let mk = parse_makefile(SAMPLE);
        let actions = mk.actions("${BIN}pdp1${EXE}");
        assert_eq!(actions.len(), 5);
        assert_eq!(actions[0], "${MKDIRBIN}");
        assert!(actions[1].starts_with("${CC} ${PDP1}"));
        assert_eq!(actions[4], "endif");
    }

    #[test]
    fn stray_lines_outside_rules_are_ignored() {
        let mk = parse_makefile("ifeq ($(OS),Windows)\nFOO = 1\nendif\n");
        assert!(mk.rules.is_empty());
        assert!(mk.actions.is_empty());
        assert_eq!(mk.variables.len(), 1);
    }

    #[test]
    fn missing_root_rule_still_parses() {
        let mk = parse_makefile("A = 1\n");
        assert!(!mk.has_rule("all"));
    }
}
