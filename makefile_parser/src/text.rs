/// A comment-free line with continuations joined, tagged with the physical
/// line it started on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalLine {
    pub number: usize,
    pub text: String,
}

/// Cut the line at the first unescaped `#`; `\#` becomes a literal `#`.
fn strip_comment(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'#') => {
                out.push('#');
                chars.next();
            }
            '#' => break,
            _ => out.push(c),
        }
    }
    out
}

/// Split `content` into logical lines: comments stripped, trailing
/// whitespace removed, blank lines skipped and backslash continuations
/// joined with a single space.
pub fn logical_lines(content: &str) -> Vec<LogicalLine> {
    let mut result = Vec::new();
    let mut current = String::new();
    let mut start = 0;

    for (idx, raw) in content.lines().enumerate() {
        let stripped = strip_comment(raw);
        let trimmed = stripped.trim_end();
        if current.is_empty() {
            start = idx + 1;
        }
        if let Some(head) = trimmed.strip_suffix('\\') {
            current.push_str(head);
            current.push(' ');
            continue;
        }
        current.push_str(trimmed);
        if !current.trim().is_empty() {
            result.push(LogicalLine {
                number: start,
                text: current.trim_end().to_string(),
            });
        }
        current.clear();
    }
    if !current.trim().is_empty() {
        result.push(LogicalLine {
            number: start,
            text: current.trim_end().to_string(),
        });
    }
    result
}
