//! Shell-style glob matching and destination substitution, implemented
//! by translating patterns to an anchored [`regex::Regex`] rather than
//! hand-rolling a matcher.

use regex::Regex;

const META_CHARS: &str = r".+?()[]{}|^$\";

fn translate(pattern: &str) -> String {
    let mut out = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str("([^/]*)"),
            c if META_CHARS.contains(c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push('$');
    out
}

// `translate` escapes every regex metacharacter it doesn't itself emit,
// so the result is always a well-formed pattern; the only way this fails
// is a bug in `translate`.
#[allow(clippy::expect_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(&translate(pattern)).expect("translate() always produces a valid regex")
}

/// True if `candidate` matches `pattern`'s shell-style glob grammar:
/// `*` matches any run of non-`/` characters.
pub fn matches(pattern: &str, candidate: &str) -> bool {
    compile(pattern).is_match(candidate)
}

/// Expand `destination_pattern` against the captures `source_pattern`
/// made matching `source_value`. Supports `*` (repeats the *last*
/// wildcard capture) and positional `$1..$9` (references the Nth
/// wildcard capture).
pub fn substitute(source_pattern: &str, source_value: &str, destination_pattern: &str) -> Option<String> {
    let captures = compile(source_pattern).captures(source_value)?;
    let last_capture = captures
        .iter()
        .skip(1)
        .flatten()
        .last()
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();

    let mut out = String::with_capacity(destination_pattern.len());
    let mut chars = destination_pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(&last_capture),
            '$' => match chars.peek().and_then(|c| c.to_digit(10)) {
                Some(n) if (1..=9).contains(&n) => {
                    chars.next();
                    let group = captures.get(n as usize).map(|m| m.as_str()).unwrap_or("");
                    out.push_str(group);
                }
                _ => out.push('$'),
            },
            c => out.push(c),
        }
    }
    Some(out)
}
