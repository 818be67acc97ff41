//! Wildcard pattern engine (spec §4.2).
//!
//! Patterns are literal text interspersed with `*`, which matches any run
//! of zero or more characters. Matching is whole-string and greedy-left:
//! among all valid capture assignments, the first `*` claims as much of the
//! subject as it can while still letting the rest of the pattern match, and
//! the remaining wildcards are resolved the same way, left to right.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("invalid pattern: {0}")]
    Invalid(String),
}

/// The subject of a match: either ordinary text, or the `NULL` sentinel
/// produced when a pre-replacement interpolation step failed. The sentinel
/// is distinct from the string `"NULL"` and matches only the literal
/// pattern `NULL`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    Text(String),
    Null,
}

impl Subject {
    pub fn text(s: impl Into<String>) -> Self {
        Subject::Text(s.into())
    }
}

/// A compiled `*`-glob pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
}

impl Pattern {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Attempt to match `subject` against this pattern, returning the
    /// ordered (1-based) positional captures on success.
    pub fn match_captures(&self, subject: &Subject) -> Option<Vec<String>> {
        match subject {
            Subject::Null => {
                if self.raw == "NULL" {
                    Some(Vec::new())
                } else {
                    None
                }
            }
            Subject::Text(s) => {
                let pat_chars: Vec<char> = self.raw.chars().collect();
                let subj_chars: Vec<char> = s.chars().collect();
                let mut captures = Vec::new();
                if match_from(&pat_chars, 0, &subj_chars, 0, &mut captures) {
                    Some(captures)
                } else {
                    None
                }
            }
        }
    }

    pub fn matches(&self, subject: &Subject) -> bool {
        self.match_captures(subject).is_some()
    }
}

/// Recursive matcher with greedy-left backtracking: at a `*`, try the
/// longest remaining run first and shrink it until the rest of the pattern
/// matches (or the attempt is exhausted).
fn match_from(
    pat: &[char],
    pi: usize,
    subj: &[char],
    si: usize,
    captures: &mut Vec<String>,
) -> bool {
    if pi == pat.len() {
        return si == subj.len();
    }

    if pat[pi] == '*' {
        // Try every split point from longest to shortest (greedy-left).
        for take in (0..=(subj.len() - si)).rev() {
            let mut trial = captures.clone();
            trial.push(subj[si..si + take].iter().collect());
            if match_from(pat, pi + 1, subj, si + take, &mut trial) {
                *captures = trial;
                return true;
            }
        }
        return false;
    }

    if si < subj.len() && pat[pi] == subj[si] {
        return match_from(pat, pi + 1, subj, si + 1, captures);
    }

    false
}

/// Render a replacement template's digit back-references (`{1}`, `{2}`, …)
/// against a capture list, leaving everything else untouched. Interpolation
/// of named inserts happens separately; this only resolves the digit keys.
pub fn substitute_captures(template: &str, captures: &[String]) -> String {
    let mut out = String::with_capacity(template.len());
    let chars: Vec<char> = template.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '\\' && i + 1 < chars.len() && (chars[i + 1] == '{' || chars[i + 1] == '}')
        {
            out.push(chars[i]);
            out.push(chars[i + 1]);
            i += 2;
            continue;
        }
        if chars[i] == '{' {
            if let Some(end) = chars[i..].iter().position(|&c| c == '}') {
                let key: String = chars[i + 1..i + end].iter().collect();
                if let Ok(n) = key.parse::<usize>() {
                    if n >= 1 && n <= captures.len() {
                        out.push_str(&captures[n - 1]);
                        i += end + 1;
                        continue;
                    }
                }
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_pattern_is_string_equality() {
        let p = Pattern::new("hello");
        assert!(p.matches(&Subject::text("hello")));
        assert!(!p.matches(&Subject::text("hello world")));
    }

    #[test]
    fn single_wildcard_captures_whole_run() {
        let p = Pattern::new("Age *");
        let caps = p.match_captures(&Subject::text("Age 41")).unwrap();
        assert_eq!(caps, vec!["41".to_string()]);
    }

    #[test]
    fn greedy_left_prefers_longest_first_capture() {
        // "*-*" against "a-b-c": first * should take "a-b", second takes "c".
        let p = Pattern::new("*-*");
        let caps = p.match_captures(&Subject::text("a-b-c")).unwrap();
        assert_eq!(caps, vec!["a-b".to_string(), "c".to_string()]);
    }

    #[test]
    fn null_sentinel_matches_only_null_pattern() {
        let null_pat = Pattern::new("NULL");
        assert!(null_pat.matches(&Subject::Null));
        let other_pat = Pattern::new("*");
        assert!(!other_pat.matches(&Subject::Null));
    }

    #[test]
    fn no_match_returns_none() {
        let p = Pattern::new("foo*bar");
        assert!(p.match_captures(&Subject::text("nope")).is_none());
    }

    #[test]
    fn substitute_captures_resolves_digit_refs() {
        let out = substitute_captures("value is {1} and {2}", &["41".into(), "x".into()]);
        assert_eq!(out, "value is 41 and x");
    }

    #[test]
    fn substitute_captures_preserves_escaped_braces() {
        let out = substitute_captures("literal \\{1\\} stays", &["41".into()]);
        assert_eq!(out, "literal \\{1\\} stays");
    }
}
