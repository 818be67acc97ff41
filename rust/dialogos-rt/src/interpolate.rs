//! Interpolation engine (spec §4.4): `{key}` template expansion against the
//! insert store, with `\{`/`\}` escapes, nested key resolution, and a
//! dedicated miss outcome the caller decides how to treat.

use crate::store::InsertStore;

/// The outcome of interpolating a whole string: either every key resolved,
/// or the first missing key encountered (scanning left to right).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interpolated {
    Ok(String),
    Missing(String),
}

impl Interpolated {
    pub fn ok_or_missing_key(self) -> Result<String, String> {
        match self {
            Interpolated::Ok(s) => Ok(s),
            Interpolated::Missing(k) => Err(k),
        }
    }
}

/// Interpolate `s` against `store`. Implements spec §4.4's five-step
/// algorithm, including recursive resolution of nested keys like
/// `{question-{i}}`.
pub fn interpolate(s: &str, store: &InsertStore) -> Interpolated {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() && (chars[i + 1] == '{' || chars[i + 1] == '}') => {
                out.push(chars[i]);
                out.push(chars[i + 1]);
                i += 2;
            }
            '{' => match find_matching_brace(&chars, i) {
                Some(end) => {
                    let inner: String = chars[i + 1..end].iter().collect();
                    let resolved_key = match interpolate(&inner, store) {
                        Interpolated::Ok(k) => k,
                        missing => return missing,
                    };
                    match store.get(&resolved_key) {
                        Some(value) => {
                            out.push_str(&value.to_display());
                            i = end + 1;
                        }
                        None => return Interpolated::Missing(resolved_key),
                    }
                }
                None => {
                    // Unmatched `{` with no closing brace: treated as a
                    // literal character (spec is silent; this keeps
                    // interpolation total rather than erroring on stray text).
                    out.push(chars[i]);
                    i += 1;
                }
            },
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Interpolated::Ok(out)
}

/// Find the `}` matching the `{` at `open`, respecting nested `{...}`
/// regions and escaped delimiters within the key region.
fn find_matching_brace(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() && (chars[i + 1] == '{' || chars[i + 1] == '}') => {
                i += 2;
                continue;
            }
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// `escape(s)` (spec §4.4): replace every `{` with `\{` and every `}` with
/// `\}`. Used on raw user input before storage and on CLI arguments.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '{' => out.push_str("\\{"),
            '}' => out.push_str("\\}"),
            other => out.push(other),
        }
    }
    out
}

/// `unescape(s)` (spec §4.4): interpolate `s` fully, then replace `\{`→`{`
/// and `\}`→`}` once at the top level.
pub fn unescape(s: &str, store: &InsertStore) -> Interpolated {
    match interpolate(s, store) {
        Interpolated::Ok(expanded) => Interpolated::Ok(strip_escapes(&expanded)),
        missing => missing,
    }
}

pub(crate) fn strip_escapes(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '\\' && i + 1 < chars.len() && (chars[i + 1] == '{' || chars[i + 1] == '}')
        {
            out.push(chars[i + 1]);
            i += 2;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use dialogos_core::value::Value;

    fn store_with(pairs: &[(&str, &str)]) -> InsertStore {
        let mut store = InsertStore::new();
        for (k, v) in pairs {
            store.set(*k, Value::String(v.to_string()));
        }
        store
    }

    #[test]
    fn simple_key_substitution() {
        let store = store_with(&[("name", "tom")]);
        assert_eq!(interpolate("hi {name}", &store), Interpolated::Ok("hi tom".to_string()));
    }

    #[test]
    fn nested_key_resolution() {
        let mut store = InsertStore::new();
        store.set("i", Value::Int(3));
        store.set("q-3", Value::String("color?".to_string()));
        assert_eq!(
            interpolate("{q-{i}}", &store),
            Interpolated::Ok("color?".to_string())
        );
    }

    #[test]
    fn escaped_braces_survive_interpolation_unchanged() {
        let store = InsertStore::new();
        assert_eq!(
            interpolate("literal \\{not a key\\}", &store),
            Interpolated::Ok("literal \\{not a key\\}".to_string())
        );
    }

    #[test]
    fn missing_key_is_reported() {
        let store = InsertStore::new();
        assert_eq!(interpolate("{nope}", &store), Interpolated::Missing("nope".to_string()));
    }

    #[test]
    fn list_values_stringify_without_separator() {
        let mut store = InsertStore::new();
        store.set("xs", Value::List(vec![Value::Int(1), Value::Int(2)]));
        assert_eq!(interpolate("{xs}", &store), Interpolated::Ok("12".to_string()));
    }

    #[test]
    fn escape_then_interpolate_preserves_the_escaped_braces() {
        let store = InsertStore::new();
        let raw = "plain text with {braces} and }another{";
        let escaped = escape(raw);
        assert_eq!(interpolate(&escaped, &store), Interpolated::Ok(escaped.clone()));
    }

    #[test]
    fn unescape_resolves_keys_then_strips_escapes_once() {
        let store = store_with(&[("x", "\\{y\\}")]);
        assert_eq!(unescape("{x}", &store), Interpolated::Ok("{y}".to_string()));
    }

    #[test]
    fn interpolation_is_idempotent_once_fully_expanded() {
        let store = store_with(&[("name", "tom")]);
        let once = interpolate("hi {name}", &store).ok_or_missing_key().unwrap();
        let twice = interpolate(&once, &store).ok_or_missing_key().unwrap();
        assert_eq!(once, twice);
    }
}
