//! Save-slot persistence by textual splicing (spec §6, §9; `SPEC_FULL.md`
//! §2): save slots live at `program.save_states[slot]`. Rather than
//! re-serializing the whole document (which would lose comments and
//! formatting), a save locates the `save_states` object's brace span
//! directly in the original source text and splices in just the one slot
//! that changed, byte range in, byte range out — leaving everything else
//! in the file untouched. Grounded on `lumen-cli/src/lockfile.rs`'s
//! generated-region splice (rewrite one marked region of a hand-edited
//! file, leave the rest alone).

use dialogos_core::value::{OrderedMap, Value};

use crate::state::SavedState;

/// The nesting depth, in enclosing `{`/`[`, at which a key is considered
/// to live "at the top level of the document". `save_states` itself is
/// one level in (inside the root object); a slot key is two levels in
/// (inside `save_states`).
const ROOT_DEPTH: u32 = 1;
const SAVE_STATES_DEPTH: u32 = 2;

/// Render one `SavedState` as a JSON5-ish object literal. Only the shapes
/// the value model can produce appear here, so this never needs to defer
/// to a general serializer.
pub fn render_saved_state(label: &str, state: &SavedState) -> String {
    let mut out = String::from("{ label: ");
    out.push_str(&quote(label));
    out.push_str(", order_index: ");
    out.push_str(&state.order_index.to_string());
    out.push_str(", inserts: ");
    render_value(&Value::Map(state.inserts.clone()), &mut out);
    out.push_str(" }");
    out
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

fn render_value(v: &Value, out: &mut String) {
    match v {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Int(i) => out.push_str(&i.to_string()),
        Value::Float(f) => out.push_str(&f.to_string()),
        Value::String(s) => out.push_str(&quote(s)),
        Value::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                render_value(item, out);
            }
            out.push(']');
        }
        Value::Map(m) => {
            out.push('{');
            for (i, (k, val)) in m.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&quote(k));
                out.push_str(": ");
                render_value(val, out);
            }
            out.push('}');
        }
    }
}

/// Write `slot` (already rendered text, an object literal) into `src`'s
/// `save_states` object under `slot_key`, creating the `save_states`
/// object (and the slot) if either is missing. Returns the new document
/// text; `src` itself is never mutated in place.
pub fn splice_save_slot(src: &str, slot_key: &str, rendered_state: &str) -> String {
    match find_top_level_key_value(src, "save_states", ROOT_DEPTH) {
        Some(span) => {
            let save_states_body = &src[span.clone()];
            match find_top_level_key_value(save_states_body, slot_key, 1) {
                Some(slot_span) => {
                    // Slot already exists inside save_states: replace just
                    // its value span, keeping everything else (including
                    // other slots and their comments) byte-for-byte.
                    let abs_start = span.start + slot_span.start;
                    let abs_end = span.start + slot_span.end;
                    splice(src, abs_start, abs_end, rendered_state)
                }
                None => {
                    // save_states exists but this slot doesn't: insert
                    // right after its opening brace.
                    let insert_at = span.start + object_open_end(save_states_body);
                    let needs_comma = !is_object_effectively_empty(save_states_body);
                    let mut piece = String::new();
                    piece.push_str(&quote_bare(slot_key));
                    piece.push_str(": ");
                    piece.push_str(rendered_state);
                    if needs_comma {
                        piece.push_str(", ");
                    }
                    splice(src, insert_at, insert_at, &piece)
                }
            }
        }
        None => {
            // No save_states key anywhere at the root: append one just
            // before the root object's final closing brace.
            let insert_at = root_object_close(src);
            let mut piece = String::new();
            if !is_object_effectively_empty(&src[..insert_at]) {
                piece.push_str(", ");
            }
            piece.push_str("save_states: { ");
            piece.push_str(&quote_bare(slot_key));
            piece.push_str(": ");
            piece.push_str(rendered_state);
            piece.push_str(" }");
            splice(src, insert_at, insert_at, &piece)
        }
    }
}

fn quote_bare(key: &str) -> String {
    if key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') && !key.is_empty() {
        key.to_string()
    } else {
        quote(key)
    }
}

fn splice(src: &str, start: usize, end: usize, replacement: &str) -> String {
    let mut out = String::with_capacity(src.len() + replacement.len());
    out.push_str(&src[..start]);
    out.push_str(replacement);
    out.push_str(&src[end..]);
    out
}

/// True if the only non-whitespace/comment content in an (assumed) object
/// literal is its own braces, i.e. `{}` or `{ /* note */ }`.
fn is_object_effectively_empty(object_src: &str) -> bool {
    let bytes = object_src.as_bytes();
    let Some(open) = bytes.iter().position(|&b| b == b'{') else { return true };
    let inner = &object_src[open + 1..];
    strip_ws_and_comments(inner).trim_end_matches('}').trim().is_empty()
}

fn strip_ws_and_comments(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = String::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'/' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'*' => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 2;
            }
            c => {
                out.push(c as char);
                i += 1;
            }
        }
    }
    out
}

/// Byte offset (relative to `object_src`) of the position right after an
/// object literal's opening `{`.
fn object_open_end(object_src: &str) -> usize {
    object_src.find('{').map(|p| p + 1).unwrap_or(0)
}

/// Byte offset of the position right before the root document object's
/// final closing `}`.
fn root_object_close(src: &str) -> usize {
    let bytes = src.as_bytes();
    let Some(root_open) = bytes.iter().position(|&b| b == b'{') else { return src.len() };
    let close = scan_balanced_end(bytes, root_open);
    close.saturating_sub(1)
}

/// Scan every `{`/`[`...`}`/`]` at `target_depth` directly inside `src`,
/// looking for `key: <value>`. Returns the byte range of `<value>` (the
/// matched bracket span if the value is itself an object/array, else the
/// bare token/string up to the next depth-`target_depth` comma or closer).
fn find_top_level_key_value(src: &str, key: &str, target_depth: u32) -> Option<std::ops::Range<usize>> {
    let bytes = src.as_bytes();
    let n = bytes.len();
    let mut i = 0;
    let mut depth: u32 = 0;
    while i < n {
        match bytes[i] {
            b'"' | b'\'' => {
                i = skip_string(bytes, i);
                continue;
            }
            b'/' if i + 1 < n && bytes[i + 1] == b'/' => {
                while i < n && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            b'/' if i + 1 < n && bytes[i + 1] == b'*' => {
                i += 2;
                while i + 1 < n && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 2;
                continue;
            }
            b'{' | b'[' => {
                depth += 1;
                i += 1;
                continue;
            }
            b'}' | b']' => {
                depth = depth.saturating_sub(1);
                i += 1;
                continue;
            }
            _ => {}
        }

        if depth == target_depth {
            if let Some(after_key) = match_key_at(src, i, key) {
                let mut j = skip_ws_and_comments_fwd(bytes, after_key);
                if j < n && bytes[j] == b':' {
                    j += 1;
                    j = skip_ws_and_comments_fwd(bytes, j);
                    let value_end = scan_value_end(bytes, j, depth);
                    return Some(j..value_end);
                }
            }
        }
        i += 1;
    }
    None
}

/// If `key` (bare identifier or quoted string) starts at byte offset `i`
/// in `src`, return the offset right after it; else `None`.
fn match_key_at(src: &str, i: usize, key: &str) -> Option<usize> {
    let bytes = src.as_bytes();
    if bytes[i] == b'"' || bytes[i] == b'\'' {
        let quote = bytes[i];
        let end = skip_string(bytes, i);
        let inner = &src[i + 1..end.saturating_sub(1)];
        if inner == key {
            return Some(end);
        }
        let _ = quote;
        return None;
    }
    if !(bytes[i].is_ascii_alphabetic() || bytes[i] == b'_') {
        return None;
    }
    let start = i;
    let mut j = i;
    while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
        j += 1;
    }
    if &src[start..j] == key {
        Some(j)
    } else {
        None
    }
}

fn skip_ws_and_comments_fwd(bytes: &[u8], mut i: usize) -> usize {
    loop {
        while i < bytes.len() && (bytes[i] as char).is_whitespace() {
            i += 1;
        }
        if i + 1 < bytes.len() && bytes[i] == b'/' && bytes[i + 1] == b'/' {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        if i + 1 < bytes.len() && bytes[i] == b'/' && bytes[i + 1] == b'*' {
            i += 2;
            while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                i += 1;
            }
            i += 2;
            continue;
        }
        return i;
    }
}

/// Skip a quoted string starting at `i` (which must point at the opening
/// quote), honoring backslash escapes. Returns the offset right after the
/// closing quote.
fn skip_string(bytes: &[u8], i: usize) -> usize {
    let quote = bytes[i];
    let mut j = i + 1;
    while j < bytes.len() {
        if bytes[j] == b'\\' {
            j += 2;
            continue;
        }
        if bytes[j] == quote {
            return j + 1;
        }
        j += 1;
    }
    bytes.len()
}

fn scan_balanced_end(bytes: &[u8], open_pos: usize) -> usize {
    let mut depth = 0u32;
    let mut i = open_pos;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => {
                i = skip_string(bytes, i);
                continue;
            }
            b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'/' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'*' => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 2;
                continue;
            }
            b'{' | b'[' => {
                depth += 1;
                i += 1;
                continue;
            }
            b'}' | b']' => {
                depth -= 1;
                i += 1;
                if depth == 0 {
                    return i;
                }
                continue;
            }
            _ => {
                i += 1;
            }
        }
    }
    bytes.len()
}

/// End of a value starting at `value_start`, where the enclosing object is
/// at `enclosing_depth`: the matched bracket span if the value is an
/// object/array or string, else the next comma/closer at `enclosing_depth`.
fn scan_value_end(bytes: &[u8], value_start: usize, enclosing_depth: u32) -> usize {
    if value_start >= bytes.len() {
        return value_start;
    }
    match bytes[value_start] {
        b'{' | b'[' => scan_balanced_end(bytes, value_start),
        b'"' | b'\'' => skip_string(bytes, value_start),
        _ => {
            let mut i = value_start;
            let mut depth = enclosing_depth;
            while i < bytes.len() {
                match bytes[i] {
                    b'"' | b'\'' => {
                        i = skip_string(bytes, i);
                        continue;
                    }
                    b'{' | b'[' => {
                        depth += 1;
                        i += 1;
                        continue;
                    }
                    b'}' | b']' => {
                        if depth == enclosing_depth {
                            return i;
                        }
                        depth -= 1;
                        i += 1;
                        continue;
                    }
                    b',' if depth == enclosing_depth => return i,
                    _ => i += 1,
                }
            }
            i
        }
    }
}

/// Parse back a previously-rendered slot object into a [`SavedState`]. Only
/// understands the shape `render_saved_state` itself produces, which is
/// enough for round-tripping a save slot this crate wrote.
pub fn parse_saved_state(text: &str) -> Option<SavedState> {
    let doc = dialogos_frontend::parser::Parser::parse_document(text).ok()?;
    let Value::Map(fields) = dialogos_frontend::ast::json_to_value(&doc) else { return None };
    let order_index = match fields.get("order_index") {
        Some(Value::Int(i)) => *i as usize,
        _ => return None,
    };
    let inserts = match fields.get("inserts") {
        Some(Value::Map(m)) => m.clone(),
        _ => OrderedMap::new(),
    };
    Some(SavedState::new(order_index, inserts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dialogos_core::value::Value;

    #[test]
    fn renders_a_saved_state_as_a_parseable_object_literal() {
        let mut inserts = OrderedMap::new();
        inserts.insert("name", Value::String("tom".into()));
        let state = SavedState::new(4, inserts);
        let rendered = render_saved_state("checkpoint", &state);
        let parsed = parse_saved_state(&rendered).unwrap();
        assert_eq!(parsed.order_index, 4);
        assert_eq!(parsed.inserts.get("name"), Some(&Value::String("tom".into())));
    }

    #[test]
    fn splices_a_brand_new_save_states_object_before_final_brace() {
        let src = "{order: [{cmd: 'print', text: 'hi'}]}";
        let rendered = render_saved_state("a", &SavedState::new(1, OrderedMap::new()));
        let spliced = splice_save_slot(src, "1", &rendered);
        assert!(spliced.contains("save_states"));
        let doc = dialogos_frontend::parser::Parser::parse_document(&spliced).unwrap();
        assert!(matches!(doc.value, dialogos_frontend::parser::JsonValue::Object(_)));
    }

    #[test]
    fn replaces_an_existing_slot_without_disturbing_siblings() {
        let src = "{order: [], save_states: { 1: { label: 'old', order_index: 0, inserts: {} }, 2: { label: 'keep', order_index: 9, inserts: {} } }}";
        let rendered = render_saved_state("new", &SavedState::new(5, OrderedMap::new()));
        let spliced = splice_save_slot(src, "1", &rendered);
        assert!(spliced.contains("'new'"));
        assert!(spliced.contains("'keep'"));
        assert!(!spliced.contains("'old'"));
    }

    #[test]
    fn adds_a_new_slot_into_an_existing_save_states_object() {
        let src = "{order: [], save_states: { 1: { label: 'old', order_index: 0, inserts: {} } }}";
        let rendered = render_saved_state("new", &SavedState::new(2, OrderedMap::new()));
        let spliced = splice_save_slot(src, "3", &rendered);
        assert!(spliced.contains("'old'"));
        assert!(spliced.contains("'new'"));
        let doc = dialogos_frontend::parser::Parser::parse_document(&spliced).unwrap();
        assert!(matches!(doc.value, dialogos_frontend::parser::JsonValue::Object(_)));
    }
}
