//! Insert store (spec §3, §4.5): an ordered mapping from key to [`Value`],
//! with an optional read-only fallback directory and a handful of
//! always-on transient computed keys.

use dialogos_core::pattern::{Pattern, Subject};
use dialogos_core::value::{OrderedMap, Value};
use std::path::PathBuf;

use crate::interpolate::escape;

pub struct InsertStore {
    local: OrderedMap,
    fallback_dir: Option<PathBuf>,
    args: Vec<String>,
}

impl InsertStore {
    pub fn new() -> Self {
        Self { local: OrderedMap::new(), fallback_dir: None, args: Vec::new() }
    }

    pub fn with_fallback_dir(mut self, dir: PathBuf) -> Self {
        self.fallback_dir = Some(dir);
        self
    }

    /// Positional startup arguments. `{` and `}` are pre-escaped before
    /// storage so they survive interpolation unchanged (spec §3).
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args.iter().map(|a| escape(a)).collect();
        self
    }

    pub fn seed(mut self, initial: OrderedMap) -> Self {
        for (k, v) in initial.iter() {
            self.local.insert(k, v.clone());
        }
        self
    }

    /// Lookup order per spec §4.5: local mapping, then file fallback, then
    /// the special transient keys (time, positional arguments).
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(v) = self.local.get(key) {
            return Some(v.clone());
        }
        if let Some(dir) = &self.fallback_dir {
            let path = dir.join(key);
            if path.is_file() {
                if let Ok(contents) = std::fs::read_to_string(&path) {
                    return Some(Value::String(contents));
                }
            }
        }
        self.special(key)
    }

    fn special(&self, key: &str) -> Option<Value> {
        match key {
            "HH:MM" => Some(Value::String(chrono::Local::now().format("%H:%M").to_string())),
            "HH:MM:SS" => {
                Some(Value::String(chrono::Local::now().format("%H:%M:%S").to_string()))
            }
            _ => {
                let digits = key.strip_prefix("ARG")?;
                if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                    return None;
                }
                let n: usize = digits.parse().ok()?;
                if n == 0 {
                    return None;
                }
                self.args.get(n - 1).map(|s| Value::String(s.clone()))
            }
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.local.insert(key, value);
    }

    pub fn delete(&mut self, key: &str) {
        self.local.remove(key);
    }

    /// `delete(patterns)` — removes every local key matching any pattern.
    /// File-backed and special keys are never affected (spec §4.5).
    pub fn delete_matching(&mut self, patterns: &[Pattern]) {
        let keys: Vec<String> = self.local.iter().map(|(k, _)| k.to_string()).collect();
        for key in keys {
            if patterns.iter().any(|p| p.matches(&Subject::text(key.clone()))) {
                self.local.remove(&key);
            }
        }
    }

    /// `delete_except(patterns)` — removes every local key matching no pattern.
    pub fn delete_not_matching(&mut self, patterns: &[Pattern]) {
        let keys: Vec<String> = self.local.iter().map(|(k, _)| k.to_string()).collect();
        for key in keys {
            if !patterns.iter().any(|p| p.matches(&Subject::text(key.clone()))) {
                self.local.remove(&key);
            }
        }
    }

    pub fn snapshot(&self) -> OrderedMap {
        self.local.clone()
    }

    pub fn local_keys(&self) -> Vec<String> {
        self.local.iter().map(|(k, _)| k.to_string()).collect()
    }
}

impl Default for InsertStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn local_lookup_wins_over_file_fallback() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("greeting"), "from file").unwrap();
        let mut store = InsertStore::new().with_fallback_dir(dir.path().to_path_buf());
        store.set("greeting", Value::String("from local".into()));
        assert_eq!(store.get("greeting"), Some(Value::String("from local".into())));
    }

    #[test]
    fn file_fallback_used_on_miss() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("poem")).unwrap();
        write!(f, "roses are red").unwrap();
        let store = InsertStore::new().with_fallback_dir(dir.path().to_path_buf());
        assert_eq!(store.get("poem"), Some(Value::String("roses are red".into())));
    }

    #[test]
    fn args_are_pre_escaped() {
        let store = InsertStore::new().with_args(vec!["braces {here}".to_string()]);
        assert_eq!(store.get("ARG1"), Some(Value::String("braces \\{here\\}".into())));
    }

    #[test]
    fn delete_matching_only_removes_pattern_hits() {
        let mut store = InsertStore::new();
        store.set("q-1", Value::Int(1));
        store.set("q-2", Value::Int(2));
        store.set("keep", Value::Int(3));
        store.delete_matching(&[Pattern::new("q-*")]);
        assert_eq!(store.get("q-1"), None);
        assert_eq!(store.get("q-2"), None);
        assert_eq!(store.get("keep"), Some(Value::Int(3)));
    }

    #[test]
    fn delete_except_keeps_only_matches() {
        let mut store = InsertStore::new();
        store.set("q-1", Value::Int(1));
        store.set("other", Value::Int(2));
        store.delete_not_matching(&[Pattern::new("q-*")]);
        assert_eq!(store.get("q-1"), Some(Value::Int(1)));
        assert_eq!(store.get("other"), None);
    }

    #[test]
    fn file_backed_entries_survive_delete() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("q-file"), "persists").unwrap();
        let mut store = InsertStore::new().with_fallback_dir(dir.path().to_path_buf());
        store.delete_matching(&[Pattern::new("q-*")]);
        assert_eq!(store.get("q-file"), Some(Value::String("persists".into())));
    }
}
