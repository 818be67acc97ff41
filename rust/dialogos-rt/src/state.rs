//! The serializable slice of runtime state a save slot captures (spec §3,
//! §6): just enough to resume a paused run — `order_index` plus a deep
//! copy of the insert store. Label maps are never persisted; they are
//! recomputed from the program on load, since they are a pure function of
//! the (unchanged) program text, not of a particular run.

use dialogos_core::value::OrderedMap;

#[derive(Debug, Clone, PartialEq)]
pub struct SavedState {
    pub order_index: usize,
    pub inserts: OrderedMap,
}

impl SavedState {
    pub fn new(order_index: usize, inserts: OrderedMap) -> Self {
        Self { order_index, inserts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dialogos_core::value::Value;

    #[test]
    fn saved_state_equality_is_structural() {
        let mut a = OrderedMap::new();
        a.insert("x", Value::Int(1));
        let mut b = OrderedMap::new();
        b.insert("x", Value::Int(1));
        assert_eq!(SavedState::new(3, a), SavedState::new(3, b));
    }
}
