//! Sandbox slot registry (§9 "global mutable state": only the sandbox slot
//! registry and the broker connection pool are process-singletons).
//!
//! Slot numbering is deterministic per worker — worker `k` uses slot `k`
//! (§4.1 policy) — so this is a small fixed map from `box_id` to whatever
//! state a worker keeps about the sandbox it owns, keyed the same way
//! engine-scoped state was kept per-engine in the trading core.

use std::collections::BTreeMap;

/// A small integer naming one reusable sandbox instance owned by one
/// worker at a time (§4.1, GLOSSARY).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(pub i32);

impl SlotId {
    pub fn new(id: i32) -> Self {
        Self(id)
    }

    pub fn as_i32(self) -> i32 {
        self.0
    }
}

/// Minimal slot-keyed store preventing cross-worker state bleed in-memory.
/// Each worker owns exactly one entry, identified by its deterministic
/// `SlotId`; no two workers ever read or write another's entry.
#[derive(Clone, Debug, Default)]
pub struct SlotRegistry<T> {
    inner: BTreeMap<SlotId, T>,
}

impl<T> SlotRegistry<T> {
    pub fn new() -> Self {
        Self {
            inner: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, slot: SlotId, value: T) -> Option<T> {
        self.inner.insert(slot, value)
    }

    pub fn get(&self, slot: &SlotId) -> Option<&T> {
        self.inner.get(slot)
    }

    pub fn get_mut(&mut self, slot: &SlotId) -> Option<&mut T> {
        self.inner.get_mut(slot)
    }

    pub fn remove(&mut self, slot: &SlotId) -> Option<T> {
        self.inner.remove(slot)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_kept_apart() {
        let mut reg: SlotRegistry<&'static str> = SlotRegistry::new();
        reg.insert(SlotId::new(0), "worker-0-state");
        reg.insert(SlotId::new(1), "worker-1-state");

        assert_eq!(reg.get(&SlotId::new(0)), Some(&"worker-0-state"));
        assert_eq!(reg.get(&SlotId::new(1)), Some(&"worker-1-state"));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn release_frees_the_slot() {
        let mut reg: SlotRegistry<i32> = SlotRegistry::new();
        reg.insert(SlotId::new(0), 42);
        assert_eq!(reg.remove(&SlotId::new(0)), Some(42));
        assert!(reg.get(&SlotId::new(0)).is_none());
    }
}
