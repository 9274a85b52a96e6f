//! Collector hooks.
//!
//! The interpreter does not collect anything itself - heap objects are
//! reference counted - but it honours the two contracts a generational
//! collector needs from the execution core:
//!
//! - **Arena checkpoints**: objects created while one opcode executes
//!   are rooted in a side arena; the dispatch loop snapshots the arena
//!   index before running and truncates back to it after each opcode,
//!   bounding rooting work to a single instruction's transients.
//! - **Write barriers**: every store that plants a reference inside a
//!   heap container (environment slots, array/hash elements, variable
//!   tables) records the holder in a remembered set, preserving the
//!   old-to-young tracking invariant.

use beryl_core::object::ObjRef;
use rustc_hash::FxHashSet;
use std::sync::Arc;

/// Arena checkpoint plus remembered set.
#[derive(Default)]
pub struct GcHooks {
    arena: Vec<ObjRef>,
    remembered: FxHashSet<usize>,
    barrier_hits: u64,
}

impl GcHooks {
    pub fn new() -> GcHooks {
        GcHooks::default()
    }

    /// Snapshot the arena index.
    #[inline]
    pub fn arena_save(&self) -> usize {
        self.arena.len()
    }

    /// Drop everything rooted after the snapshot.
    #[inline]
    pub fn arena_restore(&mut self, idx: usize) {
        self.arena.truncate(idx);
    }

    /// Root a freshly created object until the next checkpoint.
    #[inline]
    pub fn protect(&mut self, obj: &ObjRef) {
        self.arena.push(obj.clone());
    }

    /// Record a container that just received a reference.
    #[inline]
    pub fn write_barrier(&mut self, holder: &ObjRef) {
        self.barrier_hits += 1;
        self.remembered.insert(Arc::as_ptr(holder) as usize);
    }

    /// Number of barrier invocations so far.
    pub fn barrier_hits(&self) -> u64 {
        self.barrier_hits
    }

    /// Hand the remembered set to a collector, clearing it.
    pub fn take_remembered(&mut self) -> FxHashSet<usize> {
        std::mem::take(&mut self.remembered)
    }

    /// Current arena population, for tests and introspection.
    pub fn arena_len(&self) -> usize {
        self.arena.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beryl_core::object::RObject;

    #[test]
    fn test_arena_checkpoint() {
        let mut gc = GcHooks::new();
        let ai = gc.arena_save();
        gc.protect(&RObject::string("a".into()));
        gc.protect(&RObject::string("b".into()));
        assert_eq!(gc.arena_len(), 2);
        gc.arena_restore(ai);
        assert_eq!(gc.arena_len(), 0);
    }

    #[test]
    fn test_barrier_dedupes_holders() {
        let mut gc = GcHooks::new();
        let holder = RObject::array(vec![]);
        gc.write_barrier(&holder);
        gc.write_barrier(&holder);
        assert_eq!(gc.barrier_hits(), 2);
        assert_eq!(gc.take_remembered().len(), 1);
    }
}
