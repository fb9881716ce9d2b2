//! GC root tracking
//!
//! This module manages the root set for garbage collection.
//! Roots are starting points for GC traversal and include:
//! - Handle table slots of live foreign call contexts
//! - Object model roots (constants, method tables, module ivars)
//! - Global roots registered by the embedder

use crate::vm::ffi::handles::{SharedSlots, SlotStore};
use crate::vm::gc::heap::Forwarding;
use crate::vm::value::{ObjectRef, Value};
use std::sync::Weak;

/// Root set for garbage collection
///
/// The root set contains all values that are directly accessible
/// and should not be collected, even if no other objects reference them.
pub struct RootSet {
    /// Handle roots (slots of live handle tables)
    handle_roots: Vec<ObjectRef>,

    /// Global roots (object model, embedder globals)
    global_roots: Vec<ObjectRef>,
}

impl RootSet {
    /// Create a new root set
    pub fn new() -> Self {
        Self {
            handle_roots: Vec::new(),
            global_roots: Vec::new(),
        }
    }

    /// Add a handle root
    pub fn add_handle_root(&mut self, value: Value) {
        if let Some(r) = value.as_object() {
            self.handle_roots.push(r);
        }
    }

    /// Add a global root
    pub fn add_global_root(&mut self, value: Value) {
        if let Some(r) = value.as_object() {
            self.global_roots.push(r);
        }
    }

    /// Iterate over all roots
    pub fn iter(&self) -> impl Iterator<Item = ObjectRef> + '_ {
        self.handle_roots
            .iter()
            .chain(self.global_roots.iter())
            .copied()
    }

    /// Get total number of roots
    pub fn len(&self) -> usize {
        self.handle_roots.len() + self.global_roots.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RootSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry of every handle table's slot storage.
///
/// Tables are held weakly: a table torn down with its context simply stops
/// upgrading and is pruned on the next collection.
#[derive(Debug, Default)]
pub struct HandleRoots {
    tables: Vec<Weak<parking_lot::Mutex<SlotStore>>>,
}

impl HandleRoots {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table's slots as a root set
    pub fn register(&mut self, slots: &SharedSlots) {
        self.tables.push(std::sync::Arc::downgrade(slots));
    }

    /// Number of tables still alive
    pub fn live_tables(&self) -> usize {
        self.tables.iter().filter(|t| t.strong_count() > 0).count()
    }

    /// Drop registrations of torn-down tables
    pub fn prune(&mut self) {
        self.tables.retain(|t| t.strong_count() > 0);
    }

    /// Feed every live slot into `roots`
    pub fn add_to(&self, roots: &mut RootSet) {
        for table in self.tables.iter().filter_map(Weak::upgrade) {
            let store = table.lock();
            for value in store.values() {
                roots.add_handle_root(*value);
            }
        }
    }

    /// Rewrite every live slot in place after an evacuation
    pub fn update(&self, forwarding: &Forwarding) {
        for table in self.tables.iter().filter_map(Weak::upgrade) {
            let mut store = table.lock();
            for value in store.values_mut() {
                forwarding.update_value(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_root_set_creation() {
        let roots = RootSet::new();
        assert_eq!(roots.len(), 0);
        assert!(roots.is_empty());
    }

    #[test]
    fn test_root_set_ignores_immediates() {
        let mut roots = RootSet::new();

        roots.add_handle_root(Value::Fixnum(42));
        roots.add_global_root(Value::True);
        roots.add_global_root(Value::Nil);
        assert!(roots.is_empty());

        roots.add_global_root(Value::Object(ObjectRef::from_address(0x1000)));
        assert_eq!(roots.len(), 1);
    }

    #[test]
    fn test_handle_roots_prune_dead_tables() {
        let mut registry = HandleRoots::new();
        let live = Arc::new(parking_lot::Mutex::new(SlotStore::new(4)));
        {
            let dead = Arc::new(parking_lot::Mutex::new(SlotStore::new(4)));
            registry.register(&dead);
        }
        registry.register(&live);

        assert_eq!(registry.live_tables(), 1);
        registry.prune();
        assert_eq!(registry.tables.len(), 1);
    }
}
