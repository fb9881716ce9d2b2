//! Collection driver
//!
//! A full collection runs mark, sweep, evacuate, then fixes up every holder
//! of references outside the heap. Code resources are marked through the
//! methods that own them and cleaned up when nothing reaches them.

use super::roots::RootSet;
use crate::vm::interpreter::World;
use crate::vm::value::ObjectRef;
use log::debug;
use rustc_hash::FxHashSet;
use std::time::{Duration, Instant};

/// Garbage collector statistics
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    /// Total number of collections
    pub collections: usize,

    /// Total objects freed
    pub objects_freed: usize,

    /// Total bytes freed
    pub bytes_freed: usize,

    /// Total pause time across all collections
    pub total_pause_time: Duration,

    /// Last collection duration
    pub last_pause_time: Duration,

    /// Maximum pause time
    pub max_pause_time: Duration,

    /// Objects marked in last collection
    pub last_marked_count: usize,

    /// Objects freed in last collection
    pub last_freed_count: usize,

    /// Live objects after last collection
    pub live_objects: usize,

    /// Code resources cleaned up in last collection
    pub code_resources_cleaned: usize,
}

impl GcStats {
    fn update(
        &mut self,
        pause_time: Duration,
        marked: usize,
        freed: usize,
        freed_bytes: usize,
        live_objects: usize,
        cleaned: usize,
    ) {
        self.collections += 1;
        self.objects_freed += freed;
        self.bytes_freed += freed_bytes;
        self.total_pause_time += pause_time;
        self.last_pause_time = pause_time;
        if pause_time > self.max_pause_time {
            self.max_pause_time = pause_time;
        }

        self.last_marked_count = marked;
        self.last_freed_count = freed;
        self.live_objects = live_objects;
        self.code_resources_cleaned = cleaned;
    }
}

/// Stop-the-world collector over a `World`
pub struct Collector;

impl Collector {
    /// Run a full collection. The caller must hold the global lock.
    pub fn collect(world: &mut World) -> GcStats {
        let start = Instant::now();

        let roots = Self::gather_roots(world);
        let marked = Self::mark(world, &roots);

        let (freed, freed_bytes) = world.heap.sweep(|r| marked.contains(&r));
        let cleaned = world.code.sweep(&world.code_cache);

        let forwarding = world.heap.evacuate();
        world.model.release_dead_singletons(&forwarding);
        world.model.update_refs(&forwarding);
        world.handle_roots.update(&forwarding);
        for value in &mut world.globals {
            forwarding.update_value(value);
        }
        world.code.run_write_barriers(&forwarding);
        world.caches.after_collection(&forwarding);
        world.handle_roots.prune();

        let pause = start.elapsed();
        let live = world.heap.len();
        world
            .gc_stats
            .update(pause, marked.len(), freed, freed_bytes, live, cleaned);
        debug!(
            "gc: marked {}, freed {} ({} bytes), {} code resources cleaned in {:?}",
            marked.len(),
            freed,
            freed_bytes,
            cleaned,
            pause
        );
        world.gc_stats.clone()
    }

    fn gather_roots(world: &World) -> RootSet {
        let mut roots = RootSet::new();
        world
            .model
            .for_each_root(&mut |value| roots.add_global_root(value));
        world.handle_roots.add_to(&mut roots);
        for value in &world.globals {
            roots.add_global_root(*value);
        }
        roots
    }

    fn mark(world: &mut World, roots: &RootSet) -> FxHashSet<ObjectRef> {
        world.code.clear_marks();

        let mut marked = FxHashSet::default();
        let mut worklist: Vec<ObjectRef> = roots.iter().collect();
        while let Some(r) = worklist.pop() {
            if !marked.insert(r) {
                continue;
            }
            let Some(object) = world.heap.get(r) else {
                continue;
            };
            object.for_each_ref(&mut |child| worklist.push(child));
            if let Some(singleton) = object.header.singleton {
                world.model.for_each_module_ref(singleton, &mut |value| {
                    if let Some(child) = value.as_object() {
                        worklist.push(child);
                    }
                });
            }

            let jit = object.as_executable().and_then(|exec| exec.jit);
            if let Some(id) = jit {
                world.code.mark(id, &mut |held| worklist.push(held));
            }
        }
        // Refs that were never in the heap (stale handles) are not live
        marked.retain(|r| world.heap.contains(*r));
        marked
    }
}

#[cfg(test)]
mod tests {
    use crate::vm::interpreter::{SharedState, State};
    use crate::vm::model::{ModuleKind, StaticScope};
    use crate::vm::value::Value;
    use crate::vm::VmOptions;

    #[test]
    fn test_unreachable_objects_are_freed() {
        let mut state = State::new(SharedState::new(VmOptions::default())).unwrap();
        let world = state.world();
        let kept = world.new_string("kept").unwrap();
        world.new_string("garbage").unwrap();
        let slot = world.add_global_root(Value::Object(kept));

        let stats = state.collect_garbage();
        assert_eq!(stats.collections, 1);
        assert!(stats.last_freed_count >= 1);

        let world = state.world();
        let moved = world.globals[slot].as_object().unwrap();
        assert_ne!(moved, kept);
        assert!(!world.heap.contains(kept));
        assert!(world.heap.contains(moved));
    }

    #[test]
    fn test_references_inside_objects_follow_moves() {
        let mut state = State::new(SharedState::new(VmOptions::default())).unwrap();
        let world = state.world();
        let leaf = world.new_string("leaf").unwrap();
        let array = world.new_array(vec![Value::Object(leaf)]).unwrap();
        let slot = world.add_global_root(Value::Object(array));

        state.collect_garbage();
        state.collect_garbage();

        let world = state.world();
        let array = world.globals[slot].as_object().unwrap();
        let body = &world.heap.get(array).unwrap().body;
        match body {
            crate::vm::object::ObjectBody::Array(values) => {
                let leaf = values[0].as_object().unwrap();
                assert!(world.heap.contains(leaf));
            }
            other => panic!("unexpected body {:?}", other),
        }
        assert_eq!(world.gc_stats.collections, 2);
    }

    fn noop(_: &mut crate::vm::ffi::NativeEnv<'_>, _: &[crate::vm::ffi::Handle]) -> crate::vm::VmResult<Value> {
        Ok(Value::Nil)
    }

    /// Attach a singleton `greet` to a fresh instance; returns (instance, method)
    fn object_with_singleton_method(state: &mut State) -> (crate::vm::value::ObjectRef, crate::vm::value::ObjectRef) {
        let world = state.world();
        let greet = world.symbols.intern("greet");
        let object = world.model.object;
        let instance = world.allocate_instance(object).unwrap();
        let method = world
            .new_method(crate::vm::object::Executable::native(greet, 0, noop))
            .unwrap();
        world
            .attach_singleton_method(greet, method, &StaticScope::top(object), Value::Object(instance))
            .unwrap();
        (instance, method)
    }

    #[test]
    fn test_singleton_of_dead_object_is_released() {
        let mut state = State::new(SharedState::new(VmOptions::default())).unwrap();
        let (instance, method) = object_with_singleton_method(&mut state);
        let singleton = state.world().heap.get(instance).unwrap().header.singleton.unwrap();

        state.collect_garbage();

        let world = state.world();
        assert!(!world.heap.contains(instance));
        assert!(!world.heap.contains(method));
        let module = world.model.get(singleton);
        assert!(module.methods.is_empty());
        assert!(matches!(
            module.kind(),
            ModuleKind::MetaClass { attached: Value::Nil }
        ));
    }

    #[test]
    fn test_singleton_of_live_object_keeps_its_methods() {
        let mut state = State::new(SharedState::new(VmOptions::default())).unwrap();
        let (instance, method) = object_with_singleton_method(&mut state);
        let slot = state.world().add_global_root(Value::Object(instance));

        state.collect_garbage();

        let world = state.world();
        let instance = world.globals[slot].as_object().unwrap();
        let singleton = world.heap.get(instance).unwrap().header.singleton.unwrap();
        let greet = world.symbols.intern("greet");
        let moved = world.model.get(singleton).local_method(greet).and_then(|e| e.executable());
        let moved = moved.unwrap();
        assert_ne!(moved, method);
        assert!(world.heap.contains(moved));
        assert!(matches!(
            world.model.get(singleton).kind(),
            ModuleKind::MetaClass { attached: Value::Object(r) } if *r == instance
        ));
    }
}
