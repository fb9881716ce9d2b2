//! Collector interface
//!
//! The heap is moving: every collection evacuates survivors. Anything that
//! holds a reference across a collection must be registered here, either as
//! a root (object model, handle tables, globals) or as a code resource.

pub mod collector;
pub mod heap;
pub mod roots;

pub use collector::{Collector, GcStats};
pub use heap::{Forwarding, Heap};
pub use roots::{HandleRoots, RootSet};
