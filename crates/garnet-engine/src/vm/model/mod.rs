//! Object model
//!
//! Classes and modules live in a pinned arena (`ObjectModel`) addressed by
//! `ModuleId`. The operations that mutate it are methods on `World`, since
//! most of them also touch the heap and the dispatch caches.

pub mod classes;
pub mod constants;
pub mod control;
pub mod lookup;
pub mod methods;
pub mod module;
pub mod registry;
pub mod scope;

pub use control::{raise_exception, raise_throw, request_exit};
pub use lookup::LookupChain;
pub use module::{ClassInfo, MethodEntry, Module, ModuleKind};
pub use registry::ObjectModel;
pub use scope::StaticScope;
