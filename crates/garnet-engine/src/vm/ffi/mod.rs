//! Foreign call support
//!
//! This module provides:
//! - Handle tables: GC-safe indirection for references held by foreign code
//! - Foreign call contexts: per-activation stack buffer, handles and call bindings
//! - Native invocation: running Rust-implemented methods inside a context

pub mod context;
pub mod handles;
mod native;

pub use context::{CallMessage, ContextGuard, ForeignCallContext, ReentryAction};
pub use handles::{Handle, HandleTable, TableId};
pub use native::{call_native, resolve_native, NativeEnv};
