//! Garnet Runtime Core
//!
//! This crate provides the execution core that sits between the bytecode
//! interpreter, natively implemented methods and the host operating system:
//! - **Foreign calls**: handle tables and foreign call contexts (`vm::ffi`)
//! - **Object model**: classes, modules, method tables and lookup (`vm::model`)
//! - **Dispatch caches**: global and call-site caches plus the method serial (`vm::dispatch`)
//! - **Process control**: the global execution lock, fork/exec/wait, signals (`vm::process`)
//! - **JIT resources**: compiled-code holders tracked by the collector (`jit`)
//!
//! # Example
//!
//! ```rust,ignore
//! use garnet_engine::vm::{SharedState, State, VmOptions};
//!
//! let shared = SharedState::new(VmOptions::default());
//! let mut state = State::new(shared)?;
//!
//! let world = state.world();
//! let animal = world.symbols.intern("Animal");
//! let class = world.open_class(animal, None, None)?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![cfg_attr(test, allow(clippy::bool_assert_comparison))]
#![allow(clippy::new_without_default)]
#![allow(clippy::arc_with_non_send_sync)]

// ============================================================================
// Core Modules
// ============================================================================

/// VM module: object model, foreign calls, collector interface, process control
pub mod vm;

/// JIT module: backends, background compiler and code resources
pub mod jit;

// ============================================================================
// Convenience Re-exports
// ============================================================================

pub use vm::{SharedState, State, Value, VmError, VmOptions, VmResult, World};
