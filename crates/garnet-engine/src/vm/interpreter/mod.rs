//! Execution state shared with the (external) interpreter loop
//!
//! The bytecode loop itself lives outside this crate. What it shares with
//! the runtime core lives here: the per-unit `State`, the lock-guarded
//! `World`, the caller-link frame chain and the invoke entry point.

pub mod frame;
pub mod invoke;
pub mod shared_state;

pub use frame::{backtrace, Frame, FrameKind, FrameRecord};
pub use invoke::{Invoker, NativeDispatcher};
pub use shared_state::{SharedState, State, UnitId, World};
