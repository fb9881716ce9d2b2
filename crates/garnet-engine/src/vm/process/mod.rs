//! Process control: the global execution lock, fork/exec/wait and signal
//! registration

pub mod global_lock;
pub mod signals;
#[cfg(unix)]
pub mod system;

pub use global_lock::{GlobalLock, LockStatus};
pub use signals::SignalRegistry;
#[cfg(unix)]
pub use system::{exec, fork, wait_pid, WaitStatus};
