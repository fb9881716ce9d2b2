//! fork, exec and waitpid
//!
//! These are the only places the runtime issues the corresponding syscalls.
//! Each one coordinates with the global lock and the background compiler:
//! the lock is never held across a blocking call or a fork, and the compiler
//! thread is quiesced before the process image is duplicated or replaced.

use crate::jit::compiler::CompilerState;
use crate::vm::interpreter::State;
use crate::vm::process::global_lock::LockStatus;
use crate::vm::{SystemError, VmError, VmResult};
use log::{debug, error, warn};
use std::convert::Infallible;
use std::ffi::CString;

/// Result of `wait_pid`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// No child matched `pid`
    NoChild,
    /// Non-blocking wait and no child has changed state yet
    NoStatusYet,
    /// A child was reaped
    Exited {
        /// Pid of the reaped child
        pid: i32,
        /// Exit status, or `None` if the child did not exit normally
        code: Option<i32>,
    },
}

/// Fork the process.
///
/// Returns the child's pid in the parent and 0 in the child. The parent
/// still holds the global lock afterwards. The child holds a freshly
/// initialised lock and its compiler is paused, ready to be unpaused.
pub fn fork(state: &mut State) -> VmResult<i32> {
    let shared = state.shared().clone();
    let was_running = shared.compiler().state() == CompilerState::Running;

    shared.compiler().pause();
    state.release_lock();

    // SAFETY: the compiler thread is paused and the global lock is released,
    // so the child does not inherit a half-finished compilation or a lock
    // owned by this unit.
    let pid = unsafe { libc::fork() };

    if pid < 0 {
        let err = SystemError::last("fork");
        state.acquire_lock();
        if was_running {
            shared.compiler().unpause()?;
        }
        return Err(err.into());
    }

    if pid == 0 {
        shared.lock().init();
        if shared.lock().try_lock(state.unit()) != LockStatus::Locked {
            error!("global lock busy in forked child, aborting");
            std::process::abort();
        }
        state.note_locked();
        shared.compiler().on_fork();
        return Ok(0);
    }

    state.acquire_lock();
    if was_running {
        shared.compiler().unpause()?;
    }
    debug!("forked child {}", pid);
    Ok(pid)
}

/// Replace the process image with `path`, searching `PATH`.
///
/// `argv[0]` is `path`, followed by `args`. Only returns on failure.
pub fn exec(state: &mut State, path: &str, args: &[&str]) -> VmResult<Infallible> {
    let program = CString::new(path)
        .map_err(|_| VmError::TypeError(format!("exec path contains NUL: {:?}", path)))?;
    let mut argv = vec![program.clone()];
    for arg in args {
        argv.push(
            CString::new(*arg)
                .map_err(|_| VmError::TypeError(format!("exec argument contains NUL: {:?}", arg)))?,
        );
    }
    let mut argv_ptrs: Vec<*const libc::c_char> = argv.iter().map(|a| a.as_ptr()).collect();
    argv_ptrs.push(std::ptr::null());

    let shared = state.shared().clone();
    let had_thread = shared.compiler().has_thread();
    shared.compiler().shutdown();
    shared.signals().reset_signal_dispositions();

    // SAFETY: `argv_ptrs` is NULL-terminated and every pointer borrows from
    // `argv`, which outlives the call.
    unsafe {
        libc::execvp(program.as_ptr(), argv_ptrs.as_ptr());
    }

    let err = SystemError::last("execvp");
    warn!("exec of {} failed: {}", path, err);
    if had_thread && state.options().jit_background {
        shared.compiler().restart()?;
    }
    Err(err.into())
}

/// Wait for a child to change state.
///
/// The global lock is released for the duration of the wait. Interrupted
/// waits are retried; "no such child" is reported as `WaitStatus::NoChild`.
pub fn wait_pid(state: &mut State, pid: i32, no_hang: bool) -> VmResult<WaitStatus> {
    let options = if no_hang { libc::WNOHANG } else { 0 };
    let mut status: libc::c_int = 0;

    let result = state.without_lock(|| loop {
        // SAFETY: `status` is a valid out-pointer for the duration of the call.
        let reaped = unsafe { libc::waitpid(pid, &mut status, options) };
        if reaped == -1 {
            let err = SystemError::last("waitpid");
            if err.errno == libc::EINTR {
                continue;
            }
            break Err(err);
        }
        break Ok(reaped);
    });

    match result {
        Err(err) if err.errno == libc::ECHILD => Ok(WaitStatus::NoChild),
        Err(err) => Err(err.into()),
        Ok(0) => Ok(WaitStatus::NoStatusYet),
        Ok(reaped) => {
            let code = if libc::WIFEXITED(status) {
                Some(libc::WEXITSTATUS(status))
            } else {
                None
            };
            Ok(WaitStatus::Exited { pid: reaped, code })
        }
    }
}
