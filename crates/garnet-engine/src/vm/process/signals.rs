//! Signal handler registration
//!
//! Only registration lives here. A watched signal is recorded in a pending
//! set by an async-signal-safe handler; turning pending signals into managed
//! calls is the embedder's business.

use log::{debug, warn};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(target_os = "linux")]
const NSIG: usize = 65;
#[cfg(not(target_os = "linux"))]
const NSIG: usize = 32;

static PENDING: [AtomicBool; NSIG] = [const { AtomicBool::new(false) }; NSIG];

#[cfg(unix)]
extern "C" fn record_signal(sig: libc::c_int) {
    if let Some(slot) = PENDING.get(sig as usize) {
        slot.store(true, Ordering::SeqCst);
    }
}

/// Signals this process has asked to watch
#[derive(Debug, Default)]
pub struct SignalRegistry {
    watched: Mutex<FxHashSet<i32>>,
}

impl SignalRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the recording handler for `sig`. False if the signal number is
    /// out of range or cannot be caught.
    pub fn watch(&self, sig: i32) -> bool {
        if sig <= 0 || sig as usize >= NSIG {
            return false;
        }
        if !install(sig) {
            warn!("cannot watch signal {}", sig);
            return false;
        }
        self.watched.lock().insert(sig);
        debug!("watching signal {}", sig);
        true
    }

    /// Whether `sig` is watched
    pub fn is_watched(&self, sig: i32) -> bool {
        self.watched.lock().contains(&sig)
    }

    /// Drain every signal delivered since the last call, lowest number first
    pub fn take_pending_signals(&self) -> Vec<i32> {
        PENDING
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.swap(false, Ordering::SeqCst))
            .map(|(sig, _)| sig as i32)
            .collect()
    }

    /// Restore the default disposition of every signal
    pub fn reset_signal_dispositions(&self) {
        for sig in 1..NSIG as i32 {
            restore_default(sig);
        }
        self.watched.lock().clear();
        debug!("signal dispositions reset to default");
    }
}

#[cfg(unix)]
fn install(sig: i32) -> bool {
    let handler = record_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    // SAFETY: the handler only touches atomics.
    unsafe { libc::signal(sig, handler) != libc::SIG_ERR }
}

#[cfg(not(unix))]
fn install(_sig: i32) -> bool {
    false
}

#[cfg(unix)]
fn restore_default(sig: i32) {
    if sig == libc::SIGKILL || sig == libc::SIGSTOP {
        return;
    }
    // SAFETY: restoring SIG_DFL has no memory-safety preconditions.
    unsafe {
        libc::signal(sig, libc::SIG_DFL);
    }
}

#[cfg(not(unix))]
fn restore_default(_sig: i32) {}
