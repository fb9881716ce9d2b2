//! The global execution lock
//!
//! A single token that an execution unit must hold to touch managed state.
//! It is an ordinary value owned by `SharedState` and reached through the
//! unit's `State`, so tests can exercise it without process-wide globals.

use crate::vm::interpreter::UnitId;
use log::trace;
use parking_lot::{Condvar, Mutex};

/// Outcome of a lock operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// The caller now holds the lock
    Locked,
    /// The caller released the lock
    Unlocked,
    /// Another unit holds the lock
    Busy,
    /// The caller tried to release a lock it does not hold
    NotOwner,
}

/// Token guarding the world
#[derive(Debug, Default)]
pub struct GlobalLock {
    owner: Mutex<Option<UnitId>>,
    released: Condvar,
}

impl GlobalLock {
    /// Create an unlocked lock
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `unit` holds the lock. Re-locking by the owner is a no-op.
    pub fn lock(&self, unit: UnitId) -> LockStatus {
        let mut owner = self.owner.lock();
        while let Some(current) = *owner {
            if current == unit {
                return LockStatus::Locked;
            }
            self.released.wait(&mut owner);
        }
        *owner = Some(unit);
        trace!("global lock taken by {:?}", unit);
        LockStatus::Locked
    }

    /// Take the lock only if it is free
    pub fn try_lock(&self, unit: UnitId) -> LockStatus {
        let mut owner = self.owner.lock();
        match *owner {
            Some(current) if current == unit => LockStatus::Locked,
            Some(_) => LockStatus::Busy,
            None => {
                *owner = Some(unit);
                LockStatus::Locked
            }
        }
    }

    /// Release the lock held by `unit`
    pub fn unlock(&self, unit: UnitId) -> LockStatus {
        let mut owner = self.owner.lock();
        if *owner != Some(unit) {
            return LockStatus::NotOwner;
        }
        *owner = None;
        self.released.notify_one();
        trace!("global lock released by {:?}", unit);
        LockStatus::Unlocked
    }

    /// Reinitialise in place, forgetting any owner.
    ///
    /// Only sound where no other thread can be using the lock, which is the
    /// situation in a freshly forked child: the inherited state may name an
    /// owner (or hold the inner mutex) on behalf of a thread that does not
    /// exist there.
    pub fn init(&self) {
        if self.owner.is_locked() {
            // SAFETY: the holder is a thread that did not survive the fork.
            unsafe { self.owner.force_unlock() };
        }
        *self.owner.lock() = None;
    }

    /// Whether any unit holds the lock
    pub fn is_locked(&self) -> bool {
        self.owner.lock().is_some()
    }

    /// The unit holding the lock
    pub fn owner(&self) -> Option<UnitId> {
        *self.owner.lock()
    }
}
