//! Reentrancy guard for engine entry points.
//!
//! Each engine owns one guard. Mutating operations hold a [`GuardToken`]
//! for their whole duration, so a token ledger that calls back into the
//! same engine mid-transfer is rejected with [`Error::ReentrantCall`]
//! instead of observing half-applied state.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};

/// Mutual-exclusion flag for one engine instance
#[derive(Debug)]
pub struct ReentrancyGuard {
    name: &'static str,
    entered: AtomicBool,
}

impl ReentrancyGuard {
    /// Create an unlocked guard
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            entered: AtomicBool::new(false),
        }
    }

    /// Enter the guarded section, failing fast if already entered
    pub fn enter(&self) -> Result<GuardToken<'_>> {
        self.entered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::ReentrantCall(self.name.to_string()))?;
        Ok(GuardToken { guard: self })
    }

    /// Whether a guarded operation is in progress
    pub fn is_entered(&self) -> bool {
        self.entered.load(Ordering::Acquire)
    }
}

/// Proof of entry; releases the guard when dropped
#[derive(Debug)]
pub struct GuardToken<'a> {
    guard: &'a ReentrancyGuard,
}

impl Drop for GuardToken<'_> {
    fn drop(&mut self) {
        self.guard.entered.store(false, Ordering::Release);
    }
}
