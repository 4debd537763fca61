use std::sync::atomic::{AtomicBool, AtomicU64, Ordering::Relaxed};
use std::sync::Arc;

use crate::errors::{KernelErr, KernelResult};

/// Cooperative cancellation token shared by `normalize.rs` and `unify.rs`.
/// Cloning an `Interrupt` clones the handle, not the flag: every clone
/// observes the same underlying `AtomicBool`/`AtomicU64` pair, so a caller
/// holding one handle can cancel every in-flight checker sharing it.
///
/// Two independent budgets are tracked:
/// - `interrupted`, flipped by a caller (e.g. from another thread holding
///   this same handle) to abort the *next* check, not synchronously;
/// - `steps`, a monotonically increasing counter every recursive descent
///   into a non-leaf subterm increments, compared against `max_steps`.
#[derive(Clone)]
pub struct Interrupt {
    interrupted: Arc<AtomicBool>,
    steps: Arc<AtomicU64>,
    max_steps: u64,
}

impl Interrupt {
    pub fn new(max_steps: u64) -> Self {
        Interrupt {
            interrupted: Arc::new(AtomicBool::new(false)),
            steps: Arc::new(AtomicU64::new(0)),
            max_steps,
        }
    }

    /// An interrupt handle with no step budget (only cancellation is
    /// observed). Used by callers that don't want `max_steps_exceeded` to
    /// ever fire.
    pub fn unbounded() -> Self {
        Interrupt::new(u64::MAX)
    }

    pub fn set_interrupted(&self) {
        self.interrupted.store(true, Relaxed);
    }

    pub fn clear(&self) {
        self.interrupted.store(false, Relaxed);
        self.steps.store(0, Relaxed);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Relaxed)
    }

    /// Called at least once per recursive descent into a non-leaf subterm.
    pub fn tick(&self) -> KernelResult<()> {
        if self.interrupted.load(Relaxed) {
            return Err(KernelErr::Interrupted);
        }
        let n = self.steps.fetch_add(1, Relaxed) + 1;
        if n > self.max_steps {
            return Err(KernelErr::MaxStepsExceeded(self.max_steps));
        }
        Ok(())
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Interrupt::unbounded()
    }
}
