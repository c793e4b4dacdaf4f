use std::sync::{Condvar, Mutex, PoisonError};

use crate::error::Result;

/// One-shot completion signal carrying the outcome of a run.
///
/// Only the first `raise` is recorded; later calls return `false` and their
/// outcome is dropped. `wait` blocks on a condition variable until the
/// signal has fired.
pub struct CompletionSignal {
    slot: Mutex<Slot>,
    fired: Condvar,
}

struct Slot {
    fired: bool,
    outcome: Option<Result<()>>,
}

impl CompletionSignal {
    pub fn new() -> Self {
        CompletionSignal {
            slot: Mutex::new(Slot {
                fired: false,
                outcome: None,
            }),
            fired: Condvar::new(),
        }
    }

    /// Record `outcome` if nobody has fired yet. Returns whether this call fired.
    pub fn raise(&self, outcome: Result<()>) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.fired {
            if let Err(e) = outcome {
                tracing::debug!(error = %e, "completion already signalled, dropping late failure");
            }
            return false;
        }
        slot.fired = true;
        slot.outcome = Some(outcome);
        drop(slot);

        self.fired.notify_all();
        true
    }

    pub fn is_raised(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fired
    }

    /// Block until the signal fires and take its outcome.
    ///
    /// Intended for a single waiter; a second call returns `Ok(())`.
    pub fn wait(&self) -> Result<()> {
        let guard = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let mut slot = self
            .fired
            .wait_while(guard, |slot| !slot.fired)
            .unwrap_or_else(PoisonError::into_inner);
        slot.outcome.take().unwrap_or(Ok(()))
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}
