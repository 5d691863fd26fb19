#![forbid(unsafe_code)]

//! Restoration mode.
//!
//! While state is rehydrated from a persisted snapshot, synchronizers compute
//! optimistic results in restoring mode and do not subscribe to the engine.

use sigquery_reactive::Observable;

/// Shared, reactive "is restoring" flag. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct RestoringState {
    flag: Observable<bool>,
}

impl RestoringState {
    #[must_use]
    pub fn new(restoring: bool) -> Self {
        Self {
            flag: Observable::new(restoring),
        }
    }

    /// Tracked read: a computation or effect calling this re-runs when the
    /// flag flips.
    #[must_use]
    pub fn is_restoring(&self) -> bool {
        self.flag.get()
    }

    #[must_use]
    pub fn is_restoring_untracked(&self) -> bool {
        self.flag.get_untracked()
    }

    pub fn set_restoring(&self, restoring: bool) {
        if restoring != self.flag.get_untracked() {
            tracing::debug!(restoring, "restoration mode changed");
        }
        self.flag.set(restoring);
    }

    /// Run `f` in restoration mode, then put the previous mode back (also
    /// when `f` panics).
    pub fn restore_with<R>(&self, f: impl FnOnce() -> R) -> R {
        let previous = self.flag.get_untracked();
        let _reset = ResetGuard {
            state: self,
            previous,
        };
        self.set_restoring(true);
        f()
    }
}

struct ResetGuard<'a> {
    state: &'a RestoringState,
    previous: bool,
}

impl Drop for ResetGuard<'_> {
    fn drop(&mut self) {
        self.state.set_restoring(self.previous);
    }
}
