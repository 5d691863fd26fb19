#![forbid(unsafe_code)]

//! Thread-local dependency tracking and effect scheduling.
//!
//! # Design
//!
//! Tracking is a stack of frames. [`Computed`](crate::Computed) and
//! [`Effect`](crate::Effect) push a recording frame while they evaluate;
//! every tracked read (`Observable::get`, `Computed::get`) appends a
//! [`Dependency`] holding the source and the version it had when read.
//! [`untrack`] pushes a blank frame so reads inside it record nothing.
//!
//! Change propagation is push-dirty, pull-value. A changed source marks its
//! dependents dirty; dirty effects are queued. When the queue is flushed an
//! effect first compares each recorded version with the source's current
//! version (which recomputes dirty computeds) and only re-runs if one moved.
//! That is what keeps a field projection that did not change from waking
//! its readers.
//!
//! # Flush points
//!
//! The queue is flushed when a mutation completes at top level, when the
//! outermost [`batch`] ends, and when the host context regains control. It
//! is never flushed while another flush is running, inside a batch, or while
//! the host context is suspended (`HostContext::run_outside`).

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::observable::Subscription;

/// Something a computation can depend on.
pub(crate) trait Source {
    /// Stable identity, used to de-duplicate reads within one frame.
    fn source_id(&self) -> usize;
    /// Version after bringing the source up to date.
    fn current_version(&self) -> u64;
    /// Register `on_dirty` to be called when the source may have changed.
    fn watch(&self, on_dirty: Rc<dyn Fn()>) -> Subscription;
}

/// A source together with the version observed when it was read.
#[derive(Clone)]
pub(crate) struct Dependency {
    pub(crate) source: Rc<dyn Source>,
    pub(crate) version: u64,
}

impl Dependency {
    pub(crate) fn is_stale(&self) -> bool {
        self.source.current_version() != self.version
    }
}

/// A queued unit of work (an effect).
pub(crate) trait Scheduled {
    fn run_scheduled(self: Rc<Self>);
}

thread_local! {
    static FRAMES: RefCell<Vec<Option<Vec<Dependency>>>> = const { RefCell::new(Vec::new()) };
    static BATCH_DEPTH: Cell<usize> = const { Cell::new(0) };
    static SUSPENDED: Cell<usize> = const { Cell::new(0) };
    static FLUSHING: Cell<bool> = const { Cell::new(false) };
    static QUEUE: RefCell<VecDeque<Rc<dyn Scheduled>>> = const { RefCell::new(VecDeque::new()) };
}

/// Pops its frame on drop, including during unwinding.
struct FrameGuard {
    finished: bool,
}

impl FrameGuard {
    fn push(frame: Option<Vec<Dependency>>) -> Self {
        FRAMES.with(|frames| frames.borrow_mut().push(frame));
        Self { finished: false }
    }

    fn finish(mut self) -> Vec<Dependency> {
        self.finished = true;
        FRAMES
            .with(|frames| frames.borrow_mut().pop())
            .flatten()
            .unwrap_or_default()
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if !self.finished {
            FRAMES.with(|frames| {
                frames.borrow_mut().pop();
            });
        }
    }
}

#[derive(Clone, Copy)]
enum Counter {
    Batch,
    Suspend,
}

struct CounterGuard(Counter);

impl CounterGuard {
    fn enter(counter: Counter) -> Self {
        match counter {
            Counter::Batch => BATCH_DEPTH.set(BATCH_DEPTH.get() + 1),
            Counter::Suspend => SUSPENDED.set(SUSPENDED.get() + 1),
        }
        Self(counter)
    }
}

impl Drop for CounterGuard {
    fn drop(&mut self) {
        match self.0 {
            Counter::Batch => BATCH_DEPTH.set(BATCH_DEPTH.get().saturating_sub(1)),
            Counter::Suspend => SUSPENDED.set(SUSPENDED.get().saturating_sub(1)),
        }
    }
}

/// Resets the flushing flag on drop.
struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        FLUSHING.set(false);
    }
}

/// Run `f` in a fresh recording frame and return what it read.
pub(crate) fn track<R>(f: impl FnOnce() -> R) -> (R, Vec<Dependency>) {
    let guard = FrameGuard::push(Some(Vec::new()));
    let value = f();
    (value, guard.finish())
}

/// Record a read of source `id` at `version` in the innermost frame.
///
/// `make` is only called when the read is actually recorded.
pub(crate) fn record(id: usize, version: u64, make: impl FnOnce() -> Rc<dyn Source>) {
    FRAMES.with(|frames| {
        let mut frames = frames.borrow_mut();
        if let Some(Some(deps)) = frames.last_mut() {
            if deps.iter().all(|d| d.source.source_id() != id) {
                deps.push(Dependency {
                    source: make(),
                    version,
                });
            }
        }
    });
}

/// Run `f` without registering any dependency in the enclosing computation.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let _guard = FrameGuard::push(None);
    f()
}

/// Whether a computed value or effect is currently recording reads.
#[must_use]
pub fn is_tracking() -> bool {
    FRAMES.with(|frames| matches!(frames.borrow().last(), Some(Some(_))))
}

/// Run `f` with effect flushing deferred until the outermost batch ends.
///
/// Mutations inside the batch still mark dependents dirty immediately;
/// only effect execution waits.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let value = {
        let _guard = CounterGuard::enter(Counter::Batch);
        f()
    };
    maybe_flush();
    value
}

/// Run `f` untracked with flushing suspended; flush afterwards if allowed.
pub(crate) fn suspended<R>(f: impl FnOnce() -> R) -> R {
    let value = {
        let _guard = CounterGuard::enter(Counter::Suspend);
        untrack(f)
    };
    maybe_flush();
    value
}

/// Whether flushing is currently suspended.
#[must_use]
pub(crate) fn is_suspended() -> bool {
    SUSPENDED.get() > 0
}

/// Queue a node. De-duplication is the node's job.
pub(crate) fn schedule(node: Rc<dyn Scheduled>) {
    QUEUE.with(|queue| queue.borrow_mut().push_back(node));
}

/// Number of queued effects not yet run.
#[must_use]
pub fn pending_effects() -> usize {
    QUEUE.with(|queue| queue.borrow().len())
}

/// Flush the queue if no batch, suspension or flush is in progress.
pub(crate) fn maybe_flush() {
    if BATCH_DEPTH.get() > 0 || SUSPENDED.get() > 0 || FLUSHING.get() {
        return;
    }
    FLUSHING.set(true);
    let _guard = FlushGuard;
    while let Some(node) = QUEUE.with(|queue| queue.borrow_mut().pop_front()) {
        node.run_scheduled();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Observable;

    #[test]
    fn untracked_reads_record_nothing() {
        let a = Observable::new(1);
        let b = Observable::new(2);
        let (sum, deps) = track(|| a.get() + untrack(|| b.get()));
        assert_eq!(sum, 3);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].version, 0);
    }

    #[test]
    fn repeated_reads_are_deduplicated() {
        let a = Observable::new(1);
        let (_, deps) = track(|| a.get() + a.get() + a.get());
        assert_eq!(deps.len(), 1);
    }

    #[test]
    fn tracking_flag() {
        assert!(!is_tracking());
        let ((inside, untracked), _) = track(|| (is_tracking(), untrack(is_tracking)));
        assert!(inside);
        assert!(!untracked);
        assert!(!is_tracking());
    }

    #[test]
    fn stale_dependency_detection() {
        let a = Observable::new(1);
        let (_, deps) = track(|| a.get());
        assert!(!deps[0].is_stale());
        a.set(2);
        assert!(deps[0].is_stale());
    }

    #[test]
    fn frame_popped_after_panic() {
        let result = std::panic::catch_unwind(|| {
            let _ = track(|| -> u32 { panic!("boom") });
        });
        assert!(result.is_err());
        assert!(!is_tracking());
    }

    #[test]
    fn nested_batches_restore_depth() {
        batch(|| batch(|| ()));
        assert_eq!(BATCH_DEPTH.get(), 0);
        assert_eq!(pending_effects(), 0);
    }
}
