#![forbid(unsafe_code)]

//! Side effects driven by tracked reads.
//!
//! # Design
//!
//! An [`Effect`] runs its body once on creation, recording what it reads.
//! When one of those sources changes the effect is queued; when the queue is
//! flushed the effect re-runs only if a recorded version actually moved.
//! Before every re-run, and on disposal, the cleanups registered through
//! [`EffectScope::on_cleanup`] during the previous run are executed
//! (untracked, in registration order).
//!
//! # Invariants
//!
//! 1. An effect is queued at most once at a time and runs at most once per
//!    flush.
//! 2. Every registered cleanup runs exactly once.
//! 3. After [`dispose()`](Effect::dispose) the body never runs again.
//!
//! # Failure Modes
//!
//! - **Body panics**: The effect keeps its previous dependencies and is not
//!   re-queued; cleanups registered before the panic are lost.

use std::cell::RefCell;
use std::rc::Rc;

use crate::graph::{self, Dependency, Scheduled};
use crate::observable::Subscription;

type Cleanup = Box<dyn FnOnce()>;

/// Handle passed to an effect body for registering cleanups.
#[derive(Default)]
pub struct EffectScope {
    cleanups: RefCell<Vec<Cleanup>>,
}

impl EffectScope {
    /// Run `f` before the next run of this effect, or when it is disposed.
    pub fn on_cleanup(&self, f: impl FnOnce() + 'static) {
        self.cleanups.borrow_mut().push(Box::new(f));
    }
}

impl std::fmt::Debug for EffectScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectScope")
            .field("cleanups", &self.cleanups.borrow().len())
            .finish()
    }
}

#[derive(Default)]
struct EffectState {
    deps: Vec<Dependency>,
    sources: Vec<Subscription>,
    cleanups: Vec<Cleanup>,
    scheduled: bool,
    disposed: bool,
    runs: u64,
}

struct EffectNode {
    label: &'static str,
    body: RefCell<Box<dyn FnMut(&EffectScope)>>,
    state: RefCell<EffectState>,
}

impl EffectNode {
    fn execute(self: &Rc<Self>) {
        let deps = {
            let state = self.state.borrow();
            if state.disposed {
                return;
            }
            if state.runs > 0 {
                Some(state.deps.clone())
            } else {
                None
            }
        };
        if let Some(deps) = deps {
            if !deps.iter().any(Dependency::is_stale) {
                return;
            }
        }

        let cleanups = {
            let mut state = self.state.borrow_mut();
            state.sources.clear();
            std::mem::take(&mut state.cleanups)
        };
        run_cleanups(cleanups);

        let scope = EffectScope::default();
        let ((), deps) = graph::track(|| {
            let mut body = self.body.borrow_mut();
            (*body)(&scope)
        });

        let weak = Rc::downgrade(self);
        let on_dirty: Rc<dyn Fn()> = Rc::new(move || {
            if let Some(node) = weak.upgrade() {
                node.schedule();
            }
        });
        let sources = deps
            .iter()
            .map(|dep| dep.source.watch(Rc::clone(&on_dirty)))
            .collect();

        let leftover = {
            let mut state = self.state.borrow_mut();
            state.runs += 1;
            if state.disposed {
                // Disposed from inside its own body.
                Some(scope.cleanups.into_inner())
            } else {
                state.deps = deps;
                state.sources = sources;
                state.cleanups = scope.cleanups.into_inner();
                None
            }
        };
        if let Some(cleanups) = leftover {
            run_cleanups(cleanups);
        }
        tracing::trace!(effect = self.label, "effect ran");
    }

    fn schedule(self: &Rc<Self>) {
        {
            let mut state = self.state.borrow_mut();
            if state.disposed || state.scheduled {
                return;
            }
            state.scheduled = true;
        }
        graph::schedule(Rc::clone(self) as Rc<dyn Scheduled>);
    }

    fn dispose(&self) {
        let cleanups = {
            let mut state = self.state.borrow_mut();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.sources.clear();
            state.deps.clear();
            std::mem::take(&mut state.cleanups)
        };
        run_cleanups(cleanups);
        tracing::trace!(effect = self.label, "effect disposed");
    }
}

impl Scheduled for EffectNode {
    fn run_scheduled(self: Rc<Self>) {
        self.state.borrow_mut().scheduled = false;
        self.execute();
    }
}

fn run_cleanups(cleanups: Vec<Cleanup>) {
    if cleanups.is_empty() {
        return;
    }
    graph::untrack(|| {
        for cleanup in cleanups {
            cleanup();
        }
    });
}

/// A running side effect. Dropping the handle disposes it.
pub struct Effect {
    node: Rc<EffectNode>,
}

impl Effect {
    /// Create and immediately run an effect.
    pub fn new(body: impl FnMut(&EffectScope) + 'static) -> Self {
        Self::named("effect", body)
    }

    /// Like [`new`](Self::new), with a label used in trace output.
    pub fn named(label: &'static str, body: impl FnMut(&EffectScope) + 'static) -> Self {
        let node = Rc::new(EffectNode {
            label,
            body: RefCell::new(Box::new(body)),
            state: RefCell::new(EffectState::default()),
        });
        graph::batch(|| node.execute());
        Self { node }
    }

    /// Stop the effect and run its pending cleanups. Idempotent.
    pub fn dispose(&self) {
        self.node.dispose();
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.node.state.borrow().disposed
    }

    /// How many times the body has run.
    #[must_use]
    pub fn runs(&self) -> u64 {
        self.node.state.borrow().runs
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        self.node.label
    }
}

impl Drop for Effect {
    fn drop(&mut self) {
        self.node.dispose();
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.node.state.borrow();
        f.debug_struct("Effect")
            .field("label", &self.node.label)
            .field("runs", &state.runs)
            .field("scheduled", &state.scheduled)
            .field("disposed", &state.disposed)
            .finish()
    }
}
