#![forbid(unsafe_code)]

//! Keeps an engine observer's two result feeds in sync with the signal graph.
//!
//! # Design
//!
//! A [`QuerySynchronizer`] is a handful of graph nodes around one engine
//! observer:
//!
//! ```text
//!  options_fn ──► options (computed) ──┬──► optimistic (computed) ──┐
//!  restoring  ──┘                      │                            ├──► merged
//!                                      └──► subscribed (cell) ──────┘
//! ```
//!
//! - `options` re-evaluates the caller's options function (tracked, so any
//!   signal it reads is a dependency), applies client defaults and marks
//!   the optimistic-results mode from the restoring flag.
//! - The observer is created on first need and then reused for the whole
//!   lifetime of the synchronizer.
//! - `optimistic` asks the observer for a result computed from cache state.
//! - `subscribed` is the single write-cell for pushes. It is only written by
//!   the port handler (on the graph thread, during a host tick) and cleared
//!   when the options change.
//! - `merged` yields the subscribed result if it belongs to the current
//!   options, else the optimistic one.
//!
//! Two effects drive the observer. The options effect calls `set_options`
//! silently whenever the options change and clears `subscribed` on cleanup.
//! The subscription effect registers a listener (outside the host context)
//! for the current configuration unless state is being restored; its
//! cleanup unsubscribes and invalidates the port generation, so pushes that
//! are already queued for the old listener are dropped.
//!
//! # Invariants
//!
//! 1. `merged` always has a value; right after an options change it equals
//!    the optimistic result for the new options.
//! 2. A subscribed result is only visible under the options it was
//!    subscribed with.
//! 3. Exactly one observer is created per synchronizer.
//! 4. While restoring, nothing is subscribed.
//! 5. A push whose error the throw policy accepts is raised to the host's
//!    error boundary and never stored.
//! 6. [`destroy`](QuerySynchronizer::destroy) unsubscribes exactly once; the
//!    merged value is frozen at its last state.
//!
//! # Failure Modes
//!
//! - **Inbox full**: the listener drops the push and logs a warning. The next
//!   push (or the next options change) brings the state back.
//! - **Raised error**: fatal to that push only; later pushes are applied.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use sigquery_core::{
    Listener, NotifyOptions, ObserverClass, ObserverRef, OptimisticResults, OptionsSnapshot,
    QueryClient, QueryOptions, QueryResult, QueryValue, ResultSnapshot,
};
use sigquery_reactive::{Computed, Effect, HostContext, Observable, Port, RaisedError, untrack};

use crate::error::{Result, SyncError};
use crate::restoring::RestoringState;

/// Label of every synchronizer's inbox port.
const PORT_LABEL: &str = "query-synchronizer";

/// One engine push, tagged with the configuration it was subscribed under.
struct Push<D, E> {
    options: OptionsSnapshot<D, E>,
    result: QueryResult<D, E>,
}

/// The latest pushed result and the options it belongs to.
type Subscribed<D, E> = Option<(OptionsSnapshot<D, E>, QueryResult<D, E>)>;

// =============================================================================
// Observer slot
// =============================================================================

enum Slot<D, E> {
    Vacant,
    Live(ObserverRef<D, E>),
    Released,
}

/// Creates the observer once and hands out the same handle afterwards.
struct ObserverCell<D, E> {
    slot: RefCell<Slot<D, E>>,
    client: Rc<dyn QueryClient<D, E>>,
    class: Box<dyn ObserverClass<D, E>>,
}

impl<D: QueryValue, E: QueryValue> ObserverCell<D, E> {
    fn new(client: Rc<dyn QueryClient<D, E>>, class: Box<dyn ObserverClass<D, E>>) -> Self {
        Self {
            slot: RefCell::new(Slot::Vacant),
            client,
            class,
        }
    }

    /// The observer, created from `options` if none exists yet. `None` once
    /// released.
    fn get_or_create(&self, options: &OptionsSnapshot<D, E>) -> Option<ObserverRef<D, E>> {
        match &*self.slot.borrow() {
            Slot::Live(observer) => return Some(observer.clone()),
            Slot::Released => return None,
            Slot::Vacant => {}
        }
        let observer = untrack(|| self.class.create(&self.client, options.clone()));
        tracing::debug!(query_hash = %options.query_hash, "observer created");
        *self.slot.borrow_mut() = Slot::Live(observer.clone());
        Some(observer)
    }

    fn current(&self) -> Option<ObserverRef<D, E>> {
        match &*self.slot.borrow() {
            Slot::Live(observer) => Some(observer.clone()),
            Slot::Vacant | Slot::Released => None,
        }
    }

    fn release(&self) -> Option<ObserverRef<D, E>> {
        match std::mem::replace(&mut *self.slot.borrow_mut(), Slot::Released) {
            Slot::Live(observer) => Some(observer),
            Slot::Vacant | Slot::Released => None,
        }
    }
}

// =============================================================================
// Synchronizer
// =============================================================================

/// Merges an observer's optimistic and pushed results into one signal.
pub struct QuerySynchronizer<D: QueryValue, E: QueryValue> {
    ctx: HostContext,
    restoring: RestoringState,
    options: Computed<OptionsSnapshot<D, E>>,
    observer: Rc<ObserverCell<D, E>>,
    subscribed: Observable<Subscribed<D, E>>,
    frozen: Observable<Option<ResultSnapshot<D, E>>>,
    merged: Computed<ResultSnapshot<D, E>>,
    port: Rc<Port<Push<D, E>>>,
    effects: RefCell<Vec<Effect>>,
    destroyed: Cell<bool>,
}

impl<D: QueryValue, E: QueryValue> QuerySynchronizer<D, E> {
    /// Build the graph nodes and start both effects.
    ///
    /// `options_fn` is evaluated in a tracked computation: every signal it
    /// reads becomes a dependency of the options.
    pub fn new(
        ctx: &HostContext,
        client: Rc<dyn QueryClient<D, E>>,
        restoring: &RestoringState,
        options_fn: impl Fn() -> QueryOptions<D, E> + 'static,
        observer_class: impl ObserverClass<D, E> + 'static,
    ) -> Self {
        let options = {
            let client = Rc::clone(&client);
            let restoring = restoring.clone();
            Computed::new(move || {
                let mut defaulted = client.default_query_options(options_fn());
                defaulted.optimistic_results = Some(if restoring.is_restoring() {
                    OptimisticResults::IsRestoring
                } else {
                    OptimisticResults::Optimistic
                });
                OptionsSnapshot::new(defaulted)
            })
        };

        let observer = Rc::new(ObserverCell::new(client, Box::new(observer_class)));

        let optimistic = {
            let (options, observer, ctx) = (options.clone(), Rc::clone(&observer), ctx.clone());
            Computed::new(move || {
                let options = options.get();
                match observer.get_or_create(&options) {
                    Some(observer) => ctx.run_outside(|| observer.optimistic_result(&options)),
                    None => QueryResult::pending(),
                }
            })
        };

        let subscribed: Observable<Subscribed<D, E>> = Observable::new(None);
        let frozen: Observable<Option<ResultSnapshot<D, E>>> = Observable::new(None);

        let merged = {
            let (options, subscribed, frozen) = (options.clone(), subscribed.clone(), frozen.clone());
            Computed::new(move || {
                if let Some(last) = frozen.get() {
                    return last;
                }
                let current = options.get();
                match subscribed.get() {
                    Some((tag, result)) if tag.same(&current) => ResultSnapshot::Subscribed(result),
                    _ => ResultSnapshot::Optimistic(optimistic.get()),
                }
            })
        };

        let port = Rc::new(open_push_port(
            ctx,
            options.clone(),
            Rc::clone(&observer),
            subscribed.clone(),
        ));

        let sync = Self {
            ctx: ctx.clone(),
            restoring: restoring.clone(),
            options,
            observer,
            subscribed,
            frozen,
            merged,
            port,
            effects: RefCell::new(Vec::new()),
            destroyed: Cell::new(false),
        };

        let effects = ctx.run(|| vec![sync.options_effect(), sync.subscription_effect()]);
        *sync.effects.borrow_mut() = effects;
        sync
    }

    /// Push the current options to the observer without notifying its
    /// listeners. Cleanup clears the stored push.
    fn options_effect(&self) -> Effect {
        let (options, observer) = (self.options.clone(), Rc::clone(&self.observer));
        let (ctx, subscribed) = (self.ctx.clone(), self.subscribed.clone());
        Effect::named("query.options", move |scope| {
            let options = options.get();
            let Some(observer) = observer.get_or_create(&options) else {
                return;
            };
            untrack(|| observer.set_options(options.clone(), NotifyOptions::SILENT));

            let (ctx, subscribed) = (ctx.clone(), subscribed.clone());
            scope.on_cleanup(move || ctx.run(|| subscribed.set(None)));
        })
    }

    /// Subscribe to the observer for the current options unless restoring.
    fn subscription_effect(&self) -> Effect {
        let (options, observer) = (self.options.clone(), Rc::clone(&self.observer));
        let (ctx, restoring, port) = (self.ctx.clone(), self.restoring.clone(), Rc::clone(&self.port));
        Effect::named("query.subscription", move |scope| {
            let options = options.get();
            if restoring.is_restoring() {
                tracing::debug!(query_hash = %options.query_hash, "restoring; not subscribing");
                return;
            }
            let Some(observer) = observer.get_or_create(&options) else {
                return;
            };

            let sender = port.sender();
            let tag = options.clone();
            let query_hash = options.query_hash.clone();
            let listener: Listener<D, E> = Arc::new(move |result: QueryResult<D, E>| {
                let push = Push {
                    options: tag.clone(),
                    result,
                };
                if let Err(err) = sender.post(push) {
                    tracing::warn!(query_hash = %query_hash, error = %err, "host context is gone; engine push dropped");
                }
            });
            let unsubscribe = ctx.run_outside(|| observer.subscribe(listener));
            tracing::debug!(
                query_hash = %options.query_hash,
                generation = port.generation(),
                "subscribed"
            );

            let port = Rc::clone(&port);
            let query_hash = options.query_hash.clone();
            scope.on_cleanup(move || {
                unsubscribe.unsubscribe();
                port.invalidate();
                tracing::debug!(query_hash = %query_hash, "unsubscribed");
            });
        })
    }

    /// The merged result. Tracked.
    #[must_use]
    pub fn result(&self) -> QueryResult<D, E> {
        self.merged.with(|snapshot| snapshot.result().clone())
    }

    /// The merged result with the feed it came from. Tracked.
    #[must_use]
    pub fn snapshot(&self) -> ResultSnapshot<D, E> {
        self.merged.get()
    }

    /// The merged signal itself, for building projections.
    #[must_use]
    pub fn merged(&self) -> &Computed<ResultSnapshot<D, E>> {
        &self.merged
    }

    /// The current defaulted options. Tracked.
    #[must_use]
    pub fn options(&self) -> OptionsSnapshot<D, E> {
        self.options.get()
    }

    /// The engine observer, until the synchronizer is destroyed.
    #[must_use]
    pub fn observer(&self) -> Option<ObserverRef<D, E>> {
        self.observer.current()
    }

    #[must_use]
    pub fn context(&self) -> &HostContext {
        &self.ctx
    }

    /// Whether a pushed result is stored for the current options.
    #[must_use]
    pub fn has_subscribed_result(&self) -> bool {
        let current = self.options.get_untracked();
        self.subscribed
            .with(|stored| matches!(stored, Some((tag, _)) if tag.same(&current)))
    }

    /// Ask the engine to fetch again, outside the host context.
    pub fn refetch(&self) -> Result<()> {
        if self.destroyed.get() {
            return Err(SyncError::Destroyed);
        }
        if self.restoring.is_restoring_untracked() {
            return Err(SyncError::Restoring);
        }
        let options = self.options.get_untracked();
        let observer = self
            .observer
            .get_or_create(&options)
            .ok_or(SyncError::Destroyed)?;
        tracing::debug!(query_hash = %options.query_hash, "refetch");
        self.ctx.run_outside(|| observer.refetch());
        Ok(())
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    /// Tear down: freeze the merged value, stop both effects (unsubscribing
    /// once), close the port and drop the observer. Idempotent.
    pub fn destroy(&self) {
        if self.destroyed.replace(true) {
            return;
        }
        let last = self.merged.get_untracked();
        let effects = std::mem::take(&mut *self.effects.borrow_mut());
        self.ctx.run(|| {
            self.frozen.set(Some(last));
            for effect in effects.iter().rev() {
                effect.dispose();
            }
        });
        drop(effects);
        self.port.close();
        if let Some(observer) = self.observer.release() {
            tracing::debug!(query_hash = %observer.current_query().query_hash, "query synchronizer destroyed");
        }
    }
}

impl<D: QueryValue, E: QueryValue> Drop for QuerySynchronizer<D, E> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<D: QueryValue, E: QueryValue> fmt::Debug for QuerySynchronizer<D, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySynchronizer")
            .field("observer", &self.observer.current())
            .field("port", &self.port)
            .field("effects", &self.effects.borrow().len())
            .field("destroyed", &self.destroyed.get())
            .finish_non_exhaustive()
    }
}

/// Open the port through which listener pushes reach the graph thread.
fn open_push_port<D: QueryValue, E: QueryValue>(
    ctx: &HostContext,
    options: Computed<OptionsSnapshot<D, E>>,
    observer: Rc<ObserverCell<D, E>>,
    subscribed: Observable<Subscribed<D, E>>,
) -> Port<Push<D, E>> {
    ctx.open_port(PORT_LABEL, move |push: Push<D, E>| {
        let current = options.get_untracked();
        if !push.options.same(&current) {
            tracing::trace!(query_hash = %push.options.query_hash, "push for superseded options");
            return Ok(());
        }
        if let Some(raised) = policy_error(&observer, &push.result) {
            return Err(raised);
        }
        subscribed.set(Some((push.options, push.result)));
        Ok(())
    })
}

/// The error to raise for `result`, if the observer's throw policy asks for
/// it: an error state that is not mid-fetch and a predicate returning true.
fn policy_error<D: QueryValue, E: QueryValue>(
    observer: &ObserverCell<D, E>,
    result: &QueryResult<D, E>,
) -> Option<RaisedError> {
    if !result.is_error() || result.is_fetching() {
        return None;
    }
    let error = result.error.as_ref()?;
    let observer = observer.current()?;
    let query = observer.current_query();
    if !observer.options().throw_on_error.should_throw(error, &query) {
        return None;
    }
    tracing::debug!(query_hash = %query.query_hash, "raising query error");
    Some(RaisedError::new(query.query_hash, error.clone()))
}
