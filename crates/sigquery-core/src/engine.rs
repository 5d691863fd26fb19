#![forbid(unsafe_code)]

//! The engine objects the runtime talks to.
//!
//! The engine itself (cache, dedup, retries, staleness) lives elsewhere. This
//! module only fixes the calls the runtime makes:
//!
//! | Call | Used for |
//! |------|----------|
//! | [`QueryClient::default_query_options`] | defaulting each options evaluation |
//! | [`ObserverClass::create`] | building the one observer per synchronizer |
//! | [`QueryObserver::set_options`] | reconfiguring without notifying listeners |
//! | [`QueryObserver::optimistic_result`] | the pull feed |
//! | [`QueryObserver::subscribe`] | the push feed |
//! | [`QueryObserver::current_query`] | the throw predicate's query argument |
//!
//! Observers are used from the graph thread only. Listeners, on the other
//! hand, may be invoked from any engine thread and are therefore
//! `Send + Sync`.

use std::fmt;
use std::ops::Deref;
use std::rc::Rc;
use std::sync::Arc;

use crate::key::QueryKey;
use crate::options::{DefaultedOptions, OptionsSnapshot, QueryOptions};
use crate::result::QueryResult;

/// Identity of the query an observer currently points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryInfo {
    pub query_key: QueryKey,
    pub query_hash: String,
}

impl QueryInfo {
    #[must_use]
    pub fn new(query_key: QueryKey) -> Self {
        let query_hash = query_key.hash();
        Self {
            query_key,
            query_hash,
        }
    }
}

/// Flags for [`QueryObserver::set_options`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyOptions {
    /// Whether existing listeners hear about this reconfiguration.
    pub listeners: bool,
}

impl NotifyOptions {
    pub const SILENT: Self = Self { listeners: false };
    pub const NOTIFY: Self = Self { listeners: true };
}

/// Push callback registered with an observer.
pub type Listener<D, E> = Arc<dyn Fn(QueryResult<D, E>) + Send + Sync>;

/// Handle returned by [`QueryObserver::subscribe`]. Call
/// [`unsubscribe`](Unsubscribe::unsubscribe) to remove the listener.
///
/// Dropping the handle without calling it leaves the listener registered.
#[must_use = "dropping an Unsubscribe leaves the listener registered"]
pub struct Unsubscribe(Option<Box<dyn FnOnce()>>);

impl Unsubscribe {
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    /// Handle for a subscription that was never made.
    pub fn noop() -> Self {
        Self(None)
    }

    pub fn unsubscribe(mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("armed", &self.0.is_some())
            .finish()
    }
}

/// The engine's client: owns defaults and the cache.
pub trait QueryClient<D, E> {
    /// Pure merge of `options` with client-wide defaults.
    fn default_query_options(&self, options: QueryOptions<D, E>) -> DefaultedOptions<D, E>;
}

/// The engine's per-query stateful object.
pub trait QueryObserver<D, E> {
    /// Reconfigure. With [`NotifyOptions::SILENT`] existing listeners are not
    /// told about this change.
    fn set_options(&self, options: OptionsSnapshot<D, E>, notify: NotifyOptions);

    /// Best-effort result for `options` computed without waiting on fetches.
    fn optimistic_result(&self, options: &OptionsSnapshot<D, E>) -> QueryResult<D, E>;

    /// Register a push listener.
    fn subscribe(&self, listener: Listener<D, E>) -> Unsubscribe;

    /// The query the observer is attached to right now.
    fn current_query(&self) -> QueryInfo;

    /// The options last passed to [`set_options`](Self::set_options) (or the
    /// constructor).
    fn options(&self) -> OptionsSnapshot<D, E>;

    /// Ask the engine to fetch again. Results arrive through listeners.
    fn refetch(&self);
}

/// Shared observer handle. Equality is identity.
pub struct ObserverRef<D, E>(Rc<dyn QueryObserver<D, E>>);

impl<D, E> ObserverRef<D, E> {
    pub fn new(observer: Rc<dyn QueryObserver<D, E>>) -> Self {
        Self(observer)
    }

    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<D, E, T> From<Rc<T>> for ObserverRef<D, E>
where
    T: QueryObserver<D, E> + 'static,
{
    fn from(observer: Rc<T>) -> Self {
        Self(observer)
    }
}

impl<D, E> Clone for ObserverRef<D, E> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<D, E> PartialEq for ObserverRef<D, E> {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl<D, E> Deref for ObserverRef<D, E> {
    type Target = dyn QueryObserver<D, E>;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl<D, E> fmt::Debug for ObserverRef<D, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObserverRef")
            .field(&Rc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

/// Selects which observer type a synchronizer builds (plain, paged, ...).
pub trait ObserverClass<D, E> {
    fn create(
        &self,
        client: &Rc<dyn QueryClient<D, E>>,
        options: OptionsSnapshot<D, E>,
    ) -> ObserverRef<D, E>;
}

impl<D, E, F> ObserverClass<D, E> for F
where
    F: Fn(&Rc<dyn QueryClient<D, E>>, OptionsSnapshot<D, E>) -> ObserverRef<D, E>,
{
    fn create(
        &self,
        client: &Rc<dyn QueryClient<D, E>>,
        options: OptionsSnapshot<D, E>,
    ) -> ObserverRef<D, E> {
        self(client, options)
    }
}
