#![forbid(unsafe_code)]

//! Query configuration as supplied by callers and as defaulted by the client.
//!
//! [`QueryOptions`] is what an options source returns on every evaluation.
//! The engine's client merges it with its [`ClientDefaults`] into a
//! [`DefaultedOptions`], which the runtime wraps in an [`OptionsSnapshot`]
//! before handing it to the observer.
//!
//! # Snapshot identity
//!
//! `OptionsSnapshot` equality is *allocation identity*, not structural
//! equality. Each evaluation of the options source produces a new snapshot,
//! so every re-evaluation counts as a change even when the fields happen to
//! match. Fetch functions and throw predicates are closures and have no
//! meaningful structural equality anyway.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use crate::key::QueryKey;
use crate::throw::ThrowOnError;

/// Context passed to a query function.
#[derive(Debug, Clone)]
pub struct QueryFnContext {
    pub query_key: QueryKey,
}

/// The fetch function. Engines may call it from any thread.
pub type QueryFn<D, E> = Arc<dyn Fn(&QueryFnContext) -> Result<D, E> + Send + Sync>;

/// How often a failed fetch is retried by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    Never,
    Times(u32),
    Forever,
}

/// Marker telling the observer how to compute optimistic results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimisticResults {
    /// Normal operation: the observer may start fetching while computing
    /// the optimistic result.
    Optimistic,
    /// State is being restored from a persisted snapshot; no fetch may start.
    IsRestoring,
}

/// Caller-facing query options. Unset fields fall back to [`ClientDefaults`].
pub struct QueryOptions<D, E> {
    pub query_key: QueryKey,
    pub query_fn: Option<QueryFn<D, E>>,
    pub enabled: bool,
    pub stale_time: Option<Duration>,
    pub gc_time: Option<Duration>,
    pub retry: Option<RetryPolicy>,
    pub throw_on_error: Option<ThrowOnError<E>>,
}

impl<D, E> QueryOptions<D, E> {
    #[must_use]
    pub fn new(query_key: impl Into<QueryKey>) -> Self {
        Self {
            query_key: query_key.into(),
            query_fn: None,
            enabled: true,
            stale_time: None,
            gc_time: None,
            retry: None,
            throw_on_error: None,
        }
    }

    #[must_use]
    pub fn query_fn(
        mut self,
        f: impl Fn(&QueryFnContext) -> Result<D, E> + Send + Sync + 'static,
    ) -> Self {
        self.query_fn = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }

    #[must_use]
    pub fn gc_time(mut self, gc_time: Duration) -> Self {
        self.gc_time = Some(gc_time);
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    #[must_use]
    pub fn throw_on_error(mut self, policy: ThrowOnError<E>) -> Self {
        self.throw_on_error = Some(policy);
        self
    }
}

impl<D, E> Clone for QueryOptions<D, E> {
    fn clone(&self) -> Self {
        Self {
            query_key: self.query_key.clone(),
            query_fn: self.query_fn.clone(),
            enabled: self.enabled,
            stale_time: self.stale_time,
            gc_time: self.gc_time,
            retry: self.retry,
            throw_on_error: self.throw_on_error.clone(),
        }
    }
}

impl<D, E> fmt::Debug for QueryOptions<D, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("query_key", &self.query_key)
            .field("has_query_fn", &self.query_fn.is_some())
            .field("enabled", &self.enabled)
            .field("stale_time", &self.stale_time)
            .field("gc_time", &self.gc_time)
            .field("retry", &self.retry)
            .field("throw_on_error", &self.throw_on_error)
            .finish()
    }
}

/// Client-wide defaults merged into every [`QueryOptions`].
#[derive(Debug, Clone)]
pub struct ClientDefaults<E> {
    /// Default: zero (results are stale immediately).
    pub stale_time: Duration,
    /// Default: five minutes.
    pub gc_time: Duration,
    /// Default: three retries.
    pub retry: RetryPolicy,
    /// Default: [`ThrowOnError::Never`].
    pub throw_on_error: ThrowOnError<E>,
}

impl<E> Default for ClientDefaults<E> {
    fn default() -> Self {
        Self {
            stale_time: Duration::ZERO,
            gc_time: Duration::from_secs(5 * 60),
            retry: RetryPolicy::Times(3),
            throw_on_error: ThrowOnError::Never,
        }
    }
}

impl<E> ClientDefaults<E> {
    /// Pure merge of `options` over these defaults.
    ///
    /// `optimistic_results` is left unset; the runtime assigns it.
    #[must_use]
    pub fn apply<D>(&self, options: QueryOptions<D, E>) -> DefaultedOptions<D, E>
    where
        E: Clone,
    {
        let query_hash = options.query_key.hash();
        DefaultedOptions {
            query_key: options.query_key,
            query_hash,
            query_fn: options.query_fn,
            enabled: options.enabled,
            stale_time: options.stale_time.unwrap_or(self.stale_time),
            gc_time: options.gc_time.unwrap_or(self.gc_time),
            retry: options.retry.unwrap_or(self.retry),
            throw_on_error: options
                .throw_on_error
                .unwrap_or_else(|| self.throw_on_error.clone()),
            optimistic_results: None,
        }
    }
}

/// Options after the client merged in its defaults.
pub struct DefaultedOptions<D, E> {
    pub query_key: QueryKey,
    pub query_hash: String,
    pub query_fn: Option<QueryFn<D, E>>,
    pub enabled: bool,
    pub stale_time: Duration,
    pub gc_time: Duration,
    pub retry: RetryPolicy,
    pub throw_on_error: ThrowOnError<E>,
    pub optimistic_results: Option<OptimisticResults>,
}

impl<D, E> DefaultedOptions<D, E> {
    #[must_use]
    pub fn is_restoring(&self) -> bool {
        self.optimistic_results == Some(OptimisticResults::IsRestoring)
    }
}

impl<D, E> Clone for DefaultedOptions<D, E> {
    fn clone(&self) -> Self {
        Self {
            query_key: self.query_key.clone(),
            query_hash: self.query_hash.clone(),
            query_fn: self.query_fn.clone(),
            enabled: self.enabled,
            stale_time: self.stale_time,
            gc_time: self.gc_time,
            retry: self.retry,
            throw_on_error: self.throw_on_error.clone(),
            optimistic_results: self.optimistic_results,
        }
    }
}

impl<D, E> fmt::Debug for DefaultedOptions<D, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultedOptions")
            .field("query_hash", &self.query_hash)
            .field("enabled", &self.enabled)
            .field("stale_time", &self.stale_time)
            .field("gc_time", &self.gc_time)
            .field("retry", &self.retry)
            .field("throw_on_error", &self.throw_on_error)
            .field("optimistic_results", &self.optimistic_results)
            .finish_non_exhaustive()
    }
}

/// One immutable evaluation of the options source.
///
/// Cheap to clone. Equality is allocation identity (see module docs).
pub struct OptionsSnapshot<D, E>(Arc<DefaultedOptions<D, E>>);

impl<D, E> OptionsSnapshot<D, E> {
    #[must_use]
    pub fn new(options: DefaultedOptions<D, E>) -> Self {
        Self(Arc::new(options))
    }

    /// Whether both handles point at the same evaluation.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<D, E> Clone for OptionsSnapshot<D, E> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<D, E> PartialEq for OptionsSnapshot<D, E> {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl<D, E> Deref for OptionsSnapshot<D, E> {
    type Target = DefaultedOptions<D, E>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<D, E> fmt::Debug for OptionsSnapshot<D, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Opts = QueryOptions<u32, String>;

    #[test]
    fn defaults_fill_unset_fields() {
        let defaults = ClientDefaults::<String>::default();
        let merged = defaults.apply(Opts::new("todos"));
        assert_eq!(merged.query_hash, r#"["todos"]"#);
        assert_eq!(merged.stale_time, Duration::ZERO);
        assert_eq!(merged.gc_time, Duration::from_secs(300));
        assert_eq!(merged.retry, RetryPolicy::Times(3));
        assert!(merged.enabled);
        assert!(merged.optimistic_results.is_none());
        assert!(matches!(merged.throw_on_error, ThrowOnError::Never));
    }

    #[test]
    fn explicit_fields_win_over_defaults() {
        let defaults = ClientDefaults::<String>::default();
        let merged = defaults.apply(
            Opts::new("todos")
                .stale_time(Duration::from_secs(30))
                .retry(RetryPolicy::Never)
                .enabled(false)
                .throw_on_error(ThrowOnError::Always),
        );
        assert_eq!(merged.stale_time, Duration::from_secs(30));
        assert_eq!(merged.retry, RetryPolicy::Never);
        assert!(!merged.enabled);
        assert!(matches!(merged.throw_on_error, ThrowOnError::Always));
    }

    #[test]
    fn query_fn_is_carried_through() {
        let defaults = ClientDefaults::<String>::default();
        let merged = defaults.apply(Opts::new("n").query_fn(|_| Ok(7)));
        let f = merged.query_fn.as_ref().unwrap();
        let ctx = QueryFnContext {
            query_key: merged.query_key.clone(),
        };
        assert_eq!(f(&ctx), Ok(7));
    }

    #[test]
    fn snapshot_equality_is_identity() {
        let defaults = ClientDefaults::<String>::default();
        let a = OptionsSnapshot::new(defaults.apply(Opts::new("x")));
        let b = OptionsSnapshot::new(defaults.apply(Opts::new("x")));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(a.query_hash, b.query_hash);
    }

    #[test]
    fn restoring_flag() {
        let defaults = ClientDefaults::<String>::default();
        let mut merged = defaults.apply(Opts::new("x"));
        assert!(!merged.is_restoring());
        merged.optimistic_results = Some(OptimisticResults::IsRestoring);
        assert!(merged.is_restoring());
    }
}
