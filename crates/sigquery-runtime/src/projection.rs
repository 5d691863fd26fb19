#![forbid(unsafe_code)]

//! Field-level projection of the merged result.
//!
//! Each field is its own [`Computed`], built on first access and cached by
//! name. A field only wakes its readers when its own value changes, so an
//! effect reading `data` is not re-run by a flip of `is_fetching`.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;

use ahash::AHashMap;
use sigquery_core::{FetchStatus, QueryResult, QueryStatus, QueryValue, ResultSnapshot};
use sigquery_reactive::Computed;
use web_time::Instant;

/// Lazily built per-field signals over one merged result.
pub struct QueryFields<D, E> {
    merged: Computed<ResultSnapshot<D, E>>,
    cache: RefCell<AHashMap<&'static str, Box<dyn Any>>>,
}

impl<D: QueryValue, E: QueryValue> QueryFields<D, E> {
    #[must_use]
    pub fn new(merged: Computed<ResultSnapshot<D, E>>) -> Self {
        Self {
            merged,
            cache: RefCell::new(AHashMap::new()),
        }
    }

    /// The signal for field `name`, built from `project` the first time.
    ///
    /// Later calls with the same name return the cached signal and ignore
    /// `project`. A name reused with a different value type is rebuilt.
    pub fn field<T: Clone + PartialEq + 'static>(
        &self,
        name: &'static str,
        project: fn(&QueryResult<D, E>) -> T,
    ) -> Computed<T> {
        let cached = self
            .cache
            .borrow()
            .get(name)
            .map(|entry| entry.downcast_ref::<Computed<T>>().cloned());
        match cached {
            Some(Some(field)) => return field,
            Some(None) => tracing::warn!(field = name, "field rebuilt with a different type"),
            None => {}
        }

        let merged = self.merged.clone();
        let field = Computed::new(move || merged.with(|snapshot| project(snapshot.result())));
        self.cache
            .borrow_mut()
            .insert(name, Box::new(field.clone()));
        field
    }

    /// Number of fields built so far.
    #[must_use]
    pub fn built(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn status(&self) -> Computed<QueryStatus> {
        self.field("status", |r| r.status)
    }

    pub fn fetch_status(&self) -> Computed<FetchStatus> {
        self.field("fetch_status", |r| r.fetch_status)
    }

    pub fn data(&self) -> Computed<Option<D>> {
        self.field("data", |r| r.data.clone())
    }

    pub fn error(&self) -> Computed<Option<E>> {
        self.field("error", |r| r.error.clone())
    }

    pub fn is_pending(&self) -> Computed<bool> {
        self.field("is_pending", QueryResult::is_pending)
    }

    pub fn is_success(&self) -> Computed<bool> {
        self.field("is_success", QueryResult::is_success)
    }

    pub fn is_error(&self) -> Computed<bool> {
        self.field("is_error", QueryResult::is_error)
    }

    pub fn is_fetching(&self) -> Computed<bool> {
        self.field("is_fetching", QueryResult::is_fetching)
    }

    pub fn is_loading(&self) -> Computed<bool> {
        self.field("is_loading", QueryResult::is_loading)
    }

    pub fn is_refetching(&self) -> Computed<bool> {
        self.field("is_refetching", QueryResult::is_refetching)
    }

    pub fn is_stale(&self) -> Computed<bool> {
        self.field("is_stale", |r| r.is_stale)
    }

    pub fn failure_count(&self) -> Computed<u32> {
        self.field("failure_count", |r| r.failure_count)
    }

    pub fn data_updated_at(&self) -> Computed<Option<Instant>> {
        self.field("data_updated_at", |r| r.data_updated_at)
    }
}

impl<D, E> fmt::Debug for QueryFields<D, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.cache.borrow().keys().copied().collect();
        names.sort_unstable();
        f.debug_struct("QueryFields").field("built", &names).finish()
    }
}
