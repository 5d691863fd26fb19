#![forbid(unsafe_code)]

//! Query result shapes produced by the engine.
//!
//! [`QueryResult`] is the engine's state for one query as seen by one
//! observer. [`ResultSnapshot`] tags a result with the feed it came from:
//! computed synchronously on demand (optimistic) or pushed through a
//! subscription (subscribed).

use web_time::Instant;

/// Whether the query has data, an error, or neither yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryStatus {
    Pending,
    Error,
    Success,
}

/// Whether a fetch is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchStatus {
    Fetching,
    /// A fetch wanted to run but the engine is offline.
    Paused,
    Idle,
}

/// The engine's view of one query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<D, E> {
    pub status: QueryStatus,
    pub fetch_status: FetchStatus,
    pub data: Option<D>,
    pub error: Option<E>,
    pub data_updated_at: Option<Instant>,
    pub error_updated_at: Option<Instant>,
    pub failure_count: u32,
    pub failure_reason: Option<E>,
    pub error_update_count: u32,
    pub is_stale: bool,
    pub is_placeholder_data: bool,
    pub is_fetched_after_mount: bool,
}

impl<D, E> QueryResult<D, E> {
    /// No data, no error, not fetching.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            status: QueryStatus::Pending,
            fetch_status: FetchStatus::Idle,
            data: None,
            error: None,
            data_updated_at: None,
            error_updated_at: None,
            failure_count: 0,
            failure_reason: None,
            error_update_count: 0,
            is_stale: true,
            is_placeholder_data: false,
            is_fetched_after_mount: false,
        }
    }

    /// Settled with data.
    #[must_use]
    pub fn success(data: D) -> Self {
        Self {
            status: QueryStatus::Success,
            data: Some(data),
            data_updated_at: Some(Instant::now()),
            is_stale: false,
            is_fetched_after_mount: true,
            ..Self::pending()
        }
    }

    /// Settled with an error.
    #[must_use]
    pub fn failure(error: E) -> Self
    where
        E: Clone,
    {
        Self {
            status: QueryStatus::Error,
            failure_reason: Some(error.clone()),
            error: Some(error),
            error_updated_at: Some(Instant::now()),
            failure_count: 1,
            error_update_count: 1,
            is_fetched_after_mount: true,
            ..Self::pending()
        }
    }

    /// Same result with a fetch in flight.
    #[must_use]
    pub fn fetching(mut self) -> Self {
        self.fetch_status = FetchStatus::Fetching;
        self
    }

    /// Same result with the fetch paused.
    #[must_use]
    pub fn paused(mut self) -> Self {
        self.fetch_status = FetchStatus::Paused;
        self
    }

    /// Same result marked stale.
    #[must_use]
    pub fn stale(mut self, is_stale: bool) -> Self {
        self.is_stale = is_stale;
        self
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == QueryStatus::Pending
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    #[must_use]
    pub fn is_fetching(&self) -> bool {
        self.fetch_status == FetchStatus::Fetching
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.fetch_status == FetchStatus::Paused
    }

    /// First load: pending and fetching.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.is_pending() && self.is_fetching()
    }

    /// Background refetch: fetching with something already settled.
    #[must_use]
    pub fn is_refetching(&self) -> bool {
        self.is_fetching() && !self.is_pending()
    }

    /// Error before any data arrived.
    #[must_use]
    pub fn is_loading_error(&self) -> bool {
        self.is_error() && self.data.is_none()
    }

    /// Error after data had already arrived.
    #[must_use]
    pub fn is_refetch_error(&self) -> bool {
        self.is_error() && self.data.is_some()
    }

    #[must_use]
    pub fn is_fetched(&self) -> bool {
        self.data_updated_at.is_some() || self.error_updated_at.is_some()
    }
}

/// A result tagged with the feed that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultSnapshot<D, E> {
    /// Computed synchronously from cache state and configuration.
    Optimistic(QueryResult<D, E>),
    /// Pushed by the engine through a subscription.
    Subscribed(QueryResult<D, E>),
}

impl<D, E> ResultSnapshot<D, E> {
    #[must_use]
    pub fn result(&self) -> &QueryResult<D, E> {
        match self {
            Self::Optimistic(result) | Self::Subscribed(result) => result,
        }
    }

    #[must_use]
    pub fn into_result(self) -> QueryResult<D, E> {
        match self {
            Self::Optimistic(result) | Self::Subscribed(result) => result,
        }
    }

    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        matches!(self, Self::Subscribed(_))
    }

    #[must_use]
    pub fn is_optimistic(&self) -> bool {
        matches!(self, Self::Optimistic(_))
    }
}
