#![forbid(unsafe_code)]

//! Core: the contract between the signal graph and an external query engine.
//!
//! Nothing in this crate caches, fetches or retries. It names the shapes the
//! engine hands back ([`QueryResult`]), the configuration it consumes
//! ([`QueryOptions`], [`DefaultedOptions`]) and the two engine objects the
//! runtime talks to ([`QueryClient`], [`QueryObserver`]).

pub mod engine;
pub mod error;
pub mod key;
pub mod options;
pub mod result;
pub mod throw;

pub use engine::{
    Listener, NotifyOptions, ObserverClass, ObserverRef, QueryClient, QueryInfo, QueryObserver,
    Unsubscribe,
};
pub use error::{KeyError, Result};
pub use key::QueryKey;
pub use options::{
    ClientDefaults, DefaultedOptions, OptimisticResults, OptionsSnapshot, QueryFn, QueryFnContext,
    QueryOptions, RetryPolicy,
};
pub use result::{FetchStatus, QueryResult, QueryStatus, ResultSnapshot};
pub use throw::ThrowOnError;

/// Bounds shared by query payloads and query errors.
///
/// Payloads cross from engine threads into the graph thread, so they must be
/// `Send`; they are compared for change detection, so they must be
/// `PartialEq`.
pub trait QueryValue: Clone + PartialEq + std::fmt::Debug + Send + 'static {}

impl<T> QueryValue for T where T: Clone + PartialEq + std::fmt::Debug + Send + 'static {}
