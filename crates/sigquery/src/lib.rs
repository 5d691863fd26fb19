#![forbid(unsafe_code)]

//! sigquery public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users.

pub use sigquery_core as core;
pub use sigquery_reactive as reactive;
pub use sigquery_runtime as runtime;

pub use sigquery_runtime::{QueryHandle, RestoringState, create_query};

pub mod prelude {
    pub use sigquery_core::{
        FetchStatus, ObserverClass, QueryClient, QueryKey, QueryObserver, QueryOptions,
        QueryResult, QueryStatus, ThrowOnError,
    };
    pub use sigquery_reactive::{Computed, Effect, HostConfig, HostContext, Observable, batch};
    pub use sigquery_runtime::{QueryHandle, RestoringState, SyncError, create_query};
}
