#![forbid(unsafe_code)]

//! Runtime: binds an external query engine to the signal graph.
//!
//! [`create_query`] builds a [`QuerySynchronizer`] (one engine observer, an
//! optimistic feed and a pushed feed merged into one signal) and wraps it in
//! a [`QueryHandle`] that exposes the merged result field by field.
//!
//! ```ignore
//! let ctx = HostContext::default();
//! let restoring = RestoringState::default();
//! let todos = create_query(&ctx, client, &restoring, move || {
//!     QueryOptions::new(QueryKey::single("todos")).enabled(user.get().is_some())
//! }, observer_class);
//!
//! let _render = Effect::new(move |_| println!("{:?}", todos.data().get()));
//! loop {
//!     ctx.tick();
//! }
//! ```
//!
//! Engine pushes may arrive on any thread; they become visible on the graph
//! thread at the next [`HostContext::tick`](sigquery_reactive::HostContext::tick),
//! with all pushes of one tick applied in a single batch.

pub mod error;
pub mod projection;
pub mod restoring;
pub mod synchronizer;

use std::ops::Deref;
use std::rc::Rc;

use sigquery_core::{ObserverClass, QueryClient, QueryOptions, QueryResult, QueryValue};
use sigquery_reactive::HostContext;

pub use error::{Result, SyncError};
pub use projection::QueryFields;
pub use restoring::RestoringState;
pub use synchronizer::QuerySynchronizer;

/// A synchronizer together with its field projection.
///
/// Dereferences to [`QueryFields`], so `handle.data()` is the `data` signal.
pub struct QueryHandle<D: QueryValue, E: QueryValue> {
    fields: QueryFields<D, E>,
    sync: QuerySynchronizer<D, E>,
}

impl<D: QueryValue, E: QueryValue> QueryHandle<D, E> {
    #[must_use]
    pub fn synchronizer(&self) -> &QuerySynchronizer<D, E> {
        &self.sync
    }

    #[must_use]
    pub fn fields(&self) -> &QueryFields<D, E> {
        &self.fields
    }

    /// The whole merged result. Tracked.
    #[must_use]
    pub fn result(&self) -> QueryResult<D, E> {
        self.sync.result()
    }

    /// Passed through to the engine; results arrive as pushes.
    pub fn refetch(&self) -> Result<()> {
        self.sync.refetch()
    }

    pub fn destroy(&self) {
        self.sync.destroy();
    }
}

impl<D: QueryValue, E: QueryValue> Deref for QueryHandle<D, E> {
    type Target = QueryFields<D, E>;

    fn deref(&self) -> &Self::Target {
        &self.fields
    }
}

impl<D: QueryValue, E: QueryValue> std::fmt::Debug for QueryHandle<D, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryHandle")
            .field("sync", &self.sync)
            .field("fields", &self.fields)
            .finish()
    }
}

/// Create a synchronized query.
///
/// `options_fn` is re-evaluated whenever a signal it reads changes;
/// `observer_class` builds the single engine observer.
pub fn create_query<D: QueryValue, E: QueryValue>(
    ctx: &HostContext,
    client: Rc<dyn QueryClient<D, E>>,
    restoring: &RestoringState,
    options_fn: impl Fn() -> QueryOptions<D, E> + 'static,
    observer_class: impl ObserverClass<D, E> + 'static,
) -> QueryHandle<D, E> {
    let sync = QuerySynchronizer::new(ctx, client, restoring, options_fn, observer_class);
    let fields = QueryFields::new(sync.merged().clone());
    QueryHandle { fields, sync }
}
