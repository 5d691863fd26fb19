#![forbid(unsafe_code)]

//! Reactive data bindings for sigquery.
//!
//! This crate provides the change-tracking primitives the query runtime
//! composes:
//!
//! - [`Observable`]: A shared, version-tracked value wrapper with change
//!   notification via subscriber callbacks.
//! - [`Computed`]: A lazily-evaluated, memoized value whose dependencies are
//!   discovered from the reads it performs.
//! - [`Effect`]: A side effect that re-runs when something it read changes,
//!   with cleanup callbacks run before every re-run and on disposal.
//! - [`batch`] / [`untrack`]: Defer effect flushing; read without tracking.
//! - [`HostContext`]: The graph's execution context. Owns the inbox through
//!   which other threads post messages, drains it once per [`tick`], and
//!   routes raised errors to registered boundaries.
//!
//! # Architecture
//!
//! Everything here is single-threaded (`Rc<RefCell<..>>`). Dependency
//! tracking and the pending-effect queue are thread-local. The only `Send`
//! type is [`PortSender`], which crosses into engine threads and talks back
//! through an `mpsc` channel.
//!
//! # Invariants
//!
//! 1. Version increments exactly once per mutation that changes the value.
//! 2. Subscribers are notified in registration order.
//! 3. Setting a value equal to the current value is a no-op (no version bump,
//!    no notifications).
//! 4. Dropping a [`Subscription`] removes the callback before the next
//!    notification cycle.
//! 5. `Computed::get()` never returns a stale value.
//! 6. An effect runs at most once per flush, and only if a dependency's
//!    version actually moved.
//!
//! [`tick`]: HostContext::tick

pub mod computed;
pub mod config;
pub mod effect;
pub mod error;
pub mod graph;
pub mod observable;
pub mod scheduler;

pub use computed::Computed;
pub use config::HostConfig;
pub use effect::{Effect, EffectScope};
pub use error::{HostError, RaisedError, Result};
pub use graph::{batch, is_tracking, untrack};
pub use observable::{Observable, Subscription};
pub use scheduler::{HostContext, Port, PortSender, TickReport};
