use std::any::Any;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HostError>;

/// Failures posting into the host inbox.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("host inbox is closed")]
    InboxClosed,
}

/// An error raised to the host's error boundary.
///
/// The payload is shared, not copied: every boundary handler and the tick
/// report see the very value that was raised.
#[derive(Clone)]
pub struct RaisedError {
    origin: String,
    payload: Rc<dyn Any>,
}

impl RaisedError {
    #[must_use]
    pub fn new<E: Any>(origin: impl Into<String>, payload: E) -> Self {
        Self {
            origin: origin.into(),
            payload: Rc::new(payload),
        }
    }

    /// Where the error came from (a query hash, a port label, ...).
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// The raised value, if it has type `E`.
    #[must_use]
    pub fn downcast_ref<E: Any>(&self) -> Option<&E> {
        self.payload.downcast_ref::<E>()
    }

    #[must_use]
    pub fn is<E: Any>(&self) -> bool {
        self.payload.is::<E>()
    }
}

impl fmt::Debug for RaisedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RaisedError")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for RaisedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error raised by {}", self.origin)
    }
}
