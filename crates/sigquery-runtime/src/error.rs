use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Failures of imperative calls on a synchronizer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("query synchronizer has been destroyed")]
    Destroyed,

    #[error("query state is being restored; fetching is suspended")]
    Restoring,
}
