use thiserror::Error;

pub type Result<T> = std::result::Result<T, KeyError>;

/// Failure to build a [`QueryKey`](crate::QueryKey) segment.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("query key segment is not serializable: {0}")]
    Segment(#[from] serde_json::Error),
}
