#![forbid(unsafe_code)]

//! Error re-throw policy.
//!
//! Decides whether a query error surfaces to the host's error boundary or
//! stays stored in the result for the consumer to branch on.

use std::fmt;
use std::sync::Arc;

use crate::engine::QueryInfo;

/// Predicate form of [`ThrowOnError::When`].
pub type ThrowPredicate<E> = Arc<dyn Fn(&E, &QueryInfo) -> bool + Send + Sync>;

/// Whether a settled query error should be raised instead of stored.
pub enum ThrowOnError<E> {
    /// Always store the error.
    Never,
    /// Always raise the error.
    Always,
    /// Raise when the predicate returns true for the error and query.
    When(ThrowPredicate<E>),
}

impl<E> ThrowOnError<E> {
    /// Build a predicate policy.
    #[must_use]
    pub fn when(predicate: impl Fn(&E, &QueryInfo) -> bool + Send + Sync + 'static) -> Self {
        Self::When(Arc::new(predicate))
    }

    /// Evaluate the policy for `error` raised by `query`.
    #[must_use]
    pub fn should_throw(&self, error: &E, query: &QueryInfo) -> bool {
        match self {
            Self::Never => false,
            Self::Always => true,
            Self::When(predicate) => predicate(error, query),
        }
    }
}

impl<E> Clone for ThrowOnError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Never => Self::Never,
            Self::Always => Self::Always,
            Self::When(predicate) => Self::When(Arc::clone(predicate)),
        }
    }
}

impl<E> Default for ThrowOnError<E> {
    fn default() -> Self {
        Self::Never
    }
}

impl<E> From<bool> for ThrowOnError<E> {
    fn from(throw: bool) -> Self {
        if throw { Self::Always } else { Self::Never }
    }
}

impl<E> fmt::Debug for ThrowOnError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => f.write_str("Never"),
            Self::Always => f.write_str("Always"),
            Self::When(_) => f.write_str("When(<predicate>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::QueryKey;

    fn info(name: &str) -> QueryInfo {
        QueryInfo::new(QueryKey::single(name))
    }

    #[test]
    fn fixed_policies() {
        let q = info("a");
        assert!(!ThrowOnError::<&str>::Never.should_throw(&"boom", &q));
        assert!(ThrowOnError::<&str>::Always.should_throw(&"boom", &q));
    }

    #[test]
    fn predicate_sees_error_and_query() {
        let policy = ThrowOnError::<u16>::when(|status, query| {
            *status >= 500 && query.query_hash == r#"["critical"]"#
        });
        assert!(policy.should_throw(&503, &info("critical")));
        assert!(!policy.should_throw(&404, &info("critical")));
        assert!(!policy.should_throw(&503, &info("other")));
    }

    #[test]
    fn from_bool() {
        assert!(matches!(ThrowOnError::<()>::from(true), ThrowOnError::Always));
        assert!(matches!(ThrowOnError::<()>::from(false), ThrowOnError::Never));
    }

    #[test]
    fn debug_hides_predicate() {
        let policy = ThrowOnError::<()>::when(|_, _| true);
        assert_eq!(format!("{policy:?}"), "When(<predicate>)");
    }
}
