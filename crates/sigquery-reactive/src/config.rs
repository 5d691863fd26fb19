#![forbid(unsafe_code)]

//! Host context configuration.

use std::env;

/// Configuration for a [`HostContext`](crate::HostContext).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// Backlog size at which a warning is logged. The inbox itself is
    /// unbounded; this only flags a host that has stopped ticking.
    /// Default: 1024.
    pub backlog_warning: usize,

    /// Maximum messages drained by one tick. Leftovers wait for the next
    /// tick so a flood of pushes cannot starve the caller.
    /// Default: 4096.
    pub max_messages_per_tick: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            backlog_warning: 1024,
            max_messages_per_tick: 4096,
        }
    }
}

impl HostConfig {
    /// Defaults overridden by `SIGQUERY_BACKLOG_WARNING` and
    /// `SIGQUERY_MAX_MESSAGES_PER_TICK`. Unparseable or zero values are
    /// ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(n) = env_usize("SIGQUERY_BACKLOG_WARNING") {
            config.backlog_warning = n;
        }
        if let Some(n) = env_usize("SIGQUERY_MAX_MESSAGES_PER_TICK") {
            config.max_messages_per_tick = n;
        }
        config
    }

    #[must_use]
    pub fn with_backlog_warning(mut self, threshold: usize) -> Self {
        self.backlog_warning = threshold.max(1);
        self
    }

    #[must_use]
    pub fn with_max_messages_per_tick(mut self, max: usize) -> Self {
        self.max_messages_per_tick = max.max(1);
        self
    }
}

fn env_usize(name: &str) -> Option<usize> {
    let value = env::var(name).ok()?;
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            tracing::warn!(var = name, value = %value, "ignoring invalid host config override");
            None
        }
    }
}
