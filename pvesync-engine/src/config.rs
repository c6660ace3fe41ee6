//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-operation deadlines. Each engine operation runs under one deadline
/// computed from these when it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    pub create: Duration,
    pub read: Duration,
    pub update: Duration,
    pub delete: Duration,
    /// Grace period handed to a graceful shutdown before the platform forces a stop.
    pub shutdown: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(30 * 60),
            read: Duration::from_secs(5 * 60),
            update: Duration::from_secs(30 * 60),
            delete: Duration::from_secs(10 * 60),
            shutdown: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub timeouts: Timeouts,
    /// How often the power state is polled while waiting for a stop.
    pub status_poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeouts: Timeouts::default(),
            status_poll_interval: Duration::from_secs(1),
        }
    }
}
