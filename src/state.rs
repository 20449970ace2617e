//! Shared relay state passed to every handler via Axum's `State` extractor.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::registry::Registry;

/// Shared application state for the relay.
#[derive(Clone)]
pub struct RelayState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Endpoint → tunnel directory, one per process.
    pub registry: Registry,
    /// Monotonic instant when the relay started (for uptime calculation).
    pub start_time: Instant,
    /// Wall-clock start time, reported by `/api/health`.
    pub started_at: DateTime<Utc>,
}

impl RelayState {
    pub fn new(config: Config) -> Self {
        Self::with_registry(config, Registry::new())
    }

    pub fn with_registry(config: Config, registry: Registry) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }
}
