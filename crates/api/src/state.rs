//! Application state for the API server.

use scanue_coordinator::WorkflowEngine;
use std::sync::Arc;

/// Shared application state for the API server.
pub struct AppState {
    /// The engine every run goes through
    pub engine: Arc<WorkflowEngine>,

    /// Server start time (for health checks)
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self {
            engine,
            start_time: std::time::Instant::now(),
        }
    }

    /// Get the uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
