//! JSON line health protocol spoken by control and agent daemons.
//!
//! A client sends one [`HealthRequest`] line; the daemon answers with one
//! [`HealthResponse`] line and may close the connection.

use serde::{Deserialize, Serialize};

/// Request asking the daemon for its readiness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthRequest {
    /// Always `"health"`.
    pub request: String,
}

impl HealthRequest {
    /// Builds the single supported request.
    #[must_use]
    pub fn health() -> Self {
        Self {
            request: "health".to_owned(),
        }
    }
}

/// Operational state reported by a daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonStatus {
    /// Initialising; not yet accepting work.
    Starting,
    /// Accepting work.
    Ready,
    /// Shutting down.
    Stopping,
}

/// Answer to a [`HealthRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Current state.
    pub status: DaemonStatus,
    /// Process id of the responding daemon.
    pub pid: u32,
}
