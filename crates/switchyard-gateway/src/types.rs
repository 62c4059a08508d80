use std::time::Duration;

use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub sessions: usize,
}

/// Per-connection limits shared by every session.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Larger text frames are rejected with a PayloadError.
    pub max_message_bytes: usize,
    pub generation_timeout: Duration,
    /// Stored messages loaded when a request names a conversation without history.
    pub history_limit: usize,
    /// How long shutdown waits for sessions to close before stopping the listener.
    pub drain_timeout: Duration,
    /// Bound on delivering a terminal error or close frame to a client that
    /// stopped reading.
    pub send_timeout: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            max_message_bytes: 50_000,
            generation_timeout: Duration::from_secs(300),
            history_limit: 20,
            drain_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(5),
        }
    }
}
