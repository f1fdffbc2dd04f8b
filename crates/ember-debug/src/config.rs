//! Session configuration.

use std::time::Duration;

/// Runtime tunables for a debug session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How often the handshake is re-sent while waiting for the VM.
    pub handshake_retry_interval: Duration,
    /// Deadline for the whole handshake exchange.
    pub handshake_timeout: Duration,
    /// Whether back traces include frames of internal functions.
    pub show_internal_frames: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_retry_interval: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(10),
            show_internal_frames: false,
        }
    }
}
