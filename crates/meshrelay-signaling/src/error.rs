//! Error types for the relay client and server.

use thiserror::Error;

/// Failures surfaced by [`crate::client::SignalingClient`].
#[derive(Debug, Error)]
pub enum SignalingError {
    /// The WebSocket connection attempt failed.
    #[error("failed to connect to relay: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    /// The client has been explicitly disconnected and will not reconnect.
    #[error("signaling client was explicitly disconnected")]
    Disconnected,

    /// The background connection task has exited; the client handle is dead.
    #[error("signaling client task has stopped")]
    TaskStopped,
}
