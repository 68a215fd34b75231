//! Error types for framing and decoding control-channel traffic.

use thiserror::Error;

/// Failures arising from [`crate::codec`].
#[derive(Debug, Error)]
pub enum CodecError {
    /// A JSON text frame did not parse as a known [`crate::message::ControlMessage`].
    #[error("malformed control message: {0}")]
    MalformedJson(#[from] serde_json::Error),

    /// A binary chunk frame arrived with no preceding `file-chunk-meta`
    /// occupying the pending slot (spec §9: must be treated per-stream,
    /// never globally — a dangling chunk indicates a protocol violation
    /// by the remote peer, not a local bug).
    #[error("binary frame received with no pending file-chunk-meta")]
    UnexpectedBinaryFrame,

    /// A second `file-chunk-meta` arrived before its chunk bytes did,
    /// clobbering the single pending slot.
    #[error("file-chunk-meta received while a previous one is still pending")]
    PendingSlotOccupied,
}
