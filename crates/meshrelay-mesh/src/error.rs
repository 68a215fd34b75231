//! Top-level mesh error type (spec §7). No error here is fatal to the
//! mesh as a whole; the Mesh Manager logs and continues per the error
//! table, reserving this type for failures a caller might want to act
//! on directly (e.g. the demo CLI reporting why a join failed).

use thiserror::Error;

/// Failures surfaced across the mesh crate's public API.
#[derive(Debug, Error)]
pub enum MeshError {
    /// The signaling client's background task has already stopped.
    #[error("signaling client is no longer running")]
    SignalingStopped,

    /// A media transport operation failed.
    #[error("transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    /// A control message failed to encode or decode.
    #[error("codec error: {0}")]
    Codec(#[from] meshrelay_protocol::CodecError),

    /// A file transfer failed.
    #[error("file transfer error: {0}")]
    Transfer(#[from] meshrelay_files::FileTransferError),

    /// No peer with an open reliable stream was available to satisfy a
    /// request (e.g. `history-request` with no connected peers).
    #[error("no peer available")]
    NoPeerAvailable,
}
