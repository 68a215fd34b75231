//! Error types for chunked file transfer.

use thiserror::Error;

/// Failures encountered while sending a file to one peer.
#[derive(Debug, Error)]
pub enum FileTransferError {
    /// The peer's reliable stream closed mid-transfer; per spec §7 this
    /// aborts only this peer's transfer, not the whole broadcast.
    #[error("reliable stream closed mid-transfer")]
    StreamClosed,
}
