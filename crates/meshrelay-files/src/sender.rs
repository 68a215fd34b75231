//! Send-side chunked transfer with backpressure against a single
//! peer's reliable stream (spec §4.8, §5, §8 invariant 6).
//!
//! The aggregate outbound buffered bytes on the stream must never
//! exceed [`BACKPRESSURE_THRESHOLD`] plus one in-flight chunk: before
//! sending each chunk, the sender checks the stream's current buffered
//! amount and, if over threshold, waits for the implementation's
//! "buffered amount low" signal before proceeding.

use async_trait::async_trait;
use uuid::Uuid;

use meshrelay_protocol::{ControlMessage, FileMetadata};

use crate::error::FileTransferError;
use crate::splitter::{chunk_count, split};

/// Backpressure threshold: 1 MiB of buffered outbound bytes.
pub const BACKPRESSURE_THRESHOLD: usize = 1024 * 1024;

/// Abstraction over one peer's reliable outbound stream, implemented
/// against the real media transport's data channel by the mesh layer
/// and by a fake in tests.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    /// Current outbound buffered byte count on the underlying stream.
    fn buffered_amount(&self) -> usize;

    /// Wait until buffered amount drops to or below `threshold`, or
    /// fail if the stream closes/errors while waiting.
    async fn wait_until_below(&self, threshold: usize) -> Result<(), FileTransferError>;

    /// Send one JSON control frame.
    async fn send_control(&self, message: ControlMessage) -> Result<(), FileTransferError>;

    /// Send one binary chunk frame.
    async fn send_binary(&self, bytes: &[u8]) -> Result<(), FileTransferError>;
}

/// Split `bytes`, announce `file-metadata`, and stream chunks to `sink`
/// respecting backpressure, under the caller-assigned `transfer_id`
/// (spec §4.8: one `transfer_id` is minted per logical transfer and
/// reused across every peer's `file-metadata`, not re-minted per peer).
///
/// # Errors
///
/// Returns [`FileTransferError::StreamClosed`] if the sink closes at
/// any point; the caller is expected to treat this as "this peer's
/// transfer aborted", not a fatal error for the broadcast as a whole.
pub async fn send_file(
    sink: &dyn ChunkSink,
    message_id: Uuid,
    transfer_id: Uuid,
    name: String,
    mime_type: String,
    bytes: &[u8],
) -> Result<Uuid, FileTransferError> {
    let metadata = FileMetadata {
        name,
        size: bytes.len() as u64,
        mime_type,
        chunks: chunk_count(bytes.len() as u64),
        transfer_id,
    };

    sink.send_control(ControlMessage::FileMetadata {
        message_id,
        metadata,
    })
    .await?;

    for (index, chunk) in split(bytes).into_iter().enumerate() {
        if sink.buffered_amount() > BACKPRESSURE_THRESHOLD {
            sink.wait_until_below(BACKPRESSURE_THRESHOLD).await?;
        }
        sink.send_control(ControlMessage::FileChunkMeta {
            transfer_id,
            index: index as u32,
        })
        .await?;
        sink.send_binary(chunk).await?;
    }

    Ok(transfer_id)
}
