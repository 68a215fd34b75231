//! Per-stream framing between [`ControlMessage`] JSON text frames and the
//! raw binary frames used for file-chunk payloads (spec §4.2, §4.5).
//!
//! A `file-chunk-meta` text frame always immediately precedes exactly one
//! binary frame carrying that chunk's bytes. [`StreamCodec`] holds at
//! most one such pending announcement at a time. This state is scoped to
//! a single peer connection: spec §9 flags that a transport multiplexing
//! several peers over one pending slot would corrupt unrelated
//! transfers, so every peer connection must own its own `StreamCodec`.

use uuid::Uuid;

use crate::error::CodecError;
use crate::message::ControlMessage;

/// A decoded chunk ready for reassembly (spec §4.5, §C8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChunk {
    /// Correlates to the `file-metadata` announcement.
    pub transfer_id: Uuid,
    /// Zero-based chunk index.
    pub index: u32,
    /// Raw chunk bytes.
    pub bytes: Vec<u8>,
}

/// Result of feeding one frame into the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A fully decoded control message, other than `file-chunk-meta`
    /// (which is absorbed into pending state, not surfaced directly).
    Control(ControlMessageBox),
    /// A chunk whose preceding `file-chunk-meta` has been consumed.
    Chunk(FileChunk),
    /// A `file-chunk-meta` frame was accepted and is now pending; no
    /// output is produced until the matching binary frame arrives.
    Pending,
}

/// Boxing wrapper so `Decoded` doesn't need `ControlMessage` to be
/// `Eq` (it isn't, since it carries `f64`-free but float-adjacent types
/// in principle); kept as a thin newtype for forward compatibility.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlMessageBox(pub ControlMessage);

impl Eq for ControlMessageBox {}

/// Per-peer-connection codec state.
#[derive(Debug, Default)]
pub struct StreamCodec {
    pending: Option<(Uuid, u32)>,
}

impl StreamCodec {
    /// Create a fresh codec with no pending chunk announcement.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True if a `file-chunk-meta` has been accepted and not yet
    /// matched with a binary frame.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Feed an incoming text frame (JSON) through the codec.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MalformedJson`] if the frame doesn't parse,
    /// or [`CodecError::PendingSlotOccupied`] if a `file-chunk-meta`
    /// arrives while a previous one is still awaiting its binary frame.
    pub fn decode_text(&mut self, text: &str) -> Result<Decoded, CodecError> {
        let message: ControlMessage = serde_json::from_str(text)?;
        if let ControlMessage::FileChunkMeta { transfer_id, index } = message {
            if self.pending.is_some() {
                return Err(CodecError::PendingSlotOccupied);
            }
            self.pending = Some((transfer_id, index));
            return Ok(Decoded::Pending);
        }
        // Any non-binary frame clears a stale pending slot (spec §9): an
        // aborted chunk must not bind the next file-chunk-meta's binary
        // frame to this one's (transfer_id, index).
        self.pending = None;
        Ok(Decoded::Control(ControlMessageBox(message)))
    }

    /// Feed an incoming binary frame through the codec.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnexpectedBinaryFrame`] if no
    /// `file-chunk-meta` is currently pending.
    pub fn decode_binary(&mut self, bytes: Vec<u8>) -> Result<Decoded, CodecError> {
        let (transfer_id, index) = self
            .pending
            .take()
            .ok_or(CodecError::UnexpectedBinaryFrame)?;
        Ok(Decoded::Chunk(FileChunk {
            transfer_id,
            index,
            bytes,
        }))
    }

    /// Serialize a control message to its JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MalformedJson`] if serialization fails,
    /// which only happens for pathological inputs (it cannot for
    /// [`ControlMessage`] in practice).
    pub fn encode_text(message: &ControlMessage) -> Result<String, CodecError> {
        Ok(serde_json::to_string(message)?)
    }
}
