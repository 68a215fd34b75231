//! # meshrelay-protocol
//!
//! Wire data model, the tagged control-channel message set, and the
//! per-stream text/binary framing codec shared by every meshrelay crate.
//!
//! ## Module Structure
//!
//! - [`model`]: rooms, channels, messages, reactions, file metadata
//! - [`message`]: [`message::ControlMessage`], the tagged wire enum
//! - [`codec`]: [`codec::StreamCodec`], pending-chunk-meta framing
//! - [`ids`]: UUIDv7 message ids and room codes
//! - [`push`]: web push payload shape
//! - [`error`]: codec error types

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod ids;
pub mod message;
pub mod model;
pub mod push;

pub use codec::{Decoded, FileChunk, StreamCodec};
pub use error::CodecError;
pub use ids::{new_message_id, new_room_code, now_millis};
pub use message::ControlMessage;
pub use model::{
    apply_reaction, Channel, ChannelKind, FileMetadata, Message, Reaction, ReactionAction, Room,
    SystemAction,
};
pub use push::PushPayload;
