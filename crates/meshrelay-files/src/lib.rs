//! # meshrelay-files
//!
//! Chunked file transfer: split/reassemble, per-transfer progress, and
//! sender-side backpressure against a reliable stream's buffered-amount
//! threshold.
//!
//! ## Module Structure
//!
//! - [`splitter`]: fixed 16 KiB chunk splitting
//! - [`sender`]: [`sender::send_file`], [`sender::ChunkSink`] backpressure-aware send loop
//! - [`receiver`]: [`receiver::IncomingTransfer`], reassembly and progress
//! - [`policy`]: consumer-side storage policy by size/MIME type
//! - [`error`]: transfer error types

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod policy;
pub mod receiver;
pub mod sender;
pub mod splitter;

pub use error::FileTransferError;
pub use policy::{classify, StoragePolicy, MAX_UPLOAD_SIZE};
pub use receiver::{IncomingTransfer, Progress};
pub use sender::{send_file, ChunkSink, BACKPRESSURE_THRESHOLD};
pub use splitter::{chunk_count, split, CHUNK_SIZE};
