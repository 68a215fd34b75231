//! # meshrelay-crypto
//!
//! Room-key lifecycle and authenticated encryption for meshrelay.
//!
//! This crate provides:
//! - [`RoomKey`]: 256-bit per-room symmetric key generation and base64url
//!   wire encoding
//! - [`Invite`]: out-of-band key distribution via invite URL (`?join=`
//!   query parameter plus `#ek=` fragment)
//! - [`aead::encrypt`]/[`aead::decrypt`]: AES-256-GCM authenticated
//!   encryption of message payloads
//!
//! ## Module Structure
//!
//! - [`room_key`]: key generation, encoding, invite parsing
//! - [`aead`]: AEAD encrypt/decrypt over the wire format
//! - [`random`]: OS CSPRNG wrappers
//! - [`error`]: error types

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aead;
pub mod error;
pub mod random;
pub mod room_key;

pub use error::CryptoError;
pub use room_key::{Invite, RoomKey};
