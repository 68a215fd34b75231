//! # meshrelay-signaling
//!
//! WebSocket link between a peer and the signaling relay: join/peer
//! discovery, media-transport handshake exchange, and opportunistic
//! push/sync-poll relay. The relay itself holds no durable state.
//!
//! ## Module Structure
//!
//! - [`wire`]: the relay's JSON wire protocol ([`wire::ClientFrame`], [`wire::RelayFrame`])
//! - [`client`]: [`client::SignalingClient`], auto-reconnecting WebSocket client
//! - [`backoff`]: [`backoff::Backoff`], the reconnect delay schedule
//! - [`server`]: [`server::RelayServer`], a minimal reference relay implementation
//! - [`error`]: client error types

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod client;
pub mod error;
pub mod server;
pub mod wire;

pub use backoff::Backoff;
pub use client::SignalingClient;
pub use error::SignalingError;
pub use server::RelayServer;
pub use wire::{ClientFrame, PeerInfo, PushSubscription, RelayFrame};
