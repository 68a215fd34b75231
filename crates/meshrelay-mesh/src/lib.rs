//! # meshrelay-mesh
//!
//! The mesh runtime: ties the signaling client, perfect-negotiation
//! state machine, control-channel router, anti-entropy sync engine,
//! chunked file transfer, room-key lifecycle, and media track plane
//! into one peer set owned by the [`manager::MeshManager`] (spec §4.6).
//!
//! ## Module Structure
//!
//! - [`config`]: [`config::NodeConfig`] and its tunables
//! - [`error`]: [`error::MeshError`]
//! - [`event`]: [`event::MeshEvent`], the unified signal type
//! - [`peer`]: [`peer::Peer`], [`peer::PeerMap`], invariants 4 and 5
//! - [`negotiation`]: perfect-negotiation collision handling (C4)
//! - [`transport`]: [`transport::MediaTransport`], the WebRTC seam (C4)
//! - [`webrtc_transport`]: [`webrtc_transport::WebRtcTransport`], the
//!   production transport backed by the `webrtc` crate
//! - [`router`]: [`router::ControlRouter`], [`router::ReliableStream`] (C5)
//! - [`sync`]: anti-entropy reconciliation and history pagination (C7)
//! - [`keylifecycle`]: room-key acquisition and handoff (C9)
//! - [`media`]: audio/camera/screen-share track plane (C10)
//! - [`store`]: [`store::Store`], the persisted-state seam (§6.3)
//! - [`manager`]: [`manager::MeshManager`], the mesh runtime (C6)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod event;
pub mod keylifecycle;
pub mod manager;
pub mod media;
pub mod negotiation;
pub mod peer;
pub mod router;
pub mod store;
pub mod sync;
pub mod transport;
pub mod webrtc_transport;

pub use config::NodeConfig;
pub use error::MeshError;
pub use event::MeshEvent;
pub use manager::{MeshManager, MeshNotification, TransportFactory};
pub use peer::{Peer, PeerId, PeerMap};
pub use store::{InMemoryStore, Store};
pub use webrtc_transport::WebRtcTransport;
