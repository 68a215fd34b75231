//! Mesh-wide configuration (spec §4.3, §4.4, §4.7, §4.8).

use std::time::Duration;

use crate::router::DATA_CHANNEL_READY_DELAY;
use crate::sync::{HISTORY_PAGE_CAP, HISTORY_REQUEST_TIMEOUT, KNOWN_IDS_CAP, MISSING_MESSAGES_CAP};

/// Default STUN servers; no TURN is required by this protocol (spec §4.4).
const ICE_SERVER_DEFAULTS: &[&str] = &["stun:stun.l.google.com:19302"];

/// Top-level configuration for one mesh node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Signaling relay WebSocket URL.
    pub signaling_url: String,
    /// STUN servers handed to the media transport (spec §4.4: "no TURN
    /// required by this spec").
    pub ice_servers: Vec<String>,
    /// Reconnect backoff bounds, mirroring [`meshrelay_signaling::Backoff`].
    pub reconnect: ReconnectConfig,
    /// Sync engine caps (spec §4.7).
    pub sync: SyncConfig,
    /// File transfer tuning (spec §4.8).
    pub transfer: TransferConfig,
    /// Delay before announcing a reliable stream ready (spec §4.5).
    pub data_channel_ready_delay: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            signaling_url: "wss://relay.meshrelay.example/ws".to_string(),
            ice_servers: ICE_SERVER_DEFAULTS.iter().map(|s| s.to_string()).collect(),
            reconnect: ReconnectConfig::default(),
            sync: SyncConfig::default(),
            transfer: TransferConfig::default(),
            data_channel_ready_delay: DATA_CHANNEL_READY_DELAY,
        }
    }
}

/// Exponential backoff bounds for the signaling reconnect loop (spec §4.3).
#[derive(Debug, Clone, Copy)]
pub struct ReconnectConfig {
    /// Initial delay.
    pub base: Duration,
    /// Maximum delay.
    pub cap: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
        }
    }
}

/// Sync engine caps and the history request timeout (spec §4.7).
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// Cap on `known_message_ids` in a `sync-hello`.
    pub known_ids_cap: usize,
    /// Cap on messages returned in one `sync-response`.
    pub missing_messages_cap: usize,
    /// Cap on one `history-request`/`history-response` page.
    pub history_page_cap: u32,
    /// Timeout for an outstanding history request.
    pub history_request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            known_ids_cap: KNOWN_IDS_CAP,
            missing_messages_cap: MISSING_MESSAGES_CAP,
            history_page_cap: HISTORY_PAGE_CAP,
            history_request_timeout: HISTORY_REQUEST_TIMEOUT,
        }
    }
}

/// File transfer tuning (spec §4.8).
#[derive(Debug, Clone, Copy)]
pub struct TransferConfig {
    /// Fixed chunk size.
    pub chunk_size: usize,
    /// Sender-side backpressure threshold on buffered bytes.
    pub backpressure_threshold: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: meshrelay_files::CHUNK_SIZE,
            backpressure_threshold: meshrelay_files::BACKPRESSURE_THRESHOLD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let config = NodeConfig::default();
        assert_eq!(config.sync.known_ids_cap, 2000);
        assert_eq!(config.sync.missing_messages_cap, 100);
        assert_eq!(config.sync.history_page_cap, 100);
        assert_eq!(config.sync.history_request_timeout, Duration::from_secs(6));
        assert_eq!(config.reconnect.base, Duration::from_secs(1));
        assert_eq!(config.reconnect.cap, Duration::from_secs(30));
        assert_eq!(config.transfer.chunk_size, 16 * 1024);
        assert_eq!(config.transfer.backpressure_threshold, 1024 * 1024);
    }
}
