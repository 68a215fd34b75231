//! CLI-local configuration: relay URL, ICE servers, and the on-disk
//! room-key store consulted by key acquisition order step (c)
//! (spec §4.9).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use meshrelay_crypto::RoomKey;
use serde::{Deserialize, Serialize};

fn default_relay() -> String {
    "wss://relay.meshrelay.example/ws".to_string()
}

fn default_ice_servers() -> Vec<String> {
    vec!["stun:stun.l.google.com:19302".to_string()]
}

/// Node-wide CLI configuration, loaded from `~/.config/meshrelay/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Signaling relay WebSocket URL.
    #[serde(default = "default_relay")]
    pub relay: String,
    /// STUN/TURN server URLs handed to the media transport.
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay: default_relay(),
            ice_servers: default_ice_servers(),
        }
    }
}

impl Config {
    /// Default config file location.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("meshrelay")
            .join("config.toml")
    }

    /// Load from `path`, falling back to defaults if the file is absent.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}

/// A flat `{room_id: base64_key}` store at
/// `~/.config/meshrelay/room_keys.toml`, standing in for the local
/// key-store consulted by spec §4.9 key acquisition order step (c).
/// A real client backs this with its durable store instead (§6.3
/// `room_keys`); the CLI has no such store, so it keeps its own file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct KeyStoreFile {
    #[serde(flatten)]
    keys: HashMap<String, String>,
}

/// Path to the local room-key store file.
#[must_use]
pub fn key_store_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("meshrelay")
        .join("room_keys.toml")
}

/// Look up a previously saved room key by room id.
pub fn load_room_key(room_id: &str) -> Option<RoomKey> {
    let path = key_store_path();
    let raw = fs::read_to_string(path).ok()?;
    let store: KeyStoreFile = toml::from_str(&raw).ok()?;
    let encoded = store.keys.get(room_id)?;
    RoomKey::from_base64(encoded).ok()
}

/// Persist a room key under `room_id`, creating the config directory
/// and file as needed.
pub fn save_room_key(room_id: &str, key: &RoomKey) -> anyhow::Result<()> {
    let path = key_store_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut store: KeyStoreFile = fs::read_to_string(&path)
        .ok()
        .and_then(|raw| toml::from_str(&raw).ok())
        .unwrap_or_default();
    store.keys.insert(room_id.to_string(), key.to_base64());
    fs::write(&path, toml::to_string_pretty(&store)?)?;
    Ok(())
}

/// Delete a saved room key on leave (spec §3 RoomKey lifecycle).
pub fn delete_room_key(room_id: &str) -> anyhow::Result<()> {
    let path = key_store_path();
    let Ok(raw) = fs::read_to_string(&path) else {
        return Ok(());
    };
    let mut store: KeyStoreFile = toml::from_str(&raw).unwrap_or_default();
    store.keys.remove(room_id);
    fs::write(&path, toml::to_string_pretty(&store)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_are_sane() {
        let config = Config::default();
        assert!(config.relay.starts_with("wss://"));
        assert!(!config.ice_servers.is_empty());
    }
}
