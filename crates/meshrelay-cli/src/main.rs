//! meshrelay command-line node.
//!
//! A thin application layer over `meshrelay-mesh`: it resolves a room
//! key, joins the peer mesh, and drives a line-oriented session so the
//! protocol stack can be exercised end-to-end from a terminal. The
//! presentation layer proper (views, notifications UI, slash-command
//! palette) is out of scope (spec §1); this is the reference
//! "external collaborator" that stands in for it.

mod config;
mod progress;

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use meshrelay_crypto::{Invite, RoomKey};
use meshrelay_mesh::transport::MediaTransport;
use meshrelay_mesh::{keylifecycle, InMemoryStore, MeshManager, MeshNotification, NodeConfig, Store, TransportFactory, WebRtcTransport};
use meshrelay_protocol::ChannelKind;
use tokio::io::{AsyncBufReadExt, BufReader};

use config::Config;
use progress::format_bytes;

#[derive(Parser)]
#[command(name = "meshrelay")]
#[command(author, version, about = "Decentralized, end-to-end encrypted room chat", long_about = None)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new room and print its invite URL.
    Create {
        /// Display name to join as.
        #[arg(short, long)]
        username: String,
        /// Host to embed in the printed invite URL.
        #[arg(long, default_value = "meshrelay.example")]
        host: String,
    },
    /// Join a room from an invite URL (or a bare room code, if a key
    /// was previously saved locally).
    Join {
        /// `https://host/?join=CODE#ek=KEY`, or a bare 6-character room code.
        invite: String,
        /// Display name to join as.
        #[arg(short, long)]
        username: String,
    },
    /// Show resolved configuration and exit.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose { "debug" } else { "info" })
        .init();

    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;

    match cli.command {
        Commands::Create { username, host } => create_room(username, host, &config).await,
        Commands::Join { invite, username } => join_room(invite, username, &config).await,
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn create_room(username: String, host: String, config: &Config) -> anyhow::Result<()> {
    let room_id = meshrelay_protocol::new_room_code();
    let key = RoomKey::generate()?;
    let invite = Invite { room_code: room_id.clone(), key: key.clone() };

    println!("Room created: {room_id}");
    println!("Invite: {}", invite.to_url(&host));
    println!();

    config::save_room_key(&room_id, &key)?;
    run_session(room_id, username, Some(key), config).await
}

async fn join_room(invite: String, username: String, config: &Config) -> anyhow::Result<()> {
    let (room_id, key_from_invite) = match Invite::parse(&invite) {
        Some(parsed) => (parsed.room_code, Some(parsed.key)),
        None => (invite, None),
    };

    if let Some(key) = &key_from_invite {
        config::save_room_key(&room_id, key)?;
    }

    run_session(room_id, username, key_from_invite, config).await
}

/// Resolve the room key per spec §4.9 acquisition order, join the
/// mesh, and drive an interactive line session until `/quit`.
async fn run_session(
    room_id: String,
    username: String,
    explicit_key: Option<RoomKey>,
    config: &Config,
) -> anyhow::Result<()> {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let local_id = meshrelay_protocol::new_message_id().to_string();

    let room_key = keylifecycle::acquire_room_key(
        store.as_ref(),
        &room_id,
        explicit_key,
        config::load_room_key(&room_id),
    )
    .await;

    let node_config = NodeConfig {
        signaling_url: config.relay.clone(),
        ice_servers: config.ice_servers.clone(),
        ..NodeConfig::default()
    };

    let (manager, mut notify_rx) = MeshManager::join(
        node_config,
        Arc::clone(&store),
        webrtc_transport_factory(config.ice_servers.clone()),
        local_id.clone(),
        username.clone(),
        room_id.clone(),
        room_key,
    );

    println!("Joined room {room_id} as {username} ({local_id})");
    println!("Type a message and press enter to send on the default channel.");
    println!("Commands: /channel <name>  /history [n]  /peers  /authorize <peer-id>  /quit");
    println!();

    {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.run().await });
    }

    tokio::spawn(async move {
        while let Some(notification) = notify_rx.recv().await {
            print_notification(notification);
        }
    });

    let channel = manager.create_channel("general".to_string(), ChannelKind::Text).await;
    let mut current_channel = channel.id;

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();
        let Some(line) = lines.next_line().await? else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("/channel ") {
            let created = manager.create_channel(rest.trim().to_string(), ChannelKind::Text).await;
            current_channel = created.id;
            println!("Switched to new channel {:?} ({})", created.name, created.id);
        } else if let Some(rest) = line.strip_prefix("/history") {
            let limit: u32 = rest.trim().parse().unwrap_or(50);
            let pulled = manager.request_history(current_channel, None, limit).await;
            println!("Pulled {pulled} older messages.");
        } else if line == "/peers" {
            for entry in manager.peers().iter() {
                println!("  {} ({})", entry.key(), if entry.value().is_connected() { "connected" } else { "connecting" });
            }
        } else if let Some(rest) = line.strip_prefix("/authorize ") {
            println!("Use the pending-authorization notice id printed earlier, not the peer id: /authorize <notice-id> <peer-id>");
            let _ = rest;
        } else if line == "/quit" {
            break;
        } else {
            manager.send_message(current_channel, line.to_string()).await;
        }
    }

    manager.leave().await;
    Ok(())
}

fn print_notification(notification: MeshNotification) {
    match notification {
        MeshNotification::MessageStored { message, .. } => {
            if let Some(metadata) = &message.file_metadata {
                println!(
                    "[{}] sent a file: {} ({})",
                    message.username,
                    metadata.name,
                    format_bytes(metadata.size)
                );
            } else if message.system_action.is_some() {
                println!("* {:?}", message.system_action.unwrap());
            } else {
                println!("{}: {}", message.username, message.content);
            }
        }
        MeshNotification::ChannelAdded(channel) => {
            println!("# channel added: {} ({:?})", channel.name, channel.kind);
        }
        MeshNotification::TransferProgress { transfer_id, received, total } => {
            println!("  transfer {transfer_id}: {received}/{total} chunks");
        }
        MeshNotification::TransferComplete { transfer_id, mime_type } => {
            println!("  transfer {transfer_id} complete ({mime_type})");
        }
        MeshNotification::PeerConnected { peer_id, username } => {
            println!("-> {username} ({peer_id}) connected");
        }
        MeshNotification::PeerDisconnected { peer_id } => {
            println!("<- {peer_id} disconnected");
        }
    }
}

/// Build a [`TransportFactory`] that constructs a real
/// [`WebRtcTransport`] per peer. `WebRtcTransport::new` is async;
/// the factory seam is synchronous (spec §4.6 creates peers inline
/// while handling `peer-list`/`peer-joined`), so construction is
/// bridged onto the current runtime with `block_in_place`.
fn webrtc_transport_factory(ice_servers: Vec<String>) -> TransportFactory {
    Arc::new(move || {
        let ice_servers = ice_servers.clone();
        let transport = tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(WebRtcTransport::new(&ice_servers))
        });
        match transport {
            Ok(transport) => Arc::new(transport) as Arc<dyn MediaTransport>,
            Err(error) => {
                tracing::error!(%error, "failed to create WebRTC transport for a new peer");
                panic!("cannot continue without a working media transport: {error}");
            }
        }
    })
}
