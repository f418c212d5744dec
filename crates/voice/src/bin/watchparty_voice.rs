//! Watch-party voice client entry point
//!
//! Joins a room on the relay and keeps a voice session with every other member.
//!
//! # Usage
//!
//! ```bash
//! # Join a room on a local relay
//! cargo run --bin watchparty-voice -- \
//!   --relay-url ws://localhost:8080/stream \
//!   --username alice \
//!   --room movie-night
//!
//! # Capture the default microphone and use a TURN server
//! cargo run --bin watchparty-voice --features microphone -- \
//!   --username alice --room movie-night \
//!   --turn-servers turn:turn.example.com:3478:user:secret
//! ```
//!
//! Player state is read from stdin as one JSON object per line and relayed to
//! the room; commands from other members are printed to stdout the same way.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use watchparty_voice::channel::WebSocketConnector;
use watchparty_voice::config::TurnServerConfig;
use watchparty_voice::media::{MediaDevice, NoCaptureDevice};
use watchparty_voice::peer::{RemoteStream, WebRtcTransportFactory};
use watchparty_voice::{ClientConfig, Orchestrator, OrchestratorHandle, PresenterEvent};

/// Watch-party voice client
///
/// Connects to a watch-party relay and talks to everyone in the room.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay WebSocket URL
    #[arg(long, env = "WATCHPARTY_RELAY_URL")]
    relay_url: Option<String>,

    /// Display name shown to the room
    #[arg(short, long, env = "WATCHPARTY_USERNAME")]
    username: String,

    /// Room to join
    #[arg(short, long, env = "WATCHPARTY_ROOM")]
    room: String,

    /// STUN server URLs (comma-separated)
    #[arg(long, value_delimiter = ',', env = "WATCHPARTY_STUN_SERVERS")]
    stun_servers: Vec<String>,

    /// TURN servers (format: turn:host:port:username:password)
    #[arg(long, value_delimiter = ',', env = "WATCHPARTY_TURN_SERVERS")]
    turn_servers: Vec<String>,

    /// JSON config file; command-line flags override it
    #[arg(short, long, env = "WATCHPARTY_CONFIG")]
    config: Option<PathBuf>,

    /// Join without capturing the microphone
    #[arg(long, default_value_t = false, env = "WATCHPARTY_LISTEN_ONLY")]
    listen_only: bool,
}

/// Parse TURN server string (format: turn:host:port:username:password or turns:host:port:username:password)
fn parse_turn_server(s: &str) -> std::result::Result<TurnServerConfig, String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() < 5 {
        return Err(format!(
            "Invalid TURN server format: '{}'. Expected: turn:host:port:username:password",
            s
        ));
    }

    let protocol = parts[0];
    if protocol != "turn" && protocol != "turns" {
        return Err(format!(
            "Invalid TURN protocol: '{}'. Expected 'turn' or 'turns'",
            protocol
        ));
    }

    Ok(TurnServerConfig {
        url: format!("{}:{}:{}", protocol, parts[1], parts[2]),
        username: parts[3].to_string(),
        // password may contain colons
        credential: parts[4..].join(":"),
    })
}

fn build_config_from_args(args: &Args) -> Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "Loading config file");
            ClientConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?
        }
        None => ClientConfig::default(),
    };

    if let Some(url) = &args.relay_url {
        config = config.with_relay_url(url.clone());
    }
    if !args.stun_servers.is_empty() {
        config = config.with_stun_servers(args.stun_servers.clone());
    }

    let mut turn_servers = Vec::new();
    for turn_str in &args.turn_servers {
        let turn = parse_turn_server(turn_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TURN server: {}", e))?;
        info!("Adding TURN server: {} (user: {})", turn.url, turn.username);
        turn_servers.push(turn);
    }
    config = config.with_turn_servers(turn_servers);

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn capture_device(args: &Args, config: &ClientConfig) -> Arc<dyn MediaDevice> {
    if args.listen_only {
        info!("Listen-only mode, microphone disabled");
        return Arc::new(NoCaptureDevice);
    }

    #[cfg(feature = "microphone")]
    {
        Arc::new(watchparty_voice::media::MicrophoneDevice::new(config.audio))
    }

    #[cfg(not(feature = "microphone"))]
    {
        let _ = config;
        warn!("Built without the microphone feature, joining listen-only");
        Arc::new(NoCaptureDevice)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(async_main(args));

    // a pending stdin read must not hold the process open
    runtime.shutdown_timeout(Duration::from_millis(500));
    result
}

async fn async_main(args: Args) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        room = %args.room,
        "Watch-party voice client starting"
    );

    let config = build_config_from_args(&args)?;
    let device = capture_device(&args, &config);
    let factory = WebRtcTransportFactory::new(&config);

    let (orchestrator, handle, mut events) = Orchestrator::new(
        config,
        Arc::new(WebSocketConnector),
        Arc::new(factory),
        device,
    );
    let orchestrator_task = tokio::spawn(orchestrator.run());

    handle.connect(args.username.clone(), args.room.clone())?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => present(event),
                None => break,
            },
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => forward_player_state(&handle, &line)?,
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, leaving the room");
                handle.disconnect()?;
                break;
            }
        }
    }

    drop(handle);
    orchestrator_task.await?;
    info!("Watch-party voice client stopped");
    Ok(())
}

/// Relay one line of local player state
fn forward_player_state(
    handle: &OrchestratorHandle,
    line: &str,
) -> watchparty_voice::Result<()> {
    if line.trim().is_empty() {
        return Ok(());
    }
    match serde_json::from_str(line) {
        Ok(state) => handle.forward_player_state(state),
        Err(e) => {
            warn!("Ignoring player state that is not JSON: {}", e);
            Ok(())
        }
    }
}

fn present(event: PresenterEvent) {
    match event {
        PresenterEvent::ConnectionStatus(status) => {
            info!(
                connected = status.is_connected,
                room_id = %status.room_id,
                users = ?status.users,
                "Connection status"
            );
        }
        PresenterEvent::RemoteStreamAdded { peer_id, stream } => {
            info!(peer_id = %peer_id, stream_id = %stream.stream_id, "Remote audio started");
            tokio::spawn(count_packets(peer_id, stream));
        }
        PresenterEvent::RemoteStreamClosed { peer_id } => {
            info!(peer_id = %peer_id, "Remote audio closed");
        }
        PresenterEvent::PlayerCommand { command } => println!("{}", command),
    }
}

/// Consume a remote stream, logging how much audio arrived
async fn count_packets(peer_id: String, mut stream: RemoteStream) {
    let mut packets: u64 = 0;
    let mut bytes: u64 = 0;
    while let Some(payload) = stream.packets.recv().await {
        packets += 1;
        bytes += payload.len() as u64;
        if packets % 500 == 0 {
            tracing::debug!(peer_id = %peer_id, packets, bytes, "Receiving audio");
        }
    }
    info!(peer_id = %peer_id, packets, bytes, "Remote audio ended");
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
