//! world-presence-client binary
//!
//! Joins a sub-world over TCP, prints presence and chat events, and turns
//! stdin lines into chat.
//!
//! ## Configuration (env / TOML via `config` crate)
//!
//! | Flag / Key          | Env                     | Default          |
//! |---------------------|-------------------------|------------------|
//! | `--config`          | `PRESENCE_CONFIG`       | *(none)*         |
//! | `--endpoint`        | `PRESENCE_ENDPOINT`     | `127.0.0.1:7400` |
//! | `--token`           | `PRESENCE_TOKEN`        | *(empty)*        |
//! | `--local-id`        | `PRESENCE_LOCAL_ID`     | *(empty)*        |
//! | `--sub-world`       | `PRESENCE_SUB_WORLD_ID` | `lobby`          |
//!
//! Every other key in `ClientSettings` can be set in the file or through its
//! `PRESENCE_*` variable.
//!
//! ## Commands
//!
//! `/wave`, `/punch`, `/walk`, `/idle` set the local animation; `/quit`
//! leaves.  Anything else is sent as chat.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use world_presence::{
    AnimationState, ChannelPresentation, ClientSettings, DisconnectReason, EventStream, Session,
    SessionEvent, SessionStatus, TcpTransport, TcpTransportConfig,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "world-presence-client", about = "World Presence Client", version)]
struct Args {
    /// Optional TOML settings file
    #[arg(long, env = "PRESENCE_CONFIG")]
    config: Option<PathBuf>,

    /// World server host:port
    #[arg(long, env = "PRESENCE_ENDPOINT")]
    endpoint: Option<String>,

    /// Join credential
    #[arg(long, env = "PRESENCE_TOKEN")]
    token: Option<String>,

    /// Local participant id
    #[arg(long, env = "PRESENCE_LOCAL_ID")]
    local_id: Option<String>,

    /// Sub-world to join
    #[arg(long = "sub-world", env = "PRESENCE_SUB_WORLD_ID")]
    sub_world_id: Option<String>,
}

enum Command {
    Chat(String),
    Animate(AnimationState),
    Quit,
}

fn parse_command(line: &str) -> Command {
    match line.trim() {
        "/wave" => Command::Animate(AnimationState::Wave),
        "/punch" => Command::Animate(AnimationState::Punch),
        "/walk" => Command::Animate(AnimationState::Walking),
        "/idle" => Command::Animate(AnimationState::Idle),
        "/quit" => Command::Quit,
        _ => Command::Chat(line.to_string()),
    }
}

/// Print pending events.  Returns `Some(manual)` once the connection is lost.
fn drain_events(events: &EventStream) -> Option<bool> {
    let mut lost = None;
    for event in events.poll() {
        match event {
            SessionEvent::Joined { world_name } => println!("* joined {world_name}"),
            SessionEvent::RoomStatus { headcount, latency } => match latency {
                Some(rtt) => println!("* {headcount} in room, {} ms", rtt.as_millis()),
                None => println!("* {headcount} in room"),
            },
            SessionEvent::ChatAppended { line } => println!("{line}"),
            SessionEvent::ParticipantCreated {
                id,
                display_name,
                is_local: false,
                ..
            } => println!("* {display_name} ({id}) appeared"),
            SessionEvent::ParticipantCreated {
                is_local: true,
                pose,
                ..
            } => println!("* spawned at {}", pose.position),
            SessionEvent::ParticipantRemoved { id } => println!("* {id} disappeared"),
            SessionEvent::ConnectFailed { message } => eprintln!("! connect failed: {message}"),
            SessionEvent::JoinFailed { message } => eprintln!("! join failed: {message}"),
            SessionEvent::ConnectionLost { manual } => {
                if !manual {
                    eprintln!("! connection to the world server was lost");
                }
                lost = Some(manual);
            }
            SessionEvent::PoseUpdated { .. }
            | SessionEvent::ChatBubble { .. } => {}
        }
    }
    lost
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("world_presence=debug".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut settings =
        ClientSettings::load(args.config.as_deref()).context("Failed to load settings")?;
    if let Some(endpoint) = args.endpoint {
        settings.endpoint = endpoint;
    }
    if let Some(token) = args.token {
        settings.token = token;
    }
    if let Some(local_id) = args.local_id {
        settings.local_id = local_id;
    }
    if let Some(sub_world_id) = args.sub_world_id {
        settings.sub_world_id = sub_world_id;
    }
    let config = settings.session_config();

    log::info!(
        "Starting world-presence-client (endpoint='{}', sub_world='{}', local_id='{}')",
        config.endpoint,
        config.sub_world_id,
        config.local_id,
    );

    let transport = TcpTransport::new(TcpTransportConfig::from(&config));
    let (presentation, events) = ChannelPresentation::new();
    let session = Session::new(config, transport, presentation);

    let started = session.start().await;
    drain_events(&events);
    started.context("Failed to enter the world")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(Duration::from_millis(50));

    let forced = loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(manual) = drain_events(&events) {
                    break !manual;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    session.disconnect();
                    break false;
                };
                match parse_command(&line) {
                    Command::Quit => {
                        session.disconnect();
                        break false;
                    }
                    Command::Animate(animation) => {
                        session.update_local(|local| local.animation = animation);
                    }
                    Command::Chat(text) => {
                        if let Err(e) = session.send_chat(&text).await {
                            eprintln!("! {e} (unsent: {})", e.text);
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                session.disconnect();
                break false;
            }
        }
    };

    drain_events(&events);
    let dropped = session.status() == SessionStatus::Disconnected(DisconnectReason::Forced);
    if forced || dropped {
        anyhow::bail!("disconnected by the server");
    }
    Ok(())
}
