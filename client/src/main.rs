use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use url::Url;

use syncroom_client::{
    config::{is_portable_mode, ClientConfig},
    constants::VERSION,
    invite::{fetch_room_info, parse_invite_url},
    utils::format_time,
    Clock, Player, Session, SessionEvent, SessionInput, SimulatedPlayer, SystemClock, WsChannel,
};

#[derive(Parser)]
#[command(name = "syncroom", version = VERSION, about = "Watch media in sync with a room")]
struct Cli {
    /// Relay websocket base URL
    #[arg(long, global = true)]
    ws_server: Option<String>,
    /// Relay HTTP base URL, used for invite links and room lookup
    #[arg(long, global = true)]
    http_server: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open a new room for a media URL
    Create {
        media_url: String,
        /// Media length in seconds
        #[arg(long, default_value_t = 3600.0)]
        duration: f64,
        /// Start position in seconds
        #[arg(long, default_value_t = 0.0)]
        position: f64,
    },
    /// Join a room from an invite link
    Join {
        invite_url: String,
        #[arg(long, default_value_t = 3600.0)]
        duration: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "syncroom_client=debug,info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::load()?;
    if let Some(server) = &cli.ws_server {
        config = config.with_websocket_server(server)?;
    }
    if let Some(server) = &cli.http_server {
        config = config.with_http_server(server)?;
    }
    if is_portable_mode() {
        tracing::info!("Running in portable mode");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let channel = Arc::new(WsChannel::new(config.channel_options()));

    let (player, mut session, inputs) = match cli.command {
        Command::Create {
            media_url,
            duration,
            position,
        } => {
            let media_url = Url::parse(&media_url).context("Invalid media URL")?;
            let player = Arc::new(SimulatedPlayer::new(
                Arc::clone(&clock),
                media_url.clone(),
                duration,
            ));
            player.restore(position, true);
            let (mut session, inputs) = Session::new(
                player.clone(),
                channel.clone(),
                Arc::clone(&clock),
                config.clone(),
            );
            session.create_room(media_url).await?;
            (player, session, inputs)
        }
        Command::Join {
            invite_url,
            duration,
        } => {
            let link = parse_invite_url(&invite_url).context("Invalid invite link")?;
            let media_url = fetch_room_info(&config.http_server, &link.room_id, &link.key).await?;
            let player = Arc::new(SimulatedPlayer::new(
                Arc::clone(&clock),
                media_url.clone(),
                duration,
            ));
            let (mut session, inputs) = Session::new(
                player.clone(),
                channel.clone(),
                Arc::clone(&clock),
                config.clone(),
            );
            session
                .join_room(&link.room_id, media_url, &link.key)
                .await?;
            (player, session, inputs)
        }
    };

    session.start()?;
    if let Some(invite) = session.invite_url() {
        println!("Invite: {invite}");
    }
    println!("Commands: play | pause | seek <seconds> | status | quit");

    let mut events = session.observe();
    let exit = session.input_sender();
    let driver = tokio::spawn(session.run(inputs));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !run_command(line.trim(), player.as_ref(), &channel) {
                    break;
                }
            }
            event = events.recv() => match event {
                Some(SessionEvent::Exited) | None => {
                    println!("Left the room");
                    break;
                }
                Some(event) => tracing::debug!(?event, "session event"),
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let _ = exit.send(SessionInput::Exit);
    driver.await.context("Session task failed")?;
    Ok(())
}

/// Returns false when the user asked to quit.
fn run_command(line: &str, player: &SimulatedPlayer, channel: &WsChannel) -> bool {
    let mut parts = line.split_whitespace();
    let result = match parts.next() {
        None => Ok(()),
        Some("quit") | Some("exit") => return false,
        Some("play") => player.play(),
        Some("pause") => player.pause(),
        Some("seek") => match parts.next().and_then(|s| s.parse::<f64>().ok()) {
            Some(time) => player.seek(time),
            None => {
                println!("usage: seek <seconds>");
                Ok(())
            }
        },
        Some("status") => {
            print_status(player, channel);
            Ok(())
        }
        Some(other) => {
            println!("unknown command: {other}");
            Ok(())
        }
    };
    if let Err(e) = result {
        println!("player error: {e}");
    }
    true
}

fn print_status(player: &SimulatedPlayer, channel: &WsChannel) {
    let stats = channel.stats_snapshot();
    println!(
        "{} {} / {}",
        if player.paused() { "paused " } else { "playing" },
        format_time(player.current_time()),
        format_time(player.duration()),
    );
    println!(
        "relay: {} | sent {} ({} B) | received {} ({} B) | rtt {} | reconnects {}",
        stats.endpoint_label.as_deref().unwrap_or("disconnected"),
        stats.messages_out,
        stats.bytes_out,
        stats.messages_in,
        stats.bytes_in,
        stats
            .last_rtt_ms
            .map(|ms| format!("{ms:.0} ms"))
            .unwrap_or_else(|| "-".into()),
        stats.reconnect_attempts,
    );
}
