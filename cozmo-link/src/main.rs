//! Entry point for `cozmo-link`.
//!
//! Parses CLI arguments and dispatches into either **connect** (initiator) or
//! **serve** (server) mode.  All protocol work is delegated to the library;
//! `main.rs` owns only process setup (logging, signal handling, argument
//! parsing).

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use cozmo_link::config::{DEFAULT_ROBOT_ADDR, DEFAULT_SERVER_ADDR};
use cozmo_link::timer::Timing;
use cozmo_link::{Connection, ConnectionConfig, ConnectionState, HandlerKey, PacketType};

/// Reliable packet link to a Cozmo robot over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    tuning: Tuning,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Args)]
struct Tuning {
    /// Sliding window size in packets (power of two).
    #[arg(long, global = true, default_value_t = 256)]
    window: usize,
    /// Keep-alive interval in milliseconds.
    #[arg(long, global = true, default_value_t = 1000)]
    ping_ms: u64,
    /// Traffic summary interval in seconds.
    #[arg(long, global = true, default_value_t = 30)]
    stats_secs: u64,
}

#[derive(Subcommand)]
enum Mode {
    /// Open a session with a robot and log everything it sends.
    Connect {
        /// Robot address.
        #[arg(short, long, default_value_t = DEFAULT_ROBOT_ADDR)]
        robot: SocketAddr,
        /// Stay connected this many seconds (until Ctrl-C if omitted).
        #[arg(short, long)]
        duration: Option<u64>,
    },
    /// Answer sessions and echo every ACTION packet back to the peer.
    Serve {
        /// Local address to bind.
        #[arg(short, long, default_value_t = DEFAULT_SERVER_ADDR)]
        bind: SocketAddr,
    },
}

impl Tuning {
    fn apply(&self, config: ConnectionConfig) -> ConnectionConfig {
        let timing = Timing {
            ping_interval: Duration::from_millis(self.ping_ms),
            stats_interval: Duration::from_secs(self.stats_secs),
            ..config.timing
        };
        let seq_bits = config.seq_bits;
        config.with_window(self.window, seq_bits).with_timing(timing)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Connect { robot, duration } => {
            let config = cli.tuning.apply(ConnectionConfig::initiator(robot));
            run_initiator(config, duration).await
        }
        Mode::Serve { bind } => {
            let config = cli.tuning.apply(ConnectionConfig::server(bind));
            run_server(config).await
        }
    }
}

async fn run_initiator(config: ConnectionConfig, duration: Option<u64>) -> Result<()> {
    let conn = Connection::bind(config).await.context("binding socket")?;
    for kind in [PacketType::Action, PacketType::Event, PacketType::Ping] {
        conn.add_handler(
            HandlerKey::Packet(kind),
            |pkt| log::info!("{} seq={} {}B", pkt.packet_type(), pkt.seq(), pkt.payload().len()),
            false,
        );
    }
    conn.start()?;

    log::info!("Connecting to {:?}", conn.peer_addr());
    conn.connect()?;
    conn.wait_for_state(ConnectionState::Connected, Duration::from_secs(5))
        .await
        .context("handshake did not complete")?;

    match duration {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => tokio::signal::ctrl_c().await?,
    }

    conn.disconnect()?;
    // Give the DISCONNECT a few frame periods to leave.
    tokio::time::sleep(Duration::from_millis(200)).await;
    conn.stop().await?;
    println!("{}", conn.stats());
    Ok(())
}

async fn run_server(config: ConnectionConfig) -> Result<()> {
    let conn = Connection::bind(config).await.context("binding socket")?;
    log::info!("Listening on {}", conn.local_addr());

    let echo = conn.sender();
    conn.add_handler(
        HandlerKey::Packet(PacketType::Action),
        move |pkt| {
            if let Err(e) = echo.send(pkt.clone()) {
                log::warn!("echo failed: {e}");
            }
        },
        false,
    );
    conn.start()?;

    tokio::signal::ctrl_c().await?;
    if conn.state() == ConnectionState::Connected {
        conn.disconnect()?;
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    conn.stop().await?;
    println!("{}", conn.stats());
    Ok(())
}
