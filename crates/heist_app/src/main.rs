//! # heist_app
//!
//! Headless host for one heist session. Without `--connect` it serves: it
//! accepts joins, moves players from their input and answers pings. With
//! `--connect` it joins that server and pings it once a second.
//!
//! ## Startup Sequence
//!
//! 1. Build and validate the [`SessionConfig`] from the command line
//!    (`HEIST_BIND_ADDR` when no `--bind` is given).
//! 2. Register the game's procedures and systems.
//! 3. Bind the UDP endpoint and enter the fixed-rate tick loop until Ctrl-C
//!    or `--max-ticks`.

mod rpcs;

use std::net::SocketAddr;

use anyhow::Result;
use clap::Parser;
use heist_system::{Runner, Session, SessionConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "heist_app", about = "Headless heist session over UDP")]
struct Args {
    /// Session name used in log output
    #[arg(short, long, default_value = "server")]
    name: String,

    /// Local UDP address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Server to join; runs as a client when set
    #[arg(short, long)]
    connect: Option<SocketAddr>,

    /// Ticks per second
    #[arg(long, default_value_t = 60.0)]
    tick_rate: f64,

    /// Stop after this many ticks (0 runs until Ctrl-C)
    #[arg(long, default_value_t = 0)]
    max_ticks: u64,

    /// Most players connected at once
    #[arg(long, default_value_t = heist_system::config::DEFAULT_MAX_PEERS)]
    max_peers: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("heist_app=info".parse()?))
        .init();

    let args = Args::parse();

    let mut config = SessionConfig::new(&args.name)
        .with_tick_rate(args.tick_rate)
        .with_max_ticks(args.max_ticks)
        .with_max_peers(args.max_peers);
    if let Some(addr) = args.bind {
        config = config.with_bind_addr(addr);
    }

    let mut session = Session::new(config)?;
    let protocol = rpcs::register(&mut session)?;
    if let Some(server) = args.connect {
        rpcs::connect(&mut session, protocol, server, &args.name)?;
        info!(%server, "joining");
    }

    let mut runner = Runner::bind(session).await?;
    info!(name = %args.name, addr = %runner.local_addr()?, "heist session starting");
    runner.run().await?;

    info!(name = %args.name, "heist session shut down");
    Ok(())
}
