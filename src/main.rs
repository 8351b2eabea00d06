use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use serde_json::json;
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use rumornet::{
    Node, NodeConfig, DEFAULT_FANOUT, DEFAULT_MAX_IHAVE_IDS, DEFAULT_PEER_LIMIT,
    DEFAULT_PEER_TIMEOUT_SECS, DEFAULT_PING_INTERVAL_SECS, DEFAULT_SEED, DEFAULT_TTL,
};

#[derive(Parser, Debug)]
#[command(name = "rumornet")]
#[command(author, version, about = "UDP epidemic gossip node", long_about = None)]
struct Args {
    /// UDP listen port (0 binds an ephemeral port)
    #[arg(short, long)]
    port: u16,

    /// Peers chosen per push relay
    #[arg(short, long, default_value_t = DEFAULT_FANOUT)]
    fanout: usize,

    /// Hop budget for injected gossip
    #[arg(short, long, default_value_t = DEFAULT_TTL)]
    ttl: u32,

    /// Bootstrap peer as ip:port
    #[arg(short, long)]
    bootstrap: Option<SocketAddr>,

    /// Membership view capacity
    #[arg(short = 'l', long, default_value_t = DEFAULT_PEER_LIMIT)]
    peer_limit: usize,

    /// Liveness probe cadence in seconds
    #[arg(short = 'i', long, default_value_t = DEFAULT_PING_INTERVAL_SECS)]
    ping_interval: u64,

    /// Silence threshold before a peer is expired, in seconds
    #[arg(short = 'o', long, default_value_t = DEFAULT_PEER_TIMEOUT_SECS)]
    peer_timeout: u64,

    /// Seed for the sampling PRNG (reproducible experiments)
    #[arg(short, long, default_value_t = DEFAULT_SEED)]
    seed: u64,

    /// IHAVE advertisement cadence in seconds (0 disables the pull path)
    #[arg(long, default_value_t = 0)]
    pull_interval: u64,

    /// Cap on ids advertised in one IHAVE
    #[arg(long, default_value_t = DEFAULT_MAX_IHAVE_IDS)]
    max_ihave_ids: usize,

    /// Admission puzzle difficulty in leading zero nibbles (0 disables)
    #[arg(long, default_value_t = 0)]
    pow_difficulty: u32,

    /// Directory the event log is created in
    #[arg(long, default_value = ".")]
    log_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = NodeConfig {
        port: args.port,
        fanout: args.fanout,
        ttl: args.ttl,
        peer_limit: args.peer_limit,
        ping_interval: Duration::from_secs(args.ping_interval),
        peer_timeout: Duration::from_secs(args.peer_timeout),
        seed: args.seed,
        pull_interval: Duration::from_secs(args.pull_interval),
        max_ihave_ids: args.max_ihave_ids,
        pow_difficulty: args.pow_difficulty,
        log_dir: args.log_dir,
    };

    let node = Node::bind(config).await?;
    info!("gossip node on port {}", node.local_addr().port());

    if let Some(peer) = args.bootstrap {
        info!("bootstrapping from {peer}");
        node.bootstrap(peer).await;
    }

    node.run().await;

    println!("Gossip node started on port {}", node.local_addr().port());
    println!("Type `msg <text>` to inject a gossip message, Ctrl-C to quit.");

    let stdin = tokio::io::stdin();
    let mut lines = tokio::io::BufReader::new(stdin).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal, exiting gracefully");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if let Some(text) = line.strip_prefix("msg ") {
                    match node.inject(json!({ "topic": "news", "data": text })).await {
                        Ok(id) => println!("injected {id}"),
                        Err(e) => warn!(error = %e, "inject failed"),
                    }
                } else if !line.is_empty() {
                    println!("unknown command, try: msg <text>");
                }
            }
        }
    }

    node.shutdown().await;
    Ok(())
}
