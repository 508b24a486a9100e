use clap::Parser;
use log::info;
use server::config::EngineConfig;
use server::network::Server;
use shared::Board;
use std::time::Duration;

/// Main-method of the application.
/// Parses command-line arguments, binds the listener, optionally creates an
/// initial room from a board file, then serves until interrupted.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Buzz window duration in milliseconds
        #[clap(long, default_value = "3000")]
        buzz_window_ms: u64,
        /// Heartbeat probe interval in milliseconds
        #[clap(long, default_value = "2000")]
        heartbeat_ms: u64,
        /// Discard heartbeat acks older than this many milliseconds
        #[clap(long, default_value = "5000")]
        probe_timeout_ms: u64,
        /// Maximum player identities per room
        #[clap(long, default_value = "32")]
        max_players: usize,
        /// Reap rooms with no connections after this many seconds
        #[clap(long, default_value = "1800")]
        room_ttl_secs: u64,
        /// Room control loop tick in milliseconds
        #[clap(long, default_value = "50")]
        tick_ms: u64,
        /// Lead time for latency-leveled window-open delivery, in milliseconds
        #[clap(long, default_value = "500")]
        open_lead_ms: u64,
        /// Board definition (JSON) to create an initial room from
        #[clap(short, long)]
        game: Option<std::path::PathBuf>,
    }

    env_logger::init();
    let args = Args::parse();

    let config = EngineConfig {
        buzz_window: Duration::from_millis(args.buzz_window_ms),
        heartbeat_interval: Duration::from_millis(args.heartbeat_ms),
        probe_timeout: Duration::from_millis(args.probe_timeout_ms),
        max_players: args.max_players,
        room_ttl: Duration::from_secs(args.room_ttl_secs),
        tick_interval: Duration::from_millis(args.tick_ms),
        open_lead: Duration::from_millis(args.open_lead_ms),
        ..EngineConfig::default()
    };

    let address = format!("{}:{}", args.host, args.port);
    let server = Server::new(&address, config).await?;

    if let Some(path) = args.game {
        let raw = std::fs::read_to_string(&path)?;
        let board: Board = serde_json::from_str(&raw)?;
        let (code, host_token) = server.registry().create(board).await;
        info!("initial room ready: code={} hostToken={}", code, host_token);
    }

    // Handle shutdown gracefully
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                eprintln!("Server failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
