use clap::Parser;
use log::info;
use server::config::{MatchConfig, ServerConfig, SpectatorPolicy};
use server::network::Server;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Authoritative server for online X01 matches")]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Maximum number of concurrent connections
    #[arg(long, default_value = "256")]
    max_sessions: usize,

    /// Seconds of silence before a connection counts as gone
    #[arg(long, default_value = "5")]
    heartbeat_timeout: u64,

    /// Seconds a match may sit with nobody connected before it is abandoned
    #[arg(long, default_value = "300")]
    abandon_grace: u64,

    /// Client sequence numbers remembered per participant for retries
    #[arg(long, default_value = "64")]
    dedupe_window: usize,

    /// Whether non-participants may watch
    #[arg(long, value_enum, default_value = "disabled")]
    spectators: SpectatorPolicy,

    /// Directory for finished match histories
    #[arg(long)]
    archive_dir: Option<PathBuf>,

    /// Finished histories kept in memory when no archive directory is set
    #[arg(long, default_value = "64")]
    archive_capacity: usize,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            bind_addr: format!("{}:{}", self.host, self.port),
            heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout),
            max_sessions: self.max_sessions,
            archive_dir: self.archive_dir,
            archive_capacity: self.archive_capacity,
            match_config: MatchConfig {
                abandon_grace: Duration::from_secs(self.abandon_grace),
                dedupe_window: self.dedupe_window,
                spectators: self.spectators,
                ..MatchConfig::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    let args = Args::parse();
    let mut server = Server::new(args.into_config()).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
