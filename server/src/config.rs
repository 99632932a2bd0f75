//! Server tuning knobs
//!
//! The binary fills these from command-line flags; tests build them directly.

use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

/// Whether ids outside a match's roster may join as read-only viewers
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SpectatorPolicy {
    Disabled,
    LobbyOnly,
    Always,
}

/// Settings a single match actor needs
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// How long a match may sit with nobody connected before it is abandoned
    pub abandon_grace: Duration,
    /// Client sequence numbers remembered per participant for retries
    pub dedupe_window: usize,
    pub spectators: SpectatorPolicy,
    /// How often the actor checks for abandonment
    pub housekeeping_interval: Duration,
    /// Bounded command queue length per actor
    pub queue_capacity: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            abandon_grace: Duration::from_secs(300),
            dedupe_window: 64,
            spectators: SpectatorPolicy::Disabled,
            housekeeping_interval: Duration::from_secs(1),
            queue_capacity: 256,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Silence after which a connection counts as disconnected
    pub heartbeat_timeout: Duration,
    pub max_sessions: usize,
    /// Where finished match payloads are written, if anywhere
    pub archive_dir: Option<PathBuf>,
    /// Payloads kept in memory when no directory is configured
    pub archive_capacity: usize,
    pub match_config: MatchConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            heartbeat_timeout: Duration::from_secs(5),
            max_sessions: 256,
            archive_dir: None,
            archive_capacity: 64,
            match_config: MatchConfig::default(),
        }
    }
}
