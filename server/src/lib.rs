//! # Match Server Library
//!
//! Authoritative server for online X01 darts matches. Each match is owned by
//! exactly one actor task; the routing layer in front of the actors only
//! moves datagrams and keeps track of which address speaks for whom.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Scoring
//! Every visit and undo goes through the shared scoring engine inside the
//! match actor. Accepted commands advance the match sequence number by one
//! and are broadcast to every connected session as a diff; rejected ones are
//! answered to the submitter only.
//!
//! ### Session Handling
//! - Joining a match by id and participant, with snapshot delivery
//! - Reconnects from new addresses, resolved to the same participant
//! - Heartbeat tracking and timeout-driven disconnects
//! - Abandonment of matches nobody has been connected to for a grace period
//!
//! ### Archiving
//! Finished and abandoned matches are handed to the [`archive`] as an
//! encoded command log that replays to the exact final state.
//!
//! ## Module Organization
//!
//! - [`config`]: server and per-match tuning knobs
//! - [`match_session`]: the per-match single writer and its actor task
//! - [`session_manager`]: address to (match, participant) bookkeeping
//! - [`network`]: UDP transport, routing and the main event loop
//! - [`archive`]: storage of encoded match histories
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = ServerConfig {
//!         bind_addr: "0.0.0.0:8080".to_string(),
//!         ..ServerConfig::default()
//!     };
//!     let mut server = Server::new(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod config;
pub mod match_session;
pub mod network;
pub mod session_manager;
