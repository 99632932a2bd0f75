//! # Match Client Library
//!
//! Console client for online X01 matches. The server is the only authority;
//! this crate keeps a mirror of the match in step with it and shows the
//! player's own submissions immediately while they are in flight.
//!
//! ## Architecture Overview
//!
//! ### Mirror and Diffs
//! A snapshot seeds the mirror. Each diff names the command the server
//! accepted; the client replays that command through the same scoring engine
//! and checks it lands on the same sequence number and events. A gap or a
//! mismatch throws the mirror away and a fresh snapshot is requested.
//!
//! ### Optimistic Echo
//! Submitted visits are kept as provisional entries and drawn on top of the
//! mirror. The diff that carries a submission's `client_seq` retires it; a
//! rejection rolls it back. Entries survive resyncs and are resent with the
//! same `client_seq`, which the server treats as a retry.
//!
//! ## Module Organization
//!
//! - [`game`]: mirror, provisional entries and the scoreboard
//! - [`input`]: dart notation and console commands
//! - [`network`]: UDP session, heartbeats, retries and rejoining
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig {
//!         participant: 2,
//!         match_id: Some(1),
//!         ..ClientConfig::default()
//!     };
//!     let mut client = Client::new(config).await?;
//!     client.run().await?;
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod input;
pub mod network;
