//! Types and rules shared by the match server, the client and offline play.
//!
//! - [`model`]: the match aggregate (match, leg, visit, throw)
//! - [`scoring`]: the pure X01 state machine
//! - [`protocol`]: wire envelope and packet kinds
//! - [`history`]: compressed, text-safe match log codec
//! - [`error`]: error kinds that cross crate or wire boundaries

pub mod error;
pub mod history;
pub mod model;
pub mod protocol;
pub mod scoring;

pub use error::{CreateError, HistoryError, JoinError, RuleViolation, SyncError};
pub use model::{
    CheckoutRule, ClientSeq, Leg, LegStatus, MatchFormat, MatchId, MatchState, MatchStatus,
    ParticipantId, Seq, StartRule, Throw, Visit, BULL, MAX_DARTS_PER_VISIT,
};
pub use protocol::{DiffOrigin, Envelope, Packet, MAX_DATAGRAM_SIZE, NO_MATCH, PROTOCOL_VERSION};
pub use scoring::{apply, apply_visit, Command, MatchEvent, Outcome};

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, used for heartbeat round trips
pub fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}
