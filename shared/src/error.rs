use crate::model::{MatchId, MatchStatus, ParticipantId, Seq};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why the scoring engine refused a command
///
/// These are reported only to the submitting client and never touch
/// canonical state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum RuleViolation {
    #[error("invalid dart: segment {segment} with multiplier {multiplier}")]
    InvalidThrow { segment: u8, multiplier: u8 },

    #[error("a visit needs at least one dart")]
    NoThrows,

    #[error("a visit has at most 3 darts, got {count}")]
    TooManyThrows { count: usize },

    #[error("participant {participant} is not the current thrower")]
    NotYourTurn { participant: ParticipantId },

    #[error("participant {participant} is not part of this match")]
    NotParticipant { participant: ParticipantId },

    #[error("match is {status:?}")]
    MatchNotActive { status: MatchStatus },

    #[error("undo targets seq {expected} but the match is at seq {current}")]
    StaleUndo { expected: Seq, current: Seq },

    #[error("no visit to undo in the current leg")]
    NothingToUndo,

    #[error("participant {participant} may not undo this visit")]
    UndoNotPermitted { participant: ParticipantId },
}

/// Terminal failures of a join attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum JoinError {
    #[error("match {match_id} not found")]
    MatchNotFound { match_id: MatchId },

    #[error("participant {participant} is not on the roster")]
    NotParticipant { participant: ParticipantId },

    #[error("match already started; spectators may only join in the lobby")]
    AlreadyStarted,

    #[error("server is full")]
    ServerFull,

    #[error("protocol version {client} is not supported (server speaks {server})")]
    UnsupportedVersion { client: u32, server: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum CreateError {
    #[error("invalid match format: {0}")]
    InvalidFormat(String),

    #[error("a match needs at least 2 participants, got {count}")]
    TooFewParticipants { count: usize },

    #[error("participant {participant} appears twice in the roster")]
    DuplicateParticipant { participant: ParticipantId },
}

/// Client-side ordering problems, recovered by requesting a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("sequence gap: expected {expected}, received {received}")]
    SequenceGap { expected: Seq, received: Seq },

    #[error("local replay of seq {seq} disagreed with the server")]
    Diverged { seq: Seq },

    #[error("no snapshot received yet")]
    NotSeeded,
}

/// Failures inside the history codec
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to serialize history: {0}")]
    Encode(String),

    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("payload is not a valid deflate stream: {0}")]
    Decompress(#[from] std::io::Error),

    #[error("decompressed payload exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("payload does not describe a match history: {0}")]
    Structure(String),

    #[error("history roster is invalid: {0}")]
    Roster(#[from] CreateError),

    #[error("entry at seq {seq} was rejected on replay: {reason}")]
    Replay { seq: Seq, reason: RuleViolation },

    #[error("entry expected seq {expected} but replay produced {actual}")]
    SeqMismatch { expected: Seq, actual: Seq },
}
