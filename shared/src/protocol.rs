//! Wire protocol between match actors and clients
//!
//! Every datagram is one bincode-encoded [`Envelope`]. The packet enum's
//! discriminant is the message type; the match id travels alongside so the
//! server can route without inspecting the payload.

use crate::error::{CreateError, JoinError, RuleViolation};
use crate::model::{ClientSeq, MatchFormat, MatchId, MatchState, ParticipantId, Seq, Throw};
use crate::scoring::{Command, MatchEvent};
use bincode::{deserialize, serialize};
use serde::{Deserialize, Serialize};

/// Bumped whenever the packet layout changes; joins from other versions are refused
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest payload a single UDP datagram can carry
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Match id used for messages not yet bound to a match
pub const NO_MATCH: MatchId = 0;

/// Identifies which client submission produced a diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffOrigin {
    pub participant: ParticipantId,
    pub client_seq: ClientSeq,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    // Client -> server
    CreateMatch {
        format: MatchFormat,
        participants: Vec<ParticipantId>,
    },
    Join {
        participant: ParticipantId,
        auth_token: String,
        version: u32,
    },
    SubmitVisit {
        throws: Vec<Throw>,
        client_seq: ClientSeq,
    },
    UndoLastVisit {
        expected_seq: Seq,
        client_seq: ClientSeq,
    },
    RequestSnapshot,
    Heartbeat {
        timestamp: u64,
        last_seq: Seq,
    },
    Leave,

    // Server -> client
    MatchCreated {
        match_id: MatchId,
    },
    CreateFailed {
        error: CreateError,
    },
    JoinFailed {
        error: JoinError,
    },
    Snapshot {
        state: MatchState,
        seq: Seq,
        /// Lowest client_seq the recipient may use for new submissions
        next_client_seq: ClientSeq,
    },
    Diff {
        seq: Seq,
        command: Command,
        events: Vec<MatchEvent>,
        origin: Option<DiffOrigin>,
    },
    Rejected {
        client_seq: ClientSeq,
        reason: RuleViolation,
    },
    MatchCompleted {
        final_state: MatchState,
    },
    HeartbeatAck {
        timestamp: u64,
        seq: Seq,
    },
}

impl Packet {
    /// Message type name, used for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::CreateMatch { .. } => "createMatch",
            Packet::Join { .. } => "join",
            Packet::SubmitVisit { .. } => "submitVisit",
            Packet::UndoLastVisit { .. } => "undoLastVisit",
            Packet::RequestSnapshot => "requestSnapshot",
            Packet::Heartbeat { .. } => "heartbeat",
            Packet::Leave => "leave",
            Packet::MatchCreated { .. } => "matchCreated",
            Packet::CreateFailed { .. } => "createFailed",
            Packet::JoinFailed { .. } => "joinFailed",
            Packet::Snapshot { .. } => "snapshot",
            Packet::Diff { .. } => "diff",
            Packet::Rejected { .. } => "rejected",
            Packet::MatchCompleted { .. } => "matchCompleted",
            Packet::HeartbeatAck { .. } => "heartbeatAck",
        }
    }

    pub fn is_client_message(&self) -> bool {
        matches!(
            self,
            Packet::CreateMatch { .. }
                | Packet::Join { .. }
                | Packet::SubmitVisit { .. }
                | Packet::UndoLastVisit { .. }
                | Packet::RequestSnapshot
                | Packet::Heartbeat { .. }
                | Packet::Leave
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub match_id: MatchId,
    pub packet: Packet,
}

impl Envelope {
    pub fn new(match_id: MatchId, packet: Packet) -> Self {
        Self { match_id, packet }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        serialize(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        deserialize(bytes)
    }
}
