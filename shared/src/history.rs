//! Compact, text-safe match history
//!
//! A finished match is stored as its ordered command log rather than its
//! final state; replaying the log through the scoring engine rebuilds every
//! intermediate state exactly. The payload pipeline is
//! bincode -> DEFLATE -> base64 so it fits in text-only fields.

use crate::error::HistoryError;
use crate::model::{MatchFormat, MatchId, MatchState, ParticipantId, Seq};
use crate::scoring::{self, Command};
use base64::{engine::general_purpose, Engine as _};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use log::debug;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Upper bound on the decompressed size accepted by [`decode`]
pub const MAX_DECOMPRESSED_BYTES: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub seq: Seq,
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchHistory {
    pub match_id: MatchId,
    pub participants: Vec<ParticipantId>,
    pub format: MatchFormat,
    pub entries: Vec<HistoryEntry>,
}

impl MatchHistory {
    /// Starts an empty log for a freshly created match
    pub fn new(state: &MatchState) -> Self {
        Self {
            match_id: state.id,
            participants: state.participants.clone(),
            format: state.format,
            entries: Vec::new(),
        }
    }

    pub fn record(&mut self, seq: Seq, command: Command) {
        self.entries.push(HistoryEntry { seq, command });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn initial_state(&self) -> Result<MatchState, HistoryError> {
        Ok(MatchState::create(
            self.match_id,
            self.format,
            self.participants.clone(),
        )?)
    }

    /// Rebuilds the final state by re-running every entry through the engine
    pub fn replay(&self) -> Result<MatchState, HistoryError> {
        let mut state = self.initial_state()?;
        for entry in &self.entries {
            let (next, _) = scoring::apply(&state, &entry.command)
                .into_result()
                .map_err(|reason| HistoryError::Replay {
                    seq: entry.seq,
                    reason,
                })?;
            if next.seq != entry.seq {
                return Err(HistoryError::SeqMismatch {
                    expected: entry.seq,
                    actual: next.seq,
                });
            }
            state = next;
        }
        Ok(state)
    }
}

/// Serializes, compresses and base64-encodes a history
pub fn encode(history: &MatchHistory) -> Result<String, HistoryError> {
    let raw = bincode::serialize(history).map_err(|e| HistoryError::Encode(e.to_string()))?;

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(&raw)?;
    let compressed = encoder.finish()?;

    Ok(general_purpose::STANDARD.encode(compressed))
}

/// Decodes a payload, reporting which stage failed
pub fn try_decode(payload: &str) -> Result<MatchHistory, HistoryError> {
    let compressed = general_purpose::STANDARD.decode(payload.trim())?;

    let mut raw = Vec::new();
    DeflateDecoder::new(compressed.as_slice())
        .take(MAX_DECOMPRESSED_BYTES + 1)
        .read_to_end(&mut raw)?;
    if raw.len() as u64 > MAX_DECOMPRESSED_BYTES {
        return Err(HistoryError::TooLarge {
            limit: MAX_DECOMPRESSED_BYTES,
        });
    }

    bincode::deserialize(&raw).map_err(|e| HistoryError::Structure(e.to_string()))
}

/// Decodes a payload; `None` means the history is unavailable
pub fn decode(payload: &str) -> Option<MatchHistory> {
    match try_decode(payload) {
        Ok(history) => Some(history),
        Err(e) => {
            debug!("History payload unavailable: {}", e);
            None
        }
    }
}
