//! Client-side match mirror and reconciliation
//!
//! The client never decides anything. It mirrors the server's state from a
//! snapshot, re-runs every diff's command through the shared engine to stay
//! in step, and overlays its own unconfirmed submissions on top for display.
//! Whenever the mirror cannot be trusted (a gap in the sequence, or a diff
//! that replays differently) it is thrown away and a snapshot is requested.

use log::{debug, warn};
use shared::{
    apply, ClientSeq, Command, DiffOrigin, MatchEvent, MatchState, MatchStatus, Packet,
    ParticipantId, RuleViolation, Seq, SyncError, Throw,
};
use std::fmt;
use std::time::{Duration, Instant};

/// A submission echoed locally while waiting for the server's verdict
#[derive(Debug, Clone, PartialEq)]
pub struct Provisional {
    pub client_seq: ClientSeq,
    pub command: Command,
    pub sent_at: Instant,
    pub attempts: u32,
}

impl Provisional {
    /// Wire form; resends carry the original client_seq
    pub fn to_packet(&self) -> Option<Packet> {
        match &self.command {
            Command::Visit { throws, .. } => Some(Packet::SubmitVisit {
                throws: throws.clone(),
                client_seq: self.client_seq,
            }),
            Command::Undo { expected_seq, .. } => Some(Packet::UndoLastVisit {
                expected_seq: *expected_seq,
                client_seq: self.client_seq,
            }),
            Command::Start | Command::Abandon => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffApplied {
    Advanced,
    /// Already applied; only used to retire provisional entries
    Duplicate,
}

pub struct ClientMatchState {
    participant: ParticipantId,
    mirror: Option<MatchState>,
    last_seq: Seq,
    provisional: Vec<Provisional>,
    next_client_seq: ClientSeq,
}

impl ClientMatchState {
    pub fn new(participant: ParticipantId) -> Self {
        Self {
            participant,
            mirror: None,
            last_seq: 0,
            provisional: Vec::new(),
            next_client_seq: 1,
        }
    }

    pub fn participant(&self) -> ParticipantId {
        self.participant
    }

    pub fn mirror(&self) -> Option<&MatchState> {
        self.mirror.as_ref()
    }

    pub fn last_seq(&self) -> Seq {
        self.last_seq
    }

    pub fn awaiting_snapshot(&self) -> bool {
        self.mirror.is_none()
    }

    pub fn provisional(&self) -> &[Provisional] {
        &self.provisional
    }

    /// Seeds the mirror; `next_client_seq` is the server's floor for new
    /// submissions, which keeps a restarted client clear of old client_seqs
    pub fn apply_snapshot(&mut self, state: MatchState, seq: Seq, next_client_seq: ClientSeq) {
        debug!("Snapshot at seq {}", seq);
        self.last_seq = seq;
        self.mirror = Some(state);
        self.next_client_seq = self.next_client_seq.max(next_client_seq);
    }

    /// Advances the mirror by one diff
    ///
    /// Old sequence numbers are duplicates. Anything other than the next
    /// sequence number, or a command that replays to different events,
    /// discards the mirror; the caller should request a snapshot.
    pub fn apply_diff(
        &mut self,
        seq: Seq,
        command: &Command,
        events: &[MatchEvent],
        origin: Option<DiffOrigin>,
    ) -> Result<DiffApplied, SyncError> {
        if let Some(origin) = origin {
            self.retire(origin, command);
        }

        let mirror = self.mirror.as_ref().ok_or(SyncError::NotSeeded)?;

        if seq <= self.last_seq {
            debug!("Ignoring duplicate diff {} (at {})", seq, self.last_seq);
            return Ok(DiffApplied::Duplicate);
        }
        if seq != self.last_seq + 1 {
            let expected = self.last_seq + 1;
            warn!("Sequence gap: expected {}, received {}", expected, seq);
            self.discard();
            return Err(SyncError::SequenceGap {
                expected,
                received: seq,
            });
        }

        let outcome = apply(mirror, command);
        if !outcome.accepted() || outcome.state.seq != seq || outcome.events != events {
            warn!("Diff {} replayed differently, dropping mirror", seq);
            self.discard();
            return Err(SyncError::Diverged { seq });
        }

        self.mirror = Some(outcome.state);
        self.last_seq = seq;
        Ok(DiffApplied::Advanced)
    }

    /// Records a visit for optimistic display and returns its client_seq
    pub fn submit_visit(&mut self, throws: Vec<Throw>, now: Instant) -> ClientSeq {
        let command = Command::Visit {
            participant: self.participant,
            throws,
        };
        self.push_provisional(command, now)
    }

    /// Records an undo of the latest visit as of the current mirror
    pub fn submit_undo(&mut self, now: Instant) -> ClientSeq {
        let command = Command::Undo {
            participant: self.participant,
            expected_seq: self.last_seq,
        };
        self.push_provisional(command, now)
    }

    fn push_provisional(&mut self, command: Command, now: Instant) -> ClientSeq {
        let client_seq = self.next_client_seq;
        self.next_client_seq = self.next_client_seq.wrapping_add(1);
        self.provisional.push(Provisional {
            client_seq,
            command,
            sent_at: now,
            attempts: 1,
        });
        client_seq
    }

    /// Rolls back a provisional entry the server refused
    pub fn apply_rejection(
        &mut self,
        client_seq: ClientSeq,
        reason: &RuleViolation,
    ) -> Option<Provisional> {
        let index = self
            .provisional
            .iter()
            .position(|p| p.client_seq == client_seq)?;
        debug!("Submission {} rejected: {}", client_seq, reason);
        Some(self.provisional.remove(index))
    }

    /// Drops the entry a diff confirms; a diff for some other command under
    /// the same client_seq confirms nothing
    fn retire(&mut self, origin: DiffOrigin, command: &Command) {
        if origin.participant == self.participant {
            self.provisional
                .retain(|p| p.client_seq != origin.client_seq || p.command != *command);
        }
    }

    /// Mirror with provisional submissions applied on top
    pub fn display_state(&self) -> Option<MatchState> {
        let mut state = self.mirror.clone()?;
        for entry in &self.provisional {
            let command = match &entry.command {
                Command::Undo { participant, .. } => Command::Undo {
                    participant: *participant,
                    expected_seq: state.seq,
                },
                other => other.clone(),
            };
            let outcome = apply(&state, &command);
            if outcome.accepted() {
                state = outcome.state;
            }
        }
        Some(state)
    }

    /// Provisional entries unacknowledged for `ack_timeout`, as packets to resend
    pub fn due_for_retry(&mut self, now: Instant, ack_timeout: Duration) -> Vec<Packet> {
        let mut packets = Vec::new();
        for entry in &mut self.provisional {
            if now.saturating_duration_since(entry.sent_at) >= ack_timeout {
                entry.sent_at = now;
                entry.attempts += 1;
                packets.extend(entry.to_packet());
            }
        }
        packets
    }

    /// Every provisional entry, for resubmission after a resync
    pub fn resubmissions(&mut self, now: Instant) -> Vec<Packet> {
        self.provisional
            .iter_mut()
            .filter_map(|entry| {
                entry.sent_at = now;
                entry.to_packet()
            })
            .collect()
    }

    /// Drops the mirror but keeps provisional submissions
    pub fn discard(&mut self) {
        self.mirror = None;
    }
}

/// Small text scoreboard for one match, seen from one participant
pub struct Scoreboard<'a> {
    state: &'a MatchState,
    you: ParticipantId,
}

pub fn scoreboard(state: &MatchState, you: ParticipantId) -> Scoreboard<'_> {
    Scoreboard { state, you }
}

impl fmt::Display for Scoreboard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state;

        write!(f, "Match {} | ", state.id)?;
        if state.format.sets_in_use() {
            write!(f, "Set {} ", state.set_index + 1)?;
        }
        writeln!(
            f,
            "Leg {} | {:?} | seq {}",
            state.leg_index + 1,
            state.status,
            state.seq
        )?;

        for (i, participant) in state.participants.iter().enumerate() {
            let marker = if state.status == MatchStatus::Active && i == state.leg.current_turn {
                '>'
            } else {
                ' '
            };
            let name = if *participant == self.you {
                format!("{} (you)", participant)
            } else {
                participant.to_string()
            };
            write!(
                f,
                "{} {:<12} {:>4}  legs {}",
                marker, name, state.leg.remaining[i], state.leg_wins[i]
            )?;
            if state.format.sets_in_use() {
                write!(f, "  sets {}", state.set_wins[i])?;
            }
            writeln!(f)?;
        }

        if let Some(visit) = state.leg.last_visit() {
            let darts: Vec<String> = visit.throws.iter().map(|t| t.to_string()).collect();
            write!(
                f,
                "Last: {} threw {} for {}",
                visit.participant,
                darts.join(" "),
                visit.total
            )?;
            if visit.bust {
                f.write_str(" (bust)")?;
            }
            if visit.checkout {
                f.write_str(" (checkout)")?;
            }
            writeln!(f)?;
        }

        match (state.status, state.winner) {
            (MatchStatus::Completed, Some(winner)) => writeln!(f, "Winner: {}", winner),
            (MatchStatus::Abandoned, _) => writeln!(f, "Match abandoned"),
            _ => Ok(()),
        }
    }
}
