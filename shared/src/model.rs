//! Match data model
//!
//! These are the exact types the server owns, the client mirrors and the
//! history log records. Everything derives serde so the same structs travel
//! over the wire without a separate DTO layer.

use crate::error::CreateError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

pub type ParticipantId = u32;
pub type MatchId = u64;
pub type Seq = u64;
pub type ClientSeq = u32;

/// Segment number used for the bull (outer bull = single, bullseye = double)
pub const BULL: u8 = 25;
pub const MAX_DARTS_PER_VISIT: usize = 3;

/// One dart as reported by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Throw {
    pub segment: u8,
    pub multiplier: u8,
}

impl Throw {
    pub fn new(segment: u8, multiplier: u8) -> Self {
        Self {
            segment,
            multiplier,
        }
    }

    pub fn single(segment: u8) -> Self {
        Self::new(segment, 1)
    }

    pub fn double(segment: u8) -> Self {
        Self::new(segment, 2)
    }

    pub fn triple(segment: u8) -> Self {
        Self::new(segment, 3)
    }

    pub fn outer_bull() -> Self {
        Self::new(BULL, 1)
    }

    pub fn bullseye() -> Self {
        Self::new(BULL, 2)
    }

    pub fn miss() -> Self {
        Self::new(0, 1)
    }

    /// Whether the segment/multiplier pair exists on a real board
    pub fn is_valid(&self) -> bool {
        match self.segment {
            0 => self.multiplier == 1,
            1..=20 => (1..=3).contains(&self.multiplier),
            BULL => (1..=2).contains(&self.multiplier),
            _ => false,
        }
    }

    pub fn points(&self) -> u32 {
        self.segment as u32 * self.multiplier as u32
    }

    pub fn is_miss(&self) -> bool {
        self.segment == 0
    }
}

impl fmt::Display for Throw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.segment, self.multiplier) {
            (0, _) => write!(f, "MISS"),
            (BULL, 2) => write!(f, "BULL"),
            (BULL, _) => write!(f, "25"),
            (segment, 3) => write!(f, "T{}", segment),
            (segment, 2) => write!(f, "D{}", segment),
            (segment, _) => write!(f, "{}", segment),
        }
    }
}

/// In/out rule: which darts may open or finish a leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckoutRule {
    Simple,
    Double,
    Master,
}

impl CheckoutRule {
    pub fn accepts(&self, throw: &Throw) -> bool {
        if throw.is_miss() {
            return false;
        }
        match self {
            CheckoutRule::Simple => true,
            CheckoutRule::Double => throw.multiplier == 2,
            CheckoutRule::Master => throw.multiplier == 2 || throw.multiplier == 3,
        }
    }

    /// Double and master finishes cannot be made from a remainder of 1
    pub fn forbids_one(&self) -> bool {
        !matches!(self, CheckoutRule::Simple)
    }
}

/// Service rule deciding who throws first in each leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StartRule {
    Alternate,
    /// Seeded so that every replica picks the same starter
    Random { seed: u64 },
}

impl StartRule {
    pub fn starting_player(&self, legs_played: u32, participants: usize) -> usize {
        if participants == 0 {
            return 0;
        }
        match self {
            StartRule::Alternate => legs_played as usize % participants,
            StartRule::Random { seed } => {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(legs_played as u64));
                rng.gen_range(0..participants)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchFormat {
    pub starting_score: u32,
    pub legs_to_win: u32,
    /// Values of 0 or 1 mean sets are not in use
    pub sets_to_win: u32,
    pub in_rule: CheckoutRule,
    pub out_rule: CheckoutRule,
    pub start_rule: StartRule,
}

impl MatchFormat {
    pub fn new(starting_score: u32, legs_to_win: u32, sets_to_win: u32) -> Self {
        Self {
            starting_score,
            legs_to_win,
            sets_to_win,
            ..Self::default()
        }
    }

    pub fn sets_in_use(&self) -> bool {
        self.sets_to_win > 1
    }

    pub fn sets_target(&self) -> u32 {
        self.sets_to_win.max(1)
    }

    pub fn validate(&self) -> Result<(), CreateError> {
        if self.starting_score < 2 {
            return Err(CreateError::InvalidFormat(format!(
                "starting score must be at least 2, got {}",
                self.starting_score
            )));
        }
        if self.legs_to_win == 0 {
            return Err(CreateError::InvalidFormat(
                "legs to win must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for MatchFormat {
    fn default() -> Self {
        Self {
            starting_score: 501,
            legs_to_win: 3,
            sets_to_win: 1,
            in_rule: CheckoutRule::Simple,
            out_rule: CheckoutRule::Double,
            start_rule: StartRule::Alternate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchStatus {
    Lobby,
    Active,
    Completed,
    Abandoned,
}

impl MatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MatchStatus::Completed | MatchStatus::Abandoned)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegStatus {
    InProgress,
    Won,
    /// Cut short by abandonment
    Invalid,
}

/// One committed turn of up to three darts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visit {
    pub participant: ParticipantId,
    pub throws: Vec<Throw>,
    /// Darts up to and including the one that ended the visit early
    pub darts_counted: u8,
    pub total: u32,
    pub remaining_before: u32,
    pub opened_before: bool,
    pub bust: bool,
    pub checkout: bool,
    /// Sequence number assigned when the visit was accepted
    pub seq: Seq,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leg {
    pub starting_player: usize,
    pub remaining: Vec<u32>,
    /// Whether each participant has satisfied the in-rule yet
    pub opened: Vec<bool>,
    pub visits: Vec<Visit>,
    pub current_turn: usize,
    pub status: LegStatus,
}

impl Leg {
    pub fn new(starting_player: usize, participants: usize, format: &MatchFormat) -> Self {
        Self {
            starting_player,
            remaining: vec![format.starting_score; participants],
            opened: vec![format.in_rule == CheckoutRule::Simple; participants],
            visits: Vec::new(),
            current_turn: starting_player,
            status: LegStatus::InProgress,
        }
    }

    pub fn last_visit(&self) -> Option<&Visit> {
        self.visits.last()
    }
}

/// The root aggregate, owned by exactly one match actor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchState {
    pub id: MatchId,
    pub participants: Vec<ParticipantId>,
    pub format: MatchFormat,
    pub status: MatchStatus,
    pub seq: Seq,
    pub set_index: u32,
    /// Leg index within the current set
    pub leg_index: u32,
    pub legs_played: u32,
    /// Legs won in the current set, indexed like `participants`
    pub leg_wins: Vec<u32>,
    pub set_wins: Vec<u32>,
    pub leg: Leg,
    pub completed_legs: Vec<Leg>,
    pub winner: Option<ParticipantId>,
}

impl MatchState {
    /// Builds a lobby-state match after validating format and roster
    pub fn create(
        id: MatchId,
        format: MatchFormat,
        participants: Vec<ParticipantId>,
    ) -> Result<Self, CreateError> {
        format.validate()?;
        if participants.len() < 2 {
            return Err(CreateError::TooFewParticipants {
                count: participants.len(),
            });
        }
        let mut seen = HashSet::new();
        for participant in &participants {
            if !seen.insert(*participant) {
                return Err(CreateError::DuplicateParticipant {
                    participant: *participant,
                });
            }
        }

        let count = participants.len();
        let starting_player = format.start_rule.starting_player(0, count);

        Ok(Self {
            id,
            participants,
            format,
            status: MatchStatus::Lobby,
            seq: 0,
            set_index: 0,
            leg_index: 0,
            legs_played: 0,
            leg_wins: vec![0; count],
            set_wins: vec![0; count],
            leg: Leg::new(starting_player, count, &format),
            completed_legs: Vec::new(),
            winner: None,
        })
    }

    /// The host may undo any participant's latest visit
    pub fn host(&self) -> ParticipantId {
        self.participants[0]
    }

    pub fn index_of(&self, participant: ParticipantId) -> Option<usize> {
        self.participants.iter().position(|p| *p == participant)
    }

    pub fn is_participant(&self, participant: ParticipantId) -> bool {
        self.index_of(participant).is_some()
    }

    pub fn current_participant(&self) -> ParticipantId {
        self.participants[self.leg.current_turn]
    }

    pub fn remaining_for(&self, participant: ParticipantId) -> Option<u32> {
        self.index_of(participant).map(|i| self.leg.remaining[i])
    }

    /// Completed legs followed by the current one
    pub fn legs(&self) -> impl Iterator<Item = &Leg> {
        self.completed_legs.iter().chain(std::iter::once(&self.leg))
    }
}
