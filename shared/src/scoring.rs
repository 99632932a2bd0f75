//! X01 scoring engine
//!
//! A single pure transition function shared by the authoritative match actor,
//! the client mirror and offline play. Given the same state and command it
//! always produces the same outcome, which is what lets clients re-apply a
//! server diff locally and arrive at the server's state.
//!
//! Accepted commands advance `seq` by exactly one as part of the transition,
//! so replaying a history log reproduces sequence numbers as well as scores.

use crate::error::RuleViolation;
use crate::model::{
    Leg, LegStatus, MatchState, MatchStatus, ParticipantId, Seq, Throw, Visit,
    MAX_DARTS_PER_VISIT,
};
use serde::{Deserialize, Serialize};

/// Every canonical state transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    Start,
    Visit {
        participant: ParticipantId,
        throws: Vec<Throw>,
    },
    Undo {
        participant: ParticipantId,
        expected_seq: Seq,
    },
    Abandon,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchEvent {
    MatchStarted,
    LegStarted {
        set_index: u32,
        leg_index: u32,
        starting_participant: ParticipantId,
    },
    VisitRecorded {
        visit: Visit,
        remaining: u32,
    },
    LegWon {
        participant: ParticipantId,
        set_index: u32,
        leg_index: u32,
    },
    SetWon {
        participant: ParticipantId,
        set_index: u32,
    },
    MatchCompleted {
        winner: ParticipantId,
    },
    VisitUndone {
        participant: ParticipantId,
        restored_remaining: u32,
    },
    MatchAbandoned,
}

/// Result of one engine call
///
/// On rejection `state` is an unchanged copy of the input and `events` is
/// empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub state: MatchState,
    pub events: Vec<MatchEvent>,
    pub rejection: Option<RuleViolation>,
}

impl Outcome {
    pub fn accepted(&self) -> bool {
        self.rejection.is_none()
    }

    pub fn into_result(self) -> Result<(MatchState, Vec<MatchEvent>), RuleViolation> {
        match self.rejection {
            None => Ok((self.state, self.events)),
            Some(reason) => Err(reason),
        }
    }
}

/// Applies one command to a match state
pub fn apply(state: &MatchState, command: &Command) -> Outcome {
    let mut next = state.clone();
    let result = match command {
        Command::Start => start(&mut next),
        Command::Visit {
            participant,
            throws,
        } => visit(&mut next, *participant, throws),
        Command::Undo {
            participant,
            expected_seq,
        } => undo(&mut next, *participant, *expected_seq),
        Command::Abandon => abandon(&mut next),
    };

    match result {
        Ok(events) => {
            next.seq += 1;
            Outcome {
                state: next,
                events,
                rejection: None,
            }
        }
        Err(reason) => Outcome {
            state: state.clone(),
            events: Vec::new(),
            rejection: Some(reason),
        },
    }
}

/// Scores one visit of one to three darts
pub fn apply_visit(state: &MatchState, participant: ParticipantId, throws: &[Throw]) -> Outcome {
    apply(
        state,
        &Command::Visit {
            participant,
            throws: throws.to_vec(),
        },
    )
}

fn ensure_active(state: &MatchState) -> Result<(), RuleViolation> {
    if state.status == MatchStatus::Active {
        Ok(())
    } else {
        Err(RuleViolation::MatchNotActive {
            status: state.status,
        })
    }
}

fn start(state: &mut MatchState) -> Result<Vec<MatchEvent>, RuleViolation> {
    if state.status != MatchStatus::Lobby {
        return Err(RuleViolation::MatchNotActive {
            status: state.status,
        });
    }
    state.status = MatchStatus::Active;

    Ok(vec![
        MatchEvent::MatchStarted,
        MatchEvent::LegStarted {
            set_index: state.set_index,
            leg_index: state.leg_index,
            starting_participant: state.participants[state.leg.starting_player],
        },
    ])
}

fn visit(
    state: &mut MatchState,
    participant: ParticipantId,
    throws: &[Throw],
) -> Result<Vec<MatchEvent>, RuleViolation> {
    ensure_active(state)?;
    let idx = state
        .index_of(participant)
        .ok_or(RuleViolation::NotParticipant { participant })?;
    if idx != state.leg.current_turn {
        return Err(RuleViolation::NotYourTurn { participant });
    }
    if throws.is_empty() {
        return Err(RuleViolation::NoThrows);
    }
    if throws.len() > MAX_DARTS_PER_VISIT {
        return Err(RuleViolation::TooManyThrows {
            count: throws.len(),
        });
    }
    if let Some(bad) = throws.iter().find(|t| !t.is_valid()) {
        return Err(RuleViolation::InvalidThrow {
            segment: bad.segment,
            multiplier: bad.multiplier,
        });
    }

    let format = state.format;
    let before = state.leg.remaining[idx];
    let opened_before = state.leg.opened[idx];

    let mut remaining = before;
    let mut opened = opened_before;
    let mut darts_counted = 0u8;
    let mut total = 0u32;
    let mut bust = false;
    let mut checkout = false;

    for throw in throws {
        darts_counted += 1;

        if !opened {
            if format.in_rule.accepts(throw) {
                opened = true;
            } else {
                continue;
            }
        }

        let points = throw.points();
        total += points;

        if points > remaining {
            bust = true;
            break;
        }
        remaining -= points;

        if remaining == 0 {
            if format.out_rule.accepts(throw) {
                checkout = true;
            } else {
                bust = true;
            }
            break;
        }
        if remaining == 1 && format.out_rule.forbids_one() {
            bust = true;
            break;
        }
    }

    if bust {
        remaining = before;
        opened = opened_before;
    }

    state.leg.remaining[idx] = remaining;
    state.leg.opened[idx] = opened;

    let visit = Visit {
        participant,
        throws: throws.to_vec(),
        darts_counted,
        total,
        remaining_before: before,
        opened_before,
        bust,
        checkout,
        seq: state.seq + 1,
    };
    state.leg.visits.push(visit.clone());

    let mut events = vec![MatchEvent::VisitRecorded { visit, remaining }];

    if checkout {
        complete_leg(state, idx, &mut events);
    } else {
        state.leg.current_turn = (idx + 1) % state.participants.len();
    }

    Ok(events)
}

/// Cascades a leg win into set and match results, then deals the next leg
fn complete_leg(state: &mut MatchState, idx: usize, events: &mut Vec<MatchEvent>) {
    let participant = state.participants[idx];
    let format = state.format;

    state.leg.status = LegStatus::Won;
    state.leg_wins[idx] += 1;
    state.legs_played += 1;
    events.push(MatchEvent::LegWon {
        participant,
        set_index: state.set_index,
        leg_index: state.leg_index,
    });

    if state.leg_wins[idx] >= format.legs_to_win {
        state.set_wins[idx] += 1;
        if format.sets_in_use() {
            events.push(MatchEvent::SetWon {
                participant,
                set_index: state.set_index,
            });
        }

        if state.set_wins[idx] >= format.sets_target() {
            // The deciding leg stays as the current leg for final display
            state.status = MatchStatus::Completed;
            state.winner = Some(participant);
            events.push(MatchEvent::MatchCompleted {
                winner: participant,
            });
            return;
        }

        state.leg_wins.iter_mut().for_each(|w| *w = 0);
        state.set_index += 1;
        state.leg_index = 0;
    } else {
        state.leg_index += 1;
    }

    let count = state.participants.len();
    let starting_player = format
        .start_rule
        .starting_player(state.legs_played, count);
    let finished = std::mem::replace(&mut state.leg, Leg::new(starting_player, count, &format));
    state.completed_legs.push(finished);

    events.push(MatchEvent::LegStarted {
        set_index: state.set_index,
        leg_index: state.leg_index,
        starting_participant: state.participants[starting_player],
    });
}

fn undo(
    state: &mut MatchState,
    participant: ParticipantId,
    expected_seq: Seq,
) -> Result<Vec<MatchEvent>, RuleViolation> {
    ensure_active(state)?;
    if !state.is_participant(participant) {
        return Err(RuleViolation::NotParticipant { participant });
    }

    let tail = state
        .leg
        .last_visit()
        .ok_or(RuleViolation::NothingToUndo)?;
    if tail.participant != participant && participant != state.host() {
        return Err(RuleViolation::UndoNotPermitted { participant });
    }
    if expected_seq != state.seq || tail.seq != state.seq {
        return Err(RuleViolation::StaleUndo {
            expected: expected_seq,
            current: state.seq,
        });
    }

    let tail = match state.leg.visits.pop() {
        Some(tail) => tail,
        None => return Err(RuleViolation::NothingToUndo),
    };
    let owner = state
        .index_of(tail.participant)
        .ok_or(RuleViolation::NotParticipant {
            participant: tail.participant,
        })?;

    state.leg.remaining[owner] = tail.remaining_before;
    state.leg.opened[owner] = tail.opened_before;
    state.leg.current_turn = owner;

    Ok(vec![MatchEvent::VisitUndone {
        participant: tail.participant,
        restored_remaining: tail.remaining_before,
    }])
}

fn abandon(state: &mut MatchState) -> Result<Vec<MatchEvent>, RuleViolation> {
    if state.status.is_terminal() {
        return Err(RuleViolation::MatchNotActive {
            status: state.status,
        });
    }
    state.status = MatchStatus::Abandoned;
    state.leg.status = LegStatus::Invalid;
    Ok(vec![MatchEvent::MatchAbandoned])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CheckoutRule, MatchFormat, StartRule};
    use proptest::prelude::*;

    fn started(format: MatchFormat) -> MatchState {
        let lobby = MatchState::create(1, format, vec![1, 2]).unwrap();
        let outcome = apply(&lobby, &Command::Start);
        assert!(outcome.accepted());
        outcome.state
    }

    /// Started match where player 1 is on `target`
    fn with_remaining(format: MatchFormat, target: u32) -> MatchState {
        let mut state = started(format);
        state.leg.remaining[0] = target;
        state
    }

    #[test]
    fn test_start_transitions_lobby_to_active() {
        let lobby = MatchState::create(1, MatchFormat::default(), vec![1, 2]).unwrap();
        let outcome = apply(&lobby, &Command::Start);

        assert!(outcome.accepted());
        assert_eq!(outcome.state.status, MatchStatus::Active);
        assert_eq!(outcome.state.seq, 1);
        assert_eq!(
            outcome.events,
            vec![
                MatchEvent::MatchStarted,
                MatchEvent::LegStarted {
                    set_index: 0,
                    leg_index: 0,
                    starting_participant: 1,
                },
            ]
        );

        let again = apply(&outcome.state, &Command::Start);
        assert!(!again.accepted());
    }

    #[test]
    fn test_visit_in_lobby_rejected() {
        let lobby = MatchState::create(1, MatchFormat::default(), vec![1, 2]).unwrap();
        let outcome = apply_visit(&lobby, 1, &[Throw::triple(20)]);
        assert_eq!(
            outcome.rejection,
            Some(RuleViolation::MatchNotActive {
                status: MatchStatus::Lobby
            })
        );
        assert_eq!(outcome.state, lobby);
    }

    #[test]
    fn test_regular_visit_scores_and_passes_turn() {
        let state = started(MatchFormat::default());
        let outcome = apply_visit(&state, 1, &[Throw::triple(20), Throw::triple(20), Throw::single(20)]);

        assert!(outcome.accepted());
        assert_eq!(outcome.state.remaining_for(1), Some(361));
        assert_eq!(outcome.state.current_participant(), 2);
        assert_eq!(outcome.state.seq, 2);

        let visit = outcome.state.leg.last_visit().unwrap();
        assert_eq!(visit.total, 140);
        assert_eq!(visit.darts_counted, 3);
        assert_eq!(visit.seq, 2);
        assert!(!visit.bust);
        assert!(!visit.checkout);
    }

    #[test]
    fn test_not_your_turn() {
        let state = started(MatchFormat::default());
        let outcome = apply_visit(&state, 2, &[Throw::single(1)]);
        assert_eq!(
            outcome.rejection,
            Some(RuleViolation::NotYourTurn { participant: 2 })
        );
        assert_eq!(outcome.state.seq, state.seq);
    }

    #[test]
    fn test_unknown_participant() {
        let state = started(MatchFormat::default());
        let outcome = apply_visit(&state, 9, &[Throw::single(1)]);
        assert_eq!(
            outcome.rejection,
            Some(RuleViolation::NotParticipant { participant: 9 })
        );
    }

    #[test]
    fn test_throw_count_limits() {
        let state = started(MatchFormat::default());
        assert_eq!(
            apply_visit(&state, 1, &[]).rejection,
            Some(RuleViolation::NoThrows)
        );
        assert_eq!(
            apply_visit(&state, 1, &[Throw::single(1); 4]).rejection,
            Some(RuleViolation::TooManyThrows { count: 4 })
        );
    }

    #[test]
    fn test_invalid_throw_rejected() {
        let state = started(MatchFormat::default());
        let outcome = apply_visit(&state, 1, &[Throw::single(20), Throw::triple(25)]);
        assert_eq!(
            outcome.rejection,
            Some(RuleViolation::InvalidThrow {
                segment: 25,
                multiplier: 3
            })
        );
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn test_bust_over_remaining() {
        let state = with_remaining(MatchFormat::default(), 32);
        let outcome = apply_visit(
            &state,
            1,
            &[Throw::single(20), Throw::single(20), Throw::single(20)],
        );

        assert!(outcome.accepted());
        assert_eq!(outcome.state.remaining_for(1), Some(32));
        assert_eq!(outcome.state.current_participant(), 2);
        let visit = outcome.state.leg.last_visit().unwrap();
        assert!(visit.bust);
        assert_eq!(visit.darts_counted, 2);
    }

    #[test]
    fn test_double_out_checkout_wins_leg() {
        let format = MatchFormat::new(501, 1, 1);
        let state = with_remaining(format, 32);
        let outcome = apply_visit(&state, 1, &[Throw::double(16)]);

        assert!(outcome.accepted());
        assert_eq!(outcome.state.status, MatchStatus::Completed);
        assert_eq!(outcome.state.winner, Some(1));
        assert_eq!(outcome.state.leg.status, LegStatus::Won);
        assert_eq!(outcome.state.leg.remaining[0], 0);
        assert!(outcome.events.contains(&MatchEvent::LegWon {
            participant: 1,
            set_index: 0,
            leg_index: 0
        }));
        assert!(outcome
            .events
            .contains(&MatchEvent::MatchCompleted { winner: 1 }));
    }

    #[test]
    fn test_checkout_with_sets_emits_set_won() {
        let format = MatchFormat::new(501, 1, 2);
        let state = with_remaining(format, 32);
        let outcome = apply_visit(&state, 1, &[Throw::double(16)]);

        assert!(outcome.accepted());
        assert_eq!(outcome.state.status, MatchStatus::Active);
        assert_eq!(outcome.state.set_wins, vec![1, 0]);
        assert_eq!(outcome.state.leg_wins, vec![0, 0]);
        assert_eq!(outcome.state.set_index, 1);

        let kinds: Vec<&MatchEvent> = outcome.events.iter().collect();
        assert!(matches!(kinds[0], MatchEvent::VisitRecorded { .. }));
        assert!(matches!(kinds[1], MatchEvent::LegWon { .. }));
        assert!(matches!(kinds[2], MatchEvent::SetWon { participant: 1, set_index: 0 }));
        assert!(matches!(
            kinds[3],
            MatchEvent::LegStarted {
                set_index: 1,
                leg_index: 0,
                starting_participant: 2
            }
        ));
    }

    #[test]
    fn test_leg_win_deals_next_leg_with_alternating_starter() {
        let format = MatchFormat::new(501, 2, 1);
        let state = with_remaining(format, 40);
        let outcome = apply_visit(&state, 1, &[Throw::double(20)]);

        assert!(outcome.accepted());
        let next = &outcome.state;
        assert_eq!(next.leg_wins, vec![1, 0]);
        assert_eq!(next.leg_index, 1);
        assert_eq!(next.legs_played, 1);
        assert_eq!(next.completed_legs.len(), 1);
        assert_eq!(next.leg.remaining, vec![501, 501]);
        assert_eq!(next.current_participant(), 2);
        assert_eq!(next.leg.status, LegStatus::InProgress);
    }

    #[test]
    fn test_zero_on_single_is_bust_under_double_out() {
        let state = with_remaining(MatchFormat::default(), 20);
        let outcome = apply_visit(&state, 1, &[Throw::single(20)]);
        assert!(outcome.accepted());
        assert_eq!(outcome.state.remaining_for(1), Some(20));
        assert!(outcome.state.leg.last_visit().unwrap().bust);
    }

    #[test]
    fn test_remaining_one_is_bust_under_double_out() {
        let state = with_remaining(MatchFormat::default(), 21);
        let outcome = apply_visit(&state, 1, &[Throw::single(20), Throw::single(1)]);
        let visit = outcome.state.leg.last_visit().unwrap();
        assert!(visit.bust);
        assert_eq!(visit.darts_counted, 1);
        assert_eq!(outcome.state.remaining_for(1), Some(21));
    }

    #[test]
    fn test_simple_out_allows_single_finish_and_one() {
        let format = MatchFormat {
            out_rule: CheckoutRule::Simple,
            legs_to_win: 1,
            ..MatchFormat::default()
        };
        let state = with_remaining(format, 21);
        let outcome = apply_visit(&state, 1, &[Throw::single(20)]);
        assert_eq!(outcome.state.remaining_for(1), Some(1));
        assert!(!outcome.state.leg.last_visit().unwrap().bust);

        let state = with_remaining(format, 20);
        let outcome = apply_visit(&state, 1, &[Throw::single(20)]);
        assert_eq!(outcome.state.status, MatchStatus::Completed);
    }

    #[test]
    fn test_master_out_accepts_triple_finish() {
        let format = MatchFormat {
            out_rule: CheckoutRule::Master,
            legs_to_win: 1,
            ..MatchFormat::default()
        };
        let state = with_remaining(format, 60);
        let outcome = apply_visit(&state, 1, &[Throw::triple(20)]);
        assert_eq!(outcome.state.status, MatchStatus::Completed);
        assert!(outcome.state.leg.last_visit().unwrap().checkout);
    }

    #[test]
    fn test_bullseye_is_a_double_finish() {
        let format = MatchFormat::new(501, 1, 1);
        let state = with_remaining(format, 50);
        let outcome = apply_visit(&state, 1, &[Throw::bullseye()]);
        assert_eq!(outcome.state.status, MatchStatus::Completed);
    }

    #[test]
    fn test_darts_after_checkout_are_recorded_not_scored() {
        let format = MatchFormat::new(501, 2, 1);
        let state = with_remaining(format, 40);
        let outcome = apply_visit(
            &state,
            1,
            &[Throw::double(20), Throw::triple(20), Throw::triple(20)],
        );

        let won_leg = &outcome.state.completed_legs[0];
        let visit = won_leg.last_visit().unwrap();
        assert!(visit.checkout);
        assert_eq!(visit.throws.len(), 3);
        assert_eq!(visit.darts_counted, 1);
        assert_eq!(visit.total, 40);
    }

    #[test]
    fn test_double_in_ignores_darts_before_opening() {
        let format = MatchFormat {
            in_rule: CheckoutRule::Double,
            ..MatchFormat::default()
        };
        let state = started(format);
        let outcome = apply_visit(
            &state,
            1,
            &[Throw::triple(20), Throw::double(10), Throw::single(5)],
        );

        assert_eq!(outcome.state.remaining_for(1), Some(501 - 25));
        assert!(outcome.state.leg.opened[0]);
        assert_eq!(outcome.state.leg.last_visit().unwrap().total, 25);
    }

    #[test]
    fn test_undo_restores_previous_visit() {
        let state = started(MatchFormat::default());
        let after = apply_visit(&state, 1, &[Throw::triple(20)]).state;
        let outcome = apply(
            &after,
            &Command::Undo {
                participant: 1,
                expected_seq: after.seq,
            },
        );

        assert!(outcome.accepted());
        assert_eq!(outcome.state.remaining_for(1), Some(501));
        assert_eq!(outcome.state.current_participant(), 1);
        assert!(outcome.state.leg.visits.is_empty());
        assert_eq!(outcome.state.seq, after.seq + 1);
        assert_eq!(
            outcome.events,
            vec![MatchEvent::VisitUndone {
                participant: 1,
                restored_remaining: 501
            }]
        );
    }

    #[test]
    fn test_undo_rules() {
        let state = started(MatchFormat::default());
        assert_eq!(
            apply(
                &state,
                &Command::Undo {
                    participant: 1,
                    expected_seq: state.seq
                }
            )
            .rejection,
            Some(RuleViolation::NothingToUndo)
        );

        let after = apply_visit(&state, 1, &[Throw::triple(20)]).state;

        // Stale client view
        assert_eq!(
            apply(
                &after,
                &Command::Undo {
                    participant: 1,
                    expected_seq: after.seq - 1
                }
            )
            .rejection,
            Some(RuleViolation::StaleUndo {
                expected: after.seq - 1,
                current: after.seq
            })
        );

        // Participant 2 is neither owner nor host
        assert_eq!(
            apply(
                &after,
                &Command::Undo {
                    participant: 2,
                    expected_seq: after.seq
                }
            )
            .rejection,
            Some(RuleViolation::UndoNotPermitted { participant: 2 })
        );

        let after_two = apply_visit(&after, 2, &[Throw::single(5)]).state;

        // Host may undo another participant's visit
        assert!(apply(
            &after_two,
            &Command::Undo {
                participant: 1,
                expected_seq: after_two.seq
            }
        )
        .accepted());
    }

    #[test]
    fn test_undo_after_newer_event_is_stale() {
        let state = started(MatchFormat::default());
        let after = apply_visit(&state, 1, &[Throw::triple(20)]).state;
        let undone = apply(
            &after,
            &Command::Undo {
                participant: 1,
                expected_seq: after.seq,
            },
        )
        .state;
        let replayed = apply_visit(&undone, 1, &[Throw::single(1)]).state;
        let again = apply_visit(&replayed, 2, &[Throw::single(1)]).state;

        // Tail is participant 2's visit; a stale undo aimed at the older seq fails
        let outcome = apply(
            &again,
            &Command::Undo {
                participant: 2,
                expected_seq: replayed.seq,
            },
        );
        assert!(matches!(
            outcome.rejection,
            Some(RuleViolation::StaleUndo { .. })
        ));
    }

    #[test]
    fn test_abandon() {
        let state = started(MatchFormat::default());
        let outcome = apply(&state, &Command::Abandon);
        assert!(outcome.accepted());
        assert_eq!(outcome.state.status, MatchStatus::Abandoned);
        assert_eq!(outcome.state.leg.status, LegStatus::Invalid);
        assert_eq!(outcome.events, vec![MatchEvent::MatchAbandoned]);

        assert!(!apply(&outcome.state, &Command::Abandon).accepted());
        assert!(!apply_visit(&outcome.state, 1, &[Throw::single(1)]).accepted());
    }

    #[test]
    fn test_random_start_rule_applies_to_first_leg() {
        let format = MatchFormat {
            start_rule: StartRule::Random { seed: 9 },
            ..MatchFormat::default()
        };
        let a = MatchState::create(1, format, vec![1, 2, 3]).unwrap();
        let b = MatchState::create(1, format, vec![1, 2, 3]).unwrap();
        assert_eq!(a.leg.starting_player, b.leg.starting_player);
    }

    fn arb_throw() -> impl Strategy<Value = Throw> {
        prop_oneof![
            (1u8..=20, 1u8..=3).prop_map(|(s, m)| Throw::new(s, m)),
            (1u8..=2).prop_map(|m| Throw::new(25, m)),
            Just(Throw::miss()),
        ]
    }

    proptest! {
        #[test]
        fn prop_double_out_legs_end_on_a_double(
            visits in proptest::collection::vec(proptest::collection::vec(arb_throw(), 1..=3), 1..200)
        ) {
            let mut state = started(MatchFormat::new(101, 3, 1));
            for throws in visits {
                let current = state.current_participant();
                let outcome = apply_visit(&state, current, &throws);
                prop_assert!(outcome.accepted());
                state = outcome.state;
                if state.status.is_terminal() {
                    break;
                }
            }

            for leg in state.legs() {
                for visit in leg.visits.iter().filter(|v| v.checkout) {
                    let last = visit.throws[visit.darts_counted as usize - 1];
                    prop_assert_eq!(last.multiplier, 2);
                }
                if leg.status == LegStatus::Won {
                    prop_assert!(leg.last_visit().map(|v| v.checkout).unwrap_or(false));
                }
            }
        }

        #[test]
        fn prop_engine_is_deterministic(
            visits in proptest::collection::vec(proptest::collection::vec(arb_throw(), 1..=3), 1..60)
        ) {
            let mut a = started(MatchFormat::new(170, 2, 2));
            let mut b = a.clone();
            for throws in visits {
                let current = a.current_participant();
                let left = apply_visit(&a, current, &throws);
                let right = apply_visit(&b, current, &throws);
                prop_assert_eq!(&left, &right);
                a = left.state;
                b = right.state;
            }
        }

        #[test]
        fn prop_remaining_never_negative_and_seq_advances_by_one(
            visits in proptest::collection::vec(proptest::collection::vec(arb_throw(), 1..=3), 1..100)
        ) {
            let mut state = started(MatchFormat::new(301, 2, 1));
            for throws in visits {
                if state.status.is_terminal() {
                    break;
                }
                let current = state.current_participant();
                let outcome = apply_visit(&state, current, &throws);
                prop_assert_eq!(outcome.state.seq, state.seq + 1);
                prop_assert!(outcome.state.leg.remaining.iter().all(|r| *r <= 301));
                state = outcome.state;
            }
        }
    }
}
