//! Per-match authority
//!
//! [`MatchSession`] is the single writer for one match: every command passes
//! through the scoring engine here, accepted ones advance the canonical
//! state and are broadcast as diffs, rejected ones go back to the submitter
//! only. [`spawn_match`] runs a session inside its own tokio task, fed by a
//! bounded command queue, so matches progress concurrently without sharing
//! any state.

use crate::config::{MatchConfig, SpectatorPolicy};
use crate::network::{GameMessage, ServerMessage};
use log::{debug, info, warn};
use shared::history::MatchHistory;
use shared::{
    apply, ClientSeq, Command, DiffOrigin, Envelope, JoinError, MatchId, MatchState, MatchStatus,
    Packet, ParticipantId, Seq, Throw,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;

/// One outbound envelope and where it goes
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub addr: SocketAddr,
    pub envelope: Envelope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Player,
    Spectator,
}

#[derive(Debug, Clone)]
struct SessionSlot {
    addr: SocketAddr,
    connected: bool,
    /// Highest seq the client reported applying
    acked_seq: Seq,
    role: Role,
}

/// Replies already produced for recent client sequence numbers
///
/// A retry only counts as a duplicate when it carries the same command as
/// the original submission.
#[derive(Debug, Default)]
struct DedupeLog {
    order: VecDeque<ClientSeq>,
    replies: HashMap<ClientSeq, (Command, Vec<Envelope>)>,
    /// Survives eviction so snapshots can hand out a safe floor
    highest: ClientSeq,
}

impl DedupeLog {
    fn get(&self, client_seq: ClientSeq, command: &Command) -> Option<&Vec<Envelope>> {
        self.replies
            .get(&client_seq)
            .filter(|(seen, _)| seen == command)
            .map(|(_, replies)| replies)
    }

    fn reused(&self, client_seq: ClientSeq, command: &Command) -> bool {
        self.replies
            .get(&client_seq)
            .map_or(false, |(seen, _)| seen != command)
    }

    fn next_client_seq(&self) -> ClientSeq {
        self.highest.saturating_add(1)
    }

    fn remember(
        &mut self,
        client_seq: ClientSeq,
        command: Command,
        replies: Vec<Envelope>,
        window: usize,
    ) {
        self.highest = self.highest.max(client_seq);
        if self.replies.insert(client_seq, (command, replies)).is_none() {
            self.order.push_back(client_seq);
        }
        while self.order.len() > window {
            if let Some(oldest) = self.order.pop_front() {
                self.replies.remove(&oldest);
            }
        }
    }
}

/// Result of a housekeeping pass
#[derive(Debug, Default)]
pub struct Tick {
    pub deliveries: Vec<Delivery>,
    /// The match is terminal and idle; its actor should stop
    pub finished: bool,
}

pub struct MatchSession {
    state: MatchState,
    history: MatchHistory,
    sessions: HashMap<ParticipantId, SessionSlot>,
    joined_once: HashSet<ParticipantId>,
    dedupe: HashMap<ParticipantId, DedupeLog>,
    config: MatchConfig,
    /// Set while nobody is connected
    idle_since: Option<Instant>,
    archived: bool,
}

impl MatchSession {
    pub fn new(state: MatchState, config: MatchConfig) -> Self {
        Self {
            history: MatchHistory::new(&state),
            state,
            sessions: HashMap::new(),
            joined_once: HashSet::new(),
            dedupe: HashMap::new(),
            config,
            idle_since: Some(Instant::now()),
            archived: false,
        }
    }

    pub fn id(&self) -> MatchId {
        self.state.id
    }

    pub fn state(&self) -> &MatchState {
        &self.state
    }

    pub fn history(&self) -> &MatchHistory {
        &self.history
    }

    pub fn connected_count(&self) -> usize {
        self.sessions.values().filter(|s| s.connected).count()
    }

    pub fn acked_seq(&self, participant: ParticipantId) -> Option<Seq> {
        self.sessions.get(&participant).map(|s| s.acked_seq)
    }

    /// Connects (or reconnects) a session and hands it a full snapshot
    ///
    /// Once every roster participant has joined at least once the match is
    /// started and the resulting diff follows the snapshot.
    pub fn join(
        &mut self,
        participant: ParticipantId,
        addr: SocketAddr,
    ) -> Result<Vec<Delivery>, JoinError> {
        let role = if self.state.is_participant(participant) {
            Role::Player
        } else {
            match self.config.spectators {
                SpectatorPolicy::Disabled => {
                    return Err(JoinError::NotParticipant { participant })
                }
                SpectatorPolicy::LobbyOnly if self.state.status != MatchStatus::Lobby => {
                    return Err(JoinError::AlreadyStarted)
                }
                SpectatorPolicy::LobbyOnly | SpectatorPolicy::Always => Role::Spectator,
            }
        };

        let rejoin = self.sessions.contains_key(&participant);
        self.sessions.insert(
            participant,
            SessionSlot {
                addr,
                connected: true,
                acked_seq: self.state.seq,
                role,
            },
        );
        self.idle_since = None;
        info!(
            "Match {}: {} {} as {:?} from {}",
            self.id(),
            participant,
            if rejoin { "reconnected" } else { "joined" },
            role,
            addr
        );

        let mut deliveries = vec![self.snapshot_for(participant, addr)];

        if role == Role::Player {
            self.joined_once.insert(participant);
            if self.state.status == MatchStatus::Lobby
                && self.joined_once.len() == self.state.participants.len()
            {
                let outcome = apply(&self.state, &Command::Start);
                if outcome.accepted() {
                    let envelopes = self.commit(Command::Start, outcome.state, outcome.events, None);
                    deliveries.extend(self.broadcast(&envelopes));
                }
            }
        }

        Ok(deliveries)
    }

    pub fn submit_visit(
        &mut self,
        participant: ParticipantId,
        throws: Vec<Throw>,
        client_seq: ClientSeq,
    ) -> Vec<Delivery> {
        self.submit(
            participant,
            client_seq,
            Command::Visit {
                participant,
                throws,
            },
        )
    }

    pub fn undo(
        &mut self,
        participant: ParticipantId,
        expected_seq: Seq,
        client_seq: ClientSeq,
    ) -> Vec<Delivery> {
        self.submit(
            participant,
            client_seq,
            Command::Undo {
                participant,
                expected_seq,
            },
        )
    }

    fn submit(
        &mut self,
        participant: ParticipantId,
        client_seq: ClientSeq,
        command: Command,
    ) -> Vec<Delivery> {
        let submitter = self.connected_addr(participant);

        let log = self.dedupe.get(&participant);
        if log.map_or(false, |log| log.reused(client_seq, &command)) {
            warn!(
                "Match {}: {} reused client_seq {} for a different command, applying it",
                self.id(),
                participant,
                client_seq
            );
        }
        if let Some(prior) = log.and_then(|log| log.get(client_seq, &command)) {
            debug!(
                "Match {}: duplicate client_seq {} from {}, resending prior outcome",
                self.id(),
                client_seq,
                participant
            );
            return match submitter {
                Some(addr) => prior
                    .iter()
                    .map(|envelope| Delivery {
                        addr,
                        envelope: envelope.clone(),
                    })
                    .collect(),
                None => Vec::new(),
            };
        }

        let outcome = apply(&self.state, &command);
        let (replies, deliveries) = match outcome.rejection {
            None => {
                let origin = DiffOrigin {
                    participant,
                    client_seq,
                };
                let envelopes =
                    self.commit(command.clone(), outcome.state, outcome.events, Some(origin));
                let deliveries = self.broadcast(&envelopes);
                (envelopes, deliveries)
            }
            Some(reason) => {
                warn!(
                    "Match {}: rejected {} from {}: {}",
                    self.id(),
                    client_seq,
                    participant,
                    reason
                );
                let envelope = Envelope::new(self.id(), Packet::Rejected { client_seq, reason });
                let deliveries = submitter
                    .map(|addr| Delivery {
                        addr,
                        envelope: envelope.clone(),
                    })
                    .into_iter()
                    .collect();
                (vec![envelope], deliveries)
            }
        };

        self.dedupe.entry(participant).or_default().remember(
            client_seq,
            command,
            replies,
            self.config.dedupe_window,
        );
        deliveries
    }

    /// Marks a session disconnected; the match itself is untouched
    pub fn disconnect(&mut self, participant: ParticipantId, now: Instant) {
        if let Some(slot) = self.sessions.get_mut(&participant) {
            if slot.connected {
                slot.connected = false;
                info!("Match {}: {} disconnected", self.state.id, participant);
            }
        }
        if self.connected_count() == 0 && self.idle_since.is_none() {
            self.idle_since = Some(now);
        }
    }

    pub fn resync(&self, participant: ParticipantId) -> Vec<Delivery> {
        self.connected_addr(participant)
            .map(|addr| self.snapshot_for(participant, addr))
            .into_iter()
            .collect()
    }

    pub fn heartbeat(
        &mut self,
        participant: ParticipantId,
        timestamp: u64,
        last_seq: Seq,
    ) -> Vec<Delivery> {
        let seq = self.state.seq;
        let id = self.state.id;
        match self.sessions.get_mut(&participant) {
            Some(slot) if slot.connected => {
                slot.acked_seq = slot.acked_seq.max(last_seq.min(seq));
                vec![Delivery {
                    addr: slot.addr,
                    envelope: Envelope::new(id, Packet::HeartbeatAck { timestamp, seq }),
                }]
            }
            _ => Vec::new(),
        }
    }

    /// Abandons a live match nobody has been connected to for the grace
    /// period, and reports when an idle terminal match may shut down
    pub fn tick(&mut self, now: Instant) -> Tick {
        let idle_for = match self.idle_since {
            Some(since) => now.saturating_duration_since(since),
            None => return Tick::default(),
        };
        if idle_for < self.config.abandon_grace {
            return Tick::default();
        }

        let mut tick = Tick::default();
        if !self.state.status.is_terminal() {
            info!(
                "Match {}: nobody connected for {:?}, abandoning",
                self.id(),
                idle_for
            );
            let outcome = apply(&self.state, &Command::Abandon);
            if outcome.accepted() {
                let envelopes = self.commit(Command::Abandon, outcome.state, outcome.events, None);
                tick.deliveries = self.broadcast(&envelopes);
            }
        }
        tick.finished = self.state.status.is_terminal();
        tick
    }

    /// Hands out the history once, after the match has ended
    pub fn take_archive(&mut self) -> Option<MatchHistory> {
        if self.archived || !self.state.status.is_terminal() {
            return None;
        }
        self.archived = true;
        Some(self.history.clone())
    }

    /// Installs an accepted transition and builds its broadcast envelopes
    fn commit(
        &mut self,
        command: Command,
        next: MatchState,
        events: Vec<shared::MatchEvent>,
        origin: Option<DiffOrigin>,
    ) -> Vec<Envelope> {
        self.state = next;
        self.history.record(self.state.seq, command.clone());
        debug!("Match {}: seq {} {:?}", self.id(), self.state.seq, events);

        let mut envelopes = vec![Envelope::new(
            self.id(),
            Packet::Diff {
                seq: self.state.seq,
                command,
                events,
                origin,
            },
        )];
        if self.state.status == MatchStatus::Completed {
            info!("Match {}: completed, winner {:?}", self.id(), self.state.winner);
            envelopes.push(Envelope::new(
                self.id(),
                Packet::MatchCompleted {
                    final_state: self.state.clone(),
                },
            ));
        }
        envelopes
    }

    fn broadcast(&self, envelopes: &[Envelope]) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        for slot in self.sessions.values().filter(|s| s.connected) {
            for envelope in envelopes {
                deliveries.push(Delivery {
                    addr: slot.addr,
                    envelope: envelope.clone(),
                });
            }
        }
        deliveries
    }

    /// Snapshot for one session, carrying the client_seq floor so a
    /// restarted client cannot collide with its earlier submissions
    fn snapshot_for(&self, participant: ParticipantId, addr: SocketAddr) -> Delivery {
        let next_client_seq = self
            .dedupe
            .get(&participant)
            .map_or(1, DedupeLog::next_client_seq);
        Delivery {
            addr,
            envelope: Envelope::new(
                self.id(),
                Packet::Snapshot {
                    state: self.state.clone(),
                    seq: self.state.seq,
                    next_client_seq,
                },
            ),
        }
    }

    fn connected_addr(&self, participant: ParticipantId) -> Option<SocketAddr> {
        self.sessions
            .get(&participant)
            .filter(|s| s.connected)
            .map(|s| s.addr)
    }
}

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("match {0} is no longer running")]
    Unavailable(MatchId),
    #[error("match {0} command queue is full")]
    Busy(MatchId),
    #[error(transparent)]
    Join(#[from] JoinError),
}

/// Requests the routing layer forwards to a match actor
#[derive(Debug)]
pub enum MatchCommand {
    Join {
        participant: ParticipantId,
        addr: SocketAddr,
        reply: oneshot::Sender<Result<(), JoinError>>,
    },
    SubmitVisit {
        participant: ParticipantId,
        throws: Vec<Throw>,
        client_seq: ClientSeq,
    },
    Undo {
        participant: ParticipantId,
        expected_seq: Seq,
        client_seq: ClientSeq,
    },
    RequestSnapshot {
        participant: ParticipantId,
    },
    Heartbeat {
        participant: ParticipantId,
        timestamp: u64,
        last_seq: Seq,
    },
    Disconnect {
        participant: ParticipantId,
    },
    Inspect {
        reply: oneshot::Sender<MatchState>,
    },
}

/// Cheap, cloneable sender side of a running match actor
#[derive(Debug, Clone)]
pub struct MatchHandle {
    match_id: MatchId,
    sender: mpsc::Sender<MatchCommand>,
}

impl MatchHandle {
    pub fn match_id(&self) -> MatchId {
        self.match_id
    }

    pub async fn join(
        &self,
        participant: ParticipantId,
        addr: SocketAddr,
    ) -> Result<(), MatchError> {
        let (reply, reply_rx) = oneshot::channel();
        self.sender
            .send(MatchCommand::Join {
                participant,
                addr,
                reply,
            })
            .await
            .map_err(|_| MatchError::Unavailable(self.match_id))?;
        reply_rx
            .await
            .map_err(|_| MatchError::Unavailable(self.match_id))?
            .map_err(MatchError::from)
    }

    /// Queues a command without waiting; a full queue drops it
    pub fn send(&self, command: MatchCommand) -> Result<(), MatchError> {
        self.sender.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => MatchError::Busy(self.match_id),
            mpsc::error::TrySendError::Closed(_) => MatchError::Unavailable(self.match_id),
        })
    }

    pub async fn inspect(&self) -> Result<MatchState, MatchError> {
        let (reply, reply_rx) = oneshot::channel();
        self.sender
            .send(MatchCommand::Inspect { reply })
            .await
            .map_err(|_| MatchError::Unavailable(self.match_id))?;
        reply_rx
            .await
            .map_err(|_| MatchError::Unavailable(self.match_id))
    }
}

/// Starts the actor task for one match
pub fn spawn_match(
    session: MatchSession,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
) -> MatchHandle {
    let match_id = session.id();
    let (sender, receiver) = mpsc::channel(session.config.queue_capacity.max(1));

    let actor = MatchActor {
        session,
        receiver,
        game_tx,
        server_tx,
    };
    tokio::spawn(actor.run());

    MatchHandle { match_id, sender }
}

struct MatchActor {
    session: MatchSession,
    receiver: mpsc::Receiver<MatchCommand>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
}

impl MatchActor {
    async fn run(mut self) {
        let match_id = self.session.id();
        info!("Match {} actor started", match_id);

        let housekeeping_every = self
            .session
            .config
            .housekeeping_interval
            .max(Duration::from_millis(1));
        let mut housekeeping = interval(housekeeping_every);

        loop {
            tokio::select! {
                command = self.receiver.recv() => {
                    match command {
                        Some(command) => self.handle(command),
                        None => break,
                    }
                }
                _ = housekeeping.tick() => {
                    let tick = self.session.tick(Instant::now());
                    self.deliver(tick.deliveries);
                    if tick.finished {
                        self.archive();
                        break;
                    }
                }
            }
            self.archive();
        }

        info!("Match {} actor stopped", match_id);
        let _ = self.server_tx.send(ServerMessage::MatchClosed { match_id });
    }

    fn handle(&mut self, command: MatchCommand) {
        let deliveries = match command {
            MatchCommand::Join {
                participant,
                addr,
                reply,
            } => match self.session.join(participant, addr) {
                Ok(deliveries) => {
                    let _ = reply.send(Ok(()));
                    deliveries
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                    Vec::new()
                }
            },
            MatchCommand::SubmitVisit {
                participant,
                throws,
                client_seq,
            } => self.session.submit_visit(participant, throws, client_seq),
            MatchCommand::Undo {
                participant,
                expected_seq,
                client_seq,
            } => self.session.undo(participant, expected_seq, client_seq),
            MatchCommand::RequestSnapshot { participant } => self.session.resync(participant),
            MatchCommand::Heartbeat {
                participant,
                timestamp,
                last_seq,
            } => self.session.heartbeat(participant, timestamp, last_seq),
            MatchCommand::Disconnect { participant } => {
                self.session.disconnect(participant, Instant::now());
                Vec::new()
            }
            MatchCommand::Inspect { reply } => {
                let _ = reply.send(self.session.state().clone());
                Vec::new()
            }
        };
        self.deliver(deliveries);
    }

    fn deliver(&self, deliveries: Vec<Delivery>) {
        for Delivery { addr, envelope } in deliveries {
            if let Err(e) = self.game_tx.send(GameMessage::SendPacket { envelope, addr }) {
                warn!("Failed to queue packet for {}: {}", addr, e);
            }
        }
    }

    fn archive(&mut self) {
        if let Some(history) = self.session.take_archive() {
            let match_id = self.session.id();
            if let Err(e) = self
                .server_tx
                .send(ServerMessage::MatchArchived { match_id, history })
            {
                warn!("Failed to hand match {} to the archive: {}", match_id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{MatchEvent, MatchFormat, RuleViolation};

    const P1: ParticipantId = 1;
    const P2: ParticipantId = 2;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn session_with(format: MatchFormat, config: MatchConfig) -> MatchSession {
        MatchSession::new(MatchState::create(5, format, vec![P1, P2]).unwrap(), config)
    }

    fn started_session() -> MatchSession {
        let mut session = session_with(MatchFormat::default(), MatchConfig::default());
        session.join(P1, addr(1001)).unwrap();
        session.join(P2, addr(1002)).unwrap();
        assert_eq!(session.state().status, MatchStatus::Active);
        session
    }

    fn packets_for(deliveries: &[Delivery], to: SocketAddr) -> Vec<&Packet> {
        deliveries
            .iter()
            .filter(|d| d.addr == to)
            .map(|d| &d.envelope.packet)
            .collect()
    }

    #[test]
    fn test_join_sends_snapshot_and_starts_when_roster_complete() {
        let mut session = session_with(MatchFormat::default(), MatchConfig::default());

        let first = session.join(P1, addr(1001)).unwrap();
        assert_eq!(first.len(), 1);
        assert!(matches!(
            first[0].envelope.packet,
            Packet::Snapshot { seq: 0, .. }
        ));
        assert_eq!(session.state().status, MatchStatus::Lobby);

        let second = session.join(P2, addr(1002)).unwrap();
        assert!(matches!(
            packets_for(&second, addr(1002))[0],
            Packet::Snapshot { seq: 0, .. }
        ));
        // Start diff goes to both connected sessions
        for to in [addr(1001), addr(1002)] {
            assert!(packets_for(&second, to).iter().any(|p| matches!(
                p,
                Packet::Diff {
                    seq: 1,
                    command: Command::Start,
                    origin: None,
                    ..
                }
            )));
        }
        assert_eq!(session.state().status, MatchStatus::Active);
        assert_eq!(session.history().len(), 1);
    }

    #[test]
    fn test_non_participant_rejected_without_spectators() {
        let mut session = session_with(MatchFormat::default(), MatchConfig::default());
        assert_eq!(
            session.join(99, addr(1099)),
            Err(JoinError::NotParticipant { participant: 99 })
        );
        assert_eq!(session.connected_count(), 0);
    }

    #[test]
    fn test_spectator_policies() {
        let lobby_only = MatchConfig {
            spectators: SpectatorPolicy::LobbyOnly,
            ..MatchConfig::default()
        };
        let mut session = session_with(MatchFormat::default(), lobby_only);
        assert!(session.join(99, addr(1099)).is_ok());
        session.join(P1, addr(1001)).unwrap();
        session.join(P2, addr(1002)).unwrap();
        assert_eq!(session.join(98, addr(1098)), Err(JoinError::AlreadyStarted));

        let always = MatchConfig {
            spectators: SpectatorPolicy::Always,
            ..MatchConfig::default()
        };
        let mut session = session_with(MatchFormat::default(), always);
        session.join(P1, addr(1001)).unwrap();
        session.join(P2, addr(1002)).unwrap();
        assert!(session.join(98, addr(1098)).is_ok());

        // Spectators see diffs but cannot play
        let deliveries = session.submit_visit(P1, vec![Throw::triple(20)], 1);
        assert_eq!(packets_for(&deliveries, addr(1098)).len(), 1);
        let deliveries = session.submit_visit(98, vec![Throw::single(1)], 1);
        assert!(matches!(
            packets_for(&deliveries, addr(1098))[0],
            Packet::Rejected {
                reason: RuleViolation::NotParticipant { participant: 98 },
                ..
            }
        ));
    }

    #[test]
    fn test_spectators_do_not_count_towards_start() {
        let config = MatchConfig {
            spectators: SpectatorPolicy::Always,
            ..MatchConfig::default()
        };
        let mut session = session_with(MatchFormat::default(), config);
        session.join(99, addr(1099)).unwrap();
        session.join(P1, addr(1001)).unwrap();
        assert_eq!(session.state().status, MatchStatus::Lobby);
    }

    #[test]
    fn test_accepted_visit_broadcasts_diff_with_origin() {
        let mut session = started_session();
        let deliveries = session.submit_visit(P1, vec![Throw::triple(20); 3], 7);

        assert_eq!(deliveries.len(), 2);
        for to in [addr(1001), addr(1002)] {
            match packets_for(&deliveries, to)[0] {
                Packet::Diff {
                    seq, events, origin, ..
                } => {
                    assert_eq!(*seq, 2);
                    assert_eq!(
                        *origin,
                        Some(DiffOrigin {
                            participant: P1,
                            client_seq: 7
                        })
                    );
                    assert!(matches!(
                        events[0],
                        MatchEvent::VisitRecorded { remaining: 321, .. }
                    ));
                }
                other => panic!("Expected diff, got {:?}", other),
            }
        }
        assert_eq!(session.state().remaining_for(P1), Some(321));
    }

    #[test]
    fn test_rejection_goes_to_submitter_only() {
        let mut session = started_session();
        let deliveries = session.submit_visit(P2, vec![Throw::single(20)], 1);

        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].addr, addr(1002));
        assert_eq!(
            deliveries[0].envelope.packet,
            Packet::Rejected {
                client_seq: 1,
                reason: RuleViolation::NotYourTurn { participant: P2 },
            }
        );
        assert_eq!(session.state().seq, 1);
    }

    #[test]
    fn test_duplicate_client_seq_is_idempotent() {
        let mut session = started_session();
        let first = session.submit_visit(P1, vec![Throw::single(20)], 3);
        let seq_after = session.state().seq;

        let again = session.submit_visit(P1, vec![Throw::single(20)], 3);
        assert_eq!(session.state().seq, seq_after);
        assert_eq!(session.history().len(), 2);
        // The retry gets the same diff back, to the submitter only
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].addr, addr(1001));
        assert_eq!(again[0].envelope, first[0].envelope);

        let rejected = session.submit_visit(P1, vec![Throw::single(20)], 4);
        let rejected_again = session.submit_visit(P1, vec![Throw::single(20)], 4);
        assert_eq!(rejected, rejected_again);
    }

    #[test]
    fn test_dedupe_window_forgets_old_client_seqs() {
        let config = MatchConfig {
            dedupe_window: 2,
            ..MatchConfig::default()
        };
        let mut session = session_with(MatchFormat::default(), config);
        session.join(P1, addr(1001)).unwrap();
        session.join(P2, addr(1002)).unwrap();

        // Three rejections from P2 push client_seq 1 out of the window
        for client_seq in 1..=3 {
            session.submit_visit(P2, vec![Throw::single(1)], client_seq);
        }
        let sent = Command::Visit {
            participant: P2,
            throws: vec![Throw::single(1)],
        };
        let log = &session.dedupe[&P2];
        assert!(log.get(1, &sent).is_none());
        assert!(log.get(3, &sent).is_some());
        assert_eq!(log.order.len(), 2);
        // Eviction keeps the floor handed out in snapshots
        assert_eq!(log.next_client_seq(), 4);
    }

    #[test]
    fn test_reused_client_seq_with_new_throws_is_applied() {
        let mut session = started_session();
        session.submit_visit(P1, vec![Throw::single(20)], 1);
        session.submit_visit(P2, vec![Throw::single(20)], 1);
        assert_eq!(session.state().seq, 3);

        // A restarted client rejoins and starts counting from 1 again
        session.disconnect(P1, Instant::now());
        let rejoined = session.join(P1, addr(2001)).unwrap();
        assert!(matches!(
            rejoined[0].envelope.packet,
            Packet::Snapshot {
                next_client_seq: 2,
                ..
            }
        ));

        let deliveries = session.submit_visit(P1, vec![Throw::triple(20)], 1);
        assert_eq!(session.state().seq, 4);
        assert_eq!(session.state().remaining_for(P1), Some(421));
        assert!(matches!(
            packets_for(&deliveries, addr(2001))[0],
            Packet::Diff { seq: 4, .. }
        ));

        // Retrying the new submission is still a duplicate
        let again = session.submit_visit(P1, vec![Throw::triple(20)], 1);
        assert_eq!(session.state().seq, 4);
        assert!(matches!(again[0].envelope.packet, Packet::Diff { seq: 4, .. }));
    }

    #[test]
    fn test_undo_checks_expected_seq() {
        let mut session = started_session();
        session.submit_visit(P1, vec![Throw::single(20)], 1);
        assert_eq!(session.state().seq, 2);

        let stale = session.undo(P1, 1, 2);
        assert!(matches!(
            packets_for(&stale, addr(1001))[0],
            Packet::Rejected {
                reason: RuleViolation::StaleUndo {
                    expected: 1,
                    current: 2
                },
                ..
            }
        ));

        let undone = session.undo(P1, 2, 3);
        assert_eq!(undone.len(), 2);
        assert_eq!(session.state().seq, 3);
        assert_eq!(session.state().remaining_for(P1), Some(501));
        assert_eq!(session.state().current_participant(), P1);
    }

    #[test]
    fn test_reconnect_after_seq_10_gets_snapshot() {
        let mut session = started_session();
        let mut client_seq = 0;
        while session.state().seq < 10 {
            client_seq += 1;
            let current = session.state().current_participant();
            session.submit_visit(current, vec![Throw::single(1)], client_seq);
        }

        session.disconnect(P2, Instant::now());
        assert_eq!(session.connected_count(), 1);
        let seq_before = session.state().seq;

        let deliveries = session.join(P2, addr(2002)).unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].addr, addr(2002));
        match &deliveries[0].envelope.packet {
            Packet::Snapshot {
                state,
                seq,
                next_client_seq,
            } => {
                assert_eq!(*seq, 10);
                assert_eq!(state, session.state());
                // P2 used the even client_seqs up to 8
                assert_eq!(*next_client_seq, 9);
            }
            other => panic!("Expected snapshot, got {:?}", other),
        }
        assert_eq!(session.state().seq, seq_before);
    }

    #[test]
    fn test_disconnect_does_not_touch_match() {
        let mut session = started_session();
        let before = session.state().clone();
        session.disconnect(P1, Instant::now());

        assert_eq!(session.state(), &before);
        assert_eq!(session.connected_count(), 1);
    }

    #[test]
    fn test_heartbeat_acks_current_seq() {
        let mut session = started_session();
        let deliveries = session.heartbeat(P1, 1234, 1);

        assert_eq!(
            deliveries[0].envelope.packet,
            Packet::HeartbeatAck {
                timestamp: 1234,
                seq: 1
            }
        );
        assert_eq!(session.acked_seq(P1), Some(1));
        assert!(session.heartbeat(42, 0, 0).is_empty());
    }

    #[test]
    fn test_idle_match_is_abandoned_after_grace() {
        let mut session = started_session();
        let now = Instant::now();
        session.disconnect(P1, now);
        session.disconnect(P2, now);

        let early = session.tick(now + Duration::from_secs(10));
        assert!(!early.finished);
        assert_eq!(session.state().status, MatchStatus::Active);

        let late = session.tick(now + Duration::from_secs(301));
        assert!(late.finished);
        assert_eq!(session.state().status, MatchStatus::Abandoned);
        assert_eq!(
            session.history().entries.last().map(|e| &e.command),
            Some(&Command::Abandon)
        );

        let history = session.take_archive().unwrap();
        assert_eq!(history.replay().unwrap(), *session.state());
        assert!(session.take_archive().is_none());
    }

    #[test]
    fn test_connected_match_is_never_abandoned() {
        let mut session = started_session();
        let tick = session.tick(Instant::now() + Duration::from_secs(3600));
        assert!(!tick.finished);
        assert_eq!(session.state().status, MatchStatus::Active);
    }

    #[test]
    fn test_completion_broadcasts_final_state() {
        let mut session = session_with(MatchFormat::new(40, 1, 1), MatchConfig::default());
        session.join(P1, addr(1001)).unwrap();
        session.join(P2, addr(1002)).unwrap();

        let deliveries = session.submit_visit(P1, vec![Throw::double(20)], 1);
        for to in [addr(1001), addr(1002)] {
            let packets = packets_for(&deliveries, to);
            assert_eq!(packets.len(), 2);
            assert!(matches!(packets[1], Packet::MatchCompleted { .. }));
        }
        assert!(session.take_archive().is_some());
    }

    #[tokio::test]
    async fn test_actor_routes_deliveries_and_answers_inspect() {
        let (game_tx, mut game_rx) = mpsc::unbounded_channel();
        let (server_tx, _server_rx) = mpsc::unbounded_channel();
        let session = session_with(MatchFormat::default(), MatchConfig::default());
        let handle = spawn_match(session, game_tx, server_tx);

        handle.join(P1, addr(1001)).await.unwrap();
        handle.join(P2, addr(1002)).await.unwrap();
        let err = handle.join(77, addr(1077)).await.unwrap_err();
        assert!(matches!(
            err,
            MatchError::Join(JoinError::NotParticipant { participant: 77 })
        ));

        handle
            .send(MatchCommand::SubmitVisit {
                participant: P1,
                throws: vec![Throw::triple(20)],
                client_seq: 1,
            })
            .unwrap();

        let state = handle.inspect().await.unwrap();
        assert_eq!(state.seq, 2);
        assert_eq!(state.remaining_for(P1), Some(441));

        // Two snapshots, the start diff twice, the visit diff twice
        let mut received = 0;
        while let Ok(GameMessage::SendPacket { .. }) = game_rx.try_recv() {
            received += 1;
        }
        assert_eq!(received, 6);
    }

    #[tokio::test]
    async fn test_actor_archives_and_closes_abandoned_match() {
        let (game_tx, _game_rx) = mpsc::unbounded_channel();
        let (server_tx, mut server_rx) = mpsc::unbounded_channel();
        let config = MatchConfig {
            abandon_grace: Duration::from_millis(20),
            housekeeping_interval: Duration::from_millis(5),
            ..MatchConfig::default()
        };
        let handle = spawn_match(
            session_with(MatchFormat::default(), config),
            game_tx,
            server_tx,
        );

        match server_rx.recv().await {
            Some(ServerMessage::MatchArchived { match_id, history }) => {
                assert_eq!(match_id, 5);
                assert_eq!(
                    history.entries.last().map(|e| &e.command),
                    Some(&Command::Abandon)
                );
            }
            other => panic!("Expected archive, got {:?}", other),
        }
        assert!(matches!(
            server_rx.recv().await,
            Some(ServerMessage::MatchClosed { match_id: 5 })
        ));
        assert!(handle.inspect().await.is_err());
    }
}
