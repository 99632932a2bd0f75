use crate::game::{scoreboard, ClientMatchState, DiffApplied};
use crate::input::{parse_line, InputCommand, HELP};
use log::{debug, error, info, warn};
use shared::{
    timestamp_millis, CreateError, Envelope, JoinError, MatchFormat, MatchId, Packet,
    ParticipantId, SyncError, MAX_DATAGRAM_SIZE, NO_MATCH, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tokio::time::interval;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid server address: {0}")]
    InvalidAddress(#[from] std::net::AddrParseError),
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode packet: {0}")]
    Encode(#[from] bincode::Error),
    #[error("could not join: {0}")]
    JoinFailed(JoinError),
    #[error("could not create match: {0}")]
    CreateFailed(CreateError),
    #[error("no match to join; pass a match id or a roster to create one")]
    NothingToJoin,
}

/// What to connect to and how patient to be
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: String,
    pub participant: ParticipantId,
    /// Join this match; when None a match is created from `create`
    pub match_id: Option<MatchId>,
    pub create: Option<(MatchFormat, Vec<ParticipantId>)>,
    pub auth_token: String,
    pub heartbeat_interval: Duration,
    /// Silence from the server after which the client rejoins
    pub heartbeat_timeout: Duration,
    /// Unacknowledged submissions are resent after this long
    pub ack_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8080".to_string(),
            participant: 1,
            match_id: None,
            create: None,
            auth_token: String::new(),
            heartbeat_interval: Duration::from_secs(1),
            heartbeat_timeout: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(2),
        }
    }
}

pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    config: ClientConfig,
    match_id: Option<MatchId>,
    joined: bool,
    finished: bool,

    game: ClientMatchState,
    /// When the outstanding snapshot request was last sent
    snapshot_requested_at: Option<Instant>,

    ping_ms: u64,
    last_heard: Instant,
}

impl Client {
    pub async fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = config.server_addr.parse()?;

        Ok(Client {
            socket,
            server_addr,
            match_id: config.match_id,
            joined: false,
            finished: false,
            game: ClientMatchState::new(config.participant),
            snapshot_requested_at: None,
            ping_ms: 0,
            last_heard: Instant::now(),
            config,
        })
    }

    pub fn game(&self) -> &ClientMatchState {
        &self.game
    }

    pub fn match_id(&self) -> Option<MatchId> {
        self.match_id
    }

    /// First packet of the session: join, or create then join
    fn opening_packet(&self) -> Result<Packet, ClientError> {
        match (&self.match_id, &self.config.create) {
            (Some(_), _) => Ok(self.join_packet()),
            (None, Some((format, participants))) => Ok(Packet::CreateMatch {
                format: *format,
                participants: participants.clone(),
            }),
            (None, None) => Err(ClientError::NothingToJoin),
        }
    }

    fn join_packet(&self) -> Packet {
        Packet::Join {
            participant: self.config.participant,
            auth_token: self.config.auth_token.clone(),
            version: PROTOCOL_VERSION,
        }
    }

    /// Drops the mirror and asks for a fresh snapshot
    fn request_snapshot(&mut self, now: Instant) -> Packet {
        self.game.discard();
        self.snapshot_requested_at = Some(now);
        Packet::RequestSnapshot
    }

    async fn send_packet(&self, packet: Packet) -> Result<(), ClientError> {
        let envelope = Envelope::new(self.match_id.unwrap_or(NO_MATCH), packet);
        let data = envelope.to_bytes()?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    async fn send_all(&self, packets: Vec<Packet>) {
        for packet in packets {
            if let Err(e) = self.send_packet(packet).await {
                error!("Error sending packet: {}", e);
            }
        }
    }

    /// Processes one server envelope and returns the packets to send back
    pub fn handle_envelope(
        &mut self,
        envelope: Envelope,
        now: Instant,
    ) -> Result<Vec<Packet>, ClientError> {
        self.last_heard = now;
        let Envelope { match_id, packet } = envelope;

        if let Packet::MatchCreated { match_id: created } = packet {
            info!("Created match {}", created);
            println!("Created match {}. Others can join with --match-id {}", created, created);
            self.match_id = Some(created);
            return Ok(vec![self.join_packet()]);
        }
        if let Packet::CreateFailed { error } = packet {
            return Err(ClientError::CreateFailed(error));
        }
        if self.match_id != Some(match_id) {
            debug!("Ignoring {} for match {}", packet.kind(), match_id);
            return Ok(Vec::new());
        }

        let mut outgoing = Vec::new();
        match packet {
            Packet::JoinFailed { error } => return Err(ClientError::JoinFailed(error)),

            Packet::Snapshot {
                state,
                seq,
                next_client_seq,
            } => {
                if !self.joined {
                    info!("Joined match {} at seq {}", match_id, seq);
                }
                self.joined = true;
                self.snapshot_requested_at = None;
                self.game.apply_snapshot(state, seq, next_client_seq);
                outgoing.extend(self.game.resubmissions(now));
                self.render();
            }

            Packet::Diff {
                seq,
                command,
                events,
                origin,
            } => match self.game.apply_diff(seq, &command, &events, origin) {
                Ok(DiffApplied::Advanced) => self.render(),
                Ok(DiffApplied::Duplicate) => {}
                Err(SyncError::NotSeeded) => debug!("Diff {} before snapshot", seq),
                Err(e) => {
                    warn!("Resyncing: {}", e);
                    outgoing.push(self.request_snapshot(now));
                }
            },

            Packet::Rejected { client_seq, reason } => {
                if self.game.apply_rejection(client_seq, &reason).is_some() {
                    println!("Rejected: {}", reason);
                    self.render();
                }
            }

            Packet::MatchCompleted { final_state } => {
                println!("{}", scoreboard(&final_state, self.config.participant));
                println!("Match over");
                self.finished = true;
            }

            Packet::HeartbeatAck { timestamp, seq } => {
                self.ping_ms = timestamp_millis().saturating_sub(timestamp);
                debug!("Heartbeat ack: seq {}, rtt {}ms", seq, self.ping_ms);
                // Lost trailing diffs only show up here
                if self.joined && !self.game.awaiting_snapshot() && seq > self.game.last_seq() {
                    warn!("Server at seq {}, mirror at {}", seq, self.game.last_seq());
                    outgoing.push(self.request_snapshot(now));
                }
            }

            other => warn!("Unexpected {} packet", other.kind()),
        }
        Ok(outgoing)
    }

    /// Turns one line of console input into packets; None means quit
    pub fn handle_input(&mut self, line: &str, now: Instant) -> Option<Vec<Packet>> {
        let command = match parse_line(line) {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e);
                return Some(Vec::new());
            }
        };

        let submits = matches!(command, InputCommand::Visit(_) | InputCommand::Undo);
        if submits && !self.joined {
            println!("Not in a match yet, wait for the scoreboard");
            return Some(Vec::new());
        }

        let packets = match command {
            InputCommand::Visit(throws) => {
                let client_seq = self.game.submit_visit(throws.clone(), now);
                self.render();
                vec![Packet::SubmitVisit { throws, client_seq }]
            }
            InputCommand::Undo => {
                let expected_seq = self.game.last_seq();
                let client_seq = self.game.submit_undo(now);
                self.render();
                vec![Packet::UndoLastVisit {
                    expected_seq,
                    client_seq,
                }]
            }
            InputCommand::Resync => vec![self.request_snapshot(now)],
            InputCommand::Show => {
                self.render();
                Vec::new()
            }
            InputCommand::Help => {
                println!("{}", HELP);
                Vec::new()
            }
            InputCommand::Quit => return None,
        };
        Some(packets)
    }

    /// Periodic work: heartbeats, retries, snapshot re-requests and
    /// rejoining after silence
    pub fn on_heartbeat_tick(&mut self, now: Instant) -> Vec<Packet> {
        if self.match_id.is_none() {
            return Vec::new();
        }
        if !self.joined {
            return vec![self.join_packet()];
        }

        if now.saturating_duration_since(self.last_heard) > self.config.heartbeat_timeout {
            warn!("No word from server for {:?}, rejoining", self.config.heartbeat_timeout);
            self.joined = false;
            self.game.discard();
            self.last_heard = now;
            return vec![self.join_packet()];
        }

        let mut packets = vec![Packet::Heartbeat {
            timestamp: timestamp_millis(),
            last_seq: self.game.last_seq(),
        }];
        if self.game.awaiting_snapshot() {
            // The request or its snapshot may have been lost
            let due = self.snapshot_requested_at.map_or(true, |sent| {
                now.saturating_duration_since(sent) >= self.config.ack_timeout
            });
            if due {
                debug!("Still waiting for a snapshot, asking again");
                packets.push(self.request_snapshot(now));
            }
        } else {
            packets.extend(self.game.due_for_retry(now, self.config.ack_timeout));
        }
        packets
    }

    fn render(&self) {
        if let Some(state) = self.game.display_state() {
            println!("{}", scoreboard(&state, self.config.participant));
        }
    }

    pub async fn run(&mut self) -> Result<(), ClientError> {
        info!("Connecting to {} as {}", self.server_addr, self.config.participant);
        let opening = self.opening_packet()?;
        self.send_packet(opening).await?;

        let mut heartbeat_interval = interval(self.config.heartbeat_interval);
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

        while !self.finished {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => match Envelope::from_bytes(&buffer[..len]) {
                            Ok(envelope) => {
                                let outgoing = self.handle_envelope(envelope, Instant::now())?;
                                self.send_all(outgoing).await;
                            }
                            Err(e) => warn!("Failed to deserialize packet: {}", e),
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                line = lines.next_line(), if stdin_open => {
                    match line {
                        Ok(Some(line)) => match self.handle_input(&line, Instant::now()) {
                            Some(packets) => self.send_all(packets).await,
                            None => break,
                        },
                        Ok(None) => stdin_open = false,
                        Err(e) => {
                            error!("Error reading input: {}", e);
                            stdin_open = false;
                        }
                    }
                },

                _ = heartbeat_interval.tick() => {
                    let packets = self.on_heartbeat_tick(Instant::now());
                    self.send_all(packets).await;
                },
            }
        }

        if self.joined {
            let _ = self.send_packet(Packet::Leave).await;
        }

        Ok(())
    }
}
