//! Server network layer: UDP transport and routing to match actors

use crate::archive::Archive;
use crate::config::ServerConfig;
use crate::match_session::{spawn_match, MatchCommand, MatchError, MatchHandle, MatchSession};
use crate::session_manager::SessionManager;
use log::{debug, error, info, warn};
use shared::history::MatchHistory;
use shared::{
    CreateError, Envelope, JoinError, MatchFormat, MatchId, MatchState, Packet, ParticipantId,
    StartRule, MAX_DATAGRAM_SIZE, NO_MATCH, PROTOCOL_VERSION,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};

pub type ServerError = Box<dyn std::error::Error + Send + Sync>;

/// Messages sent from network tasks and match actors to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        envelope: Envelope,
        addr: SocketAddr,
    },
    ConnectionTimeout {
        addr: SocketAddr,
        match_id: MatchId,
        participant: ParticipantId,
    },
    MatchArchived {
        match_id: MatchId,
        history: MatchHistory,
    },
    MatchClosed {
        match_id: MatchId,
    },
    Shutdown,
}

/// Messages sent to the network sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket { envelope: Envelope, addr: SocketAddr },
}

/// Routing layer owning the socket, the session table and the match actors
pub struct Server {
    socket: Arc<UdpSocket>,
    sessions: Arc<RwLock<SessionManager>>,
    matches: HashMap<MatchId, MatchHandle>,
    archive: Archive,
    config: ServerConfig,
    next_match_id: MatchId,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let socket = Arc::new(UdpSocket::bind(config.bind_addr.as_str()).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            sessions: Arc::new(RwLock::new(SessionManager::new(config.max_sessions))),
            matches: HashMap::new(),
            archive: Archive::new(config.archive_dir.clone(), config.archive_capacity),
            config,
            next_match_id: NO_MATCH + 1,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sender that can stop [`Server::run`] with [`ServerMessage::Shutdown`]
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Validates a lobby and starts its actor
    pub fn create_match(
        &mut self,
        mut format: MatchFormat,
        participants: Vec<ParticipantId>,
    ) -> Result<MatchId, CreateError> {
        // Starters are drawn server-side so clients cannot pick them
        if let StartRule::Random { seed } = &mut format.start_rule {
            *seed = rand::random();
        }

        let match_id = self.next_match_id;
        let state = MatchState::create(match_id, format, participants)?;
        self.next_match_id += 1;

        let session = MatchSession::new(state, self.config.match_config.clone());
        let handle = spawn_match(session, self.game_tx.clone(), self.server_tx.clone());
        self.matches.insert(match_id, handle);

        info!(
            "Created match {} ({} start, first to {} legs)",
            match_id, format.starting_score, format.legs_to_win
        );
        Ok(match_id)
    }

    /// Spawns task that continuously listens for incoming packets
    async fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match Envelope::from_bytes(&buffer[..len]) {
                        Ok(envelope) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { envelope, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to deserialize packet from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    async fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { envelope, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &envelope, addr).await {
                            error!("Failed to send {} to {}: {}", envelope.packet.kind(), addr, e);
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors connection timeouts
    async fn spawn_timeout_checker(&self) {
        let sessions = Arc::clone(&self.sessions);
        let server_tx = self.server_tx.clone();
        let timeout = self.config.heartbeat_timeout;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(
                Duration::from_secs(1)
                    .min(timeout)
                    .max(Duration::from_millis(10)),
            );

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut sessions_guard = sessions.write().await;
                    sessions_guard.check_timeouts(timeout)
                };

                for connection in timed_out {
                    let message = ServerMessage::ConnectionTimeout {
                        addr: connection.addr,
                        match_id: connection.match_id,
                        participant: connection.participant,
                    };
                    if let Err(e) = server_tx.send(message) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        envelope: &Envelope,
        addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let data = envelope.to_bytes()?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, match_id: MatchId, packet: Packet, addr: SocketAddr) {
        let envelope = Envelope::new(match_id, packet);
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { envelope, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn forward(&self, match_id: MatchId, command: MatchCommand) {
        match self.matches.get(&match_id) {
            Some(handle) => {
                if let Err(e) = handle.send(command) {
                    warn!("Dropping command for match {}: {}", match_id, e);
                }
            }
            None => debug!("Dropping command for unknown match {}", match_id),
        }
    }

    /// Processes one incoming envelope
    async fn handle_packet(&mut self, envelope: Envelope, addr: SocketAddr) {
        let Envelope { match_id, packet } = envelope;
        debug!("{} from {} for match {}", packet.kind(), addr, match_id);

        match packet {
            Packet::CreateMatch {
                format,
                participants,
            } => match self.create_match(format, participants) {
                Ok(created) => {
                    self.send_packet(created, Packet::MatchCreated { match_id: created }, addr)
                }
                Err(error) => {
                    warn!("Rejected match creation from {}: {}", addr, error);
                    self.send_packet(NO_MATCH, Packet::CreateFailed { error }, addr);
                }
            },

            Packet::Join {
                participant,
                auth_token,
                version,
            } => {
                debug!(
                    "Join token from {} ({} bytes) accepted without verification",
                    addr,
                    auth_token.len()
                );
                let joined = if version == PROTOCOL_VERSION {
                    self.join(match_id, participant, addr).await
                } else {
                    Err(JoinError::UnsupportedVersion {
                        client: version,
                        server: PROTOCOL_VERSION,
                    })
                };
                if let Err(error) = joined {
                    warn!(
                        "Join of {} to match {} from {} failed: {}",
                        participant, match_id, addr, error
                    );
                    self.send_packet(match_id, Packet::JoinFailed { error }, addr);
                }
            }

            Packet::Leave => {
                let removed = {
                    let mut sessions = self.sessions.write().await;
                    sessions.unbind(&addr)
                };
                if let Some(connection) = removed {
                    self.forward(
                        connection.match_id,
                        MatchCommand::Disconnect {
                            participant: connection.participant,
                        },
                    );
                }
            }

            packet if packet.is_client_message() => {
                let bound = {
                    let mut sessions = self.sessions.write().await;
                    sessions.touch(&addr);
                    sessions.lookup(&addr)
                };
                let (bound_match, participant) = match bound {
                    Some(identity) if identity.0 == match_id => identity,
                    Some((other, _)) => {
                        warn!(
                            "{} sent {} for match {} but is bound to match {}",
                            addr,
                            packet.kind(),
                            match_id,
                            other
                        );
                        return;
                    }
                    None => {
                        debug!("Ignoring {} from unbound address {}", packet.kind(), addr);
                        return;
                    }
                };

                let command = match packet {
                    Packet::SubmitVisit { throws, client_seq } => MatchCommand::SubmitVisit {
                        participant,
                        throws,
                        client_seq,
                    },
                    Packet::UndoLastVisit {
                        expected_seq,
                        client_seq,
                    } => MatchCommand::Undo {
                        participant,
                        expected_seq,
                        client_seq,
                    },
                    Packet::RequestSnapshot => MatchCommand::RequestSnapshot { participant },
                    Packet::Heartbeat {
                        timestamp,
                        last_seq,
                    } => MatchCommand::Heartbeat {
                        participant,
                        timestamp,
                        last_seq,
                    },
                    _ => return,
                };
                self.forward(bound_match, command);
            }

            other => {
                warn!("Unexpected {} packet from {}", other.kind(), addr);
            }
        }
    }

    async fn join(
        &mut self,
        match_id: MatchId,
        participant: ParticipantId,
        addr: SocketAddr,
    ) -> Result<(), JoinError> {
        let handle = self
            .matches
            .get(&match_id)
            .cloned()
            .ok_or(JoinError::MatchNotFound { match_id })?;

        if !self.sessions.read().await.has_capacity_for(addr) {
            return Err(JoinError::ServerFull);
        }

        match handle.join(participant, addr).await {
            Ok(()) => {}
            Err(MatchError::Join(e)) => return Err(e),
            Err(MatchError::Unavailable(_)) | Err(MatchError::Busy(_)) => {
                return Err(JoinError::MatchNotFound { match_id })
            }
        }

        let binding = {
            let mut sessions = self.sessions.write().await;
            sessions.bind(addr, match_id, participant)
        };
        match binding {
            Some(binding) => {
                if let Some((old_match, old_participant)) = binding.previous_identity {
                    if old_match != match_id {
                        self.forward(
                            old_match,
                            MatchCommand::Disconnect {
                                participant: old_participant,
                            },
                        );
                    }
                }
                Ok(())
            }
            None => {
                self.forward(match_id, MatchCommand::Disconnect { participant });
                Err(JoinError::ServerFull)
            }
        }
    }

    async fn store_history(&mut self, match_id: MatchId, history: MatchHistory) {
        if let Err(e) = self.archive.store(&history).await {
            error!("Failed to archive match {}: {}", match_id, e);
        }
    }

    async fn close_match(&mut self, match_id: MatchId) {
        self.matches.remove(&match_id);
        let dropped = {
            let mut sessions = self.sessions.write().await;
            sessions.drop_match(match_id)
        };
        info!(
            "Match {} closed, released {} connections",
            match_id,
            dropped.len()
        );
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), ServerError> {
        // Initialize concurrent tasks
        self.spawn_network_receiver().await;
        self.spawn_network_sender().await;
        self.spawn_timeout_checker().await;

        info!("Server started successfully");

        while let Some(message) = self.server_rx.recv().await {
            match message {
                ServerMessage::PacketReceived { envelope, addr } => {
                    self.handle_packet(envelope, addr).await;
                }
                ServerMessage::ConnectionTimeout {
                    addr,
                    match_id,
                    participant,
                } => {
                    debug!("Connection {} timed out", addr);
                    self.forward(match_id, MatchCommand::Disconnect { participant });
                }
                ServerMessage::MatchArchived { match_id, history } => {
                    self.store_history(match_id, history).await;
                }
                ServerMessage::MatchClosed { match_id } => {
                    self.close_match(match_id).await;
                }
                ServerMessage::Shutdown => break,
            }
        }

        info!("Server shutting down");
        Ok(())
    }
}
