//! Connection bookkeeping for the routing layer
//!
//! This module tracks which network address speaks for which participant of
//! which match:
//! - Binding addresses on join, rebinding when a participant reconnects
//!   from somewhere new
//! - Activity tracking so silent connections can be timed out
//! - Capacity limits on concurrent connections
//!
//! It never touches match state. Match actors only learn about connects and
//! disconnects through the commands the server forwards to them.

use log::info;
use shared::{MatchId, ParticipantId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// One live connection and the match cursor it represents
#[derive(Debug, Clone)]
pub struct Connection {
    pub addr: SocketAddr,
    pub match_id: MatchId,
    pub participant: ParticipantId,
    /// Last time we received any packet from this address
    pub last_seen: Instant,
}

impl Connection {
    pub fn new(addr: SocketAddr, match_id: MatchId, participant: ParticipantId) -> Self {
        Self {
            addr,
            match_id,
            participant,
            last_seen: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Returns true if nothing has arrived within `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// What changed when an address was bound
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Binding {
    /// Earlier address of the same participant, now dropped
    pub replaced_addr: Option<SocketAddr>,
    /// Earlier (match, participant) this address spoke for, now dropped
    pub previous_identity: Option<(MatchId, ParticipantId)>,
}

pub struct SessionManager {
    connections: HashMap<SocketAddr, Connection>,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            connections: HashMap::new(),
            max_sessions,
        }
    }

    /// Whether a new address could be admitted right now
    pub fn has_capacity_for(&self, addr: SocketAddr) -> bool {
        self.connections.contains_key(&addr) || self.connections.len() < self.max_sessions
    }

    /// Binds `addr` to a participant of a match
    ///
    /// Returns None when the server is at capacity. A participant has at
    /// most one address; binding from a new address drops the old one.
    pub fn bind(
        &mut self,
        addr: SocketAddr,
        match_id: MatchId,
        participant: ParticipantId,
    ) -> Option<Binding> {
        if !self.has_capacity_for(addr) {
            return None;
        }

        let mut binding = Binding::default();

        let stale_addr = self
            .connections
            .values()
            .find(|c| c.match_id == match_id && c.participant == participant && c.addr != addr)
            .map(|c| c.addr);
        if let Some(stale_addr) = stale_addr {
            self.connections.remove(&stale_addr);
            binding.replaced_addr = Some(stale_addr);
        }

        if let Some(previous) = self.connections.remove(&addr) {
            if previous.match_id != match_id || previous.participant != participant {
                binding.previous_identity = Some((previous.match_id, previous.participant));
            }
        }

        info!(
            "{} bound to participant {} of match {}",
            addr, participant, match_id
        );
        self.connections
            .insert(addr, Connection::new(addr, match_id, participant));

        Some(binding)
    }

    pub fn unbind(&mut self, addr: &SocketAddr) -> Option<Connection> {
        let removed = self.connections.remove(addr);
        if let Some(connection) = &removed {
            info!(
                "{} unbound from participant {} of match {}",
                addr, connection.participant, connection.match_id
            );
        }
        removed
    }

    pub fn lookup(&self, addr: &SocketAddr) -> Option<(MatchId, ParticipantId)> {
        self.connections
            .get(addr)
            .map(|c| (c.match_id, c.participant))
    }

    /// Refreshes activity; returns false for unknown addresses
    pub fn touch(&mut self, addr: &SocketAddr) -> bool {
        match self.connections.get_mut(addr) {
            Some(connection) => {
                connection.touch();
                true
            }
            None => false,
        }
    }

    /// Removes and returns connections silent for longer than `timeout`
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<Connection> {
        let timed_out: Vec<SocketAddr> = self
            .connections
            .values()
            .filter(|c| c.is_timed_out(timeout))
            .map(|c| c.addr)
            .collect();

        timed_out
            .iter()
            .filter_map(|addr| self.connections.remove(addr))
            .inspect(|c| {
                info!(
                    "{} timed out (participant {} of match {})",
                    c.addr, c.participant, c.match_id
                )
            })
            .collect()
    }

    /// Drops every connection of a match that has shut down
    pub fn drop_match(&mut self, match_id: MatchId) -> Vec<SocketAddr> {
        let addrs: Vec<SocketAddr> = self
            .connections
            .values()
            .filter(|c| c.match_id == match_id)
            .map(|c| c.addr)
            .collect();
        for addr in &addrs {
            self.connections.remove(addr);
        }
        addrs
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
