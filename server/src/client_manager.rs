//! Session bookkeeping for connected clients
//!
//! This module tracks every client connection the server has accepted:
//! - Session lifecycle (accept, handshake, disconnect)
//! - Reassembly of the reliable byte stream into protocol frames
//! - The READY handshake that gates move ingestion for each round
//! - Capacity limits and datagram address lookup
//!
//! A session is one connection. It becomes "joined" once its HELO was
//! accepted and from then on owns up to four players in the round
//! controller. Sessions never hold player state themselves, only ids.

use crate::player::{PlayerId, SessionId};
use log::info;
use shared::framing::FrameDecoder;
use std::collections::BTreeMap;
use std::net::SocketAddr;

/// One accepted connection and its protocol state
///
/// Each session keeps:
/// - Its peer address, shared by the stream and the datagram channel
/// - Whether the HELO handshake has completed and for which players
/// - Whether the current round start has been acknowledged with READY
/// - A frame decoder holding partially received stream data
#[derive(Debug)]
pub struct Session {
    /// Unique session identifier assigned by the server
    pub id: SessionId,
    /// Peer address of the stream; datagrams from it belong to this session
    pub addr: SocketAddr,
    /// Set once HELO was accepted
    pub joined: bool,
    /// Set once the client acknowledged the current round with READY
    pub started: bool,
    /// Client asked to receive everything over the stream
    pub reliable_only: bool,
    /// Players announced in HELO, in announcement order
    pub players: Vec<PlayerId>,
    decoder: FrameDecoder,
}

impl Session {
    /// Creates a fresh, not yet joined session for a new connection
    pub fn new(id: SessionId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            joined: false,
            started: false,
            reliable_only: false,
            players: Vec::new(),
            decoder: FrameDecoder::new(),
        }
    }

    /// Gives access to the stream reassembly buffer
    ///
    /// Bytes read from the connection are appended here, and complete
    /// frames are taken out in arrival order.
    pub fn decoder_mut(&mut self) -> &mut FrameDecoder {
        &mut self.decoder
    }

    /// Whether unreliable traffic has to be routed through the stream
    pub fn wants_stream_only(&self) -> bool {
        self.reliable_only
    }
}

/// Manages all accepted sessions
///
/// The SessionManager owns the session table, enforces the connection
/// limit and hands out session ids in increasing order. Iteration follows
/// id order, which is also the order rosters are built in.
pub struct SessionManager {
    /// Accepted sessions indexed by id
    sessions: BTreeMap<SessionId, Session>,
    /// Next id for an accepted connection
    next_session_id: SessionId,
    /// Maximum number of concurrent sessions
    max_clients: usize,
}

impl SessionManager {
    /// Creates an empty manager that admits at most `max_clients` sessions
    pub fn new(max_clients: usize) -> Self {
        Self {
            sessions: BTreeMap::new(),
            next_session_id: 1,
            max_clients,
        }
    }

    /// Registers a newly accepted connection
    ///
    /// Returns the session id, or None if the server is full. The caller
    /// is expected to tell the peer why before dropping the connection.
    pub fn add_session(&mut self, addr: SocketAddr) -> Option<SessionId> {
        if self.sessions.len() >= self.max_clients {
            return None;
        }

        let id = self.next_session_id;
        self.next_session_id += 1;

        info!("Session {} connected from {}", id, addr);
        self.sessions.insert(id, Session::new(id, addr));
        Some(id)
    }

    /// Removes a session and returns it so its players can be cleaned up
    pub fn remove_session(&mut self, id: SessionId) -> Option<Session> {
        let session = self.sessions.remove(&id)?;
        info!("Session {} ({}) closed", id, session.addr);
        Some(session)
    }

    /// Finds the session a datagram belongs to
    ///
    /// Clients bind their datagram socket to the local address of their
    /// stream, so the peer address identifies the session on both channels.
    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<SessionId> {
        self.sessions
            .values()
            .find(|session| session.addr == addr)
            .map(|session| session.id)
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    /// Sessions that completed the handshake, in id order
    pub fn joined(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values().filter(|session| session.joined)
    }

    /// Forgets every READY acknowledgement
    ///
    /// Called when a new round starts: moves are not accepted from a
    /// session until it has seen and acknowledged the new round.
    pub fn clear_started(&mut self) {
        for session in self.sessions.values_mut() {
            session.started = false;
        }
    }

    /// Returns the number of open sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if nobody is connected
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
