//! Everything the server loop owns, driven one event at a time.
//!
//! [`ServerState`] turns incoming bytes into calls on the round controller
//! and turns the controller's broadcasts into per-session deliveries. It
//! never touches a socket: the network layer feeds it and drains
//! [`ServerState::take_outgoing`] after every call.

use crate::client_manager::SessionManager;
use crate::config::ServerConfig;
use crate::game::{Game, GameEvent, Tick};
use crate::player::SessionId;
use crate::recorder::RoundRecorder;
use bytes::Bytes;
use log::{debug, info, warn};
use shared::framing::frame;
use shared::protocol::{
    tag, ClientMessage, ClientMoves, Hello, ProtocolError, ServerMessage,
};
use std::net::SocketAddr;

/// Delivery instructions for the network layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// Length-prefixed bytes for a session's stream.
    Stream { session: SessionId, frame: Bytes },
    Datagram { addr: SocketAddr, payload: Bytes },
    /// Flush what is queued for the session, then close it.
    Close { session: SessionId },
}

pub struct ServerState {
    game: Game,
    sessions: SessionManager,
    outbox: Vec<Outgoing>,
}

impl ServerState {
    pub fn new(config: &ServerConfig, recorder: Box<dyn RoundRecorder>) -> Self {
        Self {
            game: Game::new(config, recorder),
            sessions: SessionManager::new(config.max_clients),
            outbox: Vec::new(),
        }
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn take_outgoing(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    /// Registers a new connection, or returns None when the server is full.
    pub fn accept(&mut self, addr: SocketAddr) -> Option<SessionId> {
        self.sessions.add_session(addr)
    }

    /// The frame sent to a connection turned away at accept time.
    pub fn rejection(reason: &str) -> Option<Bytes> {
        let disc = ServerMessage::Disconnect {
            reason: reason.to_string(),
        };
        frame(&disc.encode()).ok()
    }

    pub fn tick(&mut self) -> Tick {
        let tick = self.game.tick();
        self.flush_events();
        tick
    }

    pub fn handle_stream_bytes(&mut self, session: SessionId, data: &[u8]) {
        match self.sessions.get_mut(session) {
            Some(s) => s.decoder_mut().extend(data),
            None => return,
        }

        loop {
            let next = match self.sessions.get_mut(session) {
                Some(s) => s.decoder_mut().next_frame(),
                None => break,
            };
            match next {
                Ok(Some(payload)) => self.handle_payload(session, &payload, true),
                Ok(None) => break,
                Err(e) => {
                    self.violation(session, e);
                    break;
                }
            }
        }
        self.flush_events();
    }

    /// Datagrams may only carry moves. Anything else, or anything from an
    /// unknown address, is dropped.
    pub fn handle_datagram(&mut self, addr: SocketAddr, payload: &[u8]) {
        let session = match self.sessions.find_by_addr(addr) {
            Some(session) => session,
            None => {
                debug!("Dropping datagram from unknown peer {}", addr);
                return;
            }
        };
        if payload.first() != Some(&tag::CLIENT_MOVE) {
            debug!("Dropping non-move datagram from session {}", session);
            return;
        }

        self.handle_payload(session, payload, false);
        self.flush_events();
    }

    fn handle_payload(&mut self, session: SessionId, payload: &[u8], reliable: bool) {
        let message = match ClientMessage::decode(payload, self.game.params().backlog_len()) {
            Ok(message) => message,
            Err(e) if reliable => return self.violation(session, e),
            Err(e) => {
                debug!("Dropping bad datagram from session {}: {}", session, e);
                return;
            }
        };

        let joined = self.sessions.get(session).map_or(false, |s| s.joined);
        match message {
            ClientMessage::Hello(hello) => self.hello(session, hello),
            ClientMessage::Quit => self.disconnect(session, "quit"),
            _ if !joined => debug!("Session {} sent {:?} before HELO", session, payload.first()),
            ClientMessage::Chat { name, text } => self.chat(session, name, text),
            ClientMessage::Ready => {
                if let Some(s) = self.sessions.get_mut(session) {
                    s.started = true;
                }
            }
            ClientMessage::Moves(moves) => self.moves(session, moves),
        }
    }

    fn hello(&mut self, session: SessionId, hello: Hello) {
        if self.sessions.get(session).map_or(true, |s| s.joined) {
            warn!("Ignoring repeated HELO from session {}", session);
            return;
        }
        if let Some(taken) = hello.players.iter().find(|p| self.game.name_taken(&p.name)) {
            let error = ProtocolError::DuplicateName(taken.name.clone());
            return self.violation(session, error);
        }

        let reliable_only = hello.reliable_only();
        let ids: Vec<_> = hello
            .players
            .iter()
            .map(|intro| self.game.add_player(session, intro))
            .collect();
        if let Some(s) = self.sessions.get_mut(session) {
            s.joined = true;
            s.reliable_only = reliable_only;
            s.players = ids;
        }

        for intro in &hello.players {
            let notice = ServerMessage::notice(format!("{} joined", intro.name));
            self.broadcast(notice.encode(), true);
        }

        for payload in self.game.catch_up() {
            self.send(session, &payload);
        }
    }

    fn chat(&mut self, session: SessionId, name: String, text: String) {
        let owns = self.sessions.get(session).map_or(false, |s| {
            s.players
                .iter()
                .any(|&id| self.game.player(id).map_or(false, |p| p.name() == name))
        });
        if !owns {
            warn!("Session {} tried to chat as {:?}", session, name);
            return;
        }

        info!("<{}> {}", name, text);
        let relay = ServerMessage::Chat {
            sender: Some(name),
            text,
        };
        self.broadcast(relay.encode(), true);
    }

    fn moves(&mut self, session: SessionId, moves: ClientMoves) {
        let s = match self.sessions.get(session) {
            Some(s) => s,
            None => return,
        };
        if !s.started || !self.game.is_current(moves.game_id) {
            debug!("Dropping moves of session {} for game {:08x}", session, moves.game_id);
            return;
        }

        let ids: Vec<_> = self.game.in_round(&s.players).collect();
        if ids.len() != moves.windows.len() {
            let error = ProtocolError::WindowCount {
                what: "MOVE",
                expected: ids.len(),
                got: moves.windows.len(),
            };
            return self.violation(session, error);
        }

        for (id, window) in ids.into_iter().zip(&moves.windows) {
            self.game.queue_moves(id, moves.timestamp, window);
        }
    }

    fn violation(&mut self, session: SessionId, error: ProtocolError) {
        warn!("Protocol violation from session {}: {}", session, error);
        self.disconnect(session, &error.to_string());
    }

    /// Drops a session: its players die, the peer gets the reason and the
    /// others learn who left.
    pub fn disconnect(&mut self, session: SessionId, reason: &str) {
        let closed = match self.sessions.remove_session(session) {
            Some(closed) => closed,
            None => return,
        };
        info!("Disconnecting session {}: {}", session, reason);

        let disc = ServerMessage::Disconnect {
            reason: reason.to_string(),
        };
        self.send(session, &disc.encode());
        self.outbox.push(Outgoing::Close { session });

        for id in closed.players {
            let name = match self.game.player(id) {
                Some(player) => player.name().to_string(),
                None => continue,
            };
            self.game.disconnect_player(id);
            self.flush_events();
            let notice = ServerMessage::notice(format!("{} left", name));
            self.broadcast(notice.encode(), true);
        }
    }

    fn flush_events(&mut self) {
        for event in self.game.take_events() {
            match event {
                GameEvent::RoundStarted { game_id } => {
                    debug!("Waiting for READY on game {:08x}", game_id);
                    self.sessions.clear_started();
                }
                GameEvent::Broadcast { payload, reliable } => self.broadcast(payload, reliable),
            }
        }
    }

    fn broadcast(&mut self, payload: Bytes, reliable: bool) {
        let framed = match frame(&payload) {
            Ok(framed) => framed,
            Err(e) => {
                warn!("Not broadcasting {} byte message: {}", payload.len(), e);
                return;
            }
        };

        for session in self.sessions.joined() {
            let out = if reliable || session.wants_stream_only() {
                Outgoing::Stream {
                    session: session.id,
                    frame: framed.clone(),
                }
            } else {
                Outgoing::Datagram {
                    addr: session.addr,
                    payload: payload.clone(),
                }
            };
            self.outbox.push(out);
        }
    }

    fn send(&mut self, session: SessionId, payload: &[u8]) {
        match frame(payload) {
            Ok(framed) => self.outbox.push(Outgoing::Stream {
                session,
                frame: framed,
            }),
            Err(e) => warn!("Not sending {} byte message to session {}: {}", payload.len(), session, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::NullRecorder;
    use shared::movement::Move;
    use shared::protocol::{PlayerIntro, RoundShape, CLIENT_FLAG_RELIABLE_ONLY};

    fn config() -> ServerConfig {
        ServerConfig {
            warmup_secs: 0.0,
            backlog: 4,
            max_clients: 3,
            seed: Some(11),
            ..ServerConfig::default()
        }
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn framed(message: &ClientMessage) -> Bytes {
        frame(&message.encode()).unwrap()
    }

    fn hello(names: &[&str], client_flags: u8) -> ClientMessage {
        ClientMessage::Hello(Hello {
            players: names
                .iter()
                .map(|name| PlayerIntro {
                    flags: 0,
                    name: name.to_string(),
                })
                .collect(),
            client_flags,
        })
    }

    fn connect(state: &mut ServerState, port: u16, names: &[&str]) -> SessionId {
        let session = state.accept(addr(port)).unwrap();
        state.handle_stream_bytes(session, &framed(&hello(names, 0)));
        session
    }

    /// Decoded stream messages for `session`, in order.
    fn received(out: &[Outgoing], session: SessionId, players: usize) -> Vec<ServerMessage> {
        let shape = RoundShape { players, backlog: 4 };
        out.iter()
            .filter_map(|o| match o {
                Outgoing::Stream { session: s, frame } if *s == session => {
                    Some(ServerMessage::decode(&frame[2..], shape).unwrap())
                }
                _ => None,
            })
            .collect()
    }

    fn closed(out: &[Outgoing], session: SessionId) -> bool {
        out.contains(&Outgoing::Close { session })
    }

    #[test]
    fn test_round_starts_for_joined_sessions() {
        let mut state = ServerState::new(&config(), Box::new(NullRecorder));
        let a = connect(&mut state, 1000, &["ann"]);
        let out = state.take_outgoing();
        assert_eq!(received(&out, a, 0), vec![ServerMessage::notice("ann joined")]);

        assert_eq!(state.tick(), Tick::Started);
        let out = state.take_outgoing();
        let messages = received(&out, a, 1);
        assert!(matches!(messages[0], ServerMessage::Start(_)));
        assert!(matches!(messages[1], ServerMessage::Scores(_)));
    }

    #[test]
    fn test_unknown_tag_disconnects_with_reason() {
        let mut state = ServerState::new(&config(), Box::new(NullRecorder));
        let a = state.accept(addr(1000)).unwrap();
        state.handle_stream_bytes(a, &[0, 1, 99]);

        let out = state.take_outgoing();
        assert_eq!(
            received(&out, a, 0),
            vec![ServerMessage::Disconnect {
                reason: "invalid packet type 99".to_string()
            }]
        );
        assert!(closed(&out, a));
        assert!(state.sessions().is_empty());
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let mut state = ServerState::new(&config(), Box::new(NullRecorder));
        connect(&mut state, 1000, &["ann"]);
        state.take_outgoing();

        let b = connect(&mut state, 1001, &["bob", "ann"]);
        let out = state.take_outgoing();
        assert!(closed(&out, b));
        assert_eq!(state.game().player_count(), 1);
    }

    #[test]
    fn test_second_hello_is_ignored() {
        let mut state = ServerState::new(&config(), Box::new(NullRecorder));
        let a = connect(&mut state, 1000, &["ann"]);
        state.handle_stream_bytes(a, &framed(&hello(&["bob"], 0)));
        assert_eq!(state.game().player_count(), 1);
        assert_eq!(state.sessions().get(a).unwrap().players.len(), 1);
    }

    #[test]
    fn test_moves_need_ready_and_matching_game() {
        let mut state = ServerState::new(&config(), Box::new(NullRecorder));
        let a = connect(&mut state, 1000, &["ann"]);
        state.tick();
        let game_id = state.game().game_id();
        let id = state.sessions().get(a).unwrap().players[0];

        let moves = |game_id| {
            ClientMessage::Moves(ClientMoves {
                game_id,
                timestamp: 2,
                windows: vec![vec![Move::Forward; 4]],
            })
        };

        state.handle_datagram(addr(1000), &moves(game_id).encode());
        assert!(state.game().player(id).unwrap().queue().is_empty());

        state.handle_stream_bytes(a, &framed(&ClientMessage::Ready));
        state.handle_datagram(addr(1000), &moves(game_id ^ 1).encode());
        assert!(state.game().player(id).unwrap().queue().is_empty());

        state.handle_datagram(addr(1000), &moves(game_id).encode());
        assert_eq!(state.game().player(id).unwrap().queue().len(), 2);

        // Moves on the stream are fine too
        let mut later = moves(game_id);
        if let ClientMessage::Moves(m) = &mut later {
            m.timestamp = 3;
        }
        state.handle_stream_bytes(a, &framed(&later));
        assert_eq!(state.game().player(id).unwrap().queue().len(), 3);
    }

    #[test]
    fn test_wrong_window_count_disconnects() {
        let mut state = ServerState::new(&config(), Box::new(NullRecorder));
        let a = connect(&mut state, 1000, &["ann"]);
        state.tick();
        state.handle_stream_bytes(a, &framed(&ClientMessage::Ready));
        state.take_outgoing();

        let moves = ClientMessage::Moves(ClientMoves {
            game_id: state.game().game_id(),
            timestamp: 1,
            windows: vec![vec![Move::Forward; 4]; 2],
        });
        state.handle_stream_bytes(a, &framed(&moves));
        let out = state.take_outgoing();
        assert!(closed(&out, a));
    }

    #[test]
    fn test_late_join_receives_round_state() {
        let mut state = ServerState::new(&config(), Box::new(NullRecorder));
        connect(&mut state, 1000, &["ann"]);
        state.tick();
        state.tick();
        state.take_outgoing();

        let b = connect(&mut state, 1001, &["bob"]);
        let out = state.take_outgoing();
        let messages = received(&out, b, 1);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], ServerMessage::notice("bob joined"));
        assert!(matches!(messages[1], ServerMessage::Start(_)));
        assert!(matches!(&messages[2], ServerMessage::FastForward(ff) if ff.frame == 1));
        assert!(matches!(messages[3], ServerMessage::Scores(_)));
    }

    #[test]
    fn test_chat_is_relayed_for_own_players_only() {
        let mut state = ServerState::new(&config(), Box::new(NullRecorder));
        let a = connect(&mut state, 1000, &["ann"]);
        let b = connect(&mut state, 1001, &["bob"]);
        state.take_outgoing();

        let chat = |name: &str| ClientMessage::Chat {
            name: name.to_string(),
            text: "hi".to_string(),
        };
        state.handle_stream_bytes(a, &framed(&chat("bob")));
        assert!(state.take_outgoing().is_empty());

        state.handle_stream_bytes(a, &framed(&chat("ann")));
        let out = state.take_outgoing();
        let expected = ServerMessage::Chat {
            sender: Some("ann".to_string()),
            text: "hi".to_string(),
        };
        assert_eq!(received(&out, a, 0), vec![expected.clone()]);
        assert_eq!(received(&out, b, 0), vec![expected]);
    }

    #[test]
    fn test_quit_kills_players_and_tells_the_rest() {
        let mut state = ServerState::new(&config(), Box::new(NullRecorder));
        let a = connect(&mut state, 1000, &["ann"]);
        let b = connect(&mut state, 1001, &["bob"]);
        state.tick();
        state.take_outgoing();
        let ann = state.sessions().get(a).unwrap().players[0];

        state.handle_stream_bytes(a, &framed(&ClientMessage::Quit));
        let out = state.take_outgoing();
        assert!(closed(&out, a));
        assert!(!state.game().player(ann).unwrap().is_alive());

        let messages = received(&out, b, 2);
        assert!(messages.contains(&ServerMessage::notice("ann left")));
        assert!(messages.iter().any(|m| matches!(m, ServerMessage::Scores(_))));
    }

    #[test]
    fn test_full_server_turns_connections_away() {
        let mut state = ServerState::new(&config(), Box::new(NullRecorder));
        for port in 0..3 {
            assert!(state.accept(addr(1000 + port)).is_some());
        }
        assert!(state.accept(addr(2000)).is_none());

        let rejection = ServerState::rejection("server full").unwrap();
        let decoded = ServerMessage::decode(&rejection[2..], RoundShape::default()).unwrap();
        assert_eq!(
            decoded,
            ServerMessage::Disconnect {
                reason: "server full".to_string()
            }
        );
    }

    #[test]
    fn test_unreliable_broadcasts_follow_client_flags() {
        let mut state = ServerState::new(&config(), Box::new(NullRecorder));
        connect(&mut state, 1000, &["ann"]);
        let b = state.accept(addr(1001)).unwrap();
        let reliable = hello(&["bob"], CLIENT_FLAG_RELIABLE_ONLY);
        state.handle_stream_bytes(b, &framed(&reliable));
        state.tick();
        state.take_outgoing();

        state.tick();
        let out = state.take_outgoing();
        assert!(out
            .iter()
            .any(|o| matches!(o, Outgoing::Datagram { addr: a, .. } if *a == addr(1000))));
        assert!(matches!(
            received(&out, b, 2).as_slice(),
            [ServerMessage::Moves(_)]
        ));
    }

    #[test]
    fn test_datagrams_from_strangers_are_ignored() {
        let mut state = ServerState::new(&config(), Box::new(NullRecorder));
        connect(&mut state, 1000, &["ann"]);
        state.take_outgoing();

        state.handle_datagram(addr(5555), &[tag::CLIENT_MOVE, 0, 0]);
        state.handle_datagram(addr(1000), &[tag::QUIT]);
        state.handle_datagram(addr(1000), &[tag::CLIENT_MOVE, 1]);
        assert!(state.take_outgoing().is_empty());
        assert_eq!(state.sessions().len(), 1);
    }
}
