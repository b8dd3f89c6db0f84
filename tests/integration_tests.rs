//! Integration tests for the networked round components
//!
//! These tests drive the server state machine directly and over real
//! loopback sockets, and run the headless client against a live server.

use bytes::Bytes;
use server::config::ServerConfig;
use server::game::Tick;
use server::player::SessionId;
use server::recorder::NullRecorder;
use server::state::{Outgoing, ServerState};
use shared::framing::{frame, FrameDecoder};
use shared::movement::Move;
use shared::protocol::{
    ClientMessage, ClientMoves, Hello, PlayerIntro, RoundShape, ServerMessage, PLAYER_FLAG_BOT,
};
use shared::replica::Replica;
use std::net::SocketAddr;
use std::time::Duration;

fn fast_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        warmup_secs: 0.1,
        victory_secs: 0.0,
        seed: Some(11),
        ..ServerConfig::default()
    }
}

fn hello(name: &str) -> ClientMessage {
    ClientMessage::Hello(Hello {
        players: vec![PlayerIntro {
            flags: PLAYER_FLAG_BOT,
            name: name.to_string(),
        }],
        client_flags: 0,
    })
}

fn framed(message: &ClientMessage) -> Bytes {
    frame(&message.encode()).unwrap()
}

/// MOVE message carrying the tail of `moves`, padded at the front
fn moves_message(game_id: u32, moves: &[Move], backlog: usize) -> ClientMessage {
    let start = moves.len().saturating_sub(backlog);
    let mut window = vec![Move::Forward; backlog - (moves.len() - start)];
    window.extend_from_slice(&moves[start..]);
    ClientMessage::Moves(ClientMoves {
        game_id,
        timestamp: moves.len() as u32,
        windows: vec![window],
    })
}

/// Decodes everything streamed to `session`, tracking the round shape
fn stream_messages(out: &[Outgoing], session: SessionId, shape: &mut RoundShape) -> Vec<ServerMessage> {
    let mut decoder = FrameDecoder::new();
    for item in out {
        if let Outgoing::Stream { session: to, frame } = item {
            if *to == session {
                decoder.extend(frame);
            }
        }
    }

    let mut messages = Vec::new();
    while let Some(payload) = decoder.next_frame().unwrap() {
        let message = ServerMessage::decode(&payload, *shape).unwrap();
        if let ServerMessage::Start(start) = &message {
            *shape = RoundShape {
                players: start.players.len(),
                backlog: start.params.backlog_len(),
            };
        }
        messages.push(message);
    }
    messages
}

/// ROUND CONTROLLER TESTS, driven through the server state without sockets
mod round_tests {
    use super::*;

    struct Harness {
        state: ServerState,
        backlog: usize,
        next_port: u16,
    }

    impl Harness {
        fn new(config: &ServerConfig) -> Self {
            Self {
                state: ServerState::new(config, Box::new(NullRecorder)),
                backlog: usize::from(config.backlog),
                next_port: 40000,
            }
        }

        fn join(&mut self, name: &str) -> SessionId {
            let addr: SocketAddr = format!("127.0.0.1:{}", self.next_port).parse().unwrap();
            self.next_port += 1;
            let session = self.state.accept(addr).unwrap();
            self.state.handle_stream_bytes(session, &framed(&hello(name)));
            session
        }

        fn start_round(&mut self, session: SessionId) -> u32 {
            assert_eq!(self.state.tick(), Tick::Started);
            self.state.handle_stream_bytes(session, &framed(&ClientMessage::Ready));
            self.state.game().game_id()
        }

        fn send_moves(&mut self, session: SessionId, game_id: u32, moves: &[Move]) {
            let message = moves_message(game_id, moves, self.backlog);
            self.state.handle_stream_bytes(session, &framed(&message));
        }

        fn notices(&mut self, session: SessionId) -> Vec<String> {
            let out = self.state.take_outgoing();
            stream_messages(&out, session, &mut RoundShape::default())
                .into_iter()
                .filter_map(|message| match message {
                    ServerMessage::Chat { sender: None, text } => Some(text),
                    _ => None,
                })
                .collect()
        }
    }

    /// A late joiner rebuilds the exact trail field from STRT plus FFWD
    #[test]
    fn late_join_fast_forward_reproduces_field() {
        let config = ServerConfig {
            seed: Some(7),
            ..fast_config()
        };
        let mut h = Harness::new(&config);
        let ann = h.join("ann");
        let game_id = h.start_round(ann);

        let mut script = Vec::new();
        for frame in 0..40u32 {
            script.push(match frame {
                0 => Move::TurnLeft,
                f if f % 8 < 2 => Move::TurnRight,
                _ => Move::Forward,
            });
            h.send_moves(ann, game_id, &script);
            h.state.tick();
        }
        h.state.take_outgoing();

        let bob = h.join("bob");
        let out = h.state.take_outgoing();
        let messages = stream_messages(&out, bob, &mut RoundShape::default());

        let start = messages
            .iter()
            .find_map(|m| match m {
                ServerMessage::Start(start) => Some(start.clone()),
                _ => None,
            })
            .expect("late joiner gets STRT");
        let ff = messages
            .iter()
            .find_map(|m| match m {
                ServerMessage::FastForward(ff) => Some(ff.clone()),
                _ => None,
            })
            .expect("late joiner gets FFWD");
        assert!(messages.iter().any(|m| matches!(m, ServerMessage::Scores(_))));
        assert_eq!(start.players.len(), 1);

        let mut replica = Replica::new(&start);
        replica.fast_forward(&ff).unwrap();
        assert_eq!(replica.frame(), h.state.game().frame());
        assert!(replica.field().count(1) > 0);
        assert!(replica.field() == h.state.game().field());
    }

    /// With a crowded round the catch-up still fits one frame; players
    /// whose logs were cut short are dead to the late joiner
    #[test]
    fn crowded_late_join_still_gets_fast_forward() {
        let config = ServerConfig {
            warmup_secs: 8.0,
            max_clients: 100,
            ..fast_config()
        };
        let mut h = Harness::new(&config);
        let sessions: Vec<_> = (0..80).map(|i| h.join(&format!("bot{}", i))).collect();
        let game_id = h.start_round(sessions[0]);
        for &session in &sessions[1..] {
            h.state.handle_stream_bytes(session, &framed(&ClientMessage::Ready));
        }

        // alternating turns keep everybody alive in warm-up and give every
        // log one byte per frame
        let mut script = Vec::new();
        for frame in 0..230u32 {
            script.push(if frame % 2 == 0 { Move::TurnLeft } else { Move::TurnRight });
            for &session in &sessions {
                h.send_moves(session, game_id, &script);
            }
            h.state.tick();
            h.state.take_outgoing();
        }
        assert_eq!(h.state.game().alive_count(), 80);

        let late = h.join("late");
        let out = h.state.take_outgoing();
        let messages = stream_messages(&out, late, &mut RoundShape::default());
        let start = messages
            .iter()
            .find_map(|m| match m {
                ServerMessage::Start(start) => Some(start.clone()),
                _ => None,
            })
            .expect("late joiner gets STRT");
        let ff = messages
            .iter()
            .find_map(|m| match m {
                ServerMessage::FastForward(ff) => Some(ff.clone()),
                _ => None,
            })
            .expect("late joiner gets FFWD");
        assert_eq!(ff.logs.len(), 80);

        let mut replica = Replica::new(&start);
        replica.fast_forward(&ff).unwrap();
        assert_eq!(replica.alive_count(), 0);

        // the next MOVE no longer leaves a gap the replica cannot bridge
        script.push(Move::Forward);
        for &session in &sessions {
            h.send_moves(session, game_id, &script);
        }
        h.state.tick();
        replica.apply_moves(&h.state.game().move_window()).unwrap();
    }

    /// Claiming moves further ahead than one window is a desync
    #[test]
    fn window_jump_past_backlog_kills_player() {
        let mut h = Harness::new(&fast_config());
        let ann = h.join("ann");
        let game_id = h.start_round(ann);
        h.state.take_outgoing();

        let backlog = h.backlog;
        let mut script = vec![Move::TurnLeft];
        script.extend(std::iter::repeat(Move::Forward).take(backlog + 4));
        h.send_moves(ann, game_id, &script);

        assert_eq!(h.state.game().alive_count(), 0);
        let notices = h.notices(ann);
        assert!(notices.contains(&"Killed ann: client out-of-sync!".to_string()));
    }

    /// More queued moves than the backlog holds is a desync
    #[test]
    fn queue_overflow_kills_player() {
        let mut h = Harness::new(&fast_config());
        let ann = h.join("ann");
        let game_id = h.start_round(ann);

        let backlog = h.backlog;
        let mut script = vec![Move::TurnLeft];
        script.extend(std::iter::repeat(Move::Forward).take(backlog - 1));
        h.send_moves(ann, game_id, &script);
        assert_eq!(h.state.game().alive_count(), 1);

        // One move applied, backlog - 1 still queued
        h.state.tick();
        h.state.take_outgoing();

        script.extend([Move::Forward, Move::Forward]);
        h.send_moves(ann, game_id, &script);
        assert_eq!(h.state.game().alive_count(), 0);
        assert!(h
            .notices(ann)
            .contains(&"Killed ann: client out-of-sync!".to_string()));
    }

    /// Turning during warm-up only changes the heading; the first segment
    /// is drawn on the first frame after it
    #[test]
    fn warmup_turns_in_place() {
        let mut h = Harness::new(&fast_config());
        assert_eq!(h.state.game().params().warmup, 3);
        let ann = h.join("ann");
        let game_id = h.start_round(ann);

        let id = h.state.game().roster()[0];
        let start = *h.state.game().player(id).unwrap().trail().unwrap().position();
        let turn = h.state.game().params().turn_angle();

        let mut script = Vec::new();
        for mv in [Move::TurnLeft, Move::TurnLeft, Move::Forward] {
            script.push(mv);
            h.send_moves(ann, game_id, &script);
            h.state.tick();
        }

        let after_warmup = *h.state.game().player(id).unwrap().trail().unwrap().position();
        assert!((after_warmup.a - (start.a + 2.0 * turn)).abs() < 1e-12);
        assert_eq!(after_warmup.x, start.x);
        assert_eq!(after_warmup.y, start.y);
        assert_eq!(h.state.game().field().count(1), 0);

        script.push(Move::Forward);
        h.send_moves(ann, game_id, &script);
        h.state.tick();
        assert!(h.state.game().field().count(1) > 0);
        assert_eq!(h.state.game().alive_count(), 1);
    }

    /// A second kill of the same player changes nothing
    #[test]
    fn kill_is_idempotent_across_sessions() {
        let mut h = Harness::new(&fast_config());
        let ann = h.join("ann");
        let bob = h.join("bob");
        let game_id = h.start_round(ann);
        h.state.handle_stream_bytes(bob, &framed(&ClientMessage::Ready));

        // Past the backlog twice: only the first one kills
        let backlog = h.backlog;
        let script: Vec<Move> = std::iter::once(Move::TurnLeft)
            .chain(std::iter::repeat(Move::Forward).take(backlog + 4))
            .collect();
        h.send_moves(ann, game_id, &script);
        h.send_moves(ann, game_id, &script);

        assert_eq!(h.state.game().alive_count(), 1);
        let kills = h
            .notices(bob)
            .iter()
            .filter(|text| text.starts_with("Killed ann"))
            .count();
        assert_eq!(kills, 1);
    }
}

/// REAL NETWORK TESTS over loopback sockets
mod socket_tests {
    use super::*;
    use server::network::Server;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpStream, UdpSocket};
    use tokio::time::{timeout, Instant};

    struct RawPeer {
        stream: TcpStream,
        socket: UdpSocket,
        decoder: FrameDecoder,
        shape: RoundShape,
    }

    impl RawPeer {
        async fn connect(addr: SocketAddr) -> Self {
            let stream = TcpStream::connect(addr).await.unwrap();
            let socket = UdpSocket::bind(stream.local_addr().unwrap()).await.unwrap();
            socket.connect(addr).await.unwrap();
            Self {
                stream,
                socket,
                decoder: FrameDecoder::new(),
                shape: RoundShape::default(),
            }
        }

        async fn send(&mut self, message: &ClientMessage) {
            self.stream.write_all(&framed(message)).await.unwrap();
        }

        /// Next message from the stream, or None once it is closed
        async fn recv(&mut self) -> Option<ServerMessage> {
            let mut buf = [0u8; 4096];
            loop {
                if let Some(payload) = self.decoder.next_frame().unwrap() {
                    let message = ServerMessage::decode(&payload, self.shape).unwrap();
                    if let ServerMessage::Start(start) = &message {
                        self.shape = RoundShape {
                            players: start.players.len(),
                            backlog: start.params.backlog_len(),
                        };
                    }
                    return Some(message);
                }
                let n = timeout(Duration::from_secs(3), self.stream.read(&mut buf))
                    .await
                    .expect("server went quiet")
                    .unwrap();
                if n == 0 {
                    return None;
                }
                self.decoder.extend(&buf[..n]);
            }
        }
    }

    async fn spawn_server(config: ServerConfig) -> SocketAddr {
        let mut server = Server::bind(&config).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move { server.run().await });
        addr
    }

    /// HELO is answered with a round start, and move windows travel both
    /// ways as datagrams
    #[tokio::test]
    async fn handshake_starts_round_and_exchanges_moves() {
        let config = fast_config();
        let addr = spawn_server(config.clone()).await;
        let mut peer = RawPeer::connect(addr).await;

        peer.send(&hello("ann")).await;
        let start = loop {
            match peer.recv().await.expect("stream closed") {
                ServerMessage::Start(start) => break start,
                _ => continue,
            }
        };
        assert_eq!(start.players.len(), 1);
        assert_eq!(start.players[0].name, "ann");
        assert_eq!(start.params, config.game_params());
        peer.send(&ClientMessage::Ready).await;

        let ours = moves_message(start.game_id, &[Move::TurnLeft], start.params.backlog_len()).encode();
        let deadline = Instant::now() + Duration::from_secs(3);
        let mut buf = vec![0u8; 4096];
        loop {
            assert!(Instant::now() < deadline, "our move never came back");
            // READY and the datagram may race, so keep repeating it
            peer.socket.send(&ours).await.unwrap();
            let n = match timeout(Duration::from_millis(100), peer.socket.recv(&mut buf)).await {
                Ok(received) => received.unwrap(),
                Err(_) => continue,
            };
            if let Ok(ServerMessage::Moves(moves)) = ServerMessage::decode(&buf[..n], peer.shape) {
                assert_eq!(moves.game_id, start.game_id);
                let window = moves.windows[0].as_ref().unwrap();
                if window.contains(&Move::TurnLeft) {
                    break;
                }
            }
        }
    }

    /// An unknown message type gets DISC with the reason, then the stream closes
    #[tokio::test]
    async fn protocol_violation_disconnects() {
        let addr = spawn_server(fast_config()).await;
        let mut peer = RawPeer::connect(addr).await;

        peer.stream.write_all(&frame(&[99]).unwrap()).await.unwrap();

        let mut reason = None;
        while let Some(message) = peer.recv().await {
            if let ServerMessage::Disconnect { reason: r } = message {
                reason = Some(r);
            }
        }
        assert_eq!(reason.as_deref(), Some("invalid packet type 99"));
    }

    /// Duplicate names are refused on HELO
    #[tokio::test]
    async fn duplicate_name_disconnects() {
        let addr = spawn_server(fast_config()).await;
        let mut first = RawPeer::connect(addr).await;
        first.send(&hello("ann")).await;
        assert!(matches!(first.recv().await, Some(ServerMessage::Chat { sender: None, .. })));

        let mut second = RawPeer::connect(addr).await;
        second.send(&hello("ann")).await;
        let reason = loop {
            match second.recv().await {
                Some(ServerMessage::Disconnect { reason }) => break reason,
                Some(_) => continue,
                None => panic!("closed without DISC"),
            }
        };
        assert_eq!(reason, "name \"ann\" is already taken");
    }

    /// The headless client plays a full round and leaves on the next start
    #[tokio::test]
    async fn headless_client_finishes_a_round() {
        use client::config::ClientConfig;
        use client::controller::External;
        use client::network::Client;

        let addr = spawn_server(fast_config()).await;
        let config = ClientConfig {
            server: addr.to_string(),
            names: vec!["walker".to_string()],
            max_rounds: Some(1),
            ..ClientConfig::default()
        };

        // Never turning during warm-up ends the round quickly
        let (controller, _handle) = External::new();
        let mut client = Client::connect(&config, vec![Box::new(controller)]).await.unwrap();
        timeout(Duration::from_secs(10), client.run())
            .await
            .expect("round never ended")
            .unwrap();
        assert_eq!(client.game().rounds(), 1);
    }
}
