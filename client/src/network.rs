//! Client network layer: one stream and one datagram socket to the server

use crate::config::{ClientConfig, ConfigError, Steering};
use crate::controller::PlayerController;
use crate::game::{ClientGame, LocalPlayer};
use log::{debug, error, info, warn};
use shared::framing::{frame, FrameDecoder};
use shared::protocol::{
    ClientMessage, Hello, PlayerIntro, ProtocolError, ServerMessage, CLIENT_FLAG_RELIABLE_ONLY,
    MAX_PACKET_LEN, PLAYER_FLAG_BOT,
};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{interval, Instant, MissedTickBehavior};

/// How often the client checks whether the server clock moved on.
const CLOCK_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("disconnected by server: {0}")]
    Disconnected(String),
    #[error("connection closed by server")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Done,
}

pub struct Client {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    socket: UdpSocket,
    decoder: FrameDecoder,
    game: ClientGame,
    hello: Hello,
    reliable_only: bool,
    max_rounds: Option<u32>,
}

impl Client {
    /// Connects the stream and binds the datagram socket to the same local
    /// address, which is how the server recognizes our datagrams.
    pub async fn connect(
        config: &ClientConfig,
        controllers: Vec<Box<dyn PlayerController>>,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        if controllers.len() != config.names.len() {
            return Err(ConfigError::ControllerCount {
                names: config.names.len(),
                controllers: controllers.len(),
            }
            .into());
        }

        let stream = TcpStream::connect(&config.server).await?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Couldn't disable Nagle: {}", e);
        }
        let local = stream.local_addr()?;
        let server = stream.peer_addr()?;
        let socket = UdpSocket::bind(local).await?;
        socket.connect(server).await?;
        info!("Connected to {} from {}", server, local);

        let bot_flag = |human: bool| if human { 0 } else { PLAYER_FLAG_BOT };
        let human = config.steering == Steering::Human;
        let hello = Hello {
            players: config
                .names
                .iter()
                .enumerate()
                .map(|(i, name)| PlayerIntro {
                    flags: bot_flag(human && i == 0),
                    name: name.clone(),
                })
                .collect(),
            client_flags: if config.reliable_only {
                CLIENT_FLAG_RELIABLE_ONLY
            } else {
                0
            },
        };

        let players = config
            .names
            .iter()
            .cloned()
            .zip(controllers)
            .map(|(name, controller)| LocalPlayer::new(name, controller))
            .collect();

        let (reader, writer) = stream.into_split();
        Ok(Client {
            reader,
            writer,
            socket,
            decoder: FrameDecoder::new(),
            game: ClientGame::new(players),
            hello,
            reliable_only: config.reliable_only,
            max_rounds: config.max_rounds,
        })
    }

    pub fn game(&self) -> &ClientGame {
        &self.game
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ClientError> {
        Ok(self.socket.local_addr()?)
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<(), ClientError> {
        let data = frame(&message.encode())?;
        self.writer.write_all(&data).await?;
        Ok(())
    }

    /// Sends move windows, which may get lost, so failures are only logged
    async fn send_moves(&mut self, message: &ClientMessage) -> Result<(), ClientError> {
        if self.reliable_only {
            return self.send(message).await;
        }
        if let Err(e) = self.socket.send(&message.encode()).await {
            debug!("Move datagram failed: {}", e);
        }
        Ok(())
    }

    /// Says goodbye and closes the stream.
    pub async fn quit(&mut self) -> Result<(), ClientError> {
        self.send(&ClientMessage::Quit).await?;
        self.writer.shutdown().await?;
        info!("Left the server");
        Ok(())
    }

    async fn handle_payload(&mut self, payload: &[u8], now: Instant) -> Result<Flow, ClientError> {
        let message = match ServerMessage::decode(payload, self.game.shape()) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring server message: {}", e);
                return Ok(Flow::Continue);
            }
        };

        match message {
            ServerMessage::Chat { sender: Some(name), text } => info!("<{}> {}", name, text),
            ServerMessage::Chat { sender: None, text } => info!("* {}", text),
            ServerMessage::Disconnect { reason } => return Err(ClientError::Disconnected(reason)),
            ServerMessage::Start(start) => {
                if self.max_rounds.map_or(false, |max| self.game.rounds() >= max) {
                    info!("Played {} rounds, leaving", self.game.rounds());
                    self.quit().await?;
                    return Ok(Flow::Done);
                }
                self.game.start(&start);
                self.send(&ClientMessage::Ready).await?;
            }
            ServerMessage::Scores(scores) => {
                debug!("Scores: {:?}", scores);
                self.game.set_scores(scores);
            }
            ServerMessage::FastForward(ff) => self.game.fast_forward(&ff, now.into_std()),
            ServerMessage::Moves(moves) => self.game.apply_moves(&moves, now.into_std()),
        }
        Ok(Flow::Continue)
    }

    /// Generates the moves the server clock asks for and hands them out
    async fn on_clock(&mut self) -> Result<(), ClientError> {
        if self.game.advance_clock(Instant::now().into_std()) {
            if let Some(message) = self.game.move_message() {
                self.send_moves(&message).await?;
            }
        }

        for (name, text) in self.game.take_chat() {
            self.send(&ClientMessage::Chat { name, text }).await?;
        }
        Ok(())
    }

    /// Main client loop: runs until the server disconnects us or, with a
    /// round limit, until enough rounds were played.
    pub async fn run(&mut self) -> Result<(), ClientError> {
        let hello = ClientMessage::Hello(self.hello.clone());
        self.send(&hello).await?;

        let mut buffer = vec![0u8; 4096];
        let mut datagram = vec![0u8; MAX_PACKET_LEN];
        let mut clock = interval(CLOCK_INTERVAL);
        clock.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                read = self.reader.read(&mut buffer) => {
                    let len = read?;
                    if len == 0 {
                        return Err(ClientError::Closed);
                    }
                    let now = Instant::now();
                    self.decoder.extend(&buffer[..len]);
                    while let Some(payload) = self.decoder.next_frame()? {
                        if self.handle_payload(&payload, now).await? == Flow::Done {
                            return Ok(());
                        }
                    }
                },

                received = self.socket.recv(&mut datagram) => {
                    match received {
                        Ok(len) => {
                            if self.handle_payload(&datagram[..len], Instant::now()).await? == Flow::Done {
                                return Ok(());
                            }
                        }
                        Err(e) => error!("Error receiving datagram: {}", e),
                    }
                },

                _ = clock.tick() => {
                    self.on_clock().await?;
                },
            }
        }
    }
}
