//! Server network layer: stream and datagram sockets around the frame clock

use crate::config::{ConfigError, ServerConfig};
use crate::game::Tick;
use crate::player::SessionId;
use crate::recorder::Recorders;
use crate::state::{Outgoing, ServerState};
use bytes::Bytes;
use log::{debug, error, info, warn};
use shared::protocol::MAX_PACKET_LEN;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed by peer")]
    Closed,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Messages sent from connection tasks to the main server loop
#[derive(Debug)]
pub enum NetworkEvent {
    Received { session: SessionId, data: Bytes },
    Closed { session: SessionId, error: TransportError },
}

/// Messages sent from the main loop to a connection's writer task
#[derive(Debug)]
enum WriterCommand {
    Frame(Bytes),
    Close,
}

/// Main server coordinating the sockets and the round clock
pub struct Server {
    listener: TcpListener,
    socket: UdpSocket,
    state: ServerState,
    frame_duration: Duration,
    writers: HashMap<SessionId, mpsc::UnboundedSender<WriterCommand>>,

    event_tx: mpsc::UnboundedSender<NetworkEvent>,
    event_rx: mpsc::UnboundedReceiver<NetworkEvent>,
}

impl Server {
    /// Validates the configuration and binds both channels to the same
    /// address. Port 0 picks a free port for both.
    pub async fn bind(config: &ServerConfig) -> Result<Self, TransportError> {
        config.validate()?;

        let listener = TcpListener::bind(config.bind_addr()).await?;
        let local = listener.local_addr()?;
        let socket = UdpSocket::bind(local).await?;
        info!("Server listening on {}", local);

        let recorders = Recorders::from_config(config);
        if !recorders.is_empty() {
            info!("Recording rounds with {} recorders", recorders.len());
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Ok(Server {
            listener,
            socket,
            state: ServerState::new(config, Box::new(recorders)),
            frame_duration: config.frame_duration(),
            writers: HashMap::new(),
            event_tx,
            event_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Starts reader and writer tasks for an accepted connection
    fn accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        let session = match self.state.accept(addr) {
            Some(session) => session,
            None => {
                warn!("Server full, turning away {}", addr);
                if let Some(frame) = ServerState::rejection("server full") {
                    tokio::spawn(async move {
                        let mut stream = stream;
                        if stream.write_all(&frame).await.is_ok() {
                            let _ = stream.shutdown().await;
                        }
                    });
                }
                return;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Couldn't disable Nagle for {}: {}", addr, e);
        }
        let (reader, writer) = stream.into_split();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        self.writers.insert(session, writer_tx);

        spawn_reader(session, reader, self.event_tx.clone());
        spawn_writer(session, writer, writer_rx, self.event_tx.clone());
    }

    fn handle_event(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::Received { session, data } => self.state.handle_stream_bytes(session, &data),
            NetworkEvent::Closed { session, error } => {
                debug!("Session {} transport ended: {}", session, error);
                self.state.disconnect(session, &error.to_string());
                self.writers.remove(&session);
            }
        }
    }

    /// Hands everything the state produced to the sockets
    async fn flush(&mut self) {
        for out in self.state.take_outgoing() {
            match out {
                Outgoing::Stream { session, frame } => {
                    if let Some(writer) = self.writers.get(&session) {
                        if writer.send(WriterCommand::Frame(frame)).is_err() {
                            debug!("Writer of session {} is gone", session);
                        }
                    }
                }
                Outgoing::Datagram { addr, payload } => {
                    if let Err(e) = self.socket.send_to(&payload, addr).await {
                        debug!("Datagram to {} failed: {}", addr, e);
                    }
                }
                Outgoing::Close { session } => {
                    if let Some(writer) = self.writers.remove(&session) {
                        let _ = writer.send(WriterCommand::Close);
                    }
                }
            }
        }
    }

    /// Main server loop: runs until the listener fails
    ///
    /// Frame `f` of a round is due `f` frame durations after the round
    /// started. Frames that fell behind are run back to back on wake-up.
    pub async fn run(&mut self) -> Result<(), TransportError> {
        let mut datagram = vec![0u8; MAX_PACKET_LEN];
        let mut epoch = Instant::now();
        let mut ticks: u32 = 0;

        info!("Server started successfully");

        loop {
            let next_tick = epoch + self.frame_duration * ticks;

            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, addr) = accepted?;
                    self.accept(stream, addr);
                },

                received = self.socket.recv_from(&mut datagram) => {
                    match received {
                        Ok((len, addr)) => self.state.handle_datagram(addr, &datagram[..len]),
                        Err(e) => debug!("Datagram receive failed: {}", e),
                    }
                },

                Some(event) = self.event_rx.recv() => {
                    self.handle_event(event);
                },

                _ = sleep_until(next_tick) => {
                    let now = Instant::now();
                    while epoch + self.frame_duration * ticks <= now {
                        if self.state.tick() == Tick::Started {
                            epoch = now;
                            ticks = 1;
                        } else {
                            ticks += 1;
                        }
                        self.flush().await;
                    }
                },
            }

            self.flush().await;
        }
    }
}

fn spawn_reader(session: SessionId, mut reader: OwnedReadHalf, events: mpsc::UnboundedSender<NetworkEvent>) {
    tokio::spawn(async move {
        let mut buffer = vec![0u8; 4096];

        let error = loop {
            match reader.read(&mut buffer).await {
                Ok(0) => break TransportError::Closed,
                Ok(len) => {
                    let data = Bytes::copy_from_slice(&buffer[..len]);
                    if events.send(NetworkEvent::Received { session, data }).is_err() {
                        return;
                    }
                }
                Err(e) => break TransportError::Io(e),
            }
        };

        let _ = events.send(NetworkEvent::Closed { session, error });
    });
}

fn spawn_writer(
    session: SessionId,
    mut writer: OwnedWriteHalf,
    mut commands: mpsc::UnboundedReceiver<WriterCommand>,
    events: mpsc::UnboundedSender<NetworkEvent>,
) {
    tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            match command {
                WriterCommand::Frame(frame) => {
                    if let Err(e) = writer.write_all(&frame).await {
                        error!("Failed to write to session {}: {}", session, e);
                        let _ = events.send(NetworkEvent::Closed {
                            session,
                            error: TransportError::Io(e),
                        });
                        return;
                    }
                }
                WriterCommand::Close => break,
            }
        }
        let _ = writer.shutdown().await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::framing::FrameDecoder;
    use shared::protocol::{RoundShape, ServerMessage};

    fn local_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            max_clients: 1,
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_bind_uses_one_port_for_both_channels() {
        let server = Server::bind(&local_config()).await.unwrap();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.socket.local_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let config = ServerConfig {
            fps: 0,
            ..local_config()
        };
        assert!(matches!(
            Server::bind(&config).await,
            Err(TransportError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_full_server_sends_disconnect() {
        let mut server = Server::bind(&local_config()).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move { server.run().await });

        let _first = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut second = TcpStream::connect(addr).await.unwrap();

        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 256];
        let payload = loop {
            let n = tokio::time::timeout(Duration::from_secs(2), second.read(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert!(n > 0, "connection closed before DISC");
            decoder.extend(&buf[..n]);
            if let Some(payload) = decoder.next_frame().unwrap() {
                break payload;
            }
        };

        assert_eq!(
            ServerMessage::decode(&payload, RoundShape::default()).unwrap(),
            ServerMessage::Disconnect {
                reason: "server full".to_string()
            }
        );
    }
}
