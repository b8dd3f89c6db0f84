use shared::framing::{frame, FrameDecoder};
use shared::movement::Move;
use shared::protocol::{
    ClientMessage, ClientMoves, Hello, PlayerIntro, RoundShape, ServerMessage, MAX_PACKET_LEN,
    PLAYER_FLAG_BOT,
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{sleep_until, Instant};

/// Joins a server as one bot that drives straight after its first turn and
/// prints what the server says. Usage: test_client [addr] [seconds]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let server_addr = args.next().unwrap_or_else(|| "127.0.0.1:12321".to_string());
    let seconds: u64 = match args.next() {
        Some(s) => s.parse()?,
        None => 10,
    };

    let mut stream = TcpStream::connect(&server_addr).await?;
    let local = stream.local_addr()?;
    let socket = UdpSocket::bind(local).await?;
    socket.connect(stream.peer_addr()?).await?;
    println!("Connected to {} from {}", server_addr, local);

    let hello = ClientMessage::Hello(Hello {
        players: vec![PlayerIntro {
            flags: PLAYER_FLAG_BOT,
            name: "tester".to_string(),
        }],
        client_flags: 0,
    });
    stream.write_all(&frame(&hello.encode())?).await?;

    let mut decoder = FrameDecoder::new();
    let mut shape = RoundShape::default();
    let mut game_id = None;
    let mut sent = 0u32;
    let mut buf = [0u8; 4096];
    let mut datagram = vec![0u8; MAX_PACKET_LEN];
    let deadline = Instant::now() + Duration::from_secs(seconds);

    loop {
        let payloads = tokio::select! {
            read = stream.read(&mut buf) => {
                let len = read?;
                if len == 0 {
                    println!("Server closed the connection");
                    return Ok(());
                }
                decoder.extend(&buf[..len]);
                let mut payloads = Vec::new();
                while let Some(payload) = decoder.next_frame()? {
                    payloads.push(payload.to_vec());
                }
                payloads
            },
            received = socket.recv(&mut datagram) => vec![datagram[..received?].to_vec()],
            _ = sleep_until(deadline) => break,
        };

        for payload in payloads {
            match ServerMessage::decode(&payload, shape) {
                Ok(ServerMessage::Start(start)) => {
                    shape = RoundShape {
                        players: start.players.len(),
                        backlog: usize::from(start.params.backlog),
                    };
                    game_id = Some(start.game_id);
                    sent = 0;
                    println!("Round {:08x} with {} players", start.game_id, start.players.len());
                    stream.write_all(&frame(&ClientMessage::Ready.encode())?).await?;
                }
                Ok(ServerMessage::Moves(moves)) => {
                    let id = match game_id {
                        Some(id) if id == moves.game_id => id,
                        _ => continue,
                    };
                    // stay one frame ahead of the server
                    let target = moves.frame + 1;
                    if target > sent {
                        sent = target;
                        let reply = ClientMessage::Moves(ClientMoves {
                            game_id: id,
                            timestamp: sent,
                            windows: vec![window(sent, shape.backlog)],
                        });
                        socket.send(&reply.encode()).await?;
                    }
                }
                Ok(ServerMessage::Chat { sender, text }) => {
                    println!("<{}> {}", sender.as_deref().unwrap_or("server"), text)
                }
                Ok(ServerMessage::Scores(scores)) => println!("Scores: {:?}", scores),
                Ok(ServerMessage::FastForward(ff)) => {
                    println!("Fast-forward to frame {} ({} logs)", ff.frame, ff.logs.len())
                }
                Ok(ServerMessage::Disconnect { reason }) => {
                    println!("Disconnected: {}", reason);
                    return Ok(());
                }
                Err(e) => println!("Failed to decode server message: {}", e),
            }
        }
    }

    stream.write_all(&frame(&ClientMessage::Quit.encode())?).await?;
    println!("Test client finished");
    Ok(())
}

/// Window ending just before `timestamp`: one left turn at frame 0 so the
/// warm-up idle check passes, straight ahead otherwise.
fn window(timestamp: u32, backlog: usize) -> Vec<Move> {
    let first = i64::from(timestamp) - backlog as i64;
    (0..backlog as i64)
        .map(|i| if first + i == 0 { Move::TurnLeft } else { Move::Forward })
        .collect()
}
