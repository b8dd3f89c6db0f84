//! Wire messages for both channels.
//!
//! Every message starts with a one byte tag followed by a fixed layout of
//! big-endian integers, length-prefixed names and free text. Messages from
//! clients and from the server use disjoint tag ranges so either side can
//! reject traffic that was never meant for it.

use crate::fast_forward::FastForwardLog;
use crate::movement::{Move, MoveError, Position};
use crate::params::{GameParams, ParamError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashSet;
use thiserror::Error;

pub const PROTOCOL_VERSION: u8 = 1;

/// Largest payload accepted on either channel.
pub const MAX_PACKET_LEN: usize = 16384;
pub const MAX_NAME_LEN: usize = 20;
pub const MAX_CHAT_LEN: usize = 255;
pub const MAX_PLAYERS_PER_CLIENT: usize = 4;

/// HELO client flag: route all server traffic over the reliable stream.
pub const CLIENT_FLAG_RELIABLE_ONLY: u8 = 0x01;
/// HELO player flag: the player is driven by a program.
pub const PLAYER_FLAG_BOT: u8 = 0x01;

pub mod tag {
    pub const HELO: u8 = 0;
    pub const QUIT: u8 = 1;
    pub const CHAT: u8 = 2;
    pub const READY: u8 = 3;
    pub const CLIENT_MOVE: u8 = 128;

    pub const MESG: u8 = 64;
    pub const DISC: u8 = 65;
    pub const STRT: u8 = 66;
    pub const SCOR: u8 = 67;
    pub const FFWD: u8 = 68;
    pub const SERVER_MOVE: u8 = 192;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty packet")]
    Empty,
    #[error("({0}) truncated packet")]
    Truncated(&'static str),
    #[error("({what}) {extra} unexpected trailing bytes")]
    TrailingBytes { what: &'static str, extra: usize },
    #[error("invalid packet type {0}")]
    UnknownTag(u8),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("({what}) invalid move {value}")]
    InvalidMove { what: &'static str, value: u8 },
    #[error("invalid name: {0}")]
    InvalidName(&'static str),
    #[error("name \"{0}\" is already taken")]
    DuplicateName(String),
    #[error("no players given")]
    NoPlayers,
    #[error("too many players ({count} > {max})")]
    TooManyPlayers { count: usize, max: usize },
    #[error("packet too large ({len} > {max})")]
    Oversized { len: usize, max: usize },
    #[error("packet too small")]
    Undersized,
    #[error("({what}) expected {expected} move windows, got {got}")]
    WindowCount {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("invalid compressed move {0:#04x}")]
    InvalidRun(u8),
    #[error(transparent)]
    InvalidParams(#[from] ParamError),
}

/// Big-endian cursor over a received payload. Every read is bounds
/// checked and names the message being parsed in its error.
pub struct Reader<'a> {
    data: &'a [u8],
    what: &'static str,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8], what: &'static str) -> Self {
        Self { data, what }
    }

    pub fn remaining(&self) -> usize {
        self.data.len()
    }

    pub fn has_remaining(&self) -> bool {
        !self.data.is_empty()
    }

    fn ensure(&self, n: usize) -> Result<(), ProtocolError> {
        if self.data.len() < n {
            Err(ProtocolError::Truncated(self.what))
        } else {
            Ok(())
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        self.ensure(1)?;
        Ok(self.data.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        self.ensure(2)?;
        Ok(self.data.get_u16())
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        self.ensure(4)?;
        Ok(self.data.get_u32())
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        self.ensure(n)?;
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    /// Reads a `u8` length followed by that many bytes.
    pub fn read_short_bytes(&mut self) -> Result<&'a [u8], ProtocolError> {
        let len = self.read_u8()?;
        self.read_bytes(usize::from(len))
    }

    /// Reads up to (not including) the next zero byte and skips the zero.
    pub fn read_until_zero(&mut self) -> Result<&'a [u8], ProtocolError> {
        let end = self
            .data
            .iter()
            .position(|&b| b == 0)
            .ok_or(ProtocolError::Truncated(self.what))?;
        let head = self.read_bytes(end)?;
        self.data.advance(1);
        Ok(head)
    }

    pub fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.data)
    }

    pub fn finish(self) -> Result<(), ProtocolError> {
        if self.data.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::TrailingBytes {
                what: self.what,
                extra: self.data.len(),
            })
        }
    }
}

/// Checks a player name: 1..=20 printable ASCII characters without
/// leading or trailing spaces.
pub fn validate_name(raw: &[u8]) -> Result<String, ProtocolError> {
    if raw.is_empty() {
        return Err(ProtocolError::InvalidName("name is empty"));
    }
    if raw.len() > MAX_NAME_LEN {
        return Err(ProtocolError::InvalidName("name is too long"));
    }
    if raw.iter().any(|&c| !(32..=126).contains(&c)) {
        return Err(ProtocolError::InvalidName("name contains invalid characters"));
    }
    if raw[0] == b' ' || raw[raw.len() - 1] == b' ' {
        return Err(ProtocolError::InvalidName("name has leading or trailing space"));
    }
    Ok(raw.iter().map(|&c| char::from(c)).collect())
}

/// Truncates chat text and replaces anything unprintable with spaces.
pub fn sanitize_text(raw: &[u8]) -> String {
    raw.iter()
        .take(MAX_CHAT_LEN)
        .map(|&c| if (32..=126).contains(&c) { char::from(c) } else { ' ' })
        .collect()
}

fn put_short_str(buf: &mut BytesMut, s: &str) {
    let bytes = &s.as_bytes()[..s.len().min(255)];
    buf.put_u8(bytes.len() as u8);
    buf.put_slice(bytes);
}

fn decode_window(
    bytes: &[u8],
    what: &'static str,
    accept: impl Fn(Move) -> bool,
) -> Result<Vec<Move>, ProtocolError> {
    bytes
        .iter()
        .map(|&value| match Move::try_from(value) {
            Ok(mv) if accept(mv) => Ok(mv),
            _ => Err(ProtocolError::InvalidMove { what, value }),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerIntro {
    pub flags: u8,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub players: Vec<PlayerIntro>,
    pub client_flags: u8,
}

impl Hello {
    pub fn reliable_only(&self) -> bool {
        self.client_flags & CLIENT_FLAG_RELIABLE_ONLY != 0
    }
}

/// Client moves: for each controlled player in the round, the last
/// `backlog` moves ending just before `timestamp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMoves {
    pub game_id: u32,
    pub timestamp: u32,
    pub windows: Vec<Vec<Move>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Hello(Hello),
    Quit,
    Chat { name: String, text: String },
    Ready,
    Moves(ClientMoves),
}

impl ClientMessage {
    pub fn tag(&self) -> u8 {
        match self {
            ClientMessage::Hello(_) => tag::HELO,
            ClientMessage::Quit => tag::QUIT,
            ClientMessage::Chat { .. } => tag::CHAT,
            ClientMessage::Ready => tag::READY,
            ClientMessage::Moves(_) => tag::CLIENT_MOVE,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(self.tag());
        match self {
            ClientMessage::Hello(hello) => {
                buf.put_u8(PROTOCOL_VERSION);
                buf.put_u8(hello.players.len() as u8);
                for player in &hello.players {
                    buf.put_u8(player.flags);
                    put_short_str(&mut buf, &player.name);
                }
                buf.put_u8(hello.client_flags);
            }
            ClientMessage::Quit | ClientMessage::Ready => {}
            ClientMessage::Chat { name, text } => {
                put_short_str(&mut buf, name);
                buf.put_slice(text.as_bytes());
            }
            ClientMessage::Moves(moves) => {
                buf.put_u32(moves.game_id);
                buf.put_u32(moves.timestamp);
                for window in &moves.windows {
                    buf.extend(window.iter().map(|&mv| u8::from(mv)));
                }
            }
        }
        buf.freeze()
    }

    /// Decodes a client payload. `backlog` is the window length of the
    /// current round and is only consulted for MOVE.
    pub fn decode(payload: &[u8], backlog: usize) -> Result<Self, ProtocolError> {
        let (&tag, body) = payload.split_first().ok_or(ProtocolError::Empty)?;
        match tag {
            tag::HELO => decode_hello(body).map(ClientMessage::Hello),
            tag::QUIT => Reader::new(body, "QUIT").finish().map(|_| ClientMessage::Quit),
            tag::READY => Reader::new(body, "READY").finish().map(|_| ClientMessage::Ready),
            tag::CHAT => {
                let mut reader = Reader::new(body, "CHAT");
                let name = String::from_utf8_lossy(reader.read_short_bytes()?).into_owned();
                let text = sanitize_text(reader.rest());
                Ok(ClientMessage::Chat { name, text })
            }
            tag::CLIENT_MOVE => {
                let mut reader = Reader::new(body, "MOVE");
                let game_id = reader.read_u32()?;
                let timestamp = reader.read_u32()?;
                let rest = reader.rest();
                if backlog == 0 || rest.len() % backlog != 0 {
                    return Err(ProtocolError::Truncated("MOVE"));
                }
                let windows = rest
                    .chunks(backlog)
                    .map(|chunk| decode_window(chunk, "MOVE", Move::is_steering))
                    .collect::<Result<_, _>>()?;
                Ok(ClientMessage::Moves(ClientMoves {
                    game_id,
                    timestamp,
                    windows,
                }))
            }
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}

fn decode_hello(body: &[u8]) -> Result<Hello, ProtocolError> {
    let mut reader = Reader::new(body, "HELO");
    let version = reader.read_u8()?;
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    let count = usize::from(reader.read_u8()?);
    if count == 0 {
        return Err(ProtocolError::NoPlayers);
    }
    if count > MAX_PLAYERS_PER_CLIENT {
        return Err(ProtocolError::TooManyPlayers {
            count,
            max: MAX_PLAYERS_PER_CLIENT,
        });
    }

    let mut players = Vec::with_capacity(count);
    let mut seen = HashSet::new();
    for _ in 0..count {
        let flags = reader.read_u8()?;
        let name = validate_name(reader.read_short_bytes()?)?;
        if !seen.insert(name.clone()) {
            return Err(ProtocolError::DuplicateName(name));
        }
        players.push(PlayerIntro { flags, name });
    }

    let client_flags = if reader.has_remaining() { reader.read_u8()? } else { 0 };
    reader.finish()?;

    Ok(Hello {
        players,
        client_flags,
    })
}

/// One roster entry of a round start message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartEntry {
    pub color: Rgb,
    pub x: u16,
    pub y: u16,
    pub angle: u16,
    pub name: String,
}

impl StartEntry {
    pub fn position(&self) -> Position {
        Position::from_fixed(self.x, self.y, self.angle)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRound {
    pub params: GameParams,
    pub game_id: u32,
    pub players: Vec<StartEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScoreLine {
    pub total: u16,
    pub current: u16,
    pub moving_sum: u16,
    pub holes: u8,
}

/// Authoritative moves: for each roster player still worth listing, the
/// last `backlog` moves ending just before `frame`. Slots the player has
/// not reached yet hold [`Move::None`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMoves {
    pub game_id: u32,
    pub frame: u32,
    pub windows: Vec<Option<Vec<Move>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastForward {
    pub frame: u32,
    pub logs: Vec<FastForwardLog>,
}

impl FastForward {
    /// Tag and frame number ahead of the logs.
    const HEADER_LEN: usize = 5;

    /// Builds a fast-forward whose payload always fits in
    /// [`MAX_PACKET_LEN`]: every log gets an equal share of the space and
    /// longer ones are cut short.
    pub fn bounded<'a>(frame: u32, logs: impl ExactSizeIterator<Item = &'a FastForwardLog>) -> Self {
        let share = (MAX_PACKET_LEN - Self::HEADER_LEN) / logs.len().max(1);
        Self {
            frame,
            logs: logs.map(|log| log.bounded(share)).collect(),
        }
    }
}

/// Roster size and window length a receiver needs to split MOVE payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoundShape {
    pub players: usize,
    pub backlog: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Chat line; `sender` is `None` for server notices.
    Chat { sender: Option<String>, text: String },
    Disconnect { reason: String },
    Start(StartRound),
    Scores(Vec<ScoreLine>),
    FastForward(FastForward),
    Moves(ServerMoves),
}

impl ServerMessage {
    pub fn notice(text: impl Into<String>) -> Self {
        ServerMessage::Chat {
            sender: None,
            text: text.into(),
        }
    }

    pub fn tag(&self) -> u8 {
        match self {
            ServerMessage::Chat { .. } => tag::MESG,
            ServerMessage::Disconnect { .. } => tag::DISC,
            ServerMessage::Start(_) => tag::STRT,
            ServerMessage::Scores(_) => tag::SCOR,
            ServerMessage::FastForward(_) => tag::FFWD,
            ServerMessage::Moves(_) => tag::SERVER_MOVE,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(128);
        buf.put_u8(self.tag());
        match self {
            ServerMessage::Chat { sender, text } => {
                put_short_str(&mut buf, sender.as_deref().unwrap_or(""));
                buf.put_slice(text.as_bytes());
            }
            ServerMessage::Disconnect { reason } => buf.put_slice(reason.as_bytes()),
            ServerMessage::Start(start) => {
                let p = &start.params;
                buf.put_u8(p.fps);
                buf.put_u8(p.turn_rate);
                buf.put_u8(p.move_rate);
                buf.put_u8(p.line_width);
                buf.put_u8(p.warmup);
                buf.put_u8(p.score_rounds);
                buf.put_u16(p.hole_probability);
                buf.put_u8(p.hole_length_min);
                buf.put_u8(p.hole_range());
                buf.put_u8(p.hole_cooldown);
                buf.put_u8(p.backlog);
                buf.put_u8(start.players.len() as u8);
                buf.put_u32(start.game_id);
                for entry in &start.players {
                    buf.put_u8(entry.color.r);
                    buf.put_u8(entry.color.g);
                    buf.put_u8(entry.color.b);
                    buf.put_u16(entry.x);
                    buf.put_u16(entry.y);
                    buf.put_u16(entry.angle);
                    put_short_str(&mut buf, &entry.name);
                }
            }
            ServerMessage::Scores(lines) => {
                for line in lines {
                    buf.put_u16(line.total);
                    buf.put_u16(line.current);
                    buf.put_u16(line.moving_sum);
                    buf.put_u8(line.holes);
                    buf.put_u8(0);
                }
            }
            ServerMessage::FastForward(ff) => {
                buf.put_u32(ff.frame);
                for log in &ff.logs {
                    log.encode_into(&mut buf);
                }
            }
            ServerMessage::Moves(moves) => {
                buf.put_u32(moves.game_id);
                buf.put_u32(moves.frame);
                for window in &moves.windows {
                    buf.put_u8(u8::from(window.is_some()));
                }
                for window in moves.windows.iter().flatten() {
                    buf.extend(window.iter().map(|&mv| u8::from(mv)));
                }
            }
        }
        buf.freeze()
    }

    /// Decodes a server payload. MOVE needs the roster shape announced by
    /// the preceding STRT.
    pub fn decode(payload: &[u8], shape: RoundShape) -> Result<Self, ProtocolError> {
        let (&tag, body) = payload.split_first().ok_or(ProtocolError::Empty)?;
        match tag {
            tag::MESG => {
                let mut reader = Reader::new(body, "MESG");
                let name = reader.read_short_bytes()?;
                let sender = if name.is_empty() {
                    None
                } else {
                    Some(String::from_utf8_lossy(name).into_owned())
                };
                let text = String::from_utf8_lossy(reader.rest()).into_owned();
                Ok(ServerMessage::Chat { sender, text })
            }
            tag::DISC => Ok(ServerMessage::Disconnect {
                reason: String::from_utf8_lossy(body).into_owned(),
            }),
            tag::STRT => decode_start(body).map(ServerMessage::Start),
            tag::SCOR => {
                if body.len() % 8 != 0 {
                    return Err(ProtocolError::Truncated("SCOR"));
                }
                let mut reader = Reader::new(body, "SCOR");
                let mut lines = Vec::with_capacity(body.len() / 8);
                while reader.has_remaining() {
                    let line = ScoreLine {
                        total: reader.read_u16()?,
                        current: reader.read_u16()?,
                        moving_sum: reader.read_u16()?,
                        holes: reader.read_u8()?,
                    };
                    reader.read_u8()?;
                    lines.push(line);
                }
                Ok(ServerMessage::Scores(lines))
            }
            tag::FFWD => {
                let mut reader = Reader::new(body, "FFWD");
                let frame = reader.read_u32()?;
                let mut logs = Vec::new();
                while reader.has_remaining() {
                    logs.push(FastForwardLog::decode(reader.read_until_zero()?)?);
                }
                Ok(ServerMessage::FastForward(FastForward { frame, logs }))
            }
            tag::SERVER_MOVE => {
                let mut reader = Reader::new(body, "MOVE");
                let game_id = reader.read_u32()?;
                let frame = reader.read_u32()?;
                let flags = reader.read_bytes(shape.players)?;
                let mut windows = Vec::with_capacity(shape.players);
                for &flag in flags {
                    if flag == 0 {
                        windows.push(None);
                    } else {
                        let bytes = reader.read_bytes(shape.backlog)?;
                        windows.push(Some(decode_window(bytes, "MOVE", |_| true)?));
                    }
                }
                reader.finish()?;
                Ok(ServerMessage::Moves(ServerMoves {
                    game_id,
                    frame,
                    windows,
                }))
            }
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}

fn decode_start(body: &[u8]) -> Result<StartRound, ProtocolError> {
    let mut reader = Reader::new(body, "STRT");
    let fps = reader.read_u8()?;
    let turn_rate = reader.read_u8()?;
    let move_rate = reader.read_u8()?;
    let line_width = reader.read_u8()?;
    let warmup = reader.read_u8()?;
    let score_rounds = reader.read_u8()?;
    let hole_probability = reader.read_u16()?;
    let hole_length_min = reader.read_u8()?;
    let hole_range = reader.read_u8()?;
    let hole_cooldown = reader.read_u8()?;
    let backlog = reader.read_u8()?;

    let params = GameParams {
        fps,
        turn_rate,
        move_rate,
        line_width,
        warmup,
        score_rounds,
        hole_probability,
        hole_length_min,
        hole_length_max: hole_length_min.saturating_add(hole_range),
        hole_cooldown,
        backlog,
    };
    params.validate()?;

    let count = usize::from(reader.read_u8()?);
    let game_id = reader.read_u32()?;
    let mut players = Vec::with_capacity(count);
    for _ in 0..count {
        let color = Rgb::new(reader.read_u8()?, reader.read_u8()?, reader.read_u8()?);
        let x = reader.read_u16()?;
        let y = reader.read_u16()?;
        let angle = reader.read_u16()?;
        let name = validate_name(reader.read_short_bytes()?)?;
        players.push(StartEntry {
            color,
            x,
            y,
            angle,
            name,
        });
    }
    reader.finish()?;

    Ok(StartRound {
        params,
        game_id,
        players,
    })
}
