//! Client-side copy of the authoritative round.
//!
//! A replica is built from a round start message and then fed the
//! authoritative move windows (and, for late joiners, one fast-forward
//! message). It steps every trail with [`Trail::step`], so its trail field
//! converges on the server's field cell for cell. Deaths are never decided
//! locally: a player only dies when the server says so with a
//! [`Move::Dead`] entry or a dead marker.

use crate::field::Field;
use crate::movement::{Move, MoveError, Position};
use crate::params::GameParams;
use crate::protocol::{FastForward, Rgb, RoundShape, ScoreLine, ServerMoves, StartRound};
use crate::trail::{Arena, Step, Trail};
use log::debug;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayError {
    #[error("moves for game {got:#010x} while playing {expected:#010x}")]
    WrongGame { expected: u32, got: u32 },
    #[error("expected data for {expected} players, got {got}")]
    PlayerCount { expected: usize, got: usize },
    #[error("no player at index {0}")]
    UnknownPlayer(usize),
    #[error("player {player} is at frame {have} but the window starts at {window_start}")]
    Gap {
        player: usize,
        have: u32,
        window_start: i64,
    },
    #[error(transparent)]
    Move(#[from] MoveError),
}

#[derive(Debug, Clone)]
pub struct ReplicaPlayer {
    pub name: String,
    pub color: Rgb,
    pub start: Position,
    trail: Trail,
    alive: bool,
}

impl ReplicaPlayer {
    pub fn trail(&self) -> &Trail {
        &self.trail
    }

    pub fn position(&self) -> &Position {
        self.trail.position()
    }

    pub fn timestamp(&self) -> u32 {
        self.trail.timestamp()
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }
}

#[derive(Debug, Clone)]
pub struct Replica {
    params: GameParams,
    game_id: u32,
    players: Vec<ReplicaPlayer>,
    arena: Arena,
    frame: u32,
    scores: Vec<ScoreLine>,
}

impl Replica {
    pub fn new(start: &StartRound) -> Self {
        let players = start
            .players
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let position = entry.position();
                ReplicaPlayer {
                    name: entry.name.clone(),
                    color: entry.color,
                    start: position,
                    trail: Trail::new(index as u8, position, start.game_id),
                    alive: true,
                }
            })
            .collect();

        Self {
            params: start.params,
            game_id: start.game_id,
            players,
            arena: Arena::new(),
            frame: 0,
            scores: Vec::new(),
        }
    }

    pub fn params(&self) -> &GameParams {
        &self.params
    }

    pub fn game_id(&self) -> u32 {
        self.game_id
    }

    /// Latest authoritative frame seen.
    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn players(&self) -> &[ReplicaPlayer] {
        &self.players
    }

    pub fn player(&self, index: usize) -> Option<&ReplicaPlayer> {
        self.players.get(index)
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn field(&self) -> &Field {
        self.arena.trails()
    }

    pub fn scores(&self) -> &[ScoreLine] {
        &self.scores
    }

    pub fn set_scores(&mut self, scores: Vec<ScoreLine>) {
        self.scores = scores;
    }

    pub fn alive_count(&self) -> usize {
        self.players.iter().filter(|p| p.alive).count()
    }

    pub fn shape(&self) -> RoundShape {
        RoundShape {
            players: self.players.len(),
            backlog: self.params.backlog_len(),
        }
    }

    /// Applies one authoritative move to the player at `index`.
    pub fn apply(&mut self, index: usize, mv: Move) -> Result<Option<Step>, ReplayError> {
        let frame = self.frame;
        let player = self
            .players
            .get_mut(index)
            .ok_or(ReplayError::UnknownPlayer(index))?;
        if !player.alive {
            return Ok(None);
        }

        match mv {
            Move::Dead => {
                player.alive = false;
                player.trail.pin_to(frame);
                debug!("Replica: {} died at frame {}", player.name, player.trail.timestamp());
                Ok(None)
            }
            other => Ok(Some(player.trail.step(other, &self.params, &mut self.arena)?)),
        }
    }

    /// Replays a fast-forward message on a fresh replica.
    pub fn fast_forward(&mut self, ff: &FastForward) -> Result<(), ReplayError> {
        if ff.logs.len() != self.players.len() {
            return Err(ReplayError::PlayerCount {
                expected: self.players.len(),
                got: ff.logs.len(),
            });
        }

        for (index, log) in ff.logs.iter().enumerate() {
            for mv in log.moves() {
                self.apply(index, mv)?;
            }
        }

        self.frame = self.frame.max(ff.frame);
        for (index, log) in ff.logs.iter().enumerate() {
            if log.is_dead() {
                self.apply(index, Move::Dead)?;
            }
        }
        Ok(())
    }

    /// Applies every not yet known move of an authoritative MOVE message.
    ///
    /// Slot `k` of a window holds the move for frame `frame - backlog + k`.
    /// Slots before a player's own timestamp are already known and skipped;
    /// an unknown slot past the timestamp means the player has not reached
    /// that frame yet.
    pub fn apply_moves(&mut self, moves: &ServerMoves) -> Result<(), ReplayError> {
        if moves.game_id != self.game_id {
            return Err(ReplayError::WrongGame {
                expected: self.game_id,
                got: moves.game_id,
            });
        }
        if moves.windows.len() != self.players.len() {
            return Err(ReplayError::PlayerCount {
                expected: self.players.len(),
                got: moves.windows.len(),
            });
        }

        self.frame = self.frame.max(moves.frame);
        let window_start = i64::from(moves.frame) - self.params.backlog_len() as i64;

        for (index, window) in moves.windows.iter().enumerate() {
            if !self.players[index].alive {
                continue;
            }
            let window = match window {
                Some(window) => window,
                None => {
                    // Dead for longer than the window reaches back
                    self.apply(index, Move::Dead)?;
                    continue;
                }
            };

            let have = self.players[index].timestamp();
            if window_start > i64::from(have) {
                if window.contains(&Move::Dead) {
                    self.apply(index, Move::Dead)?;
                    continue;
                }
                return Err(ReplayError::Gap {
                    player: index,
                    have,
                    window_start,
                });
            }

            let skip = (i64::from(have) - window_start) as usize;
            for &mv in window.iter().skip(skip) {
                match mv {
                    Move::None => break,
                    Move::Dead => {
                        self.apply(index, Move::Dead)?;
                        break;
                    }
                    steering => {
                        self.apply(index, steering)?;
                    }
                }
            }
        }
        Ok(())
    }
}
