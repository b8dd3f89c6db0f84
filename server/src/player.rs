//! Server-side player state: identity, score and the per-round move
//! pipeline (queue, applied-move history, fast-forward log).

use shared::fast_forward::FastForwardLog;
use shared::field::OUTSIDE;
use shared::movement::{Move, MoveError};
use shared::params::GameParams;
use shared::protocol::{Rgb, ScoreLine, PLAYER_FLAG_BOT};
use shared::trail::{Arena, Step, Trail};
use std::collections::VecDeque;
use thiserror::Error;

pub type PlayerId = u32;
pub type SessionId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("move queue is full ({capacity} moves)")]
pub struct QueueFull {
    pub capacity: usize,
}

/// Reasons a MOVE message forces the server to give up on a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Desync {
    #[error("{added} new moves exceed the backlog of {backlog}")]
    TooFarAhead { added: u32, backlog: usize },
    #[error(transparent)]
    QueueFull(#[from] QueueFull),
}

/// Moves received from the client but not yet applied.
#[derive(Debug, Clone)]
pub struct MoveQueue {
    moves: VecDeque<Move>,
    capacity: usize,
}

impl MoveQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            moves: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queues all of `moves` or none of them.
    pub fn push_all(&mut self, moves: &[Move]) -> Result<(), QueueFull> {
        if self.moves.len() + moves.len() > self.capacity {
            return Err(QueueFull {
                capacity: self.capacity,
            });
        }
        self.moves.extend(moves.iter().copied());
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Move> {
        self.moves.pop_front()
    }

    pub fn clear(&mut self) {
        self.moves.clear();
    }
}

/// Running score of a player across rounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Score {
    pub total: u16,
    pub moving_sum: u16,
    pub holes_passed: u8,
    /// Points per round, most recent first.
    history: VecDeque<u16>,
}

impl Score {
    pub fn new(rounds: usize) -> Self {
        Self {
            total: 0,
            moving_sum: 0,
            holes_passed: 0,
            history: std::iter::repeat(0).take(rounds.max(1)).collect(),
        }
    }

    /// Points scored in the current round.
    pub fn current(&self) -> u16 {
        self.history.front().copied().unwrap_or(0)
    }

    pub fn award(&mut self) {
        self.total = self.total.wrapping_add(1);
        self.moving_sum = self.moving_sum.wrapping_add(1);
        if let Some(current) = self.history.front_mut() {
            *current = current.wrapping_add(1);
        }
    }

    pub fn hole_crossed(&mut self) {
        self.holes_passed = self.holes_passed.saturating_add(1);
    }

    /// Drops the oldest round from the moving sum and opens a new one.
    pub fn end_round(&mut self) {
        if let Some(oldest) = self.history.pop_back() {
            self.moving_sum = self.moving_sum.wrapping_sub(oldest);
        }
        self.history.push_front(0);
        self.holes_passed = 0;
    }

    pub fn line(&self) -> ScoreLine {
        ScoreLine {
            total: self.total,
            current: self.current(),
            moving_sum: self.moving_sum,
            holes: self.holes_passed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Player {
    id: PlayerId,
    session: SessionId,
    name: String,
    flags: u8,
    color: Option<Rgb>,
    connected: bool,
    score: Score,

    index: Option<u8>,
    trail: Option<Trail>,
    dead_since: Option<u32>,
    death_reported: bool,
    queue: MoveQueue,
    history: VecDeque<Move>,
    log: FastForwardLog,
    crossed_hole: u8,
}

impl Player {
    pub fn new(id: PlayerId, session: SessionId, name: String, flags: u8, params: &GameParams) -> Self {
        Self {
            id,
            session,
            name,
            flags,
            color: None,
            connected: true,
            score: Score::new(usize::from(params.score_rounds)),
            index: None,
            trail: None,
            dead_since: None,
            death_reported: false,
            queue: MoveQueue::new(params.backlog_len()),
            history: VecDeque::with_capacity(params.backlog_len()),
            log: FastForwardLog::new(),
            crossed_hole: 0,
        }
    }

    pub fn id(&self) -> PlayerId {
        self.id
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn is_bot(&self) -> bool {
        self.flags & PLAYER_FLAG_BOT != 0
    }

    pub fn color(&self) -> Option<Rgb> {
        self.color
    }

    pub fn set_color(&mut self, color: Rgb) {
        self.color = Some(color);
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn mark_disconnected(&mut self) {
        self.connected = false;
    }

    pub fn score(&self) -> &Score {
        &self.score
    }

    pub fn score_mut(&mut self) -> &mut Score {
        &mut self.score
    }

    /// Roster slot in the current round, if the player takes part.
    pub fn index(&self) -> Option<u8> {
        self.index
    }

    pub fn trail(&self) -> Option<&Trail> {
        self.trail.as_ref()
    }

    /// Frame of the next move to apply.
    pub fn timestamp(&self) -> u32 {
        self.trail.as_ref().map_or(0, Trail::timestamp)
    }

    pub fn dead_since(&self) -> Option<u32> {
        self.dead_since
    }

    pub fn is_alive(&self) -> bool {
        self.trail.is_some() && self.dead_since.is_none()
    }

    pub fn queue(&self) -> &MoveQueue {
        &self.queue
    }

    pub fn log(&self) -> &FastForwardLog {
        &self.log
    }

    /// Resets all per-round state for roster slot `index`.
    pub fn begin_round(&mut self, index: u8, trail: Trail) {
        self.index = Some(index);
        self.trail = Some(trail);
        self.dead_since = None;
        self.death_reported = false;
        self.queue.clear();
        self.history.clear();
        self.log.clear();
        self.crossed_hole = 0;
    }

    pub fn leave_round(&mut self) {
        self.index = None;
        self.trail = None;
        self.dead_since = None;
        self.queue.clear();
        self.history.clear();
        self.log.clear();
    }

    /// Queues the moves of a client window that the server has not seen
    /// yet. `timestamp` is the frame following the last move in `window`.
    ///
    /// Returns the number of queued moves; stale windows queue nothing.
    pub fn ingest(&mut self, timestamp: u32, window: &[Move]) -> Result<usize, Desync> {
        if !self.is_alive() {
            return Ok(0);
        }

        let known = self.timestamp() as usize + self.queue.len();
        let timestamp = timestamp as usize;
        if timestamp <= known {
            return Ok(0);
        }

        let added = timestamp - known;
        if added > window.len() {
            return Err(Desync::TooFarAhead {
                added: added as u32,
                backlog: window.len(),
            });
        }

        self.queue.push_all(&window[window.len() - added..])?;
        Ok(added)
    }

    pub fn pop_move(&mut self) -> Option<Move> {
        self.queue.pop()
    }

    /// Applies one move through the shared stepping code and records it.
    pub fn apply(&mut self, mv: Move, params: &GameParams, arena: &mut Arena) -> Result<Option<Step>, MoveError> {
        let trail = match self.trail.as_mut() {
            Some(trail) => trail,
            None => return Ok(None),
        };
        let step = trail.step(mv, params, arena)?;
        self.push_history(mv, params.backlog_len());
        self.log.push(mv)?;
        Ok(Some(step))
    }

    /// Tracks which hole the player's head is over. A crossing counts once
    /// the head moves off a hole, onto open ground or into another hole.
    /// Returns true when a crossing was counted.
    pub fn cross_hole(&mut self, hit: u16) -> bool {
        if hit >= OUTSIDE || hit as u8 == self.crossed_hole {
            return false;
        }
        let left = self.crossed_hole != 0;
        self.crossed_hole = hit as u8;
        if left {
            self.score.hole_crossed();
        }
        left
    }

    /// Marks the player dead at `frame`. Returns false if already dead.
    pub fn mark_dead(&mut self, frame: u32) -> bool {
        if self.dead_since.is_some() || self.trail.is_none() {
            return false;
        }
        self.dead_since = Some(frame);
        self.queue.clear();
        self.log.mark_dead();
        true
    }

    /// True exactly once after the player died.
    pub fn take_death_report(&mut self) -> bool {
        if self.dead_since.is_some() && !self.death_reported {
            self.death_reported = true;
            true
        } else {
            false
        }
    }

    /// Brings a dead player's timestamp up to `frame`, filling the history
    /// with [`Move::Dead`].
    pub fn pin_to(&mut self, frame: u32, backlog: usize) {
        if self.dead_since.is_none() {
            return;
        }
        let trail = match self.trail.as_mut() {
            Some(trail) => trail,
            None => return,
        };

        let gap = frame.saturating_sub(trail.timestamp()) as usize;
        let fill = gap.min(backlog);
        for _ in 0..fill {
            if self.history.len() == backlog {
                self.history.pop_front();
            }
            self.history.push_back(Move::Dead);
        }
        trail.pin_to(frame);
    }

    fn push_history(&mut self, mv: Move, backlog: usize) {
        if self.history.len() == backlog {
            self.history.pop_front();
        }
        self.history.push_back(mv);
    }

    /// Window of the last `backlog` frames ending just before `frame`, or
    /// `None` once the player has been dead for longer than that.
    pub fn window(&self, frame: u32, backlog: usize) -> Option<Vec<Move>> {
        if let Some(dead) = self.dead_since {
            if frame.saturating_sub(dead) as usize > backlog {
                return None;
            }
        }

        let ts = i64::from(self.timestamp());
        let known = self.history.len() as i64;
        let start = i64::from(frame) - backlog as i64;
        Some(
            (0..backlog as i64)
                .map(|i| {
                    let f = start + i;
                    if f >= ts || f < ts - known {
                        Move::None
                    } else {
                        self.history[(known - (ts - f)) as usize]
                    }
                })
                .collect(),
        )
    }
}
