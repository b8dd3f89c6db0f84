//! Deterministic per-player stepping shared by the server and replicas.
//!
//! Every participant that wants to know what the field looks like runs
//! the exact same [`Trail::step`] over the exact same moves: the server
//! when it applies queued client input, a client when it replays MOVE
//! windows or a fast-forward log. Anything that influences the field has
//! to live here so the two sides cannot drift apart.

use crate::field::{Field, Fill, HOLE_PROBE_WIDTH};
use crate::movement::{advance, Move, MoveError, Position};
use crate::params::GameParams;
use crate::rng::Mwc;

/// Trail and hole layers of one round plus the hole id counter.
#[derive(Debug, Clone, Default)]
pub struct Arena {
    trails: Field,
    holes: Field,
    holes_made: u32,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.trails.clear();
        self.holes.clear();
        self.holes_made = 0;
    }

    pub fn trails(&self) -> &Field {
        &self.trails
    }

    pub fn holes(&self) -> &Field {
        &self.holes
    }

    /// Hands out hole ids 1..=255, wrapping.
    pub fn next_hole_id(&mut self) -> u8 {
        let id = 1 + (self.holes_made % 255) as u8;
        self.holes_made = self.holes_made.wrapping_add(1);
        id
    }
}

/// Outcome of one applied move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    pub from: Position,
    pub to: Position,
    /// Largest trail value under the new segment; non-zero is fatal.
    pub collision: u16,
    /// Largest hole id under the new segment.
    pub hole_hit: u16,
    /// The player reached the end of warm-up without ever turning.
    pub idle: bool,
}

impl Step {
    pub fn collided(&self) -> bool {
        self.collision != 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trail {
    index: u8,
    position: Position,
    timestamp: u32,
    rng: Mwc,
    hole_remaining: u32,
    solid_since: u32,
    hole_id: u8,
    turned_in_warmup: bool,
}

impl Trail {
    /// Fresh trail for roster slot `index` of round `game_id`.
    pub fn new(index: u8, start: Position, game_id: u32) -> Self {
        Self {
            index,
            position: start,
            timestamp: 0,
            rng: Mwc::seeded(game_id, u32::from(index)),
            hole_remaining: 0,
            solid_since: 0,
            hole_id: 0,
            turned_in_warmup: false,
        }
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    /// Number of moves applied so far, i.e. the frame of the next move.
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn rng(&self) -> &Mwc {
        &self.rng
    }

    pub fn in_hole(&self) -> bool {
        self.hole_remaining > 0
    }

    pub fn hole_remaining(&self) -> u32 {
        self.hole_remaining
    }

    /// Counts a frame without moving, used once the player is dead.
    pub fn skip_frame(&mut self) {
        self.timestamp += 1;
    }

    /// Skips frames until the timestamp reaches `frame`.
    pub fn pin_to(&mut self, frame: u32) {
        if self.timestamp < frame {
            self.timestamp = frame;
        }
    }

    /// Moves the trail forward by one frame.
    ///
    /// Hole onset is decided from the generator output before it advances.
    /// During warm-up the heading may change but the position does not and
    /// nothing is drawn. Afterwards the new segment is painted into the
    /// trail layer (probed only while a hole is open) and the hole layer is
    /// probed (overwritten with the hole id while a hole is open).
    pub fn step(&mut self, mv: Move, params: &GameParams, arena: &mut Arena) -> Result<Step, MoveError> {
        if !mv.is_steering() {
            return Err(MoveError::NotSteering(mv));
        }

        let ts = self.timestamp;
        let warmup = u32::from(params.warmup);
        let cooldown = u32::from(params.hole_cooldown);
        let probability = u32::from(params.hole_probability.max(1));
        let base = self.rng.base();

        if self.hole_remaining == 0
            && ts >= warmup + cooldown
            && ts.saturating_sub(self.solid_since) >= cooldown
            && base % probability == 0
        {
            self.hole_remaining = u32::from(params.hole_length_min)
                + (base / probability) % (u32::from(params.hole_range()) + 1);
            self.hole_id = arena.next_hole_id();
        }

        let moving = ts >= warmup;
        if !moving && mv.is_turn() {
            self.turned_in_warmup = true;
        }

        let from = self.position;
        let rate = if moving { params.move_step() } else { 0.0 };
        let to = advance(&from, mv, rate, params.turn_angle())?;

        let mut collision = 0;
        let mut hole_hit = 0;
        if moving {
            let (trail_fill, hole_fill) = if self.in_hole() {
                (Fill::Probe, Fill::Overwrite(self.hole_id))
            } else {
                (Fill::Paint(self.index + 1), Fill::Probe)
            };
            collision = arena
                .trails
                .draw_segment(&from, &to, params.line_thickness(), trail_fill);
            hole_hit = arena
                .holes
                .draw_segment(&from, &to, HOLE_PROBE_WIDTH, hole_fill);
        }

        self.position = to;
        if self.hole_remaining > 0 {
            self.hole_remaining -= 1;
            self.solid_since = ts + 1;
        }

        let idle = ts + 1 == warmup && !self.turned_in_warmup;
        self.timestamp = ts + 1;
        self.rng.advance();

        Ok(Step {
            from,
            to,
            collision,
            hole_hit,
            idle,
        })
    }
}
