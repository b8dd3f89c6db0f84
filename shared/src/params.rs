//! Round parameters announced in every round start message.

use crate::field::FIELD_SIZE;
use std::f64::consts::PI;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid game parameter: {0}")]
pub struct ParamError(pub &'static str);

/// Simulation constants shared by the server and every client for one
/// round. All values are small integers so they travel as single bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameParams {
    /// Simulated frames per second.
    pub fps: u8,
    /// A full turn is split into this many turning steps.
    pub turn_rate: u8,
    /// Distance per frame in thousandths of the field extent.
    pub move_rate: u8,
    /// Trail thickness in thousandths of the field extent.
    pub line_width: u8,
    /// Frames at the start of a round during which nobody moves forward.
    pub warmup: u8,
    /// Depth of the per-player score history.
    pub score_rounds: u8,
    /// One frame in this many may open a hole.
    pub hole_probability: u16,
    pub hole_length_min: u8,
    pub hole_length_max: u8,
    /// Minimum solid frames between holes.
    pub hole_cooldown: u8,
    /// Length of the move windows exchanged in MOVE messages.
    pub backlog: u8,
}

impl Default for GameParams {
    fn default() -> Self {
        Self {
            fps: 30,
            turn_rate: 48,
            move_rate: 6,
            line_width: 7,
            warmup: 90,
            score_rounds: 10,
            hole_probability: 60,
            hole_length_min: 3,
            hole_length_max: 8,
            hole_cooldown: 10,
            backlog: 60,
        }
    }
}

impl GameParams {
    pub fn turn_angle(&self) -> f64 {
        2.0 * PI / f64::from(self.turn_rate)
    }

    pub fn move_step(&self) -> f64 {
        1e-3 * f64::from(self.move_rate)
    }

    /// Trail thickness in field cells.
    pub fn line_thickness(&self) -> f64 {
        1e-3 * f64::from(self.line_width) * FIELD_SIZE as f64
    }

    pub fn hole_range(&self) -> u8 {
        self.hole_length_max.saturating_sub(self.hole_length_min)
    }

    pub fn backlog_len(&self) -> usize {
        usize::from(self.backlog)
    }

    pub fn validate(&self) -> Result<(), ParamError> {
        if self.fps == 0 {
            return Err(ParamError("fps must be positive"));
        }
        if self.turn_rate == 0 {
            return Err(ParamError("turn rate must be positive"));
        }
        if self.move_rate == 0 {
            return Err(ParamError("move rate must be positive"));
        }
        if self.line_width == 0 {
            return Err(ParamError("line width must be positive"));
        }
        if self.score_rounds == 0 {
            return Err(ParamError("score history must hold at least one round"));
        }
        if self.hole_probability == 0 {
            return Err(ParamError("hole probability must be positive"));
        }
        if self.hole_length_min == 0 || self.hole_length_max < self.hole_length_min {
            return Err(ParamError("hole length range is empty"));
        }
        if self.backlog == 0 {
            return Err(ParamError("backlog must be positive"));
        }
        Ok(())
    }
}
