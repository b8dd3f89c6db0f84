//! Move commands and the position update shared by server and clients.

use std::f64::consts::PI;
use thiserror::Error;

/// A single per-frame command as it travels on the wire.
///
/// Only the three steering moves can be applied to a position; `None`
/// marks "not yet known" slots in a backlog window and `Dead` marks the
/// frame a player stopped moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Move {
    None = 0,
    Forward = 1,
    TurnLeft = 2,
    TurnRight = 3,
    Dead = 4,
}

impl Move {
    /// True for the commands a player may actually steer with.
    pub fn is_steering(self) -> bool {
        matches!(self, Move::Forward | Move::TurnLeft | Move::TurnRight)
    }

    pub fn is_turn(self) -> bool {
        matches!(self, Move::TurnLeft | Move::TurnRight)
    }
}

impl From<Move> for u8 {
    fn from(mv: Move) -> u8 {
        mv as u8
    }
}

impl TryFrom<u8> for Move {
    type Error = MoveError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Move::None),
            1 => Ok(Move::Forward),
            2 => Ok(Move::TurnLeft),
            3 => Ok(Move::TurnRight),
            4 => Ok(Move::Dead),
            other => Err(MoveError::Unknown(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MoveError {
    #[error("unknown move value {0}")]
    Unknown(u8),
    #[error("{0:?} is not a steering move")]
    NotSteering(Move),
}

/// Head of a trail: normalized field coordinates plus heading in radians.
///
/// `x` and `y` live in `[0, 1)` while the player is inside the field; the
/// angle accumulates without wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub a: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, a: f64) -> Self {
        Self { x, y, a }
    }

    /// Builds a position from the 16-bit fixed-point form used in round
    /// start messages: fractions of the field extent and of a full turn.
    pub fn from_fixed(x: u16, y: u16, a: u16) -> Self {
        Self {
            x: f64::from(x) / 65536.0,
            y: f64::from(y) / 65536.0,
            a: f64::from(a) * 2.0 * PI / 65536.0,
        }
    }
}

/// Advances `pos` by one frame.
///
/// Turns change the heading by `turn_rate` radians and the displacement is
/// taken along the midpoint heading, shortened to the chord of the arc so a
/// turning player covers the same ground as one driving straight.
pub fn advance(
    pos: &Position,
    mv: Move,
    move_rate: f64,
    turn_rate: f64,
) -> Result<Position, MoveError> {
    let da = match mv {
        Move::Forward => 0.0,
        Move::TurnLeft => turn_rate,
        Move::TurnRight => -turn_rate,
        other => return Err(MoveError::NotSteering(other)),
    };

    let dl = if da != 0.0 {
        let half = 0.5 * turn_rate;
        move_rate * half.sin() / half
    } else {
        move_rate
    };

    let heading = pos.a + 0.5 * da;
    Ok(Position {
        x: pos.x + dl * heading.cos(),
        y: pos.y + dl * heading.sin(),
        a: pos.a + da,
    })
}
