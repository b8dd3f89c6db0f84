//! Run-length log of every move a player made this round.
//!
//! A late joiner receives one log per roster player and replays it through
//! [`crate::trail::Trail::step`] to rebuild the field. Each byte is a run:
//! the top two bits hold the move (1..=3) and the low six bits the repeat
//! count (1..=63). A byte with zero move bits marks the player's death and
//! is always the last entry. On the wire every log is terminated by `0`.

use crate::movement::{Move, MoveError};
use crate::protocol::ProtocolError;
use bytes::BufMut;

/// Longest run a single byte can describe.
pub const MAX_RUN: u8 = 63;

/// Run byte recording the player's death.
pub const DEAD_MARKER: u8 = 0x01;

/// Upper bound on the encoded size of one log.
pub const MAX_LOG_BYTES: usize = 16 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FastForwardLog {
    runs: Vec<u8>,
    dead: bool,
    overflowed: bool,
}

impl FastForwardLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.runs.clear();
        self.dead = false;
        self.overflowed = false;
    }

    /// Appends one applied move.
    pub fn push(&mut self, mv: Move) -> Result<(), MoveError> {
        if !mv.is_steering() {
            return Err(MoveError::NotSteering(mv));
        }
        if self.overflowed {
            return Ok(());
        }
        let code = u8::from(mv) << 6;

        if let Some(last) = self.runs.last_mut() {
            if *last & 0xc0 == code && *last & 0x3f < MAX_RUN {
                *last += 1;
                return Ok(());
            }
        }

        if self.runs.len() >= MAX_LOG_BYTES {
            self.overflowed = true;
        } else {
            self.runs.push(code | 1);
        }
        Ok(())
    }

    pub fn mark_dead(&mut self) {
        self.dead = true;
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }

    /// True once the log dropped moves for lack of space. Such a log can no
    /// longer reproduce the trail.
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn runs(&self) -> &[u8] {
        &self.runs
    }

    /// Total number of moves described by the log.
    pub fn move_count(&self) -> usize {
        self.runs.iter().map(|r| usize::from(r & 0x3f)).sum()
    }

    /// Expands the runs back into individual moves, oldest first.
    pub fn moves(&self) -> impl Iterator<Item = Move> + '_ {
        self.runs.iter().flat_map(|&run| {
            let mv = match run >> 6 {
                1 => Move::Forward,
                2 => Move::TurnLeft,
                _ => Move::TurnRight,
            };
            std::iter::repeat(mv).take(usize::from(run & 0x3f))
        })
    }

    /// Size on the wire, terminator included.
    pub fn encoded_len(&self) -> usize {
        self.runs.len() + usize::from(self.dead) + 1
    }

    /// Copy of the log that encodes into at most `max_bytes`. A log that
    /// had to be cut, or had already dropped moves, ends with the death
    /// marker so a replay stops where the record stops.
    pub fn bounded(&self, max_bytes: usize) -> Self {
        if !self.overflowed && self.encoded_len() <= max_bytes {
            return self.clone();
        }
        let keep = max_bytes.saturating_sub(2).min(self.runs.len());
        Self {
            runs: self.runs[..keep].to_vec(),
            dead: true,
            overflowed: true,
        }
    }

    /// Writes the runs, the death marker if any, and the terminator.
    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(&self.runs);
        if self.dead {
            buf.put_u8(DEAD_MARKER);
        }
        buf.put_u8(0);
    }

    /// Parses the bytes of one log, without its terminator.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut log = Self::new();
        for (i, &run) in bytes.iter().enumerate() {
            let count = run & 0x3f;
            if count == 0 {
                return Err(ProtocolError::InvalidRun(run));
            }
            if run >> 6 == 0 {
                if i + 1 != bytes.len() {
                    return Err(ProtocolError::InvalidRun(run));
                }
                log.dead = true;
            } else {
                log.runs.push(run);
            }
        }
        Ok(log)
    }
}
