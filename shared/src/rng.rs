//! Multiply-with-carry generator driving hole placement.
//!
//! Server and clients seed one generator per player with
//! `game_id ^ player_index` and advance it once per simulated frame, so both
//! sides agree on where holes open without exchanging any extra data. The
//! state layout and multiplier are therefore part of the protocol contract
//! and must never change independently on either side.
//!
//! ```rust
//! use shared::rng::Mwc;
//!
//! let mut rng = Mwc::seeded(1, 0);
//! assert_eq!(rng.advance(), 1_967_773_755);
//! assert_eq!(rng.carry(), 0);
//! ```

/// Multiplier of the generator.
pub const MWC_MULTIPLIER: u64 = 1_967_773_755;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mwc {
    base: u32,
    carry: u32,
}

impl Mwc {
    pub const fn new(base: u32, carry: u32) -> Self {
        Self { base, carry }
    }

    /// Generator for the player at `index` in the round identified by
    /// `game_id`.
    pub const fn seeded(game_id: u32, index: u32) -> Self {
        Self::new(game_id ^ index, 0)
    }

    /// Current output word. Hole decisions are taken from this value before
    /// the generator is advanced for the frame.
    #[inline]
    pub const fn base(&self) -> u32 {
        self.base
    }

    #[inline]
    pub const fn carry(&self) -> u32 {
        self.carry
    }

    /// Steps the generator: `base * MULTIPLIER + carry` split into a new low
    /// word (base) and high word (carry). The sum always fits in 64 bits.
    #[inline]
    pub fn advance(&mut self) -> u32 {
        let next = u64::from(self.base) * MWC_MULTIPLIER + u64::from(self.carry);
        self.base = next as u32;
        self.carry = (next >> 32) as u32;
        self.base
    }
}

impl Iterator for Mwc {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        Some(self.advance())
    }
}
