//! Simulation and wire format shared by the arena server and its clients.
//!
//! Both sides step trails with the same code ([`trail::Trail::step`]) over
//! the same collision grid ([`field::Field`]) and hole generator
//! ([`rng::Mwc`]), so a client that receives the authoritative moves ends
//! up with the server's field. Everything that crosses the network is
//! described in [`protocol`] and, for the reliable stream, [`framing`].

pub mod fast_forward;
pub mod field;
pub mod framing;
pub mod movement;
pub mod params;
pub mod protocol;
pub mod replica;
pub mod rng;
pub mod trail;

pub use fast_forward::FastForwardLog;
pub use field::{Field, Fill, FIELD_SIZE, OUTSIDE};
pub use framing::{frame, FrameDecoder};
pub use movement::{advance, Move, MoveError, Position};
pub use params::{GameParams, ParamError};
pub use protocol::{ClientMessage, ProtocolError, RoundShape, ServerMessage};
pub use replica::{Replica, ReplayError};
pub use rng::Mwc;
pub use trail::{Arena, Step, Trail};
