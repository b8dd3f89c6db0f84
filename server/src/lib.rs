//! # Curve Arena Server Library
//!
//! This library provides the authoritative server for curve arena rounds:
//! every player steers a trail that grows by one segment per frame, and
//! whoever runs into a trail or the field border is out. The server owns
//! the only true field, applies the moves clients send, decides who died
//! and tells everybody what happened.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Moves are applied frame by frame with the stepping code from the
//! `shared` crate, so a client that replays the server's moves ends up with
//! the very same field. Collisions, holes and scores are only ever decided
//! here.
//!
//! ### Session Management
//! Handles the lifecycle of client connections:
//! - Stream accept, HELO handshake and per-session player registration
//! - READY acknowledgement of each round start
//! - Catching up sessions that join while a round is running
//! - Disconnects on QUIT, transport failure or protocol violations
//!
//! ### Move Windows
//! Clients and server both send sliding windows of the last `backlog`
//! moves per player. Lost datagrams are therefore repaired by the next one,
//! and a player whose input stops arriving for longer than the window is
//! dropped from the round instead of stalling it.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Event Loop
//! One task owns the whole [`state::ServerState`]. Per-connection reader
//! and writer tasks only move bytes through channels, so no game state is
//! ever shared or locked.
//!
//! ### Two Channels, One Port
//! Round starts, scores, chat and catch-up data go over the length-prefixed
//! TCP stream. Move windows go over UDP on the same port, or over the
//! stream for clients that asked for reliable delivery only.
//!
//! ## Module Organization
//!
//! ### Client Manager Module (`client_manager`)
//! Session table, stream reassembly buffers and the joined/started flags.
//!
//! ### Game Module (`game`)
//! The round controller: roster, frame counter, kills, scoring, victory
//! deadline and round restarts.
//!
//! ### Player Module (`player`)
//! Per-player move queue, applied-move history, fast-forward log and score.
//!
//! ### State Module (`state`)
//! Decodes client messages, enforces the protocol rules and turns game
//! broadcasts into per-session deliveries.
//!
//! ### Network Module (`network`)
//! Sockets, connection tasks and the frame clock.
//!
//! ### Recorder Module (`recorder`)
//! Optional text replays and end-of-round field bitmaps.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         host: "127.0.0.1".to_string(),
//!         ..ServerConfig::default()
//!     };
//!
//!     // Binds TCP and UDP on the same port, then runs rounds until the
//!     // listener fails
//!     let mut server = Server::bind(&config).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod game;
pub mod network;
pub mod player;
pub mod recorder;
pub mod state;
pub mod utils;
