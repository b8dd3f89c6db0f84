//! # Curve Arena Client Library
//!
//! This library provides a headless client for curve arena servers. It
//! connects, registers up to four local players, and steers them with
//! [`controller::PlayerController`] implementations: scripted bots or an
//! externally fed controller for a human at the keyboard.
//!
//! ## Architecture Overview
//!
//! ### Confirmed State
//! Everything the server sends about the round (the roster, the move
//! windows and the fast-forward logs of a round joined late) is replayed
//! into a [`shared::replica::Replica`]. The replica uses the same stepping
//! code as the server, so its trail field matches the authoritative one
//! cell for cell once all moves have arrived.
//!
//! ### Client-Side Prediction
//! Local players run ahead of the confirmed state. Their heads are
//! predicted by advancing the confirmed position through the moves the
//! client generated but the server has not echoed yet. Remote players
//! simply keep doing what they did last.
//!
//! ### Server Reconciliation
//! Each MOVE message from the server advances the replica, and the
//! prediction is rebuilt from it. Deaths and holes are never decided
//! locally, so a wrong guess lasts at most until the next confirmed frame.
//!
//! ### Server Clock
//! The client has no clock of its own for the round. It estimates when the
//! server ran frame 0 from the least delayed MOVE message and generates
//! moves up to one frame past the estimated server frame.
//!
//! ## Module Organization
//!
//! ### Config Module (`config`)
//! Typed client configuration with validation.
//!
//! ### Controller Module (`controller`)
//! The controller trait, the probe search bots and the external controller.
//!
//! ### Game Module (`game`)
//! Confirmed replica, local move history, prediction and clock estimate.
//!
//! ### Network Module (`network`)
//! Stream and datagram sockets, the handshake and the client loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::config::ClientConfig;
//! use client::controller::SimpleSearch;
//! use client::network::Client;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig {
//!         names: vec!["searcher".to_string()],
//!         max_rounds: Some(3),
//!         ..ClientConfig::default()
//!     };
//!
//!     let mut client = Client::connect(&config, vec![Box::new(SimpleSearch::new())]).await?;
//!     client.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod controller;
pub mod game;
pub mod network;
