//! Client configuration assembled from the command line.

use crate::controller::BotKind;
use shared::protocol::{validate_name, MAX_PLAYERS_PER_CLIENT};
use thiserror::Error;

pub const DEFAULT_SERVER: &str = "127.0.0.1:12321";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("need between 1 and {max} player names, got {got}")]
    PlayerCount { max: usize, got: usize },
    #[error("{names} player names but {controllers} controllers")]
    ControllerCount { names: usize, controllers: usize },
    #[error("invalid player name {0:?}")]
    BadName(String),
    #[error("duplicate player name {0:?}")]
    DuplicateName(String),
    #[error("server address is empty")]
    NoServer,
}

/// How the local players are steered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Steering {
    Bot(BotKind),
    /// The first player reads commands from standard input, the rest are
    /// simple bots.
    Human,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// `host:port` of the server.
    pub server: String,
    pub names: Vec<String>,
    pub steering: Steering,
    /// Ask the server to send everything over the stream.
    pub reliable_only: bool,
    /// Leave after this many complete rounds.
    pub max_rounds: Option<u32>,
    /// Seed for the randomized bots.
    pub seed: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            names: vec!["bot".to_string()],
            steering: Steering::Bot(BotKind::Simple),
            reliable_only: false,
            max_rounds: None,
            seed: None,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.is_empty() {
            return Err(ConfigError::NoServer);
        }
        if self.names.is_empty() || self.names.len() > MAX_PLAYERS_PER_CLIENT {
            return Err(ConfigError::PlayerCount {
                max: MAX_PLAYERS_PER_CLIENT,
                got: self.names.len(),
            });
        }
        for (i, name) in self.names.iter().enumerate() {
            if validate_name(name.as_bytes()).is_err() {
                return Err(ConfigError::BadName(name.clone()));
            }
            if self.names[..i].contains(name) {
                return Err(ConfigError::DuplicateName(name.clone()));
            }
        }
        Ok(())
    }
}
