//! Server configuration assembled from the command line.
//!
//! The binary parses its arguments with clap and converts them into a
//! [`ServerConfig`], which is validated once before any socket is bound.
//! The round controller receives the validated configuration at
//! construction and never consults it again for anything but the values
//! it copied out.

use shared::params::{GameParams, ParamError};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 12321;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Params(#[from] ParamError),
    #[error("{name} out of range: {value}")]
    OutOfRange { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub fps: u8,
    pub turn_rate: u8,
    pub move_rate: u8,
    pub line_width: u8,
    pub score_rounds: u8,
    pub hole_probability: u16,
    pub hole_length_min: u8,
    pub hole_length_max: u8,
    pub hole_cooldown: u8,
    /// Seconds at the start of each round during which nobody moves.
    pub warmup_secs: f64,
    /// Seconds the round continues after at most one player is left.
    pub victory_secs: f64,
    pub backlog: u8,
    pub max_clients: usize,
    pub replay_dir: Option<PathBuf>,
    pub bitmap_dir: Option<PathBuf>,
    /// Fixed seed for game ids and spawn positions.
    pub seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let params = GameParams::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            fps: params.fps,
            turn_rate: params.turn_rate,
            move_rate: params.move_rate,
            line_width: params.line_width,
            score_rounds: params.score_rounds,
            hole_probability: params.hole_probability,
            hole_length_min: params.hole_length_min,
            hole_length_max: params.hole_length_max,
            hole_cooldown: params.hole_cooldown,
            warmup_secs: 3.0,
            victory_secs: 3.0,
            backlog: params.backlog,
            max_clients: 64,
            replay_dir: None,
            bitmap_dir: None,
            seed: None,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs(1) / u32::from(self.fps.max(1))
    }

    fn seconds_to_frames(&self, secs: f64) -> f64 {
        (secs * f64::from(self.fps)).round()
    }

    pub fn warmup_frames(&self) -> u32 {
        self.seconds_to_frames(self.warmup_secs).clamp(0.0, f64::from(u8::MAX)) as u32
    }

    pub fn victory_frames(&self) -> u32 {
        self.seconds_to_frames(self.victory_secs).max(0.0) as u32
    }

    /// Round parameters announced to clients.
    pub fn game_params(&self) -> GameParams {
        GameParams {
            fps: self.fps,
            turn_rate: self.turn_rate,
            move_rate: self.move_rate,
            line_width: self.line_width,
            warmup: self.warmup_frames() as u8,
            score_rounds: self.score_rounds,
            hole_probability: self.hole_probability,
            hole_length_min: self.hole_length_min,
            hole_length_max: self.hole_length_max,
            hole_cooldown: self.hole_cooldown,
            backlog: self.backlog,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.game_params().validate()?;

        if self.host.is_empty() {
            return Err(ConfigError::OutOfRange {
                name: "host",
                value: String::new(),
            });
        }
        if !self.warmup_secs.is_finite()
            || self.warmup_secs < 0.0
            || self.seconds_to_frames(self.warmup_secs) > f64::from(u8::MAX)
        {
            return Err(ConfigError::OutOfRange {
                name: "warmup",
                value: format!("{}s at {} fps", self.warmup_secs, self.fps),
            });
        }
        if !self.victory_secs.is_finite() || self.victory_secs < 0.0 {
            return Err(ConfigError::OutOfRange {
                name: "victory time",
                value: format!("{}s", self.victory_secs),
            });
        }
        if self.max_clients == 0 {
            return Err(ConfigError::OutOfRange {
                name: "max clients",
                value: self.max_clients.to_string(),
            });
        }
        Ok(())
    }
}
