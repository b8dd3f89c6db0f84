use clap::Parser;
use log::{error, info};
use server::config::{ServerConfig, DEFAULT_PORT};
use server::network::Server;
use std::path::PathBuf;

/// Authoritative curve arena server
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,
    /// Port for both the TCP stream and UDP datagrams
    #[clap(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Frames per second
    #[clap(long, default_value_t = 30)]
    fps: u8,
    /// Frames needed for a full turn
    #[clap(long, default_value_t = 48)]
    turn_rate: u8,
    /// Distance per frame, in thousandths of the field
    #[clap(long, default_value_t = 6)]
    move_rate: u8,
    /// Trail width, in thousandths of the field
    #[clap(long, default_value_t = 7)]
    line_width: u8,
    /// Rounds kept in the moving score sum
    #[clap(long, default_value_t = 10)]
    score_rounds: u8,
    /// One hole per this many frames on average
    #[clap(long, default_value_t = 60)]
    hole_probability: u16,
    /// Shortest hole in frames
    #[clap(long, default_value_t = 3)]
    hole_min: u8,
    /// Longest hole in frames
    #[clap(long, default_value_t = 8)]
    hole_max: u8,
    /// Solid frames required between holes
    #[clap(long, default_value_t = 10)]
    hole_cooldown: u8,
    /// Seconds before anybody moves
    #[clap(long, default_value_t = 3.0)]
    warmup: f64,
    /// Seconds the round goes on once at most one player is left
    #[clap(long, default_value_t = 3.0)]
    victory: f64,
    /// Frames of moves repeated in every move window
    #[clap(short, long, default_value_t = 60)]
    backlog: u8,
    /// Maximum number of connections
    #[clap(short, long, default_value_t = 64)]
    max_clients: usize,
    /// Directory for text replays of every round
    #[clap(long)]
    replay_dir: Option<PathBuf>,
    /// Directory for a bitmap of the final field of every round
    #[clap(long)]
    bitmap_dir: Option<PathBuf>,
    /// Seed for game ids and spawn positions
    #[clap(long)]
    seed: Option<u64>,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            host: args.host,
            port: args.port,
            fps: args.fps,
            turn_rate: args.turn_rate,
            move_rate: args.move_rate,
            line_width: args.line_width,
            score_rounds: args.score_rounds,
            hole_probability: args.hole_probability,
            hole_length_min: args.hole_min,
            hole_length_max: args.hole_max,
            hole_cooldown: args.hole_cooldown,
            warmup_secs: args.warmup,
            victory_secs: args.victory,
            backlog: args.backlog,
            max_clients: args.max_clients,
            replay_dir: args.replay_dir,
            bitmap_dir: args.bitmap_dir,
            seed: args.seed,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from(Args::parse());
    config.validate()?;
    info!(
        "Starting server on {} at {} fps, backlog {}",
        config.bind_addr(),
        config.fps,
        config.backlog
    );

    let mut server = Server::bind(&config).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
