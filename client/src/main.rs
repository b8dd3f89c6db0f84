use clap::{Parser, ValueEnum};
use client::config::{ClientConfig, Steering, DEFAULT_SERVER};
use client::controller::{parse_command, BotKind, External, ExternalHandle, PlayerController};
use client::network::Client;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Controller {
    Simple,
    Twirly,
    Tipsy,
    /// First player reads l/r/f and "say <text>" lines from stdin
    Human,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = DEFAULT_SERVER)]
    server: String,

    /// Player names, up to four
    #[arg(short = 'n', long = "name", required = true, value_delimiter = ',')]
    names: Vec<String>,

    /// How the players are steered
    #[arg(short = 'c', long, value_enum, default_value = "simple")]
    controller: Controller,

    /// Ask the server to send everything over the stream
    #[arg(short = 'r', long)]
    reliable_only: bool,

    /// Leave after this many rounds
    #[arg(long)]
    rounds: Option<u32>,

    /// Seed for the randomized bots
    #[arg(long)]
    seed: Option<u64>,
}

impl From<Args> for ClientConfig {
    fn from(args: Args) -> Self {
        let steering = match args.controller {
            Controller::Simple => Steering::Bot(BotKind::Simple),
            Controller::Twirly => Steering::Bot(BotKind::Twirly),
            Controller::Tipsy => Steering::Bot(BotKind::Tipsy),
            Controller::Human => Steering::Human,
        };
        ClientConfig {
            server: args.server,
            names: args.names,
            steering,
            reliable_only: args.reliable_only,
            max_rounds: args.rounds,
            seed: args.seed,
        }
    }
}

fn build_controllers(config: &ClientConfig) -> (Vec<Box<dyn PlayerController>>, Option<ExternalHandle>) {
    let seed = config.seed.unwrap_or_else(rand::random);
    let mut handle = None;
    let controllers = (0..config.names.len())
        .map(|i| -> Box<dyn PlayerController> {
            match config.steering {
                Steering::Human if i == 0 => {
                    let (controller, external) = External::new();
                    handle = Some(external);
                    Box::new(controller)
                }
                Steering::Human => BotKind::Simple.build(seed.wrapping_add(i as u64)),
                Steering::Bot(kind) => kind.build(seed.wrapping_add(i as u64)),
            }
        })
        .collect();
    (controllers, handle)
}

/// Forwards stdin commands to the human player's controller
fn spawn_console(handle: ExternalHandle) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match parse_command(&line) {
                Some(command) => {
                    if !command.send_to(&handle) {
                        break;
                    }
                }
                None => warn!("Unknown command {:?}", line.trim()),
            }
        }
    });
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ClientConfig::from(Args::parse());
    config.validate()?;

    info!("Connecting to {} as {}", config.server, config.names.join(", "));
    let (controllers, handle) = build_controllers(&config);
    if let Some(handle) = handle {
        info!("Steer {} with l/r/f, chat with \"say <text>\"", config.names[0]);
        spawn_console(handle);
    }

    let mut client = Client::connect(&config, controllers).await?;

    let interrupted = tokio::select! {
        result = client.run() => {
            if let Err(e) = result {
                error!("Client error: {}", e);
                return Err(e.into());
            }
            false
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, leaving");
            true
        }
    };

    if interrupted {
        client.quit().await?;
    }
    Ok(())
}
