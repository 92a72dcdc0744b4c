use clap::Parser;
use log::{error, info};
use server::config::{
    SessionConfig, SessionMode, MAX_PLAYERS, MAX_SPECTATORS, START_GAME_DELAY_SECS,
};
use server::driver::{DriverOutcome, LobbyDriver};
use server::events::HostEvents;
use server::network::LobbyServer;
use server::sim::LocalSimulation;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Game lobby server")]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,
    #[arg(long, default_value_t = MAX_PLAYERS)]
    max_players: usize,
    #[arg(long, default_value_t = MAX_SPECTATORS)]
    max_spectators: usize,
    /// Password the lobby owner must present
    #[arg(long)]
    password: Option<String>,
    /// Two comma-separated account ids; runs a ladder match between them
    #[arg(long)]
    player_uberids: Option<String>,
    /// Keep the server up after the last player leaves
    #[arg(long)]
    keep_alive: bool,
    /// List new lobbies publicly
    #[arg(long)]
    public: bool,
    /// Countdown length in seconds
    #[arg(long, default_value_t = START_GAME_DELAY_SECS)]
    start_delay: u32,
    /// Delay before the local simulation reports ready
    #[arg(long, default_value = "500")]
    sim_delay_ms: u64,
}

fn session_config(args: &Args) -> Result<SessionConfig, String> {
    let base = match &args.player_uberids {
        Some(ids) => match SessionMode::ladder_from_ids(ids) {
            Some(SessionMode::Ladder { armies }) => SessionConfig::ladder(armies),
            _ => {
                return Err(
                    "--player-uberids does not have an appropriate number of players for the ladder mode"
                        .to_string(),
                )
            }
        },
        None => SessionConfig {
            max_players: args.max_players,
            max_spectators: args.max_spectators,
            public: args.public,
            ..SessionConfig::default()
        },
    };

    Ok(SessionConfig {
        server_password: args.password.clone(),
        keep_alive: args.keep_alive,
        start_game_delay: args.start_delay,
        ..base
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let config = session_config(&args)?;

    let events = Arc::new(RwLock::new(HostEvents::new()));
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();

    let address = format!("{}:{}", args.host, args.port);
    let mut transport =
        LobbyServer::new(&address, config.max_clients(), Arc::clone(&events), commands_rx).await?;

    let sim = LocalSimulation::new(
        Arc::clone(&events),
        Duration::from_millis(args.sim_delay_ms),
    );
    let driver = LobbyDriver::new(config, Arc::clone(&events), commands_tx, sim);

    let lobby_handle = tokio::spawn(driver.run());
    let transport_handle = tokio::spawn(async move {
        if let Err(e) = transport.run().await {
            error!("Transport error: {}", e);
        }
    });

    tokio::select! {
        result = lobby_handle => {
            match result {
                Ok(Ok(DriverOutcome::Launched(data))) => {
                    info!("Game launched with {} armies", data.armies.len())
                }
                Ok(Ok(DriverOutcome::Exited)) => info!("Lobby closed"),
                Ok(Err(e)) => error!("Lobby failed: {}", e),
                Err(e) => error!("Lobby task panicked: {}", e),
            }
        }
        result = transport_handle => {
            if let Err(e) = result {
                error!("Transport task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
