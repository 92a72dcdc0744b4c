use clap::Parser;
use client::network::LobbyClient;
use client::view::LobbyView;
use log::info;
use shared::{Credentials, LobbyRequest};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Display name in the lobby
    #[arg(short = 'n', long, default_value = "player")]
    name: String,

    /// Account id; empty joins as a guest
    #[arg(short = 'a', long, default_value = "")]
    account: String,

    #[arg(short = 'p', long, default_value = "")]
    password: String,

    /// Session secret handed out by the lobby owner
    #[arg(long, default_value = "")]
    secret: String,

    /// Seconds to stay connected after the last command
    #[arg(long, default_value = "5")]
    linger: u64,

    /// Requests to send in order, e.g. `toggle_ready` or
    /// `chat_message {"message":"hi"}`
    commands: Vec<String>,
}

fn parse_command(command: &str) -> Result<LobbyRequest, String> {
    let (message_type, payload) = match command.trim().split_once(char::is_whitespace) {
        Some((message_type, payload)) => (message_type, payload),
        None => (command.trim(), ""),
    };
    LobbyRequest::from_parts(message_type, payload).map_err(|e| format!("{}: {}", command, e))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let script = args
        .commands
        .iter()
        .map(|command| parse_command(command))
        .collect::<Result<Vec<_>, _>>()?;

    info!("Connecting to: {}", args.server);
    let mut client = LobbyClient::new(&args.server).await?;
    let credentials = Credentials {
        account_id: args.account.clone(),
        password: args.password.clone(),
        session_secret: args.secret.clone(),
    };
    client
        .connect(&args.name, credentials, Duration::from_secs(5))
        .await?;

    let mut view = LobbyView::new();
    client
        .run(script, Duration::from_secs(args.linger), &mut view)
        .await?;

    Ok(())
}
