//! # Lobby Server Library
//!
//! This library implements the pre-game lobby: who is connected, which army
//! and slot each player holds, colors, settings, readiness, and the hand-off
//! to the simulation once everyone is set.
//!
//! ## Core Responsibilities
//!
//! ### Session Model
//! `session::Session` owns the roster, color pool, access gate and settings.
//! Every mutation marks client-visible topics dirty; the next `poll` sends
//! each dirty topic once, and only if its snapshot actually changed.
//!
//! ### Admission
//! `access_gate::AccessGate` decides who may join: moderators and holders of
//! the session secret always, blacklisted accounts never, then password and
//! whitelist checks, then the lobby's open-by-default flag.
//!
//! ### Ladder Matches
//! Ranked lobbies have their armies assigned up front. The
//! `watchdog::Watchdog` state machine waits for the expected players to
//! connect and load, starts the game, or abandons it when someone never
//! shows up.
//!
//! ## Architecture Design
//!
//! ### Deterministic Core
//! The session never reads the clock or touches a socket. Every entry point
//! takes `now`, deferred work lives in a `timer::TimerQueue`, and effects
//! are queued as `session::Outbound` commands. Tests drive it by hand.
//!
//! ### Host Tasks
//! The binary wires the core to the outside world:
//! - **Transport** (`network`): UDP receiver, sender and timeout tasks,
//!   publishing host events and executing network commands
//! - **Event hub** (`events`): explicit subscribe/unsubscribe for host events
//! - **Lobby task** (`driver`): feeds events and timer deadlines into the
//!   session and routes its outbox
//! - **Simulation host** (`sim`): builds terrain and reports readiness
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::SessionConfig;
//! use server::driver::LobbyDriver;
//! use server::events::HostEvents;
//! use server::network::LobbyServer;
//! use server::sim::LocalSimulation;
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio::sync::{mpsc, RwLock};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::default();
//!     let events = Arc::new(RwLock::new(HostEvents::new()));
//!     let (commands_tx, commands_rx) = mpsc::unbounded_channel();
//!
//!     let mut transport =
//!         LobbyServer::new("127.0.0.1:8080", config.max_clients(), Arc::clone(&events), commands_rx)
//!             .await?;
//!     let sim = LocalSimulation::new(Arc::clone(&events), Duration::from_millis(500));
//!     let driver = LobbyDriver::new(config, Arc::clone(&events), commands_tx, sim);
//!
//!     tokio::spawn(async move { driver.run().await });
//!     transport.run().await?;
//!     Ok(())
//! }
//! ```

pub mod access_gate;
pub mod ai;
pub mod client_manager;
pub mod color_pool;
pub mod commanders;
pub mod config;
pub mod dirty;
pub mod driver;
pub mod error;
pub mod events;
pub mod handlers;
pub mod launch;
pub mod network;
pub mod roster;
pub mod session;
pub mod sim;
pub mod system;
pub mod timer;
pub mod watchdog;
