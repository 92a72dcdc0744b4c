//! # Lobby Client Library
//!
//! A headless client for the lobby server. It joins a lobby over UDP, sends
//! typed `LobbyRequest`s and mirrors everything the server broadcasts into a
//! local `LobbyView`.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! - Connection handshake and rejection handling
//! - Request ids and matching responses back to their request type
//! - Heartbeats so the server does not time the client out
//!
//! ### View Module (`view`)
//! Local copies of the broadcast topics (players, armies, colors, control,
//! settings, system) plus the chat log and lobby announcements.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::LobbyClient;
//! use client::view::LobbyView;
//! use shared::{Credentials, LobbyRequest};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = LobbyClient::new("127.0.0.1:8080").await?;
//!     client
//!         .connect("alice", Credentials::default(), Duration::from_secs(5))
//!         .await?;
//!
//!     let mut view = LobbyView::new();
//!     let script = vec![LobbyRequest::ToggleReady];
//!     client.run(script, Duration::from_secs(2), &mut view).await?;
//!     Ok(())
//! }
//! ```

pub mod network;
pub mod view;
