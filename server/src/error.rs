//! Error types for the lobby engine.
//!
//! `RequestError` is what a message handler returns; its `Display` text is the
//! exact reason string sent back to the requesting client.

use shared::RequestParseError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Not allowed.")]
    NotAllowed,
    #[error("Invalid message")]
    InvalidMessage,
    #[error("Unsupported message: {0}")]
    Unsupported(String),
    #[error("Not ready.")]
    NotReady,
    #[error("Invalid game setup - {0}")]
    InvalidSetup(LaunchError),
    #[error("Server is not done generating planets")]
    SystemNotReady,
    #[error("Invalid system provided - {0}")]
    InvalidSystem(SystemError),
    #[error("Unable to add player to army")]
    ArmyUnavailable,
    #[error("Could not remove you from the army")]
    CannotLeaveArmy,
    #[error("Cannot change ready after countdown has started.")]
    CountdownStarted,
    #[error("Only mods can kick.")]
    OnlyModsCanKick,
    #[error("Mods cannot be kicked.")]
    CannotKickMod,
    #[error("Already left")]
    AlreadyLeft,
    #[error("Only mods can promote.")]
    OnlyModsCanPromote,
    #[error("Player is absent")]
    PlayerAbsent,
    #[error("No payload")]
    NoPayload,
}

impl From<RequestParseError> for RequestError {
    fn from(err: RequestParseError) -> Self {
        match err {
            RequestParseError::Unsupported(message_type) => RequestError::Unsupported(message_type),
            RequestParseError::Invalid(_) => RequestError::InvalidMessage,
        }
    }
}

/// Why a connecting client was turned away.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("Credentials are invalid")]
    InvalidCredentials,
    #[error("No room")]
    NoRoom,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SystemError {
    #[error("No planets.")]
    NoPlanets,
    #[error("Too many planets.  (Current limit = {0})")]
    TooManyPlanets(usize),
    #[error("No starting planets.")]
    NoStartingPlanet,
    #[error("Planet {index} invalid: {reason}")]
    InvalidPlanet { index: usize, reason: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LaunchError {
    #[error("Empty slots encountered")]
    EmptySlots,
}

/// Problems that end a session before it can accept players.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("owner did not present the server password")]
    BadServerPassword,
    #[error("custom lobby needs an owner connection")]
    MissingOwner,
    #[error("--player-uberids does not have an appropriate number of players for the ladder mode")]
    BadLadderArmies,
    #[error("invalid ladder system: {0}")]
    InvalidLadderSystem(SystemError),
}
