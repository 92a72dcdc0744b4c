//! Wire protocol and public lobby types shared by the lobby server and clients.
//!
//! Packets travel as bincode-encoded UDP datagrams. Anything schema-flexible
//! (request payloads, topic snapshots, event messages) rides inside a packet
//! as a JSON string so both sides can diff and forward it without knowing
//! every field.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod lobby;
pub mod request;
pub mod system;

pub use lobby::{
    ArmyInfo, Beacon, BeaconGame, ColorInfo, ControlState, EventMessage, GameOptions, GameType,
    LandingPolicy, LobbySettings, PlayerInfo, Topic,
};
pub use request::{
    AiOptions, ArmyOptions, ArmyPatch, BouncerConfig, ChatEntry, GameOptionsRequest, LobbyRequest,
    RequestParseError, SettingsRequest,
};
pub use system::{GeneratorParams, MinimalSystem, PlanetConfig, PlanetSummary, SystemConfig};

pub const PROTOCOL_VERSION: u32 = 1;

/// Largest datagram either side will try to decode.
pub const MAX_PACKET_SIZE: usize = 65_507;

/// External account identity (the matchmaking/ladder id of a human player).
pub type AccountId = String;

pub type Rgb = [u8; 3];

/// Identity of a roster entry: either a network client or a server-side AI.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PlayerId {
    Client(u32),
    Ai(u32),
}

impl PlayerId {
    pub fn client_id(&self) -> Option<u32> {
        match self {
            PlayerId::Client(id) => Some(*id),
            PlayerId::Ai(_) => None,
        }
    }

    pub fn is_ai(&self) -> bool {
        matches!(self, PlayerId::Ai(_))
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerId::Client(id) => write!(f, "client-{}", id),
            PlayerId::Ai(id) => write!(f, "ai-{}", id),
        }
    }
}

/// Credentials presented by a connecting client.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub account_id: AccountId,
    pub password: String,
    pub session_secret: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Connect {
        client_version: u32,
        name: String,
        credentials: Credentials,
    },
    Request {
        request_id: u32,
        message_type: String,
        payload: String,
    },
    Heartbeat,
    Disconnect,

    Connected {
        client_id: u32,
    },
    Rejected {
        reason: String,
    },
    Response {
        request_id: u32,
        success: bool,
        payload: String,
    },
    Message {
        message_type: String,
        payload: String,
    },
    Disconnected {
        reason: String,
    },
}
