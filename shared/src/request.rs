//! Typed lobby requests.
//!
//! On the wire a request is a `message_type` string plus a JSON payload.
//! `LobbyRequest` is adjacently tagged over exactly those two keys, so
//! `from_parts`/`to_parts` convert between the packet fields and the enum.

use crate::lobby::LandingPolicy;
use crate::{AccountId, PlayerId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct ArmyOptions {
    #[serde(default)]
    pub slots: Option<usize>,
    #[serde(default)]
    pub alliance: bool,
    #[serde(default)]
    pub spec_tag: String,
}

impl ArmyOptions {
    pub fn with_slots(slots: usize) -> Self {
        Self {
            slots: Some(slots),
            ..Self::default()
        }
    }
}

/// Partial update for an existing army; absent fields keep their value.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct ArmyPatch {
    #[serde(default)]
    pub slots: Option<usize>,
    #[serde(default)]
    pub alliance: Option<bool>,
    #[serde(default)]
    pub spec_tag: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct AiOptions {
    #[serde(default)]
    pub personality: String,
    #[serde(default)]
    pub landing_policy: Option<LandingPolicy>,
    #[serde(default)]
    pub economy_factor: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct BouncerConfig {
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub friends: Vec<AccountId>,
    #[serde(default)]
    pub blocked: Vec<AccountId>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct GameOptionsRequest {
    #[serde(default)]
    pub game_type: Option<String>,
    #[serde(default)]
    pub dynamic_alliances: bool,
    #[serde(default)]
    pub dynamic_alliance_victory: bool,
    #[serde(default)]
    pub bounty_mode: bool,
    #[serde(default)]
    pub bounty_value: Option<f32>,
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default)]
    pub listen_to_spectators: bool,
    #[serde(default)]
    pub land_anywhere: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct SettingsRequest {
    #[serde(flatten)]
    pub bouncer: BouncerConfig,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub spectators: Option<usize>,
    #[serde(default)]
    pub game_name: Option<String>,
    #[serde(default)]
    pub game_options: Option<GameOptionsRequest>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub player_name: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "message_type", content = "payload", rename_all = "snake_case")]
pub enum LobbyRequest {
    ResetArmies(Vec<ArmyOptions>),
    AddArmy {
        options: Option<ArmyOptions>,
    },
    RemoveArmy {
        army_index: usize,
    },
    AddAi {
        army_index: usize,
        #[serde(default)]
        options: AiOptions,
    },
    ModifySystem(crate::system::SystemConfig),
    ModifyArmy {
        army_index: usize,
        #[serde(default)]
        options: ArmyPatch,
    },
    ModifyBouncer(BouncerConfig),
    ModifySettings(SettingsRequest),
    StartGame {
        countdown: Option<u32>,
    },
    SetPrimaryColorIndex(usize),
    SetPrimaryColorIndexForAi {
        id: PlayerId,
        color: usize,
    },
    SetSecondaryColorIndex(usize),
    SetSecondaryColorIndexForAi {
        id: PlayerId,
        color: usize,
    },
    NextPrimaryColor,
    NextSecondaryColor,
    SetAiPersonality {
        id: PlayerId,
        ai_personality: String,
    },
    SetAiLandingPolicy {
        id: PlayerId,
        ai_landing_policy: LandingPolicy,
    },
    SetAiCommander {
        id: PlayerId,
        ai_commander: String,
    },
    SetEconFactor {
        id: PlayerId,
        economy_factor: f32,
    },
    JoinArmy {
        army: usize,
        commander: Option<String>,
    },
    ToggleReady,
    LeaveArmy,
    UpdateCommander {
        commander: String,
    },
    ChatMessage {
        message: String,
    },
    ChatHistory,
    JsonMessage(Value),
    Leave,
    Kick {
        id: PlayerId,
    },
    PromoteToMod {
        id: PlayerId,
    },
    SetLoading {
        loading: bool,
    },
}

#[derive(Debug, Error)]
pub enum RequestParseError {
    #[error("Unsupported message: {0}")]
    Unsupported(String),
    #[error("Invalid message")]
    Invalid(#[source] serde_json::Error),
}

impl LobbyRequest {
    pub const MESSAGE_TYPES: [&'static str; 30] = [
        "reset_armies",
        "add_army",
        "remove_army",
        "add_ai",
        "modify_system",
        "modify_army",
        "modify_bouncer",
        "modify_settings",
        "start_game",
        "set_primary_color_index",
        "set_primary_color_index_for_ai",
        "set_secondary_color_index",
        "set_secondary_color_index_for_ai",
        "next_primary_color",
        "next_secondary_color",
        "set_ai_personality",
        "set_ai_landing_policy",
        "set_ai_commander",
        "set_econ_factor",
        "join_army",
        "toggle_ready",
        "leave_army",
        "update_commander",
        "chat_message",
        "chat_history",
        "json_message",
        "leave",
        "kick",
        "promote_to_mod",
        "set_loading",
    ];

    /// Decodes a request from its packet fields. An empty payload string is
    /// treated as "no payload".
    pub fn from_parts(message_type: &str, payload: &str) -> Result<Self, RequestParseError> {
        if !Self::MESSAGE_TYPES.contains(&message_type) {
            return Err(RequestParseError::Unsupported(message_type.to_string()));
        }

        let payload = if payload.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(payload).map_err(RequestParseError::Invalid)?
        };

        let mut envelope = Map::new();
        envelope.insert("message_type".to_string(), Value::from(message_type));
        if !payload.is_null() {
            envelope.insert("payload".to_string(), payload.clone());
        }

        match serde_json::from_value(Value::Object(envelope.clone())) {
            Ok(request) => Ok(request),
            Err(err) if payload.is_null() => {
                // Struct payloads whose fields are all optional may be omitted.
                envelope.insert("payload".to_string(), Value::Object(Map::new()));
                serde_json::from_value(Value::Object(envelope))
                    .map_err(|_| RequestParseError::Invalid(err))
            }
            Err(err) => Err(RequestParseError::Invalid(err)),
        }
    }

    /// Splits a request into `(message_type, payload_json)`.
    pub fn to_parts(&self) -> Result<(String, String), serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        let message_type = value
            .get("message_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let payload = value
            .as_object_mut()
            .and_then(|object| object.remove("payload"))
            .unwrap_or(Value::Null);
        Ok((message_type, serde_json::to_string(&payload)?))
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            LobbyRequest::ResetArmies(_) => "reset_armies",
            LobbyRequest::AddArmy { .. } => "add_army",
            LobbyRequest::RemoveArmy { .. } => "remove_army",
            LobbyRequest::AddAi { .. } => "add_ai",
            LobbyRequest::ModifySystem(_) => "modify_system",
            LobbyRequest::ModifyArmy { .. } => "modify_army",
            LobbyRequest::ModifyBouncer(_) => "modify_bouncer",
            LobbyRequest::ModifySettings(_) => "modify_settings",
            LobbyRequest::StartGame { .. } => "start_game",
            LobbyRequest::SetPrimaryColorIndex(_) => "set_primary_color_index",
            LobbyRequest::SetPrimaryColorIndexForAi { .. } => "set_primary_color_index_for_ai",
            LobbyRequest::SetSecondaryColorIndex(_) => "set_secondary_color_index",
            LobbyRequest::SetSecondaryColorIndexForAi { .. } => "set_secondary_color_index_for_ai",
            LobbyRequest::NextPrimaryColor => "next_primary_color",
            LobbyRequest::NextSecondaryColor => "next_secondary_color",
            LobbyRequest::SetAiPersonality { .. } => "set_ai_personality",
            LobbyRequest::SetAiLandingPolicy { .. } => "set_ai_landing_policy",
            LobbyRequest::SetAiCommander { .. } => "set_ai_commander",
            LobbyRequest::SetEconFactor { .. } => "set_econ_factor",
            LobbyRequest::JoinArmy { .. } => "join_army",
            LobbyRequest::ToggleReady => "toggle_ready",
            LobbyRequest::LeaveArmy => "leave_army",
            LobbyRequest::UpdateCommander { .. } => "update_commander",
            LobbyRequest::ChatMessage { .. } => "chat_message",
            LobbyRequest::ChatHistory => "chat_history",
            LobbyRequest::JsonMessage(_) => "json_message",
            LobbyRequest::Leave => "leave",
            LobbyRequest::Kick { .. } => "kick",
            LobbyRequest::PromoteToMod { .. } => "promote_to_mod",
            LobbyRequest::SetLoading { .. } => "set_loading",
        }
    }
}
