//! Client-side mirror of the lobby.
//!
//! Every broadcast topic replaces its local copy wholesale; chat and event
//! messages accumulate.

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::{
    ArmyInfo, ChatEntry, ColorInfo, ControlState, EventMessage, LobbySettings, MinimalSystem,
    PlayerId, PlayerInfo, Topic,
};

#[derive(Debug, Default, Clone)]
pub struct LobbyView {
    pub players: Vec<PlayerInfo>,
    pub armies: Vec<ArmyInfo>,
    pub colors: Vec<ColorInfo>,
    pub control: ControlState,
    pub settings: Option<LobbySettings>,
    pub system: Option<MinimalSystem>,
    pub chat: Vec<ChatEntry>,
    pub events: Vec<EventMessage>,
    /// Relayed `json_message` payloads.
    pub relayed: Vec<Value>,
}

impl LobbyView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one server message. Returns false for types the view does not track
    /// or payloads that do not decode.
    pub fn apply(&mut self, message_type: &str, payload: &Value) -> bool {
        match Topic::from_message_type(message_type) {
            Some(Topic::Players) => decode(payload).map(|v| self.players = v).is_some(),
            Some(Topic::Armies) => decode(payload).map(|v| self.armies = v).is_some(),
            Some(Topic::Colors) => decode(payload).map(|v| self.colors = v).is_some(),
            Some(Topic::Control) => decode(payload).map(|v| self.control = v).is_some(),
            Some(Topic::Settings) => decode(payload).map(|v| self.settings = Some(v)).is_some(),
            Some(Topic::System) => decode(payload).map(|v| self.system = Some(v)).is_some(),
            Some(Topic::Beacon) => false,
            None => match message_type {
                "chat_message" => decode(payload).map(|v| self.chat.push(v)).is_some(),
                "event_message" => decode(payload).map(|v| self.events.push(v)).is_some(),
                "json_message" => {
                    self.relayed.push(payload.clone());
                    true
                }
                other => {
                    debug!("Ignoring message type {}", other);
                    false
                }
            },
        }
    }

    /// Replaces the chat log with a `chat_history` response.
    pub fn apply_chat_history(&mut self, response: &Value) -> bool {
        match response.get("chat_history").and_then(|v| decode(v)) {
            Some(history) => {
                self.chat = history;
                true
            }
            None => false,
        }
    }

    pub fn player(&self, id: PlayerId) -> Option<&PlayerInfo> {
        self.players.iter().find(|player| player.id == id)
    }

    pub fn me(&self, client_id: u32) -> Option<&PlayerInfo> {
        self.player(PlayerId::Client(client_id))
    }

    /// Occupants of each army, in slot order.
    pub fn army_occupants(&self) -> Vec<Vec<&PlayerInfo>> {
        let mut occupants: Vec<Vec<&PlayerInfo>> = vec![Vec::new(); self.armies.len()];
        for player in &self.players {
            if let Some(army) = player.army_index.and_then(|i| occupants.get_mut(i)) {
                army.push(player);
            }
        }
        for army in &mut occupants {
            army.sort_by_key(|player| player.slot_index);
        }
        occupants
    }

    pub fn spectators(&self) -> impl Iterator<Item = &PlayerInfo> {
        self.players.iter().filter(|player| player.spectator)
    }

    /// One line per army plus spectators, for the CLI.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        if let Some(settings) = &self.settings {
            lines.push(format!("Lobby: {}", settings.game_name));
        }
        for (index, (army, occupants)) in self.armies.iter().zip(self.army_occupants()).enumerate() {
            let names: Vec<String> = occupants
                .iter()
                .map(|p| format!("{}{}", p.name, if p.ready { " (ready)" } else { "" }))
                .collect();
            lines.push(format!(
                "Army {} [{}/{}{}]: {}",
                index + 1,
                occupants.len(),
                army.slots,
                if army.alliance { ", alliance" } else { "" },
                names.join(", ")
            ));
        }
        let spectators: Vec<&str> = self.spectators().map(|p| p.name.as_str()).collect();
        if !spectators.is_empty() {
            lines.push(format!("Spectators: {}", spectators.join(", ")));
        }
        lines.join("\n")
    }
}

fn decode<T: DeserializeOwned>(payload: &Value) -> Option<T> {
    match serde_json::from_value(payload.clone()) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Undecodable lobby payload: {}", e);
            None
        }
    }
}
