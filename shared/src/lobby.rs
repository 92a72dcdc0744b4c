//! Public lobby snapshot records broadcast to every connected client.

use crate::system::MinimalSystem;
use crate::{AccountId, PlayerId, Rgb};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Named category of lobby state that is broadcast as a unit.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Players,
    Armies,
    System,
    Colors,
    Control,
    Settings,
    Beacon,
}

impl Topic {
    pub const ALL: [Topic; 7] = [
        Topic::Players,
        Topic::Armies,
        Topic::System,
        Topic::Colors,
        Topic::Control,
        Topic::Settings,
        Topic::Beacon,
    ];

    /// Message type used when the topic is broadcast.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Players => "players",
            Topic::Armies => "armies",
            Topic::System => "system",
            Topic::Colors => "colors",
            Topic::Control => "control",
            Topic::Settings => "settings",
            Topic::Beacon => "beacon",
        }
    }

    pub fn from_message_type(message_type: &str) -> Option<Topic> {
        Topic::ALL
            .iter()
            .copied()
            .find(|topic| topic.as_str() == message_type)
    }
}

/// Where an AI commander is allowed to land.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LandingPolicy {
    #[default]
    NoRestriction,
    OnPlayerPlanet,
    OffPlayerPlanet,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerInfo {
    pub id: PlayerId,
    pub name: String,
    pub ai: bool,
    pub personality: String,
    pub landing_policy: LandingPolicy,
    pub economy_factor: f32,
    pub connected: bool,
    pub creator: bool,
    #[serde(rename = "mod")]
    pub moderator: bool,
    pub spectator: bool,
    pub army_index: Option<usize>,
    pub slot_index: Option<usize>,
    pub commander: String,
    pub ready: bool,
    pub loading: bool,
    pub color: Option<[Rgb; 2]>,
    pub color_index: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ArmyInfo {
    pub slots: usize,
    pub alliance: bool,
    pub spec_tag: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ColorInfo {
    pub primary: Rgb,
    pub secondary: Vec<Rgb>,
    pub taken: bool,
}

/// Launch readiness and countdown flags.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ControlState {
    pub has_first_config: bool,
    pub countdown: bool,
    pub starting: bool,
    pub system_ready: bool,
    pub sim_ready: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum GameType {
    #[default]
    FreeForAll,
    TeamArmies,
    #[serde(rename = "VersusAI")]
    VersusAi,
    Ladder1v1,
}

impl GameType {
    /// Game types a custom lobby may choose.
    pub const CUSTOM: [GameType; 3] = [GameType::FreeForAll, GameType::TeamArmies, GameType::VersusAi];

    pub fn is_free_for_all(&self) -> bool {
        matches!(self, GameType::FreeForAll)
    }

    pub fn is_custom(&self) -> bool {
        GameType::CUSTOM.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GameType::FreeForAll => "FreeForAll",
            GameType::TeamArmies => "TeamArmies",
            GameType::VersusAi => "VersusAI",
            GameType::Ladder1v1 => "Ladder1v1",
        }
    }

    pub fn parse(name: &str) -> Option<GameType> {
        [
            GameType::FreeForAll,
            GameType::TeamArmies,
            GameType::VersusAi,
            GameType::Ladder1v1,
        ]
        .into_iter()
        .find(|game_type| game_type.as_str() == name)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GameOptions {
    pub dynamic_alliances: bool,
    pub dynamic_alliance_victory: bool,
    pub bounty_mode: bool,
    pub bounty_value: f32,
    pub sandbox: bool,
    pub listen_to_spectators: bool,
    pub game_type: GameType,
    pub land_anywhere: bool,
}

impl Default for GameOptions {
    fn default() -> Self {
        Self {
            dynamic_alliances: false,
            dynamic_alliance_victory: false,
            bounty_mode: false,
            bounty_value: 0.5,
            sandbox: false,
            listen_to_spectators: false,
            game_type: GameType::default(),
            land_anywhere: false,
        }
    }
}

impl GameOptions {
    /// One announcement line per option that differs between `self` and `next`.
    pub fn describe_changes(&self, next: &GameOptions) -> Vec<String> {
        let flag = |name: &str, before: bool, after: bool| {
            (before != after).then(|| {
                format!("{} {}.", name, if after { "enabled" } else { "disabled" })
            })
        };
        let changed = |name: &str, differs: bool| differs.then(|| format!("{} changed.", name));

        [
            flag("dynamic alliances", self.dynamic_alliances, next.dynamic_alliances),
            flag(
                "dynamic alliance victory",
                self.dynamic_alliance_victory,
                next.dynamic_alliance_victory,
            ),
            flag("bounty mode", self.bounty_mode, next.bounty_mode),
            changed("bounty value", self.bounty_value != next.bounty_value),
            flag("sandbox", self.sandbox, next.sandbox),
            flag(
                "listen to spectators",
                self.listen_to_spectators,
                next.listen_to_spectators,
            ),
            changed("game type", self.game_type != next.game_type),
            flag("land anywhere", self.land_anywhere, next.land_anywhere),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LobbySettings {
    pub hidden: bool,
    pub friends: bool,
    pub public: bool,
    pub tag: String,
    pub game_name: String,
    pub spectators: usize,
    pub max_players: usize,
    pub max_spectators: usize,
    pub required_content: Vec<String>,
    pub game_options: GameOptions,
}

/// Discoverability summary published to external listing services.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Beacon {
    pub uuid: String,
    pub full: bool,
    pub started: bool,
    pub players: usize,
    pub creator: String,
    pub max_players: usize,
    pub spectators: usize,
    pub max_spectators: usize,
    pub mode: GameType,
    pub player_names: Vec<String>,
    pub spectator_names: Vec<String>,
    pub require_password: bool,
    pub whitelist: Vec<AccountId>,
    pub blacklist: Vec<AccountId>,
    pub tag: String,
    pub game: BeaconGame,
    pub required_content: Vec<String>,
    pub bounty_mode: bool,
    pub bounty_value: f32,
    pub sandbox: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BeaconGame {
    pub system: Option<MinimalSystem>,
    pub name: String,
}

/// Human-facing lobby announcement ("X joined the lobby.", countdown ticks).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EventMessage {
    pub target: String,
    pub message: Value,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none", default)]
    pub kind: Option<String>,
}

impl EventMessage {
    pub fn text(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            message: Value::String(message.into()),
            kind: None,
        }
    }

    pub fn with_kind(target: impl Into<String>, message: Value, kind: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            message,
            kind: Some(kind.into()),
        }
    }

    pub fn countdown(seconds: i64) -> Self {
        Self::with_kind("", Value::from(seconds), "countdown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_message_types_round_trip() {
        for topic in Topic::ALL {
            assert_eq!(Topic::from_message_type(topic.as_str()), Some(topic));
        }
        assert_eq!(Topic::from_message_type("chat_message"), None);
    }

    #[test]
    fn test_topic_order_puts_beacon_last() {
        let mut topics = Topic::ALL.to_vec();
        topics.sort();
        assert_eq!(topics.last(), Some(&Topic::Beacon));
    }

    #[test]
    fn test_game_type_names() {
        assert_eq!(GameType::parse("VersusAI"), Some(GameType::VersusAi));
        assert_eq!(GameType::parse("Ladder1v1"), Some(GameType::Ladder1v1));
        assert_eq!(GameType::parse("Chess"), None);
        assert!(!GameType::Ladder1v1.is_custom());
        assert_eq!(
            serde_json::to_string(&GameType::VersusAi).unwrap(),
            "\"VersusAI\""
        );
    }

    #[test]
    fn test_describe_changes() {
        let before = GameOptions::default();
        let after = GameOptions {
            sandbox: true,
            bounty_value: 0.25,
            ..GameOptions::default()
        };

        let changes = before.describe_changes(&after);
        assert_eq!(changes, vec!["bounty value changed.", "sandbox enabled."]);
        assert!(before.describe_changes(&before).is_empty());
    }

    #[test]
    fn test_player_info_uses_mod_key() {
        let info = PlayerInfo {
            id: PlayerId::Client(1),
            name: "a".to_string(),
            ai: false,
            personality: String::new(),
            landing_policy: LandingPolicy::NoRestriction,
            economy_factor: 1.0,
            connected: true,
            creator: true,
            moderator: true,
            spectator: false,
            army_index: Some(0),
            slot_index: Some(0),
            commander: String::new(),
            ready: false,
            loading: true,
            color: None,
            color_index: None,
        };
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["mod"], Value::Bool(true));
        assert_eq!(value["landing_policy"], "no_restriction");
    }

    #[test]
    fn test_countdown_event_shape() {
        let value = serde_json::to_value(EventMessage::countdown(-1)).unwrap();
        assert_eq!(value["type"], "countdown");
        assert_eq!(value["message"], -1);

        let text = serde_json::to_value(EventMessage::text("bob", " joined the lobby.")).unwrap();
        assert!(text.get("type").is_none());
    }
}
