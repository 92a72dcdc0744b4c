//! Final game description handed to the simulation when a lobby launches.

use crate::error::LaunchError;
use crate::roster::{Player, Roster};
use log::debug;
use serde::Serialize;
use shared::{GameOptions, LandingPolicy, Rgb, SystemConfig};
use std::collections::BTreeMap;

const SLOT_PLACEHOLDER: &str = "player";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LaunchData {
    pub game: GameConfig,
    pub armies: Vec<LaunchArmy>,
    pub players: BTreeMap<String, LaunchPlayer>,
    pub ranked: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GameConfig {
    pub armies: Vec<ArmyConfig>,
    pub system: SystemConfig,
    pub enable_lan: bool,
    pub spectators: usize,
    pub password: String,
    pub friends: Vec<String>,
    pub blocked: Vec<String>,
    pub public: bool,
    pub players: usize,
    pub vs_ai: bool,
    pub game_options: GameOptions,
}

/// Army layout with every slot still a placeholder.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ArmyConfig {
    pub slots: Vec<String>,
    pub alliance_group: u32,
    pub spec_tag: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum LaunchSlot {
    Open(String),
    Occupied(LaunchPlayer),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LaunchArmy {
    pub slots: Vec<LaunchSlot>,
    pub alliance_group: u32,
    pub spec_tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<[Rgb; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub econ_rate: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landing_policy: Option<LandingPolicy>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LaunchPlayer {
    pub name: String,
    pub commander: String,
    pub client: Option<u32>,
    pub army: Option<usize>,
    pub slot: Option<usize>,
    pub ai: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landing_policy: Option<LandingPolicy>,
}

impl LaunchPlayer {
    fn from_player(player: &Player, spec_tag: &str) -> Self {
        let ai = player.is_ai();
        Self {
            name: player.name.clone(),
            commander: format!("{}{}", player.commander, spec_tag),
            client: player.id.client_id(),
            army: player.army,
            slot: player.slot,
            ai,
            personality: ai.then(|| player.personality.clone()),
            landing_policy: ai.then_some(player.landing_policy),
        }
    }
}

/// Every slot must be filled before a launch.
pub fn validate_setup(roster: &Roster) -> Result<(), LaunchError> {
    let open = roster.total_slots();
    let seated = roster.occupied_slots();
    debug!("Validation: {}/{}", seated, open);

    if seated != open {
        return Err(LaunchError::EmptySlots);
    }
    Ok(())
}

pub fn finalize_config(
    roster: &Roster,
    system: &SystemConfig,
    game_options: &GameOptions,
) -> GameConfig {
    GameConfig {
        armies: army_configs(roster),
        system: system.clone(),
        enable_lan: true,
        spectators: 0,
        password: String::new(),
        friends: Vec::new(),
        blocked: Vec::new(),
        public: true,
        players: roster.occupied_slots(),
        vs_ai: false,
        game_options: game_options.clone(),
    }
}

fn army_configs(roster: &Roster) -> Vec<ArmyConfig> {
    roster
        .armies()
        .iter()
        .map(|army| ArmyConfig {
            slots: vec![SLOT_PLACEHOLDER.to_string(); army.slots],
            alliance_group: army.alliance_group,
            spec_tag: army.spec_tag.clone(),
        })
        .collect()
}

/// Army list with each seated player written into their slot. Slot 0 also
/// lends the army its color and economy rate.
pub fn finalize_armies(roster: &Roster) -> Vec<LaunchArmy> {
    let mut armies: Vec<LaunchArmy> = army_configs(roster)
        .into_iter()
        .map(|config| LaunchArmy {
            slots: config.slots.into_iter().map(LaunchSlot::Open).collect(),
            alliance_group: config.alliance_group,
            spec_tag: config.spec_tag,
            color: None,
            color_index: None,
            econ_rate: None,
            personality: None,
            landing_policy: None,
        })
        .collect();

    for player in roster.players() {
        let (Some(army_index), Some(slot_index)) = (player.army, player.slot) else {
            continue;
        };
        let Some(army) = armies.get_mut(army_index) else {
            continue;
        };
        let Some(slot) = army.slots.get_mut(slot_index) else {
            continue;
        };

        *slot = LaunchSlot::Occupied(LaunchPlayer::from_player(player, &army.spec_tag));

        if slot_index == 0 {
            army.color = roster.colors().color_for(player.color);
            army.color_index = player.color.map(|choice| choice.primary);
            army.econ_rate = Some(player.economy_factor);
        }
        if player.is_ai() {
            army.personality = Some(player.personality.clone());
            army.landing_policy = Some(player.landing_policy);
        }
    }

    armies
}

pub fn finalize_players(roster: &Roster) -> BTreeMap<String, LaunchPlayer> {
    roster
        .players()
        .map(|player| {
            let spec_tag = player
                .army
                .and_then(|index| roster.armies().get(index))
                .map_or("", |army| army.spec_tag.as_str());
            (player.id.to_string(), LaunchPlayer::from_player(player, spec_tag))
        })
        .collect()
}

/// Splits alliances into single-slot armies, hands out any missing colors
/// and assembles the launch description.
pub fn final_data(
    roster: &mut Roster,
    system: &SystemConfig,
    game_options: &GameOptions,
    ranked: bool,
) -> LaunchData {
    roster.break_alliances();
    roster.take_missing_colors();

    LaunchData {
        game: finalize_config(roster, system, game_options),
        armies: finalize_armies(roster),
        players: finalize_players(roster),
        ranked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::NewPlayer;
    use shared::{AiOptions, ArmyOptions, ArmyPatch, PlayerId};

    fn human(name: &str) -> NewPlayer {
        NewPlayer {
            name: name.to_string(),
            account: Some(name.to_string()),
            ..NewPlayer::default()
        }
    }

    fn two_armies() -> Roster {
        let mut roster = Roster::with_seed(11);
        roster.add_army(&ArmyOptions::with_slots(1), 10);
        roster.add_army(&ArmyOptions::with_slots(1), 10);
        roster
    }

    #[test]
    fn test_validate_setup_requires_full_slots() {
        let mut roster = two_armies();
        roster.add_player(PlayerId::Client(1), human("a"));
        roster.add_players_to_slots_if_possible();
        assert_eq!(validate_setup(&roster), Err(LaunchError::EmptySlots));

        roster.add_player(PlayerId::Client(2), human("b"));
        roster.add_players_to_slots_if_possible();
        assert_eq!(validate_setup(&roster), Ok(()));
    }

    #[test]
    fn test_finalize_armies_fills_every_slot() {
        let mut roster = two_armies();
        roster.add_player(PlayerId::Client(1), human("a"));
        roster.add_player(PlayerId::Client(2), human("b"));
        roster.add_players_to_slots_if_possible();

        let data = final_data(&mut roster, &SystemConfig::default(), &GameOptions::default(), false);

        assert_eq!(data.armies.len(), 2);
        for army in &data.armies {
            assert_eq!(army.slots.len(), 1);
            assert!(matches!(army.slots[0], LaunchSlot::Occupied(_)));
            assert!(army.color.is_some());
            assert_eq!(army.econ_rate, Some(1.0));
        }
        assert_eq!(data.game.players, 2);
        assert_eq!(data.players.len(), 2);
        assert!(data.players.contains_key("client-1"));
        assert!(!data.ranked);
    }

    #[test]
    fn test_alliance_split_at_launch() {
        let mut roster = Roster::with_seed(12);
        roster.add_army(
            &ArmyOptions {
                slots: Some(2),
                alliance: true,
                spec_tag: ".player".into(),
            },
            10,
        );
        roster.add_army(&ArmyOptions::with_slots(1), 10);
        roster.add_player(PlayerId::Client(1), human("a"));
        roster.add_player(PlayerId::Client(2), human("b"));
        roster.add_player(
            PlayerId::Ai(1),
            NewPlayer {
                name: "bot".into(),
                ai: Some(AiOptions {
                    personality: "normal".into(),
                    ..AiOptions::default()
                }),
                ..NewPlayer::default()
            },
        );
        roster.add_players_to_slots_if_possible();
        roster.add_to_army(PlayerId::Ai(1), 1);

        let data = final_data(&mut roster, &SystemConfig::default(), &GameOptions::default(), false);

        assert_eq!(data.armies.len(), 3);
        assert_eq!(data.armies[0].alliance_group, 1);
        assert_eq!(data.armies[1].alliance_group, 1);
        assert_eq!(data.armies[2].alliance_group, 0);
        assert_eq!(data.armies[2].personality.as_deref(), Some("normal"));

        match &data.armies[0].slots[0] {
            LaunchSlot::Occupied(player) => assert!(player.commander.ends_with(".player")),
            LaunchSlot::Open(_) => panic!("slot left open"),
        }

        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["game"]["armies"][0]["slots"][0], "player");
        assert_eq!(json["game"]["enable_lan"], true);
    }

    #[test]
    fn test_shared_army_takes_color_from_first_slot() {
        let mut roster = Roster::with_seed(13);
        roster.add_army(&ArmyOptions::with_slots(2), 10);
        roster.add_player(PlayerId::Client(1), human("a"));
        roster.add_player(PlayerId::Client(2), human("b"));
        roster.add_players_to_slots_if_possible();
        roster.modify_army(0, &ArmyPatch::default(), 10);

        let first = roster.player(PlayerId::Client(1)).unwrap().color;
        let armies = finalize_armies(&roster);
        assert_eq!(armies[0].color_index, first.map(|c| c.primary));
        assert_eq!(armies[0].slots.len(), 2);
    }
}
