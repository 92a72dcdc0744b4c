//! Session configuration and the lobby's fixed timing constants.

use shared::{AccountId, GameType};
use std::time::Duration;

pub const MAX_PLAYERS: usize = 10;
pub const MAX_SPECTATORS: usize = 3;
pub const LADDER_MAX_SPECTATORS: usize = 6;
pub const MAX_CLIENTS: usize = MAX_PLAYERS + MAX_SPECTATORS;

/// Seconds of visible countdown before a game starts.
pub const START_GAME_DELAY_SECS: u32 = 5;
pub const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// How long a disconnected ladder player keeps their place.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(60);
pub const ABORT_GAME_DELAY: Duration = Duration::from_secs(5);
pub const JOIN_ANNOUNCE_DELAY: Duration = Duration::from_millis(500);

pub const MAX_CHAT_HISTORY: usize = 100;
pub const MAX_GAME_NAME_LEN: usize = 128;
pub const MAX_PLANETS: usize = 16;

pub const FIRST_CONNECT_WAIT: Duration = Duration::from_secs(30);
pub const TOTAL_STARTUP_WAIT: Duration = Duration::from_secs(6 * 60);
pub const WAIT_FOR_LOAD: Duration = Duration::from_secs(2 * 60);
pub const RECHECK_MARGIN: Duration = Duration::from_millis(500);
pub const MISMATCH_RECHECK: Duration = Duration::from_secs(1);
/// Grace left to an expected participant once they have been seen.
pub const SEEN_ONCE_GRACE: Duration = Duration::from_micros(100);

pub const DEFAULT_LOBBY_NAME: &str = "Lobby";
pub const DEFAULT_LOBBY_TAG: &str = "";
pub const LADDER_LOBBY_TAG: &str = "Ladder";
pub const LADDER_GAME_NAME: &str = "Ladder 1v1 Game";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMode {
    /// Player-configured lobby owned by its creator.
    Custom,
    /// Ranked lobby with externally assigned armies of account ids.
    Ladder { armies: Vec<Vec<AccountId>> },
}

impl SessionMode {
    /// Builds ladder armies from `--player-uberids a,b`. Exactly two ids are accepted.
    pub fn ladder_from_ids(ids: &str) -> Option<SessionMode> {
        let ids: Vec<&str> = ids.split(',').map(str::trim).collect();
        if ids.len() != 2 || ids.iter().any(|id| id.is_empty()) {
            return None;
        }
        Some(SessionMode::Ladder {
            armies: ids.into_iter().map(|id| vec![id.to_string()]).collect(),
        })
    }

    pub fn is_ladder(&self) -> bool {
        matches!(self, SessionMode::Ladder { .. })
    }
}

/// Per-session settings, assembled from CLI flags by the server binary.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub mode: SessionMode,
    pub max_players: usize,
    pub max_spectators: usize,
    /// Server-wide password the owner of a custom lobby must present.
    pub server_password: Option<String>,
    /// Stay up after the last human leaves.
    pub keep_alive: bool,
    /// New custom lobbies start listed publicly.
    pub public: bool,
    pub default_game_type: GameType,
    pub lobby_name: String,
    pub required_content: Vec<String>,
    pub start_game_delay: u32,
    /// Fixed seed for colors, commanders and AI names. Random when unset.
    pub rng_seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: SessionMode::Custom,
            max_players: MAX_PLAYERS,
            max_spectators: MAX_SPECTATORS,
            server_password: None,
            keep_alive: false,
            public: false,
            default_game_type: GameType::FreeForAll,
            lobby_name: DEFAULT_LOBBY_NAME.to_string(),
            required_content: Vec::new(),
            start_game_delay: START_GAME_DELAY_SECS,
            rng_seed: None,
        }
    }
}

impl SessionConfig {
    pub fn ladder(armies: Vec<Vec<AccountId>>) -> Self {
        Self {
            mode: SessionMode::Ladder { armies },
            max_spectators: LADDER_MAX_SPECTATORS,
            public: true,
            default_game_type: GameType::Ladder1v1,
            lobby_name: LADDER_GAME_NAME.to_string(),
            ..Self::default()
        }
    }

    pub fn max_clients(&self) -> usize {
        self.max_players + self.max_spectators
    }

    /// Game type for a new lobby, falling back to free-for-all when the
    /// configured default is not a custom type.
    pub fn custom_game_type(&self) -> GameType {
        if self.default_game_type.is_custom() {
            self.default_game_type
        } else {
            GameType::FreeForAll
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ladder_from_ids() {
        let mode = SessionMode::ladder_from_ids("alice, bob").unwrap();
        assert_eq!(
            mode,
            SessionMode::Ladder {
                armies: vec![vec!["alice".to_string()], vec!["bob".to_string()]]
            }
        );
        assert!(mode.is_ladder());
    }

    #[test]
    fn test_ladder_from_ids_requires_two() {
        assert!(SessionMode::ladder_from_ids("alice").is_none());
        assert!(SessionMode::ladder_from_ids("a,b,c").is_none());
        assert!(SessionMode::ladder_from_ids("a,").is_none());
    }

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.max_clients(), MAX_CLIENTS);
        assert!(!config.mode.is_ladder());
        assert_eq!(config.custom_game_type(), GameType::FreeForAll);
    }

    #[test]
    fn test_ladder_config() {
        let config = SessionConfig::ladder(vec![vec!["a".into()], vec!["b".into()]]);
        assert_eq!(config.max_spectators, LADDER_MAX_SPECTATORS);
        assert_eq!(config.default_game_type, GameType::Ladder1v1);
        assert_eq!(config.custom_game_type(), GameType::FreeForAll);
    }
}
