//! Client request handlers.
//!
//! Every request gets exactly one response. Custom lobbies accept the full
//! request set; ladder lobbies only the handful a ranked participant needs.

use crate::config::{DEFAULT_LOBBY_TAG, MAX_CHAT_HISTORY, MAX_GAME_NAME_LEN};
use crate::error::RequestError;
use crate::launch;
use crate::roster::{clamp_economy, NewPlayer, Player, RemoveFromArmy};
use crate::session::Session;
use crate::system::validate_system;
use log::{debug, info};
use serde_json::{json, Value};
use shared::{
    AiOptions, ArmyOptions, ArmyPatch, BouncerConfig, ChatEntry, EventMessage, GameOptions,
    GameType, LobbyRequest, LobbySettings, PlayerId, SettingsRequest, SystemConfig, Topic,
};
use std::time::Instant;

/// Content tag a lobby must require before bounty mode can be enabled.
const BOUNTY_CONTENT: &str = "PAExpansion1";

type HandlerResult = Result<Value, RequestError>;

impl Session {
    /// Decodes and runs one client request, queueing its response.
    pub fn handle_request(
        &mut self,
        now: Instant,
        client_id: u32,
        request_id: u32,
        message_type: &str,
        payload: &str,
    ) {
        if self.is_finished() {
            return;
        }

        let request = match LobbyRequest::from_parts(message_type, payload) {
            Ok(request) => request,
            Err(err) => {
                debug!("Client {} sent bad {}: {}", client_id, message_type, err);
                let err = RequestError::from(err);
                self.respond(client_id, request_id, false, Value::from(err.to_string()));
                return;
            }
        };

        if request == LobbyRequest::Leave {
            self.respond(client_id, request_id, true, Value::Null);
            self.remove_player(now, PlayerId::Client(client_id), true);
            self.observe_presence(now);
            return;
        }

        let result = if self.is_ladder() {
            self.dispatch_ladder(client_id, request)
        } else {
            self.dispatch_custom(now, client_id, request)
        };

        match result {
            Ok(value) => self.respond(client_id, request_id, true, value),
            Err(err) => {
                debug!("{} from client {} failed: {}", message_type, client_id, err);
                self.respond(client_id, request_id, false, Value::from(err.to_string()));
            }
        }

        self.observe_presence(now);
    }

    fn dispatch_ladder(&mut self, client_id: u32, request: LobbyRequest) -> HandlerResult {
        let id = PlayerId::Client(client_id);
        match request {
            LobbyRequest::NextPrimaryColor => {
                if self.roster.next_primary_color(id) {
                    self.dirty.mark(&[Topic::Players]);
                }
                Ok(Value::Null)
            }
            LobbyRequest::NextSecondaryColor => {
                if self.roster.next_secondary_color(id) {
                    self.dirty.mark(&[Topic::Players]);
                }
                Ok(Value::Null)
            }
            LobbyRequest::SetPrimaryColorIndex(color) => self.set_own_primary(client_id, color),
            LobbyRequest::SetSecondaryColorIndex(color) => self.set_own_secondary(client_id, color),
            LobbyRequest::UpdateCommander { commander } => self.update_commander(client_id, &commander),
            LobbyRequest::ChatMessage { message } => self.chat_message(client_id, message),
            LobbyRequest::ChatHistory => self.chat_history_response(),
            LobbyRequest::SetLoading { loading } => self.set_loading(client_id, loading),
            other => Err(RequestError::Unsupported(other.message_type().to_string())),
        }
    }

    fn dispatch_custom(&mut self, now: Instant, client_id: u32, request: LobbyRequest) -> HandlerResult {
        match request {
            LobbyRequest::ResetArmies(armies) => self.reset_armies(client_id, &armies),
            LobbyRequest::AddArmy { options } => self.add_army(client_id, options),
            LobbyRequest::RemoveArmy { army_index } => self.remove_army(client_id, army_index),
            LobbyRequest::AddAi {
                army_index,
                options,
            } => self.add_ai(client_id, army_index, options),
            LobbyRequest::ModifySystem(system) => self.modify_system(client_id, system),
            LobbyRequest::ModifyArmy {
                army_index,
                options,
            } => self.modify_army(client_id, army_index, &options),
            LobbyRequest::ModifyBouncer(config) => {
                self.require_changes_from(client_id)?;
                self.update_bouncer(&config);
                self.dirty.mark(&[Topic::Beacon]);
                Ok(Value::Null)
            }
            LobbyRequest::ModifySettings(settings) => self.modify_settings(client_id, settings),
            LobbyRequest::StartGame { countdown } => self.start_game(now, client_id, countdown),
            LobbyRequest::SetPrimaryColorIndex(color) => self.set_own_primary(client_id, color),
            LobbyRequest::SetSecondaryColorIndex(color) => self.set_own_secondary(client_id, color),
            LobbyRequest::SetPrimaryColorIndexForAi { id, color } => {
                self.require_changes_from(client_id)?;
                if self.is_ai_player(id) && self.roster.set_primary_color(id, color) {
                    self.dirty.mark(&[Topic::Players]);
                }
                Ok(Value::Null)
            }
            LobbyRequest::SetSecondaryColorIndexForAi { id, color } => {
                self.require_changes_from(client_id)?;
                if self.is_ai_player(id) && self.roster.set_secondary_color(id, color) {
                    self.dirty.mark(&[Topic::Players]);
                }
                Ok(Value::Null)
            }
            LobbyRequest::SetAiPersonality { id, ai_personality } => {
                self.change_ai(client_id, id, |player| player.personality = ai_personality)
            }
            LobbyRequest::SetAiLandingPolicy {
                id,
                ai_landing_policy,
            } => self.change_ai(client_id, id, |player| {
                player.landing_policy = ai_landing_policy
            }),
            LobbyRequest::SetAiCommander { id, ai_commander } => {
                self.require_changes_from(client_id)?;
                if self.is_ai_player(id) && self.roster.commanders().is_known(&ai_commander) {
                    if let Some(player) = self.roster.player_mut(id) {
                        player.commander = ai_commander;
                    }
                    self.unready_all();
                }
                Ok(Value::Null)
            }
            LobbyRequest::SetEconFactor { id, economy_factor } => {
                self.require_changes_from(client_id)?;
                if let Some(player) = self.roster.player_mut(id) {
                    player.economy_factor = clamp_economy(economy_factor);
                    self.unready_all();
                }
                Ok(Value::Null)
            }
            LobbyRequest::JoinArmy { army, commander } => self.join_army(client_id, army, commander),
            LobbyRequest::ToggleReady => self.toggle_ready(client_id),
            LobbyRequest::LeaveArmy => self.leave_army(client_id),
            LobbyRequest::UpdateCommander { commander } => self.update_commander(client_id, &commander),
            LobbyRequest::ChatMessage { message } => self.chat_message(client_id, message),
            LobbyRequest::ChatHistory => self.chat_history_response(),
            LobbyRequest::JsonMessage(payload) => self.json_message(client_id, payload),
            LobbyRequest::Kick { id } => self.kick(now, client_id, id),
            LobbyRequest::PromoteToMod { id } => self.promote_to_mod(client_id, id),
            LobbyRequest::SetLoading { loading } => self.set_loading(client_id, loading),
            other @ (LobbyRequest::NextPrimaryColor
            | LobbyRequest::NextSecondaryColor
            | LobbyRequest::Leave) => Err(RequestError::Unsupported(other.message_type().to_string())),
        }
    }

    fn require_changes_from(&self, client_id: u32) -> Result<(), RequestError> {
        if self.allow_changes_from(client_id) {
            Ok(())
        } else {
            Err(RequestError::NotAllowed)
        }
    }

    fn is_ai_player(&self, id: PlayerId) -> bool {
        self.roster.player(id).map_or(false, Player::is_ai)
    }

    fn account_of(&self, id: PlayerId) -> Option<String> {
        self.roster.player(id).and_then(|player| player.account.clone())
    }

    fn is_moderator(&self, id: PlayerId) -> bool {
        self.account_of(id)
            .map_or(false, |account| self.gate.is_moderator(&account))
    }

    fn release_ais(&mut self, removed: Vec<Player>) {
        for player in removed {
            if let PlayerId::Ai(ai_id) = player.id {
                self.ai.release_id(ai_id);
            }
        }
    }

    /// Army layout changed: everyone must ready up again, and anyone waiting
    /// for a seat gets one if it now exists.
    fn after_army_change(&mut self) {
        self.unready_all();
        self.roster.add_players_to_slots_if_possible();
        self.dirty.mark(&[Topic::Players, Topic::Armies]);
    }

    fn reset_armies(&mut self, client_id: u32, armies: &[ArmyOptions]) -> HandlerResult {
        self.require_changes_from(client_id)?;

        let removed = self.roster.reset_armies(armies, self.config.max_players);
        self.release_ais(removed);
        self.change_control(|control| control.has_first_config = true);
        self.after_army_change();
        Ok(Value::Null)
    }

    fn add_army(&mut self, client_id: u32, options: Option<ArmyOptions>) -> HandlerResult {
        let options = options.ok_or(RequestError::NotAllowed)?;
        self.require_changes_from(client_id)?;

        if !self.roster.add_army(&options, self.config.max_players) {
            debug!("Army limit reached, ignoring add_army");
        }
        self.after_army_change();
        Ok(Value::Null)
    }

    fn remove_army(&mut self, client_id: u32, army_index: usize) -> HandlerResult {
        self.require_changes_from(client_id)?;

        let removed = self.roster.remove_army(army_index);
        self.release_ais(removed);
        self.after_army_change();
        Ok(Value::Null)
    }

    fn modify_army(&mut self, client_id: u32, army_index: usize, patch: &ArmyPatch) -> HandlerResult {
        self.require_changes_from(client_id)?;

        if let Some(removed) = self.roster.modify_army(army_index, patch, self.config.max_players) {
            self.release_ais(removed);
        }
        self.after_army_change();
        Ok(Value::Null)
    }

    fn add_ai(&mut self, client_id: u32, army_index: usize, options: AiOptions) -> HandlerResult {
        self.require_changes_from(client_id)?;

        let ai_id = self.ai.allocate_id();
        let id = PlayerId::Ai(ai_id);
        let name = self.ai.next_name();
        self.roster.add_player(
            id,
            NewPlayer {
                name,
                ai: Some(options),
                ..NewPlayer::default()
            },
        );

        if !self.roster.add_to_army(id, army_index) {
            debug!("Army {} has no room for {}", army_index, id);
            self.roster.remove_player(id);
            self.ai.release_id(ai_id);
        }
        self.dirty.mark(&[Topic::Players, Topic::Armies]);
        Ok(Value::Null)
    }

    fn modify_system(&mut self, client_id: u32, mut system: SystemConfig) -> HandlerResult {
        self.require_changes_from(client_id)?;

        validate_system(&mut system).map_err(RequestError::InvalidSystem)?;
        self.change_system(system);
        Ok(Value::Null)
    }

    fn update_bouncer(&mut self, config: &BouncerConfig) {
        let password = config.password.as_deref().unwrap_or("");
        if !password.is_empty() || self.gate.requires_password() {
            self.gate.set_password(password);
        }

        self.gate.clear_whitelist();
        for account in &config.friends {
            self.gate.add_to_whitelist(account);
        }

        self.gate.clear_blacklist();
        for account in &config.blocked {
            self.gate.add_to_blacklist(account);
        }
    }

    fn modify_settings(&mut self, client_id: u32, request: SettingsRequest) -> HandlerResult {
        if !self.allow_changes_from(client_id) {
            // The client may be showing its own edit; put it back.
            self.published.invalidate(Topic::Settings);
            self.dirty.mark(&[Topic::Settings]);
            return Err(RequestError::NotAllowed);
        }

        let requested_type = match &request.game_options {
            Some(options) => options.game_type.as_deref().and_then(GameType::parse),
            None => Some(self.settings.game_options.game_type),
        };
        let mut game_options = GameOptions {
            game_type: requested_type
                .filter(GameType::is_custom)
                .unwrap_or_else(|| self.config.custom_game_type()),
            ..GameOptions::default()
        };

        self.update_bouncer(&request.bouncer);
        let has_friends = !self.gate.whitelist().is_empty();

        if let Some(requested) = &request.game_options {
            game_options.land_anywhere = requested.land_anywhere;
            if game_options.game_type.is_free_for_all() {
                game_options.dynamic_alliances = requested.dynamic_alliances;
                if game_options.dynamic_alliances {
                    game_options.dynamic_alliance_victory = requested.dynamic_alliance_victory;
                }
            }
            if requested.bounty_mode {
                game_options.bounty_mode = self
                    .config
                    .required_content
                    .iter()
                    .any(|content| content == BOUNTY_CONTENT);
            }
            if let Some(value) = requested.bounty_value.filter(|v| v.is_finite() && *v != 0.0) {
                game_options.bounty_value = value;
            }
            game_options.sandbox |= requested.sandbox;
            game_options.listen_to_spectators |= requested.listen_to_spectators;
        }

        let settings = LobbySettings {
            hidden: !has_friends && !request.public,
            friends: has_friends,
            public: request.public && !has_friends,
            tag: request
                .tag
                .filter(|tag| !tag.is_empty())
                .unwrap_or_else(|| DEFAULT_LOBBY_TAG.to_string()),
            game_name: match request.game_name {
                Some(name) => name.chars().take(MAX_GAME_NAME_LEN).collect(),
                None => self.config.lobby_name.clone(),
            },
            spectators: request
                .spectators
                .unwrap_or(self.config.max_spectators)
                .min(self.config.max_spectators),
            max_players: self.config.max_players,
            max_spectators: self.config.max_spectators,
            required_content: self.config.required_content.clone(),
            game_options,
        };

        for message in self.settings.game_options.describe_changes(&settings.game_options) {
            self.broadcast_event(EventMessage::with_kind("", Value::from(message), "settings"));
        }

        let name_change_only = settings.game_name != self.settings.game_name
            && LobbySettings {
                game_name: self.settings.game_name.clone(),
                ..settings.clone()
            } == self.settings;

        if settings != self.settings {
            self.settings = settings;
            self.dirty.mark(&[Topic::Settings]);
        }
        if !name_change_only {
            self.unready_all();
        }
        Ok(Value::Null)
    }

    fn start_game(&mut self, now: Instant, client_id: u32, countdown: Option<u32>) -> HandlerResult {
        self.require_changes_from(client_id)?;

        let id = PlayerId::Client(client_id);
        let player = self.roster.player_mut(id).ok_or(RequestError::InvalidMessage)?;
        player.ready = true;

        if let Err(err) = self.check_startable() {
            if let Some(player) = self.roster.player_mut(id) {
                player.ready = false;
            }
            return Err(err);
        }

        self.dirty.mark(&[Topic::Players]);
        self.change_control(|control| control.countdown = true);
        let seconds = countdown.unwrap_or(self.config.start_game_delay);
        self.countdown_left = i64::from(seconds);

        info!("Lobby start requested by client {}", client_id);
        if self.roster.occupied_slots() < 2 {
            self.start_game_now(now);
        } else {
            let announcement = format!("Game will start in {} seconds.", seconds);
            self.announce("", &announcement);
            self.countdown_tick(now);
        }
        Ok(Value::Null)
    }

    fn check_startable(&self) -> Result<(), RequestError> {
        if self
            .roster
            .players()
            .any(|player| !player.ready && !player.spectator)
        {
            return Err(RequestError::NotReady);
        }
        launch::validate_setup(&self.roster).map_err(RequestError::InvalidSetup)?;
        if !self.control.sim_ready {
            return Err(RequestError::SystemNotReady);
        }
        Ok(())
    }

    fn set_own_primary(&mut self, client_id: u32, color: usize) -> HandlerResult {
        let id = PlayerId::Client(client_id);
        if self.roster.contains(id) && self.roster.set_primary_color(id, color) {
            self.dirty.mark(&[Topic::Players]);
        }
        Ok(Value::Null)
    }

    fn set_own_secondary(&mut self, client_id: u32, color: usize) -> HandlerResult {
        let id = PlayerId::Client(client_id);
        if self.roster.contains(id) && self.roster.set_secondary_color(id, color) {
            self.dirty.mark(&[Topic::Players]);
        }
        Ok(Value::Null)
    }

    fn change_ai<F>(&mut self, client_id: u32, id: PlayerId, change: F) -> HandlerResult
    where
        F: FnOnce(&mut Player),
    {
        self.require_changes_from(client_id)?;
        if !self.is_ai_player(id) {
            return Ok(Value::Null);
        }
        if let Some(player) = self.roster.player_mut(id) {
            change(player);
        }
        self.unready_all();
        Ok(Value::Null)
    }

    /// Applies a commander choice. Unknown commanders, and commanders the
    /// client does not own, are ignored.
    fn set_commander(&mut self, client_id: u32, commander: &str) {
        let commanders = self.roster.commanders();
        let Some(object_name) = commanders.object_name(commander) else {
            debug!("Ignoring unknown commander {}", commander);
            return;
        };
        if !self.entitlements.is_item_owned(client_id, object_name) {
            info!("Client {} does not own {}", client_id, object_name);
            return;
        }

        if let Some(player) = self.roster.player_mut(PlayerId::Client(client_id)) {
            if player.commander != commander {
                player.commander = commander.to_string();
                self.dirty.mark(&[Topic::Players]);
            }
        }
    }

    fn update_commander(&mut self, client_id: u32, commander: &str) -> HandlerResult {
        if commander.is_empty() || !self.roster.contains(PlayerId::Client(client_id)) {
            return Err(RequestError::InvalidMessage);
        }
        self.set_commander(client_id, commander);
        Ok(Value::Null)
    }

    fn join_army(&mut self, client_id: u32, army: usize, commander: Option<String>) -> HandlerResult {
        let id = PlayerId::Client(client_id);
        let name = self
            .roster
            .player(id)
            .map(|player| player.name.clone())
            .ok_or(RequestError::InvalidMessage)?;

        if let Some(commander) = commander.filter(|c| !c.is_empty()) {
            self.set_commander(client_id, &commander);
        }

        self.roster.remove_from_army(id, RemoveFromArmy::default());
        let joined = self.roster.add_to_army(id, army);
        self.dirty.mark(&[Topic::Players, Topic::Armies]);

        if joined {
            self.announce(&name, " has joined an army.");
            Ok(Value::Null)
        } else {
            Err(RequestError::ArmyUnavailable)
        }
    }

    fn leave_army(&mut self, client_id: u32) -> HandlerResult {
        let id = PlayerId::Client(client_id);
        let name = self
            .roster
            .player(id)
            .map(|player| player.name.clone())
            .ok_or(RequestError::InvalidMessage)?;

        let left = self.roster.remove_from_army(
            id,
            RemoveFromArmy {
                clear_color: true,
                set_spectator: true,
            },
        );
        if !left {
            return Err(RequestError::CannotLeaveArmy);
        }

        self.dirty.mark(&[Topic::Players, Topic::Armies]);
        self.announce(&name, " is now a spectator.");
        Ok(Value::Null)
    }

    fn toggle_ready(&mut self, client_id: u32) -> HandlerResult {
        let id = PlayerId::Client(client_id);
        if !self.roster.contains(id) {
            return Err(RequestError::InvalidMessage);
        }
        if self.control.countdown {
            return Err(RequestError::CountdownStarted);
        }

        let mut announcement = None;
        if let Some(player) = self.roster.player_mut(id) {
            player.ready = !player.ready;
            announcement = Some((player.name.clone(), player.ready));
        }
        self.dirty.mark(&[Topic::Players]);

        if let Some((name, ready)) = announcement {
            let message = if ready {
                " is now ready."
            } else {
                " is no longer ready."
            };
            self.announce(&name, message);
        }
        Ok(Value::Null)
    }

    fn chat_message(&mut self, client_id: u32, message: String) -> HandlerResult {
        if message.is_empty() {
            return Err(RequestError::InvalidMessage);
        }
        let player_name = self
            .roster
            .player(PlayerId::Client(client_id))
            .map(|player| player.name.clone())
            .ok_or(RequestError::InvalidMessage)?;

        let entry = ChatEntry {
            player_name,
            message,
        };
        self.chat.push_back(entry.clone());
        while self.chat.len() > MAX_CHAT_HISTORY {
            self.chat.pop_front();
        }

        self.broadcast("chat_message", &entry);
        Ok(Value::Null)
    }

    fn chat_history_response(&self) -> HandlerResult {
        Ok(json!({ "chat_history": self.chat_history() }))
    }

    fn json_message(&mut self, client_id: u32, payload: Value) -> HandlerResult {
        if payload.is_null() {
            return Err(RequestError::NoPayload);
        }
        let account = self.account_of(PlayerId::Client(client_id));
        self.broadcast(
            "json_message",
            &json!({
                "id": client_id,
                "account": account,
                "payload": payload,
            }),
        );
        Ok(Value::Null)
    }

    fn kick(&mut self, now: Instant, client_id: u32, target: PlayerId) -> HandlerResult {
        if !self.is_moderator(PlayerId::Client(client_id)) {
            return Err(RequestError::OnlyModsCanKick);
        }
        if self.is_moderator(target) {
            return Err(RequestError::CannotKickMod);
        }
        if !self.roster.contains(target) {
            return Err(RequestError::AlreadyLeft);
        }

        if let Some(account) = self.account_of(target) {
            self.gate.add_to_blacklist(&account);
            self.dirty.mark(&[Topic::Beacon]);
        }
        info!("Client {} kicked {}", client_id, target);
        self.remove_player(now, target, false);
        Ok(Value::Null)
    }

    fn promote_to_mod(&mut self, client_id: u32, target: PlayerId) -> HandlerResult {
        if !self.is_moderator(PlayerId::Client(client_id)) {
            return Err(RequestError::OnlyModsCanPromote);
        }
        let account = self.account_of(target).ok_or(RequestError::PlayerAbsent)?;

        self.gate.add_moderator(&account);
        self.dirty.mark(&[Topic::Players]);
        Ok(Value::Null)
    }

    fn set_loading(&mut self, client_id: u32, loading: bool) -> HandlerResult {
        let player = self
            .roster
            .player_mut(PlayerId::Client(client_id))
            .ok_or(RequestError::InvalidMessage)?;
        player.loading = loading;
        self.dirty.mark(&[Topic::Players]);
        Ok(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{SessionConfig, COUNTDOWN_TICK, MAX_CHAT_HISTORY};
    use crate::session::{ClientInfo, Outbound, Session};
    use assert_approx_eq::assert_approx_eq;
    use serde_json::{json, Value};
    use shared::{Credentials, PlayerId, Topic};
    use std::time::{Duration, Instant};

    fn client(id: u32, name: &str) -> ClientInfo {
        ClientInfo::new(
            id,
            name,
            Credentials {
                account_id: name.to_string(),
                ..Credentials::default()
            },
        )
    }

    fn lobby(now: Instant) -> Session {
        let config = SessionConfig {
            public: true,
            rng_seed: Some(21),
            ..SessionConfig::default()
        };
        Session::enter(config, Some(client(1, "owner")), now).unwrap()
    }

    /// Sends a request and returns `(success, payload)` of its response.
    fn request(session: &mut Session, now: Instant, client_id: u32, message_type: &str, payload: Value) -> (bool, Value) {
        let payload = if payload.is_null() {
            String::new()
        } else {
            payload.to_string()
        };
        session.handle_request(now, client_id, 77, message_type, &payload);
        session
            .drain_outbox()
            .into_iter()
            .find_map(|out| match out {
                Outbound::Respond {
                    client_id: to,
                    request_id: 77,
                    success,
                    payload,
                } if to == client_id => Some((success, payload)),
                _ => None,
            })
            .expect("request was not answered")
    }

    fn two_slot_lobby(now: Instant) -> Session {
        let mut session = lobby(now);
        let (ok, _) = request(
            &mut session,
            now,
            1,
            "reset_armies",
            json!([{ "slots": 1 }, { "slots": 1 }]),
        );
        assert!(ok);
        session
    }

    #[test]
    fn test_unknown_message_type() {
        let now = Instant::now();
        let mut session = lobby(now);
        let (ok, reason) = request(&mut session, now, 1, "make_coffee", Value::Null);
        assert!(!ok);
        assert_eq!(reason, "Unsupported message: make_coffee");
    }

    #[test]
    fn test_bad_payload_is_invalid_message() {
        let now = Instant::now();
        let mut session = lobby(now);
        let (ok, reason) = request(&mut session, now, 1, "remove_army", json!("three"));
        assert!(!ok);
        assert_eq!(reason, "Invalid message");
    }

    #[test]
    fn test_only_creator_configures() {
        let now = Instant::now();
        let mut session = lobby(now);
        session.connect(now, client(2, "guest"), false).unwrap();

        let (ok, reason) = request(&mut session, now, 2, "reset_armies", json!([{ "slots": 2 }]));
        assert!(!ok);
        assert_eq!(reason, "Not allowed.");
        assert!(session.roster().armies().is_empty());
    }

    #[test]
    fn test_reset_armies_seats_waiting_players() {
        let now = Instant::now();
        let session = two_slot_lobby(now);
        assert!(session.control().has_first_config);
        assert_eq!(session.roster().armies().len(), 2);
        assert_eq!(
            session.roster().player(PlayerId::Client(1)).unwrap().army,
            Some(0)
        );
    }

    #[test]
    fn test_add_army_without_options_is_refused() {
        let now = Instant::now();
        let mut session = lobby(now);
        let (ok, reason) = request(&mut session, now, 1, "add_army", json!({}));
        assert!(!ok);
        assert_eq!(reason, "Not allowed.");
    }

    #[test]
    fn test_add_ai_fills_army_and_releases_on_failure() {
        let now = Instant::now();
        let mut session = two_slot_lobby(now);

        let (ok, _) = request(&mut session, now, 1, "add_ai", json!({ "army_index": 1 }));
        assert!(ok);
        let ai = session
            .roster()
            .players()
            .find(|player| player.is_ai())
            .unwrap();
        assert_eq!(ai.army, Some(1));
        assert!(ai.ready);

        let (ok, _) = request(&mut session, now, 1, "add_ai", json!({ "army_index": 1 }));
        assert!(ok);
        assert_eq!(session.roster().players().filter(|p| p.is_ai()).count(), 1);
    }

    #[test]
    fn test_econ_factor_is_clamped() {
        let now = Instant::now();
        let mut session = two_slot_lobby(now);
        request(&mut session, now, 1, "add_ai", json!({ "army_index": 1 }));
        let ai = session.roster().player_ids().into_iter().find(PlayerId::is_ai).unwrap();

        let (ok, _) = request(
            &mut session,
            now,
            1,
            "set_econ_factor",
            json!({ "id": ai, "economy_factor": 9.0 }),
        );
        assert!(ok);
        assert_approx_eq!(session.roster().player(ai).unwrap().economy_factor, 5.0);
    }

    #[test]
    fn test_modify_system_validates() {
        let now = Instant::now();
        let mut session = lobby(now);
        let (ok, reason) = request(
            &mut session,
            now,
            1,
            "modify_system",
            json!({ "name": "Void", "planets": [] }),
        );
        assert!(!ok);
        assert_eq!(reason, "Invalid system provided - No planets.");

        let system = json!({
            "name": "Solo",
            "planets": [{ "name": "p", "starting_planet": true, "generator": { "biome": "earth" } }]
        });
        let (ok, _) = request(&mut session, now, 1, "modify_system", system);
        assert!(ok);
        assert_eq!(session.system().name, "Solo");
        assert!(!session.control().system_ready);
    }

    #[test]
    fn test_modify_settings_from_guest_restores_settings() {
        let now = Instant::now();
        let mut session = lobby(now);
        session.connect(now, client(2, "guest"), false).unwrap();
        session.poll(now);
        session.drain_outbox();

        let (ok, _) = request(&mut session, now, 2, "modify_settings", json!({ "public": false }));
        assert!(!ok);

        session.poll(now);
        let resent = session.drain_outbox().into_iter().any(|out| {
            matches!(out, Outbound::Broadcast { message_type, .. } if message_type == Topic::Settings.as_str())
        });
        assert!(resent);
    }

    #[test]
    fn test_modify_settings_announces_and_unreadies() {
        let now = Instant::now();
        let mut session = two_slot_lobby(now);
        session.connect(now, client(2, "second"), false).unwrap();
        request(&mut session, now, 2, "toggle_ready", Value::Null);
        assert!(session.roster().player(PlayerId::Client(2)).unwrap().ready);
        session.drain_outbox();

        let (ok, _) = request(
            &mut session,
            now,
            1,
            "modify_settings",
            json!({
                "public": true,
                "game_name": "Friday",
                "game_options": { "game_type": "FreeForAll", "sandbox": true }
            }),
        );
        assert!(ok);
        assert!(session.settings().game_options.sandbox);
        assert_eq!(session.settings().game_name, "Friday");
        assert!(!session.roster().player(PlayerId::Client(2)).unwrap().ready);
    }

    #[test]
    fn test_game_name_change_alone_keeps_ready() {
        let now = Instant::now();
        let mut session = two_slot_lobby(now);
        session.connect(now, client(2, "second"), false).unwrap();
        request(
            &mut session,
            now,
            1,
            "modify_settings",
            json!({ "public": true, "spectators": 3 }),
        );
        request(&mut session, now, 2, "toggle_ready", Value::Null);

        let long_name = "x".repeat(200);
        request(
            &mut session,
            now,
            1,
            "modify_settings",
            json!({ "public": true, "spectators": 3, "game_name": long_name }),
        );
        assert_eq!(session.settings().game_name.len(), 128);
        assert!(session.roster().player(PlayerId::Client(2)).unwrap().ready);
    }

    #[test]
    fn test_bounty_mode_needs_expansion_content() {
        let now = Instant::now();
        let mut session = lobby(now);
        request(
            &mut session,
            now,
            1,
            "modify_settings",
            json!({ "public": true, "game_options": { "bounty_mode": true, "bounty_value": 0.25 } }),
        );
        assert!(!session.settings().game_options.bounty_mode);
        assert_approx_eq!(session.settings().game_options.bounty_value, 0.25);
    }

    #[test]
    fn test_start_game_checks_in_order() {
        let now = Instant::now();
        let mut session = two_slot_lobby(now);
        session.connect(now, client(2, "second"), false).unwrap();

        let (ok, reason) = request(&mut session, now, 1, "start_game", Value::Null);
        assert!(!ok);
        assert_eq!(reason, "Not ready.");
        assert!(!session.roster().player(PlayerId::Client(1)).unwrap().ready);

        request(&mut session, now, 2, "toggle_ready", Value::Null);
        let (ok, reason) = request(&mut session, now, 1, "start_game", Value::Null);
        assert!(!ok);
        assert_eq!(reason, "Server is not done generating planets");

        session.sim_ready(now);
        let (ok, _) = request(&mut session, now, 1, "start_game", Value::Null);
        assert!(ok);
        assert!(session.control().countdown);
    }

    #[test]
    fn test_start_game_rejects_empty_slots() {
        let now = Instant::now();
        let mut session = two_slot_lobby(now);
        let (ok, reason) = request(&mut session, now, 1, "start_game", Value::Null);
        assert!(!ok);
        assert_eq!(reason, "Invalid game setup - Empty slots encountered");
    }

    #[test]
    fn test_countdown_then_launch() {
        let now = Instant::now();
        let mut session = two_slot_lobby(now);
        request(&mut session, now, 1, "add_ai", json!({ "army_index": 1 }));
        session.system_ready(now);
        session.sim_ready(now);
        session.drain_outbox();

        let (ok, _) = request(&mut session, now, 1, "start_game", Value::Null);
        assert!(ok);

        let (ok, reason) = request(&mut session, now, 1, "toggle_ready", Value::Null);
        assert!(!ok);
        assert_eq!(reason, "Cannot change ready after countdown has started.");

        let mut at = now;
        for _ in 0..10 {
            at += COUNTDOWN_TICK;
            session.poll(at);
            if session.is_launched() {
                break;
            }
        }
        assert!(session.is_launched());
        assert!(at >= now + Duration::from_secs(5));
    }

    #[test]
    fn test_requested_countdown_is_announced() {
        let now = Instant::now();
        let mut session = two_slot_lobby(now);
        request(&mut session, now, 1, "add_ai", json!({ "army_index": 1 }));
        session.system_ready(now);
        session.sim_ready(now);
        session.drain_outbox();

        let payload = json!({ "countdown": 2 }).to_string();
        session.handle_request(now, 1, 5, "start_game", &payload);
        let messages: Vec<Value> = session
            .drain_outbox()
            .into_iter()
            .filter_map(|out| match out {
                Outbound::Broadcast {
                    message_type,
                    payload,
                } if message_type == "event_message" => Some(payload["message"].clone()),
                _ => None,
            })
            .collect();
        assert!(messages.contains(&json!("Game will start in 2 seconds.")));
        assert!(messages.contains(&json!(2)));

        session.poll(now + COUNTDOWN_TICK);
        assert!(!session.is_launched());
        session.poll(now + COUNTDOWN_TICK * 2);
        assert!(session.is_launched());
    }

    #[test]
    fn test_solo_start_is_immediate() {
        let now = Instant::now();
        let mut session = lobby(now);
        request(&mut session, now, 1, "reset_armies", json!([{ "slots": 1 }]));
        session.system_ready(now);
        session.sim_ready(now);

        let (ok, _) = request(&mut session, now, 1, "start_game", Value::Null);
        assert!(ok);
        assert!(session.control().starting);
        assert!(session.is_launched());
    }

    #[test]
    fn test_join_and_leave_army() {
        let now = Instant::now();
        let mut session = two_slot_lobby(now);
        session.connect(now, client(2, "second"), false).unwrap();

        let (ok, _) = request(&mut session, now, 2, "leave_army", Value::Null);
        assert!(ok);
        let second = session.roster().player(PlayerId::Client(2)).unwrap();
        assert!(second.spectator);
        assert!(second.color.is_none());

        let (ok, _) = request(&mut session, now, 2, "join_army", json!({ "army": 1 }));
        assert!(ok);
        assert_eq!(session.roster().player(PlayerId::Client(2)).unwrap().army, Some(1));

        let (ok, reason) = request(&mut session, now, 2, "join_army", json!({ "army": 0 }));
        assert!(!ok);
        assert_eq!(reason, "Unable to add player to army");
    }

    #[test]
    fn test_chat_history_is_capped() {
        let now = Instant::now();
        let mut session = lobby(now);
        for n in 0..MAX_CHAT_HISTORY + 5 {
            request(&mut session, now, 1, "chat_message", json!({ "message": format!("m{}", n) }));
        }

        let (ok, history) = request(&mut session, now, 1, "chat_history", Value::Null);
        assert!(ok);
        let history = history["chat_history"].as_array().unwrap();
        assert_eq!(history.len(), MAX_CHAT_HISTORY);
        assert_eq!(history[0]["message"], "m5");

        let (ok, reason) = request(&mut session, now, 1, "chat_message", json!({ "message": "" }));
        assert!(!ok);
        assert_eq!(reason, "Invalid message");
    }

    #[test]
    fn test_json_message_relay() {
        let now = Instant::now();
        let mut session = lobby(now);
        let (ok, reason) = request(&mut session, now, 1, "json_message", Value::Null);
        assert!(!ok);
        assert_eq!(reason, "No payload");

        session.handle_request(now, 1, 5, "json_message", r#"{"ping":1}"#);
        let relayed = session.drain_outbox().into_iter().find_map(|out| match out {
            Outbound::Broadcast {
                message_type,
                payload,
            } if message_type == "json_message" => Some(payload),
            _ => None,
        });
        assert_eq!(
            relayed,
            Some(json!({ "id": 1, "account": "owner", "payload": { "ping": 1 } }))
        );
    }

    #[test]
    fn test_kick_rules() {
        let now = Instant::now();
        let mut session = two_slot_lobby(now);
        session.connect(now, client(2, "second"), false).unwrap();

        let (ok, reason) = request(&mut session, now, 2, "kick", json!({ "id": { "client": 1 } }));
        assert!(!ok);
        assert_eq!(reason, "Only mods can kick.");

        let (ok, _) = request(&mut session, now, 1, "kick", json!({ "id": { "client": 2 } }));
        assert!(ok);
        assert!(!session.roster().contains(PlayerId::Client(2)));
        assert!(session.gate().blacklist().contains(&"second".to_string()));

        let (ok, reason) = request(&mut session, now, 1, "kick", json!({ "id": { "client": 2 } }));
        assert!(!ok);
        assert_eq!(reason, "Already left");
    }

    #[test]
    fn test_promoted_mod_cannot_be_kicked() {
        let now = Instant::now();
        let mut session = two_slot_lobby(now);
        session.connect(now, client(2, "second"), false).unwrap();

        let (ok, _) = request(&mut session, now, 1, "promote_to_mod", json!({ "id": { "client": 2 } }));
        assert!(ok);
        let (ok, reason) = request(&mut session, now, 1, "kick", json!({ "id": { "client": 2 } }));
        assert!(!ok);
        assert_eq!(reason, "Mods cannot be kicked.");

        let (ok, reason) = request(&mut session, now, 1, "promote_to_mod", json!({ "id": { "client": 9 } }));
        assert!(!ok);
        assert_eq!(reason, "Player is absent");
    }

    #[test]
    fn test_leave_responds_before_removal() {
        let now = Instant::now();
        let mut session = two_slot_lobby(now);
        session.connect(now, client(2, "second"), false).unwrap();
        session.drain_outbox();

        session.handle_request(now, 2, 9, "leave", "");
        let outbox = session.drain_outbox();
        let respond = outbox
            .iter()
            .position(|out| matches!(out, Outbound::Respond { client_id: 2, .. }));
        let terminate = outbox
            .iter()
            .position(|out| matches!(out, Outbound::Terminate { client_id: 2, .. }));
        assert!(respond.unwrap() < terminate.unwrap());
    }

    #[test]
    fn test_ladder_handler_set() {
        let now = Instant::now();
        let mut config = SessionConfig::ladder(vec![vec!["alice".into()], vec!["bob".into()]]);
        config.rng_seed = Some(5);
        let mut session = Session::enter(config, Some(client(1, "alice")), now).unwrap();

        let (ok, reason) = request(&mut session, now, 1, "add_army", json!({ "options": {} }));
        assert!(!ok);
        assert_eq!(reason, "Unsupported message: add_army");

        let before = session.roster().player(PlayerId::Client(1)).unwrap().color;
        let (ok, _) = request(&mut session, now, 1, "next_primary_color", Value::Null);
        assert!(ok);
        let after = session.roster().player(PlayerId::Client(1)).unwrap().color;
        assert_ne!(before, after);

        let (ok, _) = request(&mut session, now, 1, "set_loading", json!({ "loading": false }));
        assert!(ok);
        assert!(!session.roster().player(PlayerId::Client(1)).unwrap().loading);
    }
}
