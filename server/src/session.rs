//! One pre-game lobby.
//!
//! `Session` owns the roster, color pool, access gate, lobby settings and
//! launch control flags of a single lobby, and is the only thing that
//! mutates them. It is synchronous and deterministic: every entry point
//! takes the current `Instant`, deferred work goes through a `TimerQueue`,
//! and every side effect leaves through the outbox as an `Outbound` command
//! for the host to carry out.
//!
//! Mutations mark topics dirty. `poll` fires due timers and then cleans the
//! dirty topics, so everything handled since the previous poll produces at
//! most one broadcast per topic.

use crate::access_gate::AccessGate;
use crate::ai::AiRegistry;
use crate::commanders::{Entitlements, OwnsEverything};
use crate::config::{
    SessionConfig, SessionMode, ABORT_GAME_DELAY, COUNTDOWN_TICK, DEFAULT_LOBBY_TAG,
    DISCONNECT_TIMEOUT, JOIN_ANNOUNCE_DELAY, LADDER_GAME_NAME, LADDER_LOBBY_TAG,
};
use crate::dirty::{DirtyTracker, Published};
use crate::error::{AdmissionError, SessionError};
use crate::launch::{self, LaunchData};
use crate::roster::{NewPlayer, Roster};
use crate::system::{random_ladder_system, validate_system};
use crate::timer::TimerQueue;
use crate::watchdog::{Presence, Watchdog, WatchdogEvent, WatchdogState};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::Value;
use shared::{
    AccountId, ArmyOptions, Beacon, BeaconGame, ChatEntry, ControlState, Credentials,
    EventMessage, GameOptions, GameType, LobbySettings, MinimalSystem, PlayerId, SystemConfig,
    Topic,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Instant;

/// Creator name shown in ladder lobby listings.
pub const LADDER_BEACON_CREATOR: &str = "Ladder";

/// A network client as the session sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub client_id: u32,
    pub name: String,
    pub credentials: Credentials,
}

impl ClientInfo {
    pub fn new(client_id: u32, name: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            client_id,
            name: name.into(),
            credentials,
        }
    }

    /// Account id, or a per-connection guest id when none was presented.
    pub fn account(&self) -> AccountId {
        if self.credentials.account_id.is_empty() {
            format!("guest-{}", self.client_id)
        } else {
            self.credentials.account_id.clone()
        }
    }
}

/// Side effects requested by the session, in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Broadcast {
        message_type: String,
        payload: Value,
    },
    Respond {
        client_id: u32,
        request_id: u32,
        success: bool,
        payload: Value,
    },
    Message {
        client_id: u32,
        message_type: String,
        payload: Value,
    },
    Reject {
        client_id: u32,
        reason: String,
    },
    Terminate {
        client_id: u32,
        reason: String,
    },
    Beacon(Option<Box<Beacon>>),
    SetMaxClients(usize),
    BuildSystem(Box<SystemConfig>),
    CreateSimulation,
    Launch(Box<LaunchData>),
    LadderAbandoned {
        penalty: bool,
        abandoned: Vec<AccountId>,
        remaining: Vec<AccountId>,
    },
    ShutdownSimulation {
        hard: bool,
    },
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionTimer {
    JoinAnnounce(String),
    CountdownTick,
    StartGame,
    DisconnectTimeout(u32),
    AbortGame,
}

pub struct Session {
    pub(crate) config: SessionConfig,
    pub(crate) roster: Roster,
    pub(crate) gate: AccessGate,
    pub(crate) ai: AiRegistry,
    pub(crate) settings: LobbySettings,
    pub(crate) control: ControlState,
    pub(crate) system: SystemConfig,
    pub(crate) minimal_system: MinimalSystem,
    pub(crate) creator: Option<u32>,
    pub(crate) chat: VecDeque<ChatEntry>,
    pub(crate) dirty: DirtyTracker,
    pub(crate) published: Published,
    pub(crate) timers: TimerQueue<SessionTimer>,
    pub(crate) countdown_left: i64,
    pub(crate) watchdog: Option<Watchdog>,
    pub(crate) entitlements: Box<dyn Entitlements>,
    uuid: String,
    launched: bool,
    abandoned: bool,
    finished: bool,
    max_clients: Option<usize>,
    newcomers: Vec<u32>,
    outbox: VecDeque<Outbound>,
    rng: StdRng,
    #[cfg(test)]
    failing_topic: Option<Topic>,
}

impl Session {
    /// Opens a lobby. Custom lobbies need the owner's connection; ladder
    /// lobbies take an optional first connection.
    pub fn enter(
        config: SessionConfig,
        owner: Option<ClientInfo>,
        now: Instant,
    ) -> Result<Session, SessionError> {
        Self::enter_with(config, owner, Box::new(OwnsEverything), now)
    }

    pub fn enter_with(
        config: SessionConfig,
        owner: Option<ClientInfo>,
        entitlements: Box<dyn Entitlements>,
        now: Instant,
    ) -> Result<Session, SessionError> {
        let mut rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let roster = Roster::with_seed(rng.gen());
        let ai = AiRegistry::with_rng(&mut rng);
        let uuid = format!("{:032x}", rng.gen::<u128>());
        let settings = Self::initial_settings(&config);

        let mut session = Session {
            roster,
            gate: AccessGate::new(),
            ai,
            settings,
            control: ControlState::default(),
            system: SystemConfig::default(),
            minimal_system: MinimalSystem::default(),
            creator: None,
            chat: VecDeque::new(),
            dirty: DirtyTracker::new(),
            published: Published::new(),
            timers: TimerQueue::new(),
            countdown_left: 0,
            watchdog: None,
            entitlements,
            uuid,
            launched: false,
            abandoned: false,
            finished: false,
            max_clients: None,
            newcomers: Vec::new(),
            outbox: VecDeque::new(),
            rng,
            config,
            #[cfg(test)]
            failing_topic: None,
        };

        match session.config.mode.clone() {
            SessionMode::Custom => session.enter_custom(owner, now)?,
            SessionMode::Ladder { armies } => session.enter_ladder(armies, owner, now)?,
        }

        session.dirty.mark_all();
        info!(
            "Lobby session entered ({})",
            if session.is_ladder() { "ladder" } else { "custom" }
        );
        Ok(session)
    }

    fn initial_settings(config: &SessionConfig) -> LobbySettings {
        let ladder = config.mode.is_ladder();
        let mut game_options = GameOptions {
            game_type: if ladder {
                GameType::Ladder1v1
            } else {
                config.custom_game_type()
            },
            ..GameOptions::default()
        };
        if ladder {
            game_options.bounty_value = 0.0;
        }

        LobbySettings {
            hidden: !ladder && !config.public,
            friends: false,
            public: ladder || config.public,
            tag: if ladder { LADDER_LOBBY_TAG } else { DEFAULT_LOBBY_TAG }.to_string(),
            game_name: if ladder {
                LADDER_GAME_NAME.to_string()
            } else {
                config.lobby_name.clone()
            },
            spectators: config.max_spectators,
            max_players: config.max_players,
            max_spectators: config.max_spectators,
            required_content: config.required_content.clone(),
            game_options,
        }
    }

    fn enter_custom(&mut self, owner: Option<ClientInfo>, now: Instant) -> Result<(), SessionError> {
        let owner = owner.ok_or(SessionError::MissingOwner)?;

        if let Some(password) = &self.config.server_password {
            if &owner.credentials.password != password {
                error!("Lobby owner did not present the server password");
                return Err(SessionError::BadServerPassword);
            }
        }

        let account = owner.account();
        self.gate.set_session_secret(&owner.credentials.session_secret);
        self.gate.add_moderator(&account);
        self.creator = Some(owner.client_id);

        self.add_human(now, &owner, true, false);
        Ok(())
    }

    fn enter_ladder(
        &mut self,
        armies: Vec<Vec<AccountId>>,
        owner: Option<ClientInfo>,
        now: Instant,
    ) -> Result<(), SessionError> {
        if armies.len() != 2 || armies.iter().any(|army| army.is_empty()) {
            error!("Ladder lobby needs two armies of expected accounts");
            return Err(SessionError::BadLadderArmies);
        }

        self.roster.set_assignments(armies.clone());
        for army in &armies {
            let options = ArmyOptions {
                slots: Some(army.len()),
                alliance: true,
                spec_tag: String::new(),
            };
            self.roster.add_army(&options, self.config.max_players);
        }

        self.gate.set_password("");
        self.gate.clear_whitelist();
        for account in armies.iter().flatten() {
            self.gate.add_to_whitelist(account);
        }
        self.gate.clear_blacklist();

        let mut system = random_ladder_system(&mut self.rng);
        if let Err(err) = validate_system(&mut system) {
            error!("Invalid random system for 1v1 ladder: {}", err);
            return Err(SessionError::InvalidLadderSystem(err));
        }
        self.change_system(system);

        let mut watchdog = Watchdog::new(ABORT_GAME_DELAY);
        let presence = self.presence();
        watchdog.setup(
            armies.into_iter().flatten(),
            self.config.start_game_delay,
            now,
            &presence,
        );
        self.watchdog = Some(watchdog);

        if let Some(owner) = owner {
            // Admission failures are already reported through the outbox.
            let _ = self.connect(now, owner, false);
        }
        Ok(())
    }

    /// Cancels all pending work. The session accepts no further input.
    pub fn exit(&mut self) -> bool {
        self.timers.cancel_all();
        if let Some(watchdog) = self.watchdog.as_mut() {
            watchdog.stop();
        }
        self.dirty.clear();
        self.finished = true;
        true
    }

    /// Last broadcast value of every client-visible topic.
    pub fn client_state(&self) -> BTreeMap<Topic, Value> {
        let mut state = self.published.snapshot();
        state.remove(&Topic::Beacon);
        state
    }

    pub fn is_ladder(&self) -> bool {
        self.config.mode.is_ladder()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_launched(&self) -> bool {
        self.launched
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    pub fn settings(&self) -> &LobbySettings {
        &self.settings
    }

    pub fn control(&self) -> &ControlState {
        &self.control
    }

    pub fn system(&self) -> &SystemConfig {
        &self.system
    }

    pub fn creator(&self) -> Option<u32> {
        self.creator
    }

    pub fn chat_history(&self) -> Vec<ChatEntry> {
        self.chat.iter().cloned().collect()
    }

    pub fn watchdog_state(&self) -> Option<WatchdogState> {
        self.watchdog.as_ref().and_then(Watchdog::state)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        let session = self.timers.next_deadline();
        let watchdog = self.watchdog.as_ref().and_then(Watchdog::next_deadline);
        match (session, watchdog) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn drain_outbox(&mut self) -> Vec<Outbound> {
        self.outbox.drain(..).collect()
    }

    /// Admits or rejects a connecting client.
    pub fn connect(
        &mut self,
        now: Instant,
        client: ClientInfo,
        reconnect: bool,
    ) -> Result<PlayerId, AdmissionError> {
        let account = client.account();
        let credentials = &client.credentials;

        if !self.gate.is_admissible(
            &account,
            &credentials.password,
            &credentials.session_secret,
            self.settings.public,
        ) {
            info!("Rejecting client {}: invalid credentials", client.client_id);
            return Err(self.reject(client.client_id, AdmissionError::InvalidCredentials));
        }

        let id = PlayerId::Client(client.client_id);
        let known = self.roster.contains(id);

        if reconnect && !known {
            debug!("Client {} reconnected but is no longer in the lobby", client.client_id);
        }

        if !known && self.roster.len() >= self.capacity() {
            warn!("Lobby at capacity, rejecting client {}", client.client_id);
            return Err(self.reject(client.client_id, AdmissionError::NoRoom));
        }

        if known {
            self.reconnect_player(client.client_id);
        } else {
            let spectator = !self.is_ladder()
                && self.roster.non_spectator_count() >= self.config.max_players;
            let creator = self.creator == Some(client.client_id);
            self.add_human(now, &client, creator, spectator);
        }

        self.roster.add_players_to_slots_if_possible();
        self.roster.spectate_if_unassigned(id);
        self.dirty.mark(&[Topic::Players, Topic::Armies]);
        self.newcomers.push(client.client_id);

        self.observe_presence(now);
        Ok(id)
    }

    fn reject(&mut self, client_id: u32, err: AdmissionError) -> AdmissionError {
        self.outbox.push_back(Outbound::Reject {
            client_id,
            reason: err.to_string(),
        });
        err
    }

    fn capacity(&self) -> usize {
        let seats = match &self.config.mode {
            SessionMode::Ladder { armies } => armies.iter().map(Vec::len).sum(),
            SessionMode::Custom => self.roster.total_slots(),
        };
        self.config
            .max_clients()
            .min(seats + self.settings.spectators)
    }

    fn add_human(&mut self, now: Instant, client: &ClientInfo, creator: bool, spectator: bool) {
        let id = PlayerId::Client(client.client_id);
        self.roster.add_player(
            id,
            NewPlayer {
                name: client.name.clone(),
                account: Some(client.account()),
                creator,
                spectator,
                ai: None,
            },
        );
        self.timers.schedule(
            now,
            JOIN_ANNOUNCE_DELAY,
            SessionTimer::JoinAnnounce(client.name.clone()),
        );
        self.dirty.mark(&[Topic::Players]);
        debug!("Added player {} ({})", id, client.name);
    }

    fn reconnect_player(&mut self, client_id: u32) {
        self.timers
            .cancel_where(|timer| *timer == SessionTimer::DisconnectTimeout(client_id));
        if let Some(player) = self.roster.player_mut(PlayerId::Client(client_id)) {
            player.connected = true;
        }
        self.dirty.mark(&[Topic::Players]);
    }

    /// Handles a dropped connection.
    pub fn disconnect(&mut self, now: Instant, client_id: u32) {
        let id = PlayerId::Client(client_id);
        if !self.roster.contains(id) {
            return;
        }

        if self.is_ladder() || self.launched {
            if let Some(player) = self.roster.player_mut(id) {
                player.connected = false;
            }
            if self.is_ladder() && !self.launched {
                self.timers.schedule(
                    now,
                    DISCONNECT_TIMEOUT,
                    SessionTimer::DisconnectTimeout(client_id),
                );
            }
            self.dirty.mark(&[Topic::Players]);
        } else {
            info!("Removing disconnected player {} from the lobby", client_id);
            self.remove_player(now, id, false);
        }

        self.observe_presence(now);
    }

    /// Called by the host once terrain generation finishes.
    pub fn system_ready(&mut self, now: Instant) {
        self.change_control(|control| control.system_ready = true);
        self.outbox.push_back(Outbound::CreateSimulation);
        self.maybe_start(now);
    }

    /// Called by the host once the simulation reports ready.
    pub fn sim_ready(&mut self, now: Instant) {
        self.change_control(|control| control.sim_ready = true);
        self.maybe_start(now);
    }

    /// Fires due timers, then broadcasts every dirty topic once.
    pub fn poll(&mut self, now: Instant) {
        if self.finished {
            return;
        }

        while let Some((_, timer)) = self.timers.pop_due(now) {
            self.fire(now, timer);
            if self.finished {
                return;
            }
        }

        let presence = self.presence();
        let events = match self.watchdog.as_mut() {
            Some(watchdog) => watchdog.poll(now, &presence),
            None => Vec::new(),
        };
        self.handle_watchdog_events(now, events);
        if self.finished {
            return;
        }

        self.observe_presence(now);
        if self.dirty.is_pending() {
            self.flush();
        }
    }

    fn fire(&mut self, now: Instant, timer: SessionTimer) {
        match timer {
            SessionTimer::JoinAnnounce(name) => self.announce(&name, " joined the lobby."),
            SessionTimer::CountdownTick => self.countdown_tick(now),
            SessionTimer::StartGame => self.start_game_now(now),
            SessionTimer::DisconnectTimeout(client_id) => {
                info!("Client {} did not come back, removing", client_id);
                self.remove_player(now, PlayerId::Client(client_id), false);
            }
            SessionTimer::AbortGame => self.abort_game(),
        }
    }

    pub(crate) fn presence(&self) -> Presence {
        Presence {
            accounts: self
                .roster
                .players()
                .filter_map(|player| player.account.clone())
                .collect::<BTreeSet<_>>(),
            connected: self
                .roster
                .players()
                .filter(|player| player.connected)
                .filter_map(|player| player.account.clone())
                .collect::<BTreeSet<_>>(),
            any_loading: self
                .roster
                .players()
                .any(|player| !player.spectator && player.loading),
        }
    }

    pub(crate) fn observe_presence(&mut self, now: Instant) {
        if self.finished {
            return;
        }
        let presence = self.presence();
        let events = match self.watchdog.as_mut() {
            Some(watchdog) => watchdog.update(now, &presence),
            None => return,
        };
        self.handle_watchdog_events(now, events);
    }

    fn handle_watchdog_events(&mut self, now: Instant, events: Vec<WatchdogEvent>) {
        for event in events {
            match event {
                WatchdogEvent::Countdown(seconds) => {
                    self.broadcast_event(EventMessage::countdown(seconds))
                }
                WatchdogEvent::StartGame => {
                    self.announce("", "Game is starting.");
                    self.change_control(|control| control.starting = true);
                    self.maybe_start(now);
                }
                WatchdogEvent::Abandoned {
                    account,
                    remaining,
                    penalty,
                } => self.abandon_game(penalty, vec![account], remaining),
                WatchdogEvent::Abort => self.abort_game(),
            }
            if self.finished {
                return;
            }
        }
    }

    /// Broadcasts every dirty topic whose value changed since it was last
    /// broadcast, then brings newly connected clients up to date. A topic
    /// that fails to serialise stays dirty for the next flush.
    pub(crate) fn flush(&mut self) {
        let mut sent = BTreeSet::new();
        let mut failed = Vec::new();

        for topic in self.dirty.take() {
            if topic == Topic::Beacon {
                self.update_beacon();
                continue;
            }

            match self.topic_value(topic) {
                Ok(value) => {
                    if self.published.replace_if_changed(topic, value.clone()) {
                        self.outbox.push_back(Outbound::Broadcast {
                            message_type: topic.as_str().to_string(),
                            payload: value,
                        });
                        sent.insert(topic);
                    }
                }
                Err(err) => {
                    error!("Lobby unable to clean {}: {}", topic.as_str(), err);
                    failed.push(topic);
                }
            }
        }
        self.dirty.mark(&failed);

        for client_id in std::mem::take(&mut self.newcomers) {
            for (topic, value) in self.client_state() {
                if sent.contains(&topic) {
                    continue;
                }
                self.outbox.push_back(Outbound::Message {
                    client_id,
                    message_type: topic.as_str().to_string(),
                    payload: value,
                });
            }
        }
    }

    fn topic_value(&self, topic: Topic) -> Result<Value, serde_json::Error> {
        #[cfg(test)]
        if self.failing_topic == Some(topic) {
            return Err(serde::ser::Error::custom("topic unavailable"));
        }

        match topic {
            Topic::Players => {
                let gate = &self.gate;
                serde_json::to_value(self.roster.player_infos(|player| {
                    player
                        .account
                        .as_deref()
                        .map_or(false, |account| gate.is_moderator(account))
                }))
            }
            Topic::Armies => serde_json::to_value(self.roster.army_infos()),
            Topic::System => serde_json::to_value(&self.minimal_system),
            Topic::Colors => serde_json::to_value(self.roster.colors().snapshot()),
            Topic::Control => serde_json::to_value(&self.control),
            Topic::Settings => serde_json::to_value(&self.settings),
            Topic::Beacon => serde_json::to_value(self.beacon()),
        }
    }

    fn connected_humans(&self) -> usize {
        self.roster
            .players()
            .filter(|player| !player.is_ai() && player.connected)
            .count()
    }

    pub(crate) fn max_clients(&self) -> usize {
        let spectators = self.config.max_spectators.min(self.settings.spectators);
        match &self.config.mode {
            SessionMode::Ladder { armies } => armies.iter().map(Vec::len).sum::<usize>() + spectators,
            SessionMode::Custom => {
                self.config.max_players.min(self.roster.total_slots()) + spectators
            }
        }
    }

    fn creator_name(&self) -> String {
        self.creator
            .and_then(|id| self.roster.player(PlayerId::Client(id)))
            .map(|player| player.name.clone())
            .unwrap_or_default()
    }

    /// Listing summary, or `None` when the lobby should not be listed.
    pub fn beacon(&self) -> Option<Beacon> {
        let whitelist = self.gate.whitelist();
        let (publish, creator, max_players) = match &self.config.mode {
            SessionMode::Ladder { armies } => (
                !self.settings.hidden,
                LADDER_BEACON_CREATOR.to_string(),
                armies.iter().map(Vec::len).sum(),
            ),
            SessionMode::Custom => (
                (self.settings.public || !whitelist.is_empty()) && !self.settings.hidden,
                self.creator_name(),
                self.roster.total_slots(),
            ),
        };
        if !publish {
            return None;
        }

        let (spectator_names, player_names): (Vec<_>, Vec<_>) =
            self.roster.players().partition(|player| player.spectator);
        let player_names: Vec<String> = player_names.iter().map(|p| p.name.clone()).collect();
        let spectator_names: Vec<String> = spectator_names.iter().map(|p| p.name.clone()).collect();
        let options = &self.settings.game_options;

        Some(Beacon {
            uuid: self.uuid.clone(),
            full: self.connected_humans() >= self.max_clients(),
            started: self.control.countdown || self.control.starting,
            players: player_names.len(),
            creator,
            max_players,
            spectators: spectator_names.len(),
            max_spectators: self.settings.spectators,
            mode: options.game_type,
            player_names,
            spectator_names,
            require_password: self.gate.requires_password(),
            whitelist,
            blacklist: self.gate.blacklist(),
            tag: self.settings.tag.clone(),
            game: BeaconGame {
                system: Some(self.minimal_system.clone()),
                name: self.settings.game_name.clone(),
            },
            required_content: self.settings.required_content.clone(),
            bounty_mode: options.bounty_mode,
            bounty_value: options.bounty_value,
            sandbox: options.sandbox,
        })
    }

    fn update_beacon(&mut self) {
        let max_clients = self.max_clients();
        if self.max_clients != Some(max_clients) {
            self.max_clients = Some(max_clients);
            self.outbox.push_back(Outbound::SetMaxClients(max_clients));
        }

        let beacon = self.beacon();
        match serde_json::to_value(&beacon) {
            Ok(value) => {
                if self.published.replace_if_changed(Topic::Beacon, value) {
                    self.outbox.push_back(Outbound::Beacon(beacon.map(Box::new)));
                }
            }
            Err(err) => error!("Lobby unable to clean beacon: {}", err),
        }
    }

    pub(crate) fn broadcast<T: Serialize>(&mut self, message_type: &str, payload: &T) {
        match serde_json::to_value(payload) {
            Ok(payload) => self.outbox.push_back(Outbound::Broadcast {
                message_type: message_type.to_string(),
                payload,
            }),
            Err(err) => error!("Unable to encode {} broadcast: {}", message_type, err),
        }
    }

    pub(crate) fn broadcast_event(&mut self, event: EventMessage) {
        self.broadcast("event_message", &event);
    }

    /// Broadcasts a human-readable lobby event ("Alice joined the lobby.").
    pub(crate) fn announce(&mut self, target: &str, message: &str) {
        self.broadcast_event(EventMessage::text(target, message));
    }

    pub(crate) fn respond(&mut self, client_id: u32, request_id: u32, success: bool, payload: Value) {
        self.outbox.push_back(Outbound::Respond {
            client_id,
            request_id,
            success,
            payload,
        });
    }

    pub(crate) fn send(&mut self, client_id: u32, message_type: &str, payload: Value) {
        self.outbox.push_back(Outbound::Message {
            client_id,
            message_type: message_type.to_string(),
            payload,
        });
    }

    pub(crate) fn change_control<F>(&mut self, change: F)
    where
        F: FnOnce(&mut ControlState),
    {
        let before = self.control.clone();
        change(&mut self.control);
        if self.control != before {
            self.dirty.mark(&[Topic::Control, Topic::Beacon]);
        }
    }

    pub(crate) fn change_system(&mut self, system: SystemConfig) {
        if system == self.system {
            return;
        }

        self.change_control(|control| {
            control.system_ready = false;
            control.sim_ready = false;
        });
        self.minimal_system = system.minimal();
        self.system = system;
        self.dirty.mark(&[Topic::System]);
        self.outbox
            .push_back(Outbound::BuildSystem(Box::new(self.system.clone())));
    }

    /// Clears everyone's ready flag, announcing each human who was ready.
    pub(crate) fn unready_all(&mut self) {
        let mut names = Vec::new();
        for player in self.roster.players_mut() {
            if player.ready && !player.is_ai() {
                player.ready = false;
                names.push(player.name.clone());
            }
        }
        for name in names {
            self.announce(&name, " is no longer ready.");
        }
        self.dirty.mark(&[Topic::Players]);
    }

    /// Whether `client_id` may reconfigure the lobby right now.
    pub(crate) fn allow_changes_from(&self, client_id: u32) -> bool {
        self.creator == Some(client_id) && !self.control.countdown && !self.control.starting
    }

    /// Removes a roster entry. Unknown ids are ignored.
    pub(crate) fn remove_player(&mut self, now: Instant, id: PlayerId, voluntary: bool) {
        let Some(player) = self.roster.player(id).cloned() else {
            return;
        };

        if voluntary && self.is_ladder() {
            if let Some(account) = player.account.clone() {
                if self.roster.assigned_army(&account).is_some() {
                    let remaining: Vec<AccountId> = self
                        .roster
                        .assignments()
                        .unwrap_or_default()
                        .iter()
                        .flatten()
                        .filter(|other| **other != account)
                        .cloned()
                        .collect();
                    self.abandon_game(true, vec![account], remaining);
                    self.timers.schedule(now, ABORT_GAME_DELAY, SessionTimer::AbortGame);
                }
            }
        }

        self.roster.remove_player(id);
        self.dirty.mark(&[Topic::Players, Topic::Armies]);

        let client_id = match id {
            PlayerId::Ai(ai_id) => {
                self.ai.release_id(ai_id);
                return;
            }
            PlayerId::Client(client_id) => client_id,
        };

        self.timers
            .cancel_where(|timer| *timer == SessionTimer::DisconnectTimeout(client_id));
        self.announce(&player.name, " has left the lobby.");
        self.outbox.push_back(Outbound::Terminate {
            client_id,
            reason: "Removed from lobby".to_string(),
        });

        if !self.is_ladder() && !self.config.keep_alive && self.connected_humans() == 0 {
            info!("Last player left, shutting down");
            self.shutdown_and_exit();
            return;
        }

        if self.creator == Some(client_id) {
            self.choose_next_creator();
        }
    }

    fn choose_next_creator(&mut self) {
        let next = self
            .roster
            .players()
            .filter(|player| !player.is_ai() && player.connected)
            .filter_map(|player| player.id.client_id())
            .min();
        let Some(client_id) = next else {
            self.creator = None;
            return;
        };

        self.creator = Some(client_id);
        let mut announcement = None;
        if let Some(player) = self.roster.player_mut(PlayerId::Client(client_id)) {
            player.creator = true;
            announcement = Some((player.name.clone(), player.account.clone()));
        }
        if let Some((name, account)) = announcement {
            if let Some(account) = account {
                self.gate.add_moderator(&account);
            }
            self.announce(&name, " is now the host.");
        }
        self.dirty.mark(&[Topic::Players]);
    }

    fn abandon_game(&mut self, penalty: bool, abandoned: Vec<AccountId>, remaining: Vec<AccountId>) {
        if self.abandoned {
            return;
        }
        self.abandoned = true;

        info!("Ladder game abandoned by {:?}", abandoned);
        self.outbox.push_back(Outbound::LadderAbandoned {
            penalty,
            abandoned,
            remaining,
        });
        let delay_ms = u64::try_from(ABORT_GAME_DELAY.as_millis()).unwrap_or(u64::MAX);
        self.broadcast_event(EventMessage::with_kind("", Value::from(delay_ms), "abandonment"));
    }

    fn abort_game(&mut self) {
        info!("Aborting lobby");
        self.shutdown_and_exit();
    }

    fn shutdown_and_exit(&mut self) {
        self.flush();
        self.outbox
            .push_back(Outbound::ShutdownSimulation { hard: false });
        self.outbox.push_back(Outbound::Exit);
        self.exit();
    }

    pub(crate) fn countdown_tick(&mut self, now: Instant) {
        self.broadcast_event(EventMessage::countdown(self.countdown_left));
        self.countdown_left -= 1;

        let next = if self.countdown_left > 0 {
            SessionTimer::CountdownTick
        } else {
            SessionTimer::StartGame
        };
        self.timers.schedule(now, COUNTDOWN_TICK, next);
    }

    pub(crate) fn start_game_now(&mut self, now: Instant) {
        self.broadcast_event(EventMessage::countdown(-1));
        self.announce("", "Game is starting.");
        self.change_control(|control| control.starting = true);
        self.maybe_start(now);
    }

    /// Launches once start was requested and both terrain and simulation
    /// are ready. Safe to call any number of times.
    pub(crate) fn maybe_start(&mut self, _now: Instant) {
        if self.launched
            || !self.control.starting
            || !self.control.system_ready
            || !self.control.sim_ready
        {
            return;
        }
        self.launched = true;

        self.dirty.mark_all();
        self.flush();

        let is_ladder = self.is_ladder();
        let data = launch::final_data(
            &mut self.roster,
            &self.system,
            &self.settings.game_options,
            is_ladder,
        );
        match serde_json::to_string(&data) {
            Ok(json) => debug!("final lobby data: {}", json),
            Err(err) => error!("final lobby data: failed ({})", err),
        }
        info!(
            "Launching with {} armies and {} players",
            data.armies.len(),
            data.players.len()
        );

        self.timers.cancel_all();
        if let Some(watchdog) = self.watchdog.as_mut() {
            watchdog.stop();
        }
        self.dirty.mark(&[Topic::Players, Topic::Armies]);
        self.outbox.push_back(Outbound::Launch(Box::new(data)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FIRST_CONNECT_WAIT, START_GAME_DELAY_SECS};
    use std::time::Duration;

    pub(crate) fn client(id: u32, name: &str) -> ClientInfo {
        ClientInfo::new(
            id,
            name,
            Credentials {
                account_id: format!("acct-{}", name),
                ..Credentials::default()
            },
        )
    }

    fn custom(now: Instant) -> Session {
        let config = SessionConfig {
            public: true,
            rng_seed: Some(7),
            ..SessionConfig::default()
        };
        Session::enter(config, Some(client(1, "owner")), now).unwrap()
    }

    fn broadcasts(outbox: &[Outbound], message_type: &str) -> usize {
        outbox
            .iter()
            .filter(|out| {
                matches!(out, Outbound::Broadcast { message_type: kind, .. } if kind == message_type)
            })
            .count()
    }

    fn events(outbox: &[Outbound]) -> Vec<Value> {
        outbox
            .iter()
            .filter_map(|out| match out {
                Outbound::Broadcast {
                    message_type,
                    payload,
                } if message_type == "event_message" => Some(payload["message"].clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_custom_enter_requires_owner() {
        let result = Session::enter(SessionConfig::default(), None, Instant::now());
        assert!(matches!(result, Err(SessionError::MissingOwner)));
    }

    #[test]
    fn test_custom_enter_checks_server_password() {
        let config = SessionConfig {
            server_password: Some("hunter2".into()),
            ..SessionConfig::default()
        };
        let result = Session::enter(config, Some(client(1, "owner")), Instant::now());
        assert!(matches!(result, Err(SessionError::BadServerPassword)));
    }

    #[test]
    fn test_owner_is_creator_and_moderator() {
        let session = custom(Instant::now());
        assert_eq!(session.creator(), Some(1));
        assert!(session.gate().is_moderator("acct-owner"));
        assert!(session.roster().player(PlayerId::Client(1)).unwrap().creator);
    }

    #[test]
    fn test_first_poll_publishes_every_topic_once() {
        let now = Instant::now();
        let mut session = custom(now);
        session.poll(now);

        let outbox = session.drain_outbox();
        for topic in ["players", "armies", "system", "colors", "control", "settings"] {
            assert_eq!(broadcasts(&outbox, topic), 1, "{}", topic);
        }
        assert!(outbox.iter().any(|out| matches!(out, Outbound::Beacon(Some(_)))));
        assert!(outbox.iter().any(|out| matches!(out, Outbound::SetMaxClients(_))));

        session.poll(now);
        assert!(session.drain_outbox().is_empty());
    }

    #[test]
    fn test_mutations_in_one_turn_coalesce() {
        let now = Instant::now();
        let mut session = custom(now);
        session.poll(now);
        session.drain_outbox();

        session.roster.add_army(&ArmyOptions::with_slots(2), 10);
        session.dirty.mark(&[Topic::Armies]);
        session.connect(now, client(2, "b"), false).unwrap();
        session.connect(now, client(3, "c"), false).unwrap();
        session.change_control(|control| control.has_first_config = true);
        session.settings.tag = "casual".into();
        session.dirty.mark(&[Topic::Settings]);
        session.poll(now);

        let outbox = session.drain_outbox();
        for topic in ["players", "armies", "colors", "control", "settings"] {
            assert_eq!(broadcasts(&outbox, topic), 1, "{}", topic);
        }
        assert_eq!(broadcasts(&outbox, "system"), 0);
    }

    #[test]
    fn test_failed_topic_does_not_block_others() {
        let now = Instant::now();
        let mut session = custom(now);
        session.poll(now);
        session.drain_outbox();

        session.failing_topic = Some(Topic::Control);
        session.control.has_first_config = !session.control.has_first_config;
        session.dirty.mark(&[Topic::Control]);
        session.settings.tag = "casual".into();
        session.dirty.mark(&[Topic::Settings]);
        session.poll(now);

        let outbox = session.drain_outbox();
        assert_eq!(broadcasts(&outbox, "settings"), 1);
        assert_eq!(broadcasts(&outbox, "control"), 0);
        assert!(session.dirty.is_dirty(Topic::Control));

        session.failing_topic = None;
        session.poll(now);
        let outbox = session.drain_outbox();
        assert_eq!(broadcasts(&outbox, "control"), 1);
        assert_eq!(broadcasts(&outbox, "settings"), 0);
    }

    #[test]
    fn test_unknown_removal_is_noop() {
        let now = Instant::now();
        let mut session = custom(now);
        session.poll(now);
        session.drain_outbox();

        session.remove_player(now, PlayerId::Client(99), false);
        assert!(!session.dirty.is_pending());
        session.poll(now);
        assert!(session.drain_outbox().is_empty());
    }

    #[test]
    fn test_join_is_announced_after_delay() {
        let now = Instant::now();
        let mut session = custom(now);
        session.connect(now, client(2, "bob"), false).unwrap();
        session.poll(now);
        assert!(!events(&session.drain_outbox()).contains(&Value::from(" joined the lobby.")));

        session.poll(now + JOIN_ANNOUNCE_DELAY);
        let outbox = session.drain_outbox();
        assert!(events(&outbox).contains(&Value::from(" joined the lobby.")));
    }

    #[test]
    fn test_player_without_army_spectates() {
        let now = Instant::now();
        let mut session = custom(now);
        session.connect(now, client(2, "bob"), false).unwrap();
        let bob = session.roster().player(PlayerId::Client(2)).unwrap();
        assert!(bob.spectator);
        assert!(bob.color.is_none());
    }

    #[test]
    fn test_newcomer_receives_full_state() {
        let now = Instant::now();
        let mut session = custom(now);
        session.poll(now);
        session.drain_outbox();

        session.connect(now, client(2, "bob"), false).unwrap();
        session.poll(now);
        let outbox = session.drain_outbox();
        let direct: Vec<&str> = outbox
            .iter()
            .filter_map(|out| match out {
                Outbound::Message {
                    client_id: 2,
                    message_type,
                    ..
                } => Some(message_type.as_str()),
                _ => None,
            })
            .collect();
        assert!(direct.contains(&"system"));
        assert!(direct.contains(&"control"));
        assert!(!direct.contains(&"players"));
    }

    #[test]
    fn test_capacity_rejects_with_no_room() {
        let now = Instant::now();
        let config = SessionConfig {
            public: true,
            max_spectators: 1,
            ..SessionConfig::default()
        };
        let mut session = Session::enter(config, Some(client(1, "owner")), now).unwrap();
        assert_eq!(
            session.connect(now, client(2, "b"), false),
            Err(AdmissionError::NoRoom)
        );
        assert!(session
            .drain_outbox()
            .contains(&Outbound::Reject { client_id: 2, reason: "No room".into() }));
    }

    #[test]
    fn test_stale_reconnect_still_needs_room() {
        let now = Instant::now();
        let config = SessionConfig {
            public: true,
            max_spectators: 1,
            ..SessionConfig::default()
        };
        let mut session = Session::enter(config, Some(client(1, "owner")), now).unwrap();
        assert_eq!(
            session.connect(now, client(2, "b"), true),
            Err(AdmissionError::NoRoom)
        );
        assert_eq!(session.roster().len(), 1);
    }

    #[test]
    fn test_private_lobby_rejects_strangers() {
        let now = Instant::now();
        let config = SessionConfig {
            public: false,
            ..SessionConfig::default()
        };
        let mut session = Session::enter(config, Some(client(1, "owner")), now).unwrap();
        assert_eq!(
            session.connect(now, client(2, "b"), false),
            Err(AdmissionError::InvalidCredentials)
        );
    }

    #[test]
    fn test_creator_leaving_hands_over_host() {
        let now = Instant::now();
        let mut session = custom(now);
        session.roster.add_army(&ArmyOptions::with_slots(3), 10);
        session.connect(now, client(3, "c"), false).unwrap();
        session.connect(now, client(2, "b"), false).unwrap();
        session.drain_outbox();

        session.disconnect(now, 1);

        assert_eq!(session.creator(), Some(2));
        assert!(session.gate().is_moderator("acct-b"));
        let outbox = session.drain_outbox();
        assert!(events(&outbox).contains(&Value::from(" is now the host.")));
        assert!(outbox.contains(&Outbound::Terminate {
            client_id: 1,
            reason: "Removed from lobby".into()
        }));
    }

    #[test]
    fn test_last_player_leaving_exits() {
        let now = Instant::now();
        let mut session = custom(now);
        session.disconnect(now, 1);

        assert!(session.is_finished());
        let outbox = session.drain_outbox();
        assert!(outbox.contains(&Outbound::ShutdownSimulation { hard: false }));
        assert_eq!(outbox.last(), Some(&Outbound::Exit));
    }

    #[test]
    fn test_keep_alive_survives_empty_lobby() {
        let now = Instant::now();
        let config = SessionConfig {
            keep_alive: true,
            ..SessionConfig::default()
        };
        let mut session = Session::enter(config, Some(client(1, "owner")), now).unwrap();
        session.disconnect(now, 1);
        assert!(!session.is_finished());
    }

    #[test]
    fn test_launch_waits_for_all_three_bits() {
        let now = Instant::now();
        let mut session = custom(now);
        session.change_control(|control| control.starting = true);

        session.system_ready(now);
        assert!(!session.is_launched());
        session.sim_ready(now);
        assert!(session.is_launched());

        let launches = session
            .drain_outbox()
            .into_iter()
            .filter(|out| matches!(out, Outbound::Launch(_)))
            .count();
        assert_eq!(launches, 1);

        session.sim_ready(now);
        assert!(!session
            .drain_outbox()
            .iter()
            .any(|out| matches!(out, Outbound::Launch(_))));
    }

    #[test]
    fn test_exit_cancels_timers() {
        let now = Instant::now();
        let mut session = custom(now);
        assert!(session.next_deadline().is_some());
        assert!(session.exit());
        assert!(session.next_deadline().is_none());
    }

    fn ladder(now: Instant) -> Session {
        let mut config = SessionConfig::ladder(vec![vec!["alice".into()], vec!["bob".into()]]);
        config.rng_seed = Some(3);
        Session::enter(config, None, now).unwrap()
    }

    #[test]
    fn test_ladder_enter_arms_watchdog() {
        let now = Instant::now();
        let mut session = ladder(now);
        assert_eq!(session.watchdog_state(), Some(WatchdogState::Empty));
        assert_eq!(session.settings().tag, LADDER_LOBBY_TAG);
        assert!(!session.system().planets.is_empty());
        assert!(session.gate().whitelist().contains(&"alice".to_string()));
        assert!(session
            .drain_outbox()
            .iter()
            .any(|out| matches!(out, Outbound::BuildSystem(_))));
    }

    #[test]
    fn test_ladder_rejects_bad_armies() {
        let config = SessionConfig::ladder(vec![vec!["alice".into()]]);
        assert!(matches!(
            Session::enter(config, None, Instant::now()),
            Err(SessionError::BadLadderArmies)
        ));
    }

    #[test]
    fn test_ladder_players_take_assigned_armies() {
        let now = Instant::now();
        let mut session = ladder(now);
        session.connect(now, client_with_account(5, "bob"), false).unwrap();
        session.connect(now, client_with_account(6, "alice"), false).unwrap();
        session.connect(now, client(7, "watcher"), false).unwrap();

        let roster = session.roster();
        assert_eq!(roster.player(PlayerId::Client(5)).unwrap().army, Some(1));
        assert_eq!(roster.player(PlayerId::Client(6)).unwrap().army, Some(0));
        assert!(roster.player(PlayerId::Client(7)).unwrap().spectator);
        assert_eq!(session.watchdog_state(), Some(WatchdogState::Loading));
    }

    fn client_with_account(id: u32, account: &str) -> ClientInfo {
        ClientInfo::new(
            id,
            account,
            Credentials {
                account_id: account.to_string(),
                ..Credentials::default()
            },
        )
    }

    #[test]
    fn test_ladder_no_show_is_abandoned() {
        let t0 = Instant::now();
        let mut session = ladder(t0);
        session.connect(t0, client_with_account(1, "alice"), false).unwrap();
        session.drain_outbox();

        let mut now = t0;
        while let Some(deadline) = session.next_deadline() {
            if deadline > t0 + FIRST_CONNECT_WAIT + ABORT_GAME_DELAY + Duration::from_secs(2) {
                break;
            }
            now = deadline;
            session.poll(now);
        }

        let outbox = session.drain_outbox();
        let abandoned: Vec<_> = outbox
            .iter()
            .filter(|out| matches!(out, Outbound::LadderAbandoned { .. }))
            .collect();
        assert_eq!(
            abandoned,
            vec![&Outbound::LadderAbandoned {
                penalty: false,
                abandoned: vec!["bob".into()],
                remaining: vec!["alice".into()],
            }]
        );
        assert!(session.is_finished());
        assert!(now >= t0 + FIRST_CONNECT_WAIT);
    }

    #[test]
    fn test_ladder_voluntary_leave_reports_abandonment() {
        let now = Instant::now();
        let mut session = ladder(now);
        session.connect(now, client_with_account(1, "alice"), false).unwrap();
        session.connect(now, client_with_account(2, "bob"), false).unwrap();
        session.drain_outbox();

        session.remove_player(now, PlayerId::Client(2), true);
        let outbox = session.drain_outbox();
        assert!(outbox.contains(&Outbound::LadderAbandoned {
            penalty: true,
            abandoned: vec!["bob".into()],
            remaining: vec!["alice".into()],
        }));

        session.poll(now + ABORT_GAME_DELAY);
        assert!(session.is_finished());
    }

    #[test]
    fn test_ladder_disconnect_keeps_player_until_timeout() {
        let now = Instant::now();
        let mut session = ladder(now);
        session.connect(now, client_with_account(1, "alice"), false).unwrap();
        session.disconnect(now, 1);
        assert!(!session.roster().player(PlayerId::Client(1)).unwrap().connected);

        session.connect(now, client_with_account(1, "alice"), true).unwrap();
        assert!(session.roster().player(PlayerId::Client(1)).unwrap().connected);

        session.disconnect(now, 1);
        session.poll(now + DISCONNECT_TIMEOUT);
        assert!(!session.roster().contains(PlayerId::Client(1)));
    }

    #[test]
    fn test_ladder_staggered_outage_is_not_penalized() {
        let t0 = Instant::now();
        let mut session = ladder(t0);
        session.connect(t0, client_with_account(1, "alice"), false).unwrap();
        session.connect(t0, client_with_account(2, "bob"), false).unwrap();
        session.poll(t0 + JOIN_ANNOUNCE_DELAY);
        session.drain_outbox();

        session.disconnect(t0 + Duration::from_secs(1), 2);
        session.disconnect(t0 + Duration::from_secs(3), 1);

        let end = t0 + DISCONNECT_TIMEOUT * 3;
        let mut outbox = Vec::new();
        while let Some(deadline) = session.next_deadline() {
            if deadline > end || session.is_finished() {
                break;
            }
            session.poll(deadline);
            outbox.extend(session.drain_outbox());
        }

        assert!(!outbox
            .iter()
            .any(|out| matches!(out, Outbound::LadderAbandoned { .. })));
        assert!(session.is_finished());
    }

    #[test]
    fn test_ladder_loaded_players_launch() {
        let now = Instant::now();
        let mut session = ladder(now);
        session.connect(now, client_with_account(1, "alice"), false).unwrap();
        session.connect(now, client_with_account(2, "bob"), false).unwrap();
        session.system_ready(now);
        session.sim_ready(now);

        for id in [1, 2] {
            if let Some(player) = session.roster.player_mut(PlayerId::Client(id)) {
                player.loading = false;
            }
        }
        session.poll(now);
        assert_eq!(session.watchdog_state(), Some(WatchdogState::Countdown));

        let end = now + Duration::from_secs(u64::from(START_GAME_DELAY_SECS) + 3);
        while let Some(deadline) = session.next_deadline() {
            if deadline > end || session.is_launched() {
                break;
            }
            session.poll(deadline);
        }
        assert!(session.is_launched());
        assert!(session
            .drain_outbox()
            .iter()
            .any(|out| matches!(out, Outbound::Launch(data) if data.ranked)));
    }
}
