//! Player and army models.
//!
//! The roster owns every player record, the army list and the session's
//! color pool. All operations keep three properties intact:
//! - slot indices inside an army always run 0..n with no gaps
//! - an army never holds more occupants than its `slots`
//! - a pool entry is taken exactly when some player holds it
//!
//! Nothing here announces or broadcasts. The session layers dirty marks and
//! event messages on top.

use crate::color_pool::{ColorChoice, ColorPool};
use crate::commanders::Commanders;
use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{
    AccountId, AiOptions, ArmyInfo, ArmyOptions, ArmyPatch, LandingPolicy, PlayerId, PlayerInfo,
};
use std::collections::BTreeMap;

pub const MIN_ECONOMY_FACTOR: f32 = 0.0;
pub const MAX_ECONOMY_FACTOR: f32 = 5.0;

pub fn clamp_economy(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(MIN_ECONOMY_FACTOR, MAX_ECONOMY_FACTOR)
    } else {
        1.0
    }
}

#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    /// External account; AIs have none.
    pub account: Option<AccountId>,
    pub personality: String,
    pub landing_policy: LandingPolicy,
    pub economy_factor: f32,
    pub connected: bool,
    pub creator: bool,
    pub spectator: bool,
    pub army: Option<usize>,
    pub slot: Option<usize>,
    pub commander: String,
    pub ready: bool,
    pub loading: bool,
    pub color: Option<ColorChoice>,
}

impl Player {
    pub fn is_ai(&self) -> bool {
        self.id.is_ai()
    }

    pub fn info(&self, colors: &ColorPool, moderator: bool) -> PlayerInfo {
        let ai = self.is_ai();
        PlayerInfo {
            id: self.id,
            name: self.name.clone(),
            ai,
            personality: self.personality.clone(),
            landing_policy: self.landing_policy,
            economy_factor: self.economy_factor,
            connected: ai || self.connected,
            creator: !ai && self.creator,
            moderator: !ai && moderator,
            spectator: self.spectator,
            army_index: self.army,
            slot_index: self.slot,
            commander: self.commander.clone(),
            ready: self.ready,
            loading: self.loading,
            color: colors.color_for(self.color),
            color_index: self.color.map(|choice| choice.primary),
        }
    }
}

/// What the caller knows about a new roster entry.
#[derive(Debug, Clone, Default)]
pub struct NewPlayer {
    pub name: String,
    pub account: Option<AccountId>,
    pub creator: bool,
    pub spectator: bool,
    pub ai: Option<AiOptions>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Army {
    pub slots: usize,
    pub alliance: bool,
    /// Shared by the single-slot armies an alliance is split into at launch.
    /// Zero means no alliance.
    pub alliance_group: u32,
    pub spec_tag: String,
}

impl Army {
    pub fn from_options(options: &ArmyOptions) -> Self {
        Self {
            slots: options.slots.unwrap_or(1).max(1),
            alliance: options.alliance,
            alliance_group: 0,
            spec_tag: options.spec_tag.clone(),
        }
    }

    pub fn options(&self) -> ArmyOptions {
        ArmyOptions {
            slots: Some(self.slots),
            alliance: self.alliance,
            spec_tag: self.spec_tag.clone(),
        }
    }

    pub fn info(&self) -> ArmyInfo {
        ArmyInfo {
            slots: self.slots,
            alliance: self.alliance,
            spec_tag: self.spec_tag.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveFromArmy {
    pub clear_color: bool,
    pub set_spectator: bool,
}

#[derive(Debug)]
pub struct Roster {
    players: BTreeMap<PlayerId, Player>,
    armies: Vec<Army>,
    colors: ColorPool,
    commanders: Commanders,
    /// Ladder sessions pin each account to one army.
    assignments: Option<Vec<Vec<AccountId>>>,
    rng: StdRng,
}

impl Default for Roster {
    fn default() -> Self {
        Self::new()
    }
}

impl Roster {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            players: BTreeMap::new(),
            armies: Vec::new(),
            colors: ColorPool::new(),
            commanders: Commanders,
            assignments: None,
            rng,
        }
    }

    pub fn with_colors(mut self, colors: ColorPool) -> Self {
        self.colors = colors;
        self
    }

    pub fn set_assignments(&mut self, armies: Vec<Vec<AccountId>>) {
        self.assignments = Some(armies);
    }

    pub fn assignments(&self) -> Option<&[Vec<AccountId>]> {
        self.assignments.as_deref()
    }

    /// Army index an account is pinned to, when assignments are in force.
    pub fn assigned_army(&self, account: &str) -> Option<usize> {
        self.assignments
            .as_ref()?
            .iter()
            .position(|members| members.iter().any(|member| member == account))
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn player_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.get_mut(&id)
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.players.contains_key(&id)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn players_mut(&mut self) -> impl Iterator<Item = &mut Player> {
        self.players.values_mut()
    }

    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.players.keys().copied().collect()
    }

    pub fn armies(&self) -> &[Army] {
        &self.armies
    }

    pub fn colors(&self) -> &ColorPool {
        &self.colors
    }

    pub fn commanders(&self) -> &Commanders {
        &self.commanders
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn find_by_account(&self, account: &str) -> Option<&Player> {
        self.players
            .values()
            .find(|player| player.account.as_deref() == Some(account))
    }

    /// Creates a roster entry. The player starts unassigned; humans who are
    /// not spectating get a random free color.
    pub fn add_player(&mut self, id: PlayerId, new: NewPlayer) -> &Player {
        let ai = id.is_ai();
        let options = new.ai.unwrap_or_default();
        let commander = self.commanders.random_default_with(&mut self.rng).to_string();
        let color = if ai || new.spectator {
            None
        } else {
            self.colors.take_random_with(&mut self.rng)
        };

        if let Some(previous) = self.players.remove(&id) {
            debug!("Replacing existing roster entry {}", id);
            self.release_color_of(&previous);
        }

        let player = Player {
            id,
            name: new.name,
            account: new.account,
            personality: if ai { options.personality } else { String::new() },
            landing_policy: if ai {
                options.landing_policy.unwrap_or_default()
            } else {
                LandingPolicy::NoRestriction
            },
            economy_factor: clamp_economy(options.economy_factor.unwrap_or(1.0)),
            connected: true,
            creator: new.creator,
            spectator: new.spectator,
            army: None,
            slot: None,
            commander,
            ready: ai,
            loading: !ai,
            color,
        };

        self.players.entry(id).or_insert(player)
    }

    /// Removes a player, freeing their slot and color. Unknown ids are a no-op.
    pub fn remove_player(&mut self, id: PlayerId) -> Option<Player> {
        if !self.players.contains_key(&id) {
            return None;
        }

        self.vacate_slot(id);
        let player = self.players.remove(&id)?;
        self.release_color_of(&player);
        self.fix_colors();
        Some(player)
    }

    /// Players in an army, ordered by slot.
    pub fn players_in_army(&self, army: usize) -> Vec<PlayerId> {
        let mut members: Vec<(usize, PlayerId)> = self
            .players
            .values()
            .filter(|player| player.army == Some(army))
            .map(|player| (player.slot.unwrap_or(usize::MAX), player.id))
            .collect();
        members.sort();
        members.into_iter().map(|(_, id)| id).collect()
    }

    pub fn occupant_count(&self, army: usize) -> usize {
        self.players
            .values()
            .filter(|player| player.army == Some(army))
            .count()
    }

    pub fn total_slots(&self) -> usize {
        self.armies.iter().map(|army| army.slots).sum()
    }

    /// Number of players sitting in an army slot.
    pub fn occupied_slots(&self) -> usize {
        self.players
            .values()
            .filter(|player| player.army.is_some())
            .count()
    }

    pub fn non_spectator_count(&self) -> usize {
        self.players
            .values()
            .filter(|player| !player.spectator)
            .count()
    }

    pub fn spectator_count(&self) -> usize {
        self.players.values().filter(|player| player.spectator).count()
    }

    /// Puts a player into the next free slot of an army.
    ///
    /// Fails when the player or army is unknown, the army is full, the player
    /// already sits in it, or assignments pin the player elsewhere. A player
    /// moving from another army leaves that army first.
    pub fn add_to_army(&mut self, id: PlayerId, army: usize) -> bool {
        let Some(player) = self.players.get(&id) else {
            return false;
        };
        let Some(capacity) = self.armies.get(army).map(|army| army.slots) else {
            return false;
        };

        if player.army == Some(army) || self.occupant_count(army) >= capacity {
            return false;
        }

        if self.assignments.is_some() {
            let pinned = player
                .account
                .as_deref()
                .and_then(|account| self.assigned_army(account));
            if pinned != Some(army) {
                return false;
            }
        }

        if player.army.is_some() {
            self.vacate_slot(id);
        }

        let slot = self.occupant_count(army);
        let ai = id.is_ai();
        if let Some(player) = self.players.get_mut(&id) {
            player.army = Some(army);
            player.slot = Some(slot);
            player.spectator = false;
        }
        if ai {
            if let Some(army) = self.armies.get_mut(army) {
                army.alliance = true;
            }
        }

        self.fix_colors();
        true
    }

    /// Takes a player out of their army and closes the gap behind them.
    ///
    /// Under assignments a player cannot leave their own army; a player found
    /// in the wrong army is moved to the right one.
    pub fn remove_from_army(&mut self, id: PlayerId, options: RemoveFromArmy) -> bool {
        let Some(player) = self.players.get(&id) else {
            return false;
        };

        let mut relocate = None;
        if let Some(pinned) = player
            .account
            .as_deref()
            .and_then(|account| self.assigned_army(account))
        {
            if player.army == Some(pinned) {
                return false;
            }
            relocate = Some(pinned);
        }

        if options.clear_color {
            self.clear_color(id);
        }

        self.vacate_slot(id);
        if options.set_spectator {
            if let Some(player) = self.players.get_mut(&id) {
                player.spectator = true;
            }
        }

        self.fix_colors();

        if let Some(army) = relocate {
            self.add_to_army(id, army);
        }
        true
    }

    /// Places every unassigned, non-spectating player into the first army
    /// with room. Returns who was placed.
    pub fn add_players_to_slots_if_possible(&mut self) -> Vec<PlayerId> {
        let waiting: Vec<PlayerId> = self
            .players
            .values()
            .filter(|player| player.army.is_none() && !player.spectator)
            .map(|player| player.id)
            .collect();

        let mut placed = Vec::new();
        let mut army = 0;
        for id in waiting {
            while army < self.armies.len() {
                if self.add_to_army(id, army) {
                    placed.push(id);
                    break;
                }
                army += 1;
            }
        }
        placed
    }

    /// Marks a player who could not be seated as a spectator without a color.
    pub fn spectate_if_unassigned(&mut self, id: PlayerId) -> bool {
        let unassigned = self
            .players
            .get(&id)
            .map_or(false, |player| player.army.is_none());
        if !unassigned {
            return false;
        }

        self.clear_color(id);
        if let Some(player) = self.players.get_mut(&id) {
            player.spectator = true;
        }
        true
    }

    pub fn add_army(&mut self, options: &ArmyOptions, max_players: usize) -> bool {
        if self.armies.len() >= max_players {
            return false;
        }
        if let Some(slots) = options.slots {
            if slots + self.total_slots() > max_players {
                return false;
            }
        }

        self.armies.push(Army::from_options(options));
        true
    }

    /// Deletes an army. Its AIs are removed and returned; its humans become
    /// unassigned. Armies after it shift down by one.
    pub fn remove_army(&mut self, index: usize) -> Vec<Player> {
        if index >= self.armies.len() {
            return Vec::new();
        }
        self.armies.remove(index);

        let doomed: Vec<PlayerId> = self
            .players
            .values()
            .filter(|player| player.is_ai() && player.army == Some(index))
            .map(|player| player.id)
            .collect();

        let mut removed = Vec::new();
        for id in doomed {
            if let Some(mut player) = self.players.remove(&id) {
                self.release_color_of(&player);
                player.color = None;
                removed.push(player);
            }
        }

        for player in self.players.values_mut() {
            match player.army {
                Some(army) if army == index => {
                    player.army = None;
                    player.slot = None;
                }
                Some(army) if army > index => player.army = Some(army - 1),
                _ => {}
            }
        }

        self.fix_colors();
        removed
    }

    /// Applies a patch to an army. Returns the AIs evicted by a shrink, or
    /// `None` when the patch would exceed the player limit.
    pub fn modify_army(
        &mut self,
        index: usize,
        patch: &ArmyPatch,
        max_players: usize,
    ) -> Option<Vec<Player>> {
        let current = self.armies.get(index)?.clone();

        if let Some(slots) = patch.slots {
            if slots + self.total_slots() > current.slots + max_players {
                return None;
            }
        }

        let has_ai = self
            .players
            .values()
            .any(|player| player.is_ai() && player.army == Some(index));

        let mut next = Army {
            slots: patch.slots.unwrap_or(current.slots).max(1),
            alliance: patch.alliance.unwrap_or(current.alliance),
            alliance_group: 0,
            spec_tag: patch.spec_tag.clone().unwrap_or(current.spec_tag),
        };
        if has_ai {
            next.alliance = true;
        }

        let mut removed = Vec::new();
        let evicted: Vec<PlayerId> = self
            .players
            .values()
            .filter(|player| player.army == Some(index) && player.slot >= Some(next.slots))
            .map(|player| player.id)
            .collect();
        for id in evicted {
            if id.is_ai() {
                if let Some(mut player) = self.players.remove(&id) {
                    self.release_color_of(&player);
                    player.color = None;
                    removed.push(player);
                }
            } else if let Some(player) = self.players.get_mut(&id) {
                player.army = None;
                player.slot = None;
            }
        }

        self.armies[index] = next;
        self.fix_colors();
        Some(removed)
    }

    /// Replaces the army list. AIs are removed and returned; humans are
    /// unassigned before the new armies are added.
    pub fn reset_armies(&mut self, armies: &[ArmyOptions], max_players: usize) -> Vec<Player> {
        let ai_ids: Vec<PlayerId> = self
            .players
            .keys()
            .copied()
            .filter(PlayerId::is_ai)
            .collect();

        let mut removed = Vec::new();
        for id in ai_ids {
            if let Some(player) = self.remove_player(id) {
                removed.push(player);
            }
        }

        for player in self.players.values_mut() {
            player.army = None;
            player.slot = None;
        }

        self.armies.clear();
        for options in armies {
            self.add_army(options, max_players);
        }
        self.fix_colors();
        removed
    }

    /// Splits every alliance army with more than one slot into single-slot
    /// armies sharing a fresh alliance group.
    pub fn break_alliances(&mut self) {
        let mut next_group = 1;
        while let Some(index) = self
            .armies
            .iter()
            .position(|army| army.alliance && army.slots > 1)
        {
            let extra = self.armies[index].slots - 1;
            let mut template = self.armies[index].clone();
            template.slots = 1;
            template.alliance_group = next_group;
            next_group += 1;

            self.armies[index] = template.clone();
            for _ in 0..extra {
                self.armies.insert(index + 1, template.clone());
            }

            for player in self.players.values_mut() {
                match player.army {
                    Some(army) if army == index => {
                        player.army = Some(index + player.slot.unwrap_or(0));
                        player.slot = Some(0);
                    }
                    Some(army) if army > index => player.army = Some(army + extra),
                    _ => {}
                }
            }
        }
    }

    /// Re-applies the color rule to every army: in a shared army only slot 0
    /// keeps a color, in an alliance army every occupant does. Spectators
    /// never hold one.
    pub fn fix_colors(&mut self) {
        for index in 0..self.armies.len() {
            let alliance = self.armies[index].alliance;
            for (position, id) in self.players_in_army(index).into_iter().enumerate() {
                if position == 0 || alliance {
                    self.maybe_take_color(id);
                } else {
                    self.clear_color(id);
                }
            }
        }

        let spectators: Vec<PlayerId> = self
            .players
            .values()
            .filter(|player| player.spectator && player.color.is_some())
            .map(|player| player.id)
            .collect();
        for id in spectators {
            self.clear_color(id);
        }
    }

    /// Gives every non-spectator without a color a random one.
    pub fn take_missing_colors(&mut self) {
        let playing: Vec<PlayerId> = self
            .players
            .values()
            .filter(|player| !player.spectator)
            .map(|player| player.id)
            .collect();
        for id in playing {
            self.maybe_take_color(id);
        }
    }

    pub fn clear_color(&mut self, id: PlayerId) {
        if let Some(player) = self.players.get_mut(&id) {
            if let Some(choice) = player.color.take() {
                self.colors.release(choice.primary);
            }
        }
    }

    fn maybe_take_color(&mut self, id: PlayerId) {
        let Some(player) = self.players.get(&id) else {
            return;
        };
        if player.spectator || player.color.is_some() {
            return;
        }

        let color = self.colors.take_random_with(&mut self.rng);
        if let Some(player) = self.players.get_mut(&id) {
            player.color = color;
        }
    }

    /// Switches a player to a specific primary color. Returns true if it changed.
    pub fn set_primary_color(&mut self, id: PlayerId, primary: usize) -> bool {
        let Some(player) = self.players.get(&id) else {
            return false;
        };
        if player.spectator || !self.colors.is_valid_primary(primary) {
            return false;
        }

        let old = player.color;
        let held = self.colors.reassign(old.map(|choice| choice.primary), primary);
        if held == old.map(|choice| choice.primary) {
            return false;
        }

        let secondary = old
            .map(|choice| choice.secondary)
            .filter(|secondary| self.colors.is_valid_pair(primary, *secondary))
            .unwrap_or(0);
        if let Some(player) = self.players.get_mut(&id) {
            player.color = held.map(|primary| ColorChoice { primary, secondary });
        }
        self.fix_colors();

        // A shared army's later slots give the color straight back.
        self.players.get(&id).and_then(|player| player.color) != old
    }

    pub fn set_secondary_color(&mut self, id: PlayerId, secondary: usize) -> bool {
        let colors = &self.colors;
        let Some(player) = self.players.get_mut(&id) else {
            return false;
        };
        if player.spectator {
            return false;
        }

        match player.color.as_mut() {
            Some(choice)
                if colors.is_valid_pair(choice.primary, secondary)
                    && choice.secondary != secondary =>
            {
                choice.secondary = secondary;
                true
            }
            _ => false,
        }
    }

    /// Moves a player to the next free primary after their current one.
    pub fn next_primary_color(&mut self, id: PlayerId) -> bool {
        let Some(player) = self.players.get(&id) else {
            return false;
        };
        if player.spectator {
            return false;
        }

        let old = player.color;
        if let Some(choice) = old {
            self.colors.release(choice.primary);
        }
        let next = self.colors.take_next(old.map(|choice| choice.primary));
        if let Some(player) = self.players.get_mut(&id) {
            player.color = next.map(|primary| ColorChoice {
                primary,
                secondary: 0,
            });
        }
        self.fix_colors();

        self.players.get(&id).and_then(|player| player.color) != old
    }

    pub fn next_secondary_color(&mut self, id: PlayerId) -> bool {
        let colors = &self.colors;
        let Some(player) = self.players.get_mut(&id) else {
            return false;
        };
        if player.spectator {
            return false;
        }

        match player.color.as_mut() {
            Some(choice) => {
                let next = colors.next_secondary(*choice);
                let changed = next != choice.secondary;
                choice.secondary = next;
                changed
            }
            None => false,
        }
    }

    pub fn player_infos<F>(&self, is_moderator: F) -> Vec<PlayerInfo>
    where
        F: Fn(&Player) -> bool,
    {
        self.players
            .values()
            .map(|player| player.info(&self.colors, is_moderator(player)))
            .collect()
    }

    pub fn army_infos(&self) -> Vec<ArmyInfo> {
        self.armies.iter().map(Army::info).collect()
    }

    fn vacate_slot(&mut self, id: PlayerId) {
        let Some(player) = self.players.get_mut(&id) else {
            return;
        };
        let (Some(army), Some(slot)) = (player.army.take(), player.slot.take()) else {
            player.army = None;
            player.slot = None;
            return;
        };

        for other in self.players.values_mut() {
            if other.army == Some(army) {
                if let Some(other_slot) = other.slot.as_mut() {
                    if *other_slot > slot {
                        *other_slot -= 1;
                    }
                }
            }
        }
    }

    fn release_color_of(&mut self, player: &Player) {
        if let Some(choice) = player.color {
            self.colors.release(choice.primary);
        }
    }
}
