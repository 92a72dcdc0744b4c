//! Liveness guard for ranked ladder lobbies.
//!
//! A ladder lobby must not be held hostage by a participant who never shows
//! up or never finishes loading. The watchdog tracks each expected account's
//! presence and forces the match to start, abandons it on behalf of a
//! missing participant, or aborts it outright.
//!
//! The watchdog owns no roster state. The session hands it a `Presence`
//! view on every roster change and on every timer poll, and acts on the
//! `WatchdogEvent`s it returns.

use crate::config::{
    FIRST_CONNECT_WAIT, MISMATCH_RECHECK, RECHECK_MARGIN, SEEN_ONCE_GRACE, TOTAL_STARTUP_WAIT,
    WAIT_FOR_LOAD,
};
use crate::timer::TimerQueue;
use log::{debug, error, info};
use shared::AccountId;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    Empty,
    Waiting,
    Loading,
    Countdown,
    Abandoned,
    Aborting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogEvent {
    /// Seconds left before the start; `-1` accompanies the start itself.
    Countdown(i64),
    StartGame,
    /// A participant's grace ran out while someone else was still here.
    Abandoned {
        account: AccountId,
        remaining: Vec<AccountId>,
        penalty: bool,
    },
    Abort,
}

/// What the watchdog can see of the roster.
#[derive(Debug, Clone, Default)]
pub struct Presence {
    /// Accounts currently in the roster.
    pub accounts: BTreeSet<AccountId>,
    /// Roster accounts whose connection is live. A player waiting out a
    /// disconnect timeout is in `accounts` but not here.
    pub connected: BTreeSet<AccountId>,
    /// Whether any non-spectator is still loading.
    pub any_loading: bool,
}

impl Presence {
    pub fn new<I>(accounts: I, any_loading: bool) -> Self
    where
        I: IntoIterator<Item = AccountId>,
    {
        let accounts: BTreeSet<AccountId> = accounts.into_iter().collect();
        Self {
            connected: accounts.clone(),
            accounts,
            any_loading,
        }
    }

    /// Narrows the live connections to `connected`.
    pub fn with_connected<I>(mut self, connected: I) -> Self
    where
        I: IntoIterator<Item = AccountId>,
    {
        self.connected = connected.into_iter().collect();
        self
    }
}

#[derive(Debug, Clone, Copy)]
enum WatchdogTimer {
    Recheck,
    StartupExpired,
    LoadExpired,
    CountdownTick,
    StartGame,
    ShutdownExpired,
}

#[derive(Debug, Clone)]
struct ExpectedPlayer {
    seen_once: bool,
    /// `None` while present.
    absent_since: Option<Instant>,
    timeout_remaining: Duration,
}

impl ExpectedPlayer {
    fn new(now: Instant) -> Self {
        Self {
            seen_once: false,
            absent_since: Some(now),
            timeout_remaining: FIRST_CONNECT_WAIT,
        }
    }

    fn is_present(&self) -> bool {
        self.absent_since.is_none()
    }

    fn gone_for(&self, now: Instant) -> Duration {
        self.absent_since
            .map_or(Duration::ZERO, |since| now.saturating_duration_since(since))
    }

    fn time_left(&self, now: Instant) -> Duration {
        self.timeout_remaining.saturating_sub(self.gone_for(now))
    }

    fn mark_present(&mut self, now: Instant) {
        if self.is_present() {
            return;
        }

        self.timeout_remaining = self.time_left(now);
        if !self.seen_once {
            self.timeout_remaining = SEEN_ONCE_GRACE;
            self.seen_once = true;
        }
        self.absent_since = None;
    }

    fn mark_gone(&mut self, now: Instant) {
        if self.is_present() {
            self.absent_since = Some(now);
        }
    }

    fn has_abandoned(&self, now: Instant) -> bool {
        self.timeout_remaining <= self.gone_for(now)
    }
}

#[derive(Debug)]
pub struct Watchdog {
    state: Option<WatchdogState>,
    expected: BTreeMap<AccountId, ExpectedPlayer>,
    started_at: Option<Instant>,
    start_delay: u32,
    countdown_left: i64,
    shutdown_delay: Duration,
    abandoned: bool,
    timer: TimerQueue<WatchdogTimer>,
    events: Vec<WatchdogEvent>,
}

impl Watchdog {
    pub fn new(shutdown_delay: Duration) -> Self {
        Self {
            state: None,
            expected: BTreeMap::new(),
            started_at: None,
            start_delay: 0,
            countdown_left: 0,
            shutdown_delay,
            abandoned: false,
            timer: TimerQueue::new(),
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> Option<WatchdogState> {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        self.state.is_some()
    }

    pub fn is_expected(&self, account: &str) -> bool {
        self.expected.contains_key(account)
    }

    pub fn expected_accounts(&self) -> Vec<AccountId> {
        self.expected.keys().cloned().collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.next_deadline()
    }

    /// Arms the watchdog for a set of expected accounts. Returns `false` if
    /// it is already armed or nobody is expected.
    pub fn setup<I>(&mut self, expected: I, start_delay: u32, now: Instant, presence: &Presence) -> bool
    where
        I: IntoIterator<Item = AccountId>,
    {
        if self.state.is_some() {
            return false;
        }

        self.expected = expected
            .into_iter()
            .map(|account| (account, ExpectedPlayer::new(now)))
            .collect();
        if self.expected.is_empty() {
            error!("No accounts expected, but setting up watchdog!");
            return false;
        }

        self.start_delay = start_delay;
        self.started_at = Some(now);
        self.set_state(WatchdogState::Empty, now, presence);
        true
    }

    /// Cancels the pending timer. The state is kept for inspection.
    pub fn stop(&mut self) {
        self.timer.cancel_all();
    }

    /// Re-evaluates presence after a roster change.
    pub fn update(&mut self, now: Instant, presence: &Presence) -> Vec<WatchdogEvent> {
        self.update_player_state(now, presence);
        std::mem::take(&mut self.events)
    }

    /// Fires the pending timer if it is due.
    pub fn poll(&mut self, now: Instant, presence: &Presence) -> Vec<WatchdogEvent> {
        while let Some((_, timer)) = self.timer.pop_due(now) {
            match timer {
                WatchdogTimer::Recheck => self.update_player_state(now, presence),
                WatchdogTimer::StartupExpired | WatchdogTimer::ShutdownExpired => {
                    self.set_state(WatchdogState::Aborting, now, presence)
                }
                WatchdogTimer::LoadExpired => {
                    info!("Load wait expired, forcing countdown");
                    self.set_state(WatchdogState::Countdown, now, presence)
                }
                WatchdogTimer::CountdownTick => self.countdown_tick(now),
                WatchdogTimer::StartGame => {
                    self.events.push(WatchdogEvent::Countdown(-1));
                    self.events.push(WatchdogEvent::StartGame);
                }
            }
        }
        std::mem::take(&mut self.events)
    }

    fn set_timer(&mut self, now: Instant, delay: Duration, timer: WatchdogTimer) {
        self.timer.cancel_all();
        self.timer.schedule(now, delay, timer);
    }

    fn set_state(&mut self, state: WatchdogState, now: Instant, presence: &Presence) {
        if self.state == Some(state) {
            return;
        }

        debug!("Watchdog state: {:?} -> {:?}", self.state, state);
        self.state = Some(state);
        self.timer.cancel_all();

        match state {
            WatchdogState::Empty => {
                let elapsed = self
                    .started_at
                    .map_or(Duration::ZERO, |start| now.saturating_duration_since(start));
                if elapsed > TOTAL_STARTUP_WAIT {
                    self.set_state(WatchdogState::Aborting, now, presence);
                } else {
                    self.set_timer(now, TOTAL_STARTUP_WAIT - elapsed, WatchdogTimer::StartupExpired);
                }
            }
            WatchdogState::Waiting => {}
            WatchdogState::Loading => {
                self.set_timer(now, WAIT_FOR_LOAD, WatchdogTimer::LoadExpired);
            }
            WatchdogState::Countdown => {
                self.countdown_left = i64::from(self.start_delay);
                self.countdown_tick(now);
            }
            WatchdogState::Abandoned => {
                self.set_timer(now, self.shutdown_delay, WatchdogTimer::ShutdownExpired);
            }
            WatchdogState::Aborting => {
                info!("Ladder lobby aborting");
                self.events.push(WatchdogEvent::Abort);
            }
        }

        self.update_player_state(now, presence);
    }

    fn is_settled(&self) -> bool {
        matches!(
            self.state,
            None | Some(WatchdogState::Abandoned) | Some(WatchdogState::Aborting)
        )
    }

    fn update_player_state(&mut self, now: Instant, presence: &Presence) {
        if self.is_settled() {
            return;
        }

        self.update_abandonment(now, presence);
        if self.is_settled() {
            return;
        }

        if self.state == Some(WatchdogState::Empty) && !presence.accounts.is_empty() {
            self.set_state(WatchdogState::Waiting, now, presence);
            return;
        }

        match self.state {
            Some(WatchdogState::Waiting) => {
                let missing: Vec<&AccountId> = self
                    .expected
                    .keys()
                    .filter(|account| !presence.accounts.contains(*account))
                    .collect();
                if missing.is_empty() {
                    self.set_state(WatchdogState::Loading, now, presence);
                    return;
                }

                let soonest = self
                    .expected
                    .values()
                    .filter(|player| !player.is_present())
                    .map(|player| player.time_left(now))
                    .min();
                match soonest {
                    Some(left) => {
                        debug!("Presence recheck in {:?}", left + RECHECK_MARGIN);
                        self.set_timer(now, left + RECHECK_MARGIN, WatchdogTimer::Recheck);
                    }
                    None => {
                        error!(
                            "Mismatch between roster presence and watchdog bookkeeping: {:?} missing",
                            missing
                        );
                        self.set_timer(now, MISMATCH_RECHECK, WatchdogTimer::Recheck);
                    }
                }
            }
            Some(WatchdogState::Loading) => {
                if !presence.any_loading {
                    self.set_state(WatchdogState::Countdown, now, presence);
                }
            }
            _ => {}
        }
    }

    fn update_abandonment(&mut self, now: Instant, presence: &Presence) {
        // Before anyone arrives, absence costs nothing.
        if self.state == Some(WatchdogState::Empty) {
            for player in self.expected.values_mut() {
                if !player.is_present() {
                    player.absent_since = Some(now);
                }
            }
        }

        let accounts: Vec<AccountId> = self.expected.keys().cloned().collect();
        for account in accounts {
            let present = presence.accounts.contains(&account);
            let Some(player) = self.expected.get_mut(&account) else {
                continue;
            };

            if present {
                player.mark_present(now);
            } else {
                player.mark_gone(now);
                if self.state == Some(WatchdogState::Loading) {
                    self.set_state(WatchdogState::Waiting, now, presence);
                }
            }

            let Some(player) = self.expected.get(&account) else {
                continue;
            };
            if player.has_abandoned(now) {
                let penalty = player.seen_once;
                self.mark_abandoned(account, penalty, now, presence);
                return;
            }
        }
    }

    fn mark_abandoned(&mut self, account: AccountId, penalty: bool, now: Instant, presence: &Presence) {
        if self.abandoned {
            return;
        }
        self.abandoned = true;

        let remaining: Vec<AccountId> = presence
            .connected
            .iter()
            .filter(|other| !other.is_empty() && **other != account)
            .cloned()
            .collect();

        if remaining.is_empty() {
            info!("{} abandoned but nobody remains; treating as an outage", account);
        } else {
            info!("{} abandoned the ladder lobby", account);
            self.events.push(WatchdogEvent::Abandoned {
                account,
                remaining,
                penalty,
            });
        }

        self.set_state(WatchdogState::Abandoned, now, presence);
    }

    fn countdown_tick(&mut self, now: Instant) {
        self.events.push(WatchdogEvent::Countdown(self.countdown_left));
        self.countdown_left -= 1;

        let next = if self.countdown_left > 0 {
            WatchdogTimer::CountdownTick
        } else {
            WatchdogTimer::StartGame
        };
        self.set_timer(now, Duration::from_secs(1), next);
    }
}
