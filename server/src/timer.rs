//! Cancelable deadline queue driving every deferred lobby action.
//!
//! The queue never sleeps. Owners ask for `next_deadline`, let the runtime
//! wait until then, and pop whatever is due. Timers with equal deadlines fire
//! in the order they were scheduled.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug)]
pub struct TimerQueue<T> {
    entries: BTreeMap<(Instant, u64), T>,
    deadlines: HashMap<u64, Instant>,
    next_seq: u64,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            deadlines: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn schedule_at(&mut self, deadline: Instant, payload: T) -> TimerId {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert((deadline, seq), payload);
        self.deadlines.insert(seq, deadline);
        TimerId(seq)
    }

    pub fn schedule(&mut self, now: Instant, delay: Duration, payload: T) -> TimerId {
        self.schedule_at(now + delay, payload)
    }

    /// Removes a pending timer. Returns its payload, or `None` if it already
    /// fired or was canceled.
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        let deadline = self.deadlines.remove(&id.0)?;
        self.entries.remove(&(deadline, id.0))
    }

    pub fn cancel_all(&mut self) {
        self.entries.clear();
        self.deadlines.clear();
    }

    /// Cancels every pending timer whose payload matches.
    pub fn cancel_where<F>(&mut self, mut predicate: F)
    where
        F: FnMut(&T) -> bool,
    {
        let doomed: Vec<(Instant, u64)> = self
            .entries
            .iter()
            .filter(|(_, payload)| predicate(payload))
            .map(|(key, _)| *key)
            .collect();

        for key in doomed {
            self.entries.remove(&key);
            self.deadlines.remove(&key.1);
        }
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.deadlines.contains_key(&id.0)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Pops the earliest timer due at `now`, if any.
    pub fn pop_due(&mut self, now: Instant) -> Option<(TimerId, T)> {
        let key = *self.entries.keys().next()?;
        if key.0 > now {
            return None;
        }

        let payload = self.entries.remove(&key)?;
        self.deadlines.remove(&key.1);
        Some((TimerId(key.1), payload))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
