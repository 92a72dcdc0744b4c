//! Dirty-topic batching.
//!
//! Mutations mark topics dirty. The first mark on a clean tracker arms a
//! single pending flush; later marks coalesce into it. The flush itself is
//! run by the session on its next poll, so every mutation handled in the
//! same turn produces at most one broadcast per topic.

use log::debug;
use serde_json::Value;
use shared::Topic;
use std::collections::{BTreeMap, BTreeSet};

/// Topics that become dirty whenever any of the listed topics do.
const CHAINS: &[(Topic, &[Topic])] = &[
    (
        Topic::Beacon,
        &[Topic::Players, Topic::Armies, Topic::System, Topic::Settings],
    ),
    (Topic::Colors, &[Topic::Players]),
];

#[derive(Debug, Default)]
pub struct DirtyTracker {
    dirty: BTreeSet<Topic>,
    pending: bool,
}

impl DirtyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks topics dirty, closes the set over the chain table and arms the
    /// pending flush.
    pub fn mark(&mut self, topics: &[Topic]) {
        if topics.is_empty() {
            return;
        }

        self.dirty.extend(topics.iter().copied());

        loop {
            let mut grew = false;
            for (dependent, sources) in CHAINS {
                if !self.dirty.contains(dependent)
                    && sources.iter().any(|source| self.dirty.contains(source))
                {
                    self.dirty.insert(*dependent);
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }

        if !self.pending {
            debug!("Lobby flush armed by {:?}", topics);
        }
        self.pending = true;
    }

    pub fn mark_all(&mut self) {
        self.mark(&Topic::ALL)
    }

    /// True while a flush is owed. At most one is outstanding.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn is_dirty(&self, topic: Topic) -> bool {
        self.dirty.contains(&topic)
    }

    /// Takes the dirty set for cleaning and disarms the pending flush.
    pub fn take(&mut self) -> Vec<Topic> {
        self.pending = false;
        std::mem::take(&mut self.dirty).into_iter().collect()
    }

    pub fn clear(&mut self) {
        self.dirty.clear();
        self.pending = false;
    }
}

/// Last broadcast value of each topic.
///
/// Stored values are owned deep copies; nothing outside the session can
/// alias them.
#[derive(Debug, Default, Clone)]
pub struct Published {
    topics: BTreeMap<Topic, Value>,
}

impl Published {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `value` for `topic` and reports whether it differs from the
    /// previous broadcast.
    pub fn replace_if_changed(&mut self, topic: Topic, value: Value) -> bool {
        if self.topics.get(&topic) == Some(&value) {
            return false;
        }
        self.topics.insert(topic, value);
        true
    }

    /// Forgets the last broadcast so the next clean sends the topic again.
    pub fn invalidate(&mut self, topic: Topic) {
        self.topics.remove(&topic);
    }

    pub fn get(&self, topic: Topic) -> Option<&Value> {
        self.topics.get(&topic)
    }

    pub fn snapshot(&self) -> BTreeMap<Topic, Value> {
        self.topics.clone()
    }
}
