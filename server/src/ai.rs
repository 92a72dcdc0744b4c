//! AI identity allocation: reusable ids and a rotating name list.

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::VecDeque;

const AI_NAMES: &[&str] = &[
    "Abaddon", "Aegis", "Ajax", "Atlas", "Banshee", "Barnacle", "Basilisk", "Cerberus",
    "Cinder", "Colossus", "Cyclops", "Dagon", "Echo", "Fenrir", "Gargoyle", "Golem",
    "Hydra", "Juggernaut", "Kraken", "Leviathan", "Manticore", "Nomad", "Onyx", "Pyre",
    "Quasar", "Revenant", "Sentinel", "Talos", "Tempest", "Vanguard", "Wraith", "Zenith",
];

#[derive(Debug)]
pub struct AiRegistry {
    names: VecDeque<&'static str>,
    free_ids: Vec<u32>,
    last_id: u32,
}

impl AiRegistry {
    pub fn new() -> Self {
        Self::with_rng(&mut rand::thread_rng())
    }

    /// Registry whose name rotation is shuffled once by `rng`.
    pub fn with_rng<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut names: Vec<&'static str> = AI_NAMES.to_vec();
        names.shuffle(rng);
        Self {
            names: names.into(),
            free_ids: Vec::new(),
            last_id: 0,
        }
    }

    /// Hands out a previously released id if there is one, else a fresh one.
    pub fn allocate_id(&mut self) -> u32 {
        match self.free_ids.pop() {
            Some(id) => id,
            None => {
                self.last_id += 1;
                self.last_id
            }
        }
    }

    pub fn release_id(&mut self, id: u32) {
        if !self.free_ids.contains(&id) {
            self.free_ids.push(id);
        }
    }

    /// Next name in the rotation; the name moves to the back of the list.
    pub fn next_name(&mut self) -> String {
        match self.names.pop_front() {
            Some(name) => {
                self.names.push_back(name);
                name.to_string()
            }
            None => "AI".to_string(),
        }
    }
}

impl Default for AiRegistry {
    fn default() -> Self {
        Self::new()
    }
}
