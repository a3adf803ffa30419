//! Per-chain counters of consecutive same-category prior outcomes.
//!
//! When a chain keeps landing in the same category for longer than the
//! configured patience, the next likelihood proposal is drawn from a
//! different category. The switched-to category is held until the
//! participant answers that likelihood trial. Counters live in memory only.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::domain::models::ChainKey;

#[derive(Debug)]
pub struct StuckCounters {
    counts: DashMap<ChainKey, u32>,
    switches: DashMap<ChainKey, String>,
    patience: u32,
}

impl StuckCounters {
    pub fn new(patience: u32) -> Self {
        Self {
            counts: DashMap::new(),
            switches: DashMap::new(),
            patience,
        }
    }

    pub fn patience(&self) -> u32 {
        self.patience
    }

    /// Count one more same-category outcome; returns the new count.
    pub fn record_same(&self, key: &ChainKey) -> u32 {
        let mut count = self.counts.entry(key.clone()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn reset(&self, key: &ChainKey) {
        self.counts.remove(key);
    }

    pub fn count(&self, key: &ChainKey) -> u32 {
        self.counts.get(key).map_or(0, |count| *count)
    }

    /// If the chain exceeded its patience, reset it and return true.
    ///
    /// Check and reset happen under the same shard lock.
    pub fn take_if_stuck(&self, key: &ChainKey) -> bool {
        match self.counts.entry(key.clone()) {
            Entry::Occupied(entry) if *entry.get() > self.patience => {
                entry.remove();
                true
            }
            _ => false,
        }
    }

    pub fn record_switch(&self, key: &ChainKey, category: &str) {
        self.switches.insert(key.clone(), category.to_string());
    }

    /// Category a forced switch moved the chain to, until it is answered.
    pub fn switched_category(&self, key: &ChainKey) -> Option<String> {
        self.switches.get(key).map(|category| category.clone())
    }

    pub fn clear_switch(&self, key: &ChainKey) {
        self.switches.remove(key);
    }
}
