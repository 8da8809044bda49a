use crate::types::{AlertKey, Interval, SignalKind};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Conditions that have already been alerted, grouped per (instrument, interval).
///
/// A key stays marked until the pair is seen without that signal, so a condition
/// that persists across cycles is reported once, and one that goes quiet or is
/// replaced by another kind and then comes back is reported again.
pub struct Deduplicator {
    active: RwLock<HashMap<(String, Interval), HashSet<SignalKind>>>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
        }
    }

    pub async fn should_notify(&self, key: &AlertKey) -> bool {
        let active = self.active.read().await;
        !active
            .get(&(key.instrument_id.clone(), key.interval))
            .is_some_and(|kinds| kinds.contains(&key.kind))
    }

    pub async fn mark_notified(&self, key: AlertKey) {
        let mut active = self.active.write().await;
        active
            .entry((key.instrument_id, key.interval))
            .or_insert_with(HashSet::new)
            .insert(key.kind);
    }

    pub async fn clear(&self, key: &AlertKey) {
        let mut active = self.active.write().await;
        let pair = (key.instrument_id.clone(), key.interval);
        if let Some(kinds) = active.get_mut(&pair) {
            kinds.remove(&key.kind);
            if kinds.is_empty() {
                active.remove(&pair);
            }
        }
    }

    /// Kinds currently marked for the pair, in `SignalKind` order.
    pub async fn marked(&self, instrument_id: &str, interval: Interval) -> Vec<SignalKind> {
        let active = self.active.read().await;
        let mut kinds: Vec<SignalKind> = active
            .get(&(instrument_id.to_string(), interval))
            .map(|kinds| kinds.iter().copied().collect())
            .unwrap_or_default();
        kinds.sort();
        kinds
    }

    /// Clears every kind marked for the pair and returns what was cleared.
    pub async fn clear_all(&self, instrument_id: &str, interval: Interval) -> Vec<SignalKind> {
        let mut active = self.active.write().await;
        let mut cleared: Vec<SignalKind> = active
            .remove(&(instrument_id.to_string(), interval))
            .map(|kinds| kinds.into_iter().collect())
            .unwrap_or_default();
        cleared.sort();
        cleared
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.values().map(|v| v.len()).sum()
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new()
    }
}
