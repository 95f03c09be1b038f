//! Per-identity counter storage.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Outcome of recording one event against a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Observation {
    /// Events seen in the current window, including this one
    pub count: u64,
    /// Absolute time (ms) at which the window ends
    pub reset_at: u64,
}

/// The counter for a single identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CounterEntry {
    /// Events observed in the current window
    pub count: u64,
    /// Absolute time (ms) at which the current window ends
    pub reset_at: u64,
}

impl CounterEntry {
    fn fresh(now: u64, window_ms: u64) -> Self {
        Self {
            count: 1,
            reset_at: now.saturating_add(window_ms),
        }
    }

    /// A request at exactly `reset_at` still belongs to the old window.
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.reset_at
    }

    fn record(&mut self, now: u64, window_ms: u64) -> Observation {
        if self.is_expired(now) {
            *self = Self::fresh(now, window_ms);
        } else {
            self.count = self.count.saturating_add(1);
        }
        Observation {
            count: self.count,
            reset_at: self.reset_at,
        }
    }
}

/// All counters belonging to one limiter, keyed by identity.
///
/// The read-modify-write for an identity happens while the `DashMap` entry
/// guard holds the shard's write lock, so concurrent observations of the
/// same identity are serialized.
#[derive(Debug, Default)]
pub(crate) struct CounterStore {
    entries: DashMap<String, CounterEntry>,
}

impl CounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one event for `identity` at `now`.
    pub(crate) fn observe(&self, identity: &str, now: u64, window_ms: u64) -> Observation {
        // Avoid allocating the key on the hot path when the entry exists.
        if let Some(mut entry) = self.entries.get_mut(identity) {
            return entry.value_mut().record(now, window_ms);
        }

        match self.entries.entry(identity.to_string()) {
            // Another thread inserted between the lookup and the entry call.
            Entry::Occupied(mut occupied) => occupied.get_mut().record(now, window_ms),
            Entry::Vacant(vacant) => {
                let counter = vacant.insert(CounterEntry::fresh(now, window_ms));
                Observation {
                    count: counter.count,
                    reset_at: counter.reset_at,
                }
            }
        }
    }

    /// Get the entry for `identity` if its window is still active at `now`.
    pub fn active(&self, identity: &str, now: u64) -> Option<CounterEntry> {
        self.entries
            .get(identity)
            .map(|e| *e.value())
            .filter(|e| !e.is_expired(now))
    }

    /// Remove every entry whose window ended before `now`.
    ///
    /// An expired entry and a missing one take the same path in `observe`,
    /// so sweeping never changes a decision.
    pub fn sweep(&self, now: u64) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Number of identities currently tracked, expired or not.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store tracks no identities.
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
