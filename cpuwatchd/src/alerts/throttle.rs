use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Per-key cool-down for repeated alerts.
///
/// `allow` checks and records in one step, so two violations of the same
/// key inside one window can never both pass.
#[derive(Debug, Default)]
pub struct ThrottleGate {
    last_emitted: HashMap<String, Instant>,
}

impl ThrottleGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(&mut self, key: &str, now: Instant, window: Duration) -> bool {
        match self.last_emitted.get_mut(key) {
            Some(last) if now.saturating_duration_since(*last) < window => false,
            Some(last) => {
                *last = now;
                true
            }
            None => {
                self.last_emitted.insert(key.to_string(), now);
                true
            }
        }
    }

    pub fn last_emitted(&self, key: &str) -> Option<Instant> {
        self.last_emitted.get(key).copied()
    }

    /// Forgets keys whose window has already elapsed. Such keys would be
    /// allowed on their next violation anyway, so decisions are unchanged.
    pub fn prune(&mut self, now: Instant, window: Duration) {
        self.last_emitted
            .retain(|_, last| now.saturating_duration_since(*last) < window);
    }

    pub fn len(&self) -> usize {
        self.last_emitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_emitted.is_empty()
    }
}
