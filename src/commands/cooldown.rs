use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// Per-command cooldown expiries.
///
/// Entries are advisory: an expired entry stays in the map until the next
/// lookup for that command removes it.
#[derive(Debug, Default)]
pub struct CooldownEngine {
    expiries: HashMap<String, Instant>,
}

impl CooldownEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining wait for `command` at `now`, pruning the entry if it has
    /// expired.
    pub fn remaining(&mut self, command: &str, now: Instant) -> Option<Duration> {
        let expiry = *self.expiries.get(command)?;
        if expiry > now {
            Some(expiry - now)
        } else {
            self.expiries.remove(command);
            None
        }
    }

    /// Arm `command` for `duration` from `now`. An existing later expiry is
    /// kept, so expiries never move backwards.
    pub fn arm(&mut self, command: &str, duration: Duration, now: Instant) -> Instant {
        let candidate = now + duration;
        let expiry = self
            .expiries
            .entry(command.to_string())
            .and_modify(|e| {
                if candidate > *e {
                    *e = candidate;
                }
            })
            .or_insert(candidate);
        *expiry
    }

    /// Expiry currently recorded for `command`, expired or not.
    pub fn expiry(&self, command: &str) -> Option<Instant> {
        self.expiries.get(command).copied()
    }

    pub fn clear(&mut self) {
        self.expiries.clear();
    }

    pub fn len(&self) -> usize {
        self.expiries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expiries.is_empty()
    }
}
