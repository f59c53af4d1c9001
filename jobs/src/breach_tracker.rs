//! Layer-1 sustained-breach tracking for the Position Monitor
//! (`spec.md` §4.5): a process-local map from trade id to the timestamp the
//! breach began, cleared when spot re-enters the strike range.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Sustained-breach threshold: strictly greater than this triggers a close
/// (`spec.md` §8 boundary behavior — exactly 15 minutes does not trigger).
pub const SUSTAINED_BREACH_THRESHOLD: Duration = Duration::minutes(15);

/// Tracks, per trade id, when an underlying-breach episode began.
#[derive(Debug, Default)]
pub struct BreachTracker {
    breach_started_at: Mutex<HashMap<Uuid, DateTime<Utc>>>,
}

impl BreachTracker {
    /// A tracker with no active breaches.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `trade_id` is currently outside its strike range at
    /// `now`. Returns `true` once the breach has been continuous for
    /// strictly more than [`SUSTAINED_BREACH_THRESHOLD`].
    pub fn record_breach(&self, trade_id: Uuid, now: DateTime<Utc>) -> bool {
        let mut started = self.breach_started_at.lock().unwrap_or_else(|e| e.into_inner());
        let start = *started.entry(trade_id).or_insert(now);
        now - start > SUSTAINED_BREACH_THRESHOLD
    }

    /// Clear a breach episode once spot re-enters the strike range.
    pub fn clear(&self, trade_id: Uuid) {
        let mut started = self.breach_started_at.lock().unwrap_or_else(|e| e.into_inner());
        started.remove(&trade_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breach_does_not_trigger_at_exactly_fifteen_minutes() {
        let tracker = BreachTracker::new();
        let trade_id = Uuid::new_v4();
        let start = Utc::now();
        assert!(!tracker.record_breach(trade_id, start));
        let at_threshold = start + Duration::minutes(15);
        assert!(!tracker.record_breach(trade_id, at_threshold));
    }

    #[test]
    fn breach_triggers_strictly_after_fifteen_minutes() {
        let tracker = BreachTracker::new();
        let trade_id = Uuid::new_v4();
        let start = Utc::now();
        tracker.record_breach(trade_id, start);
        let past_threshold = start + Duration::minutes(15) + Duration::seconds(1);
        assert!(tracker.record_breach(trade_id, past_threshold));
    }

    #[test]
    fn clearing_resets_the_breach_window() {
        let tracker = BreachTracker::new();
        let trade_id = Uuid::new_v4();
        let start = Utc::now();
        tracker.record_breach(trade_id, start);
        tracker.clear(trade_id);
        let later = start + Duration::minutes(20);
        assert!(!tracker.record_breach(trade_id, later));
    }
}
