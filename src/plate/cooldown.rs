use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::CanonicalPlate;

/// Last-alert bookkeeping per plate.
///
/// One lock guards the whole map: the key space is the target list, so
/// contention is negligible and the check-and-set stays trivially atomic.
/// Entries are never removed.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    last_alert: Mutex<HashMap<CanonicalPlate, DateTime<Local>>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when `plate` should alert at `now`, recording `now` as
    /// its last alert time in that case only.
    ///
    /// A plate re-alerts once strictly more than `cooldown` has elapsed
    /// since its last alert. A clock that moved backwards never re-alerts.
    pub fn should_alert(
        &self,
        plate: &CanonicalPlate,
        now: DateTime<Local>,
        cooldown: Duration,
    ) -> bool {
        let cooldown = chrono::Duration::from_std(cooldown).unwrap_or(chrono::Duration::MAX);
        // A poisoned map only means another thread panicked mid-insert;
        // every entry is still a valid timestamp.
        let mut map = self
            .last_alert
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let fire = match map.get(plate) {
            None => true,
            Some(last) => now.signed_duration_since(*last) > cooldown,
        };
        if fire {
            map.insert(plate.clone(), now);
        }
        fire
    }

    /// Last recorded alert for `plate`, if any.
    pub fn last_alert(&self, plate: &CanonicalPlate) -> Option<DateTime<Local>> {
        self.last_alert
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(plate)
            .copied()
    }

    pub fn len(&self) -> usize {
        self.last_alert
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plate::normalize;
    use std::sync::{Arc, Barrier};

    const COOLDOWN: Duration = Duration::from_secs(30);

    #[test]
    fn exact_boundary_does_not_realert() {
        let tracker = CooldownTracker::new();
        let plate = normalize("B1001ZZZ");
        let t = Local::now();
        assert!(tracker.should_alert(&plate, t, COOLDOWN));
        assert!(!tracker.should_alert(&plate, t + chrono::Duration::seconds(30), COOLDOWN));
    }

    #[test]
    fn past_boundary_realerts() {
        let tracker = CooldownTracker::new();
        let plate = normalize("B1001ZZZ");
        let t = Local::now();
        assert!(tracker.should_alert(&plate, t, COOLDOWN));
        let later = t + chrono::Duration::seconds(30) + chrono::Duration::milliseconds(1);
        assert!(tracker.should_alert(&plate, later, COOLDOWN));
        assert_eq!(tracker.last_alert(&plate), Some(later));
    }

    #[test]
    fn suppressed_call_does_not_extend_window() {
        let tracker = CooldownTracker::new();
        let plate = normalize("B2156TOR");
        let t = Local::now();
        assert!(tracker.should_alert(&plate, t, COOLDOWN));
        assert!(!tracker.should_alert(&plate, t + chrono::Duration::seconds(20), COOLDOWN));
        assert!(tracker.should_alert(&plate, t + chrono::Duration::seconds(31), COOLDOWN));
    }

    #[test]
    fn plates_are_tracked_independently() {
        let tracker = CooldownTracker::new();
        let t = Local::now();
        assert!(tracker.should_alert(&normalize("B1001ZZZ"), t, COOLDOWN));
        assert!(tracker.should_alert(&normalize("F9012HIJ"), t, COOLDOWN));
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn concurrent_calls_fire_once() {
        let tracker = Arc::new(CooldownTracker::new());
        let plate = normalize("B1001ZZZ");
        let now = Local::now();
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = tracker.clone();
                let plate = plate.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    tracker.should_alert(&plate, now, COOLDOWN)
                })
            })
            .collect();
        let fired = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|fired| *fired)
            .count();
        assert_eq!(fired, 1);
    }
}
