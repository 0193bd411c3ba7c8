// src/delivery/ratelimit.rs
use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Per-zone cooldown between outbound reports.
/// - First report for a zone always passes.
/// - Inside the interval, reports for that zone are refused.
/// - `force` bypasses the gate but still resets the zone's clock.
#[derive(Debug, Default)]
pub struct ZoneRateLimiter {
    min_interval: Duration,
    last_sent: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl ZoneRateLimiter {
    /// `min_interval_secs` < 0 is treated as 0 (no limit).
    pub fn new(min_interval_secs: i64) -> Self {
        Self {
            min_interval: Duration::seconds(min_interval_secs.max(0)),
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// Check without recording.
    pub fn should_send(&self, zone: &str, now: DateTime<Utc>) -> bool {
        let map = self.last_sent.lock().expect("rate limiter mutex poisoned");
        match map.get(zone) {
            None => true,
            Some(ts) => now.signed_duration_since(*ts) >= self.min_interval,
        }
    }

    /// Check and record in one step.
    pub fn try_acquire(&self, zone: &str, now: DateTime<Utc>, force: bool) -> bool {
        let mut map = self.last_sent.lock().expect("rate limiter mutex poisoned");
        let allowed = force
            || match map.get(zone) {
                None => true,
                Some(ts) => now.signed_duration_since(*ts) >= self.min_interval,
            };
        if allowed {
            map.insert(zone.to_string(), now);
        }
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn first_report_passes() {
        let rl = ZoneRateLimiter::new(30);
        assert!(rl.should_send("CLINTON", t0()));
        assert!(rl.try_acquire("CLINTON", t0(), false));
    }

    #[test]
    fn inside_interval_blocked_per_zone() {
        let rl = ZoneRateLimiter::new(30);
        assert!(rl.try_acquire("CLINTON", t0(), false));
        assert!(!rl.try_acquire("CLINTON", t0() + Duration::seconds(29), false));
        assert!(rl.try_acquire("MUKILTEO", t0() + Duration::seconds(1), false));
        assert!(rl.try_acquire("CLINTON", t0() + Duration::seconds(30), false));
    }

    #[test]
    fn force_bypasses_and_resets() {
        let rl = ZoneRateLimiter::new(30);
        assert!(rl.try_acquire("CLINTON", t0(), false));
        assert!(rl.try_acquire("CLINTON", t0() + Duration::seconds(10), true));
        assert!(!rl.should_send("CLINTON", t0() + Duration::seconds(35)));
    }
}
