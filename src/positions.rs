//! # Position Cache
//! Short-lived snapshot of the authoritative feed: vessel name → last fix.
//! Used only to correlate camera detections with a known identity.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::{haversine_nm, Coord};

/// One vessel as reported by the authoritative position feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VesselPosition {
    pub vessel_id: i64,
    pub name: String,
    #[serde(alias = "latitude")]
    pub lat: f64,
    #[serde(alias = "longitude")]
    pub lon: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub heading: f64,
    #[serde(default)]
    pub in_service: bool,
    #[serde(default)]
    pub at_dock: bool,
    #[serde(default)]
    pub departing_terminal: Option<String>,
    #[serde(default)]
    pub arriving_terminal: Option<String>,
    #[serde(default)]
    pub vessel_class: Option<String>,
}

impl VesselPosition {
    pub fn coord(&self) -> Coord {
        Coord::new(self.lat, self.lon)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionCacheEntry {
    pub coord: Coord,
    pub at_dock: bool,
    pub departing_terminal: Option<String>,
    pub arriving_terminal: Option<String>,
    pub vessel_class: Option<String>,
    pub speed: f64,
    pub heading: f64,
    pub captured_at: DateTime<Utc>,
}

/// Thread-safe name → position map. Newest write wins; entries older than
/// the staleness bound are invisible to correlation.
#[derive(Debug)]
pub struct PositionCache {
    inner: Mutex<HashMap<String, PositionCacheEntry>>,
    staleness: Duration,
}

impl PositionCache {
    pub fn new(staleness_secs: i64) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            staleness: Duration::seconds(staleness_secs.max(0)),
        }
    }

    /// Overwrite every supplied vessel's entry wholesale.
    pub fn update_at(&self, vessels: &[VesselPosition], now: DateTime<Utc>) {
        let mut map = self.inner.lock().expect("position cache mutex poisoned");
        for v in vessels {
            map.insert(
                v.name.clone(),
                PositionCacheEntry {
                    coord: v.coord(),
                    at_dock: v.at_dock,
                    departing_terminal: v.departing_terminal.clone(),
                    arriving_terminal: v.arriving_terminal.clone(),
                    vessel_class: v.vessel_class.clone(),
                    speed: v.speed,
                    heading: v.heading,
                    captured_at: now,
                },
            );
        }
    }

    /// Closest fresh entry within `radius_nm` (inclusive) of `coord`.
    /// Ties keep whichever entry was seen first.
    pub fn nearest_within(
        &self,
        coord: Coord,
        radius_nm: f64,
        now: DateTime<Utc>,
    ) -> Option<(String, f64)> {
        let map = self.inner.lock().expect("position cache mutex poisoned");
        let mut best: Option<(&String, f64)> = None;

        for (name, entry) in map.iter() {
            if now.signed_duration_since(entry.captured_at) > self.staleness {
                continue;
            }
            let dist = haversine_nm(coord, entry.coord);
            if dist > radius_nm {
                continue;
            }
            let closer = match best {
                None => true,
                Some((_, d)) => dist < d,
            };
            if closer {
                best = Some((name, dist));
            }
        }

        best.map(|(n, d)| (n.clone(), d))
    }

    pub fn get(&self, name: &str) -> Option<PositionCacheEntry> {
        let map = self.inner.lock().expect("position cache mutex poisoned");
        map.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("position cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn vessel(name: &str, lat: f64, lon: f64) -> VesselPosition {
        VesselPosition {
            vessel_id: 1,
            name: name.to_string(),
            lat,
            lon,
            speed: 11.5,
            heading: 90.0,
            in_service: true,
            at_dock: false,
            departing_terminal: Some("Mukilteo".into()),
            arriving_terminal: Some("Clinton".into()),
            vessel_class: None,
        }
    }

    #[test]
    fn newest_write_wins() {
        let cache = PositionCache::new(60);
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        cache.update_at(&[vessel("Tokitae", 47.95, -122.30)], t0);
        cache.update_at(&[vessel("Tokitae", 47.97, -122.35)], t0 + Duration::seconds(5));

        assert_eq!(cache.len(), 1);
        let e = cache.get("Tokitae").unwrap();
        assert_eq!(e.coord, Coord::new(47.97, -122.35));
        assert_eq!(e.captured_at, t0 + Duration::seconds(5));
    }

    #[test]
    fn nearest_prefers_closest() {
        let cache = PositionCache::new(60);
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        cache.update_at(
            &[vessel("Far", 47.99, -122.35), vessel("Near", 47.971, -122.35)],
            t0,
        );
        let (name, d) = cache
            .nearest_within(Coord::new(47.97, -122.35), 2.0, t0)
            .unwrap();
        assert_eq!(name, "Near");
        assert!(d < 0.1);
    }

    #[test]
    fn deserializes_feed_field_aliases() {
        let json = r#"{"vessel_id": 7, "name": "Samish", "latitude": 48.5, "longitude": -122.7,
                       "in_service": true, "at_dock": true}"#;
        let v: VesselPosition = serde_json::from_str(json).unwrap();
        assert_eq!(v.coord(), Coord::new(48.5, -122.7));
        assert!(v.departing_terminal.is_none());
        assert_eq!(v.speed, 0.0);
    }
}
