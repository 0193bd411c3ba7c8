//! # Geo
//! Pure geometry on plain `(lat, lon)` pairs: great-circle distance in
//! nautical miles and ray-casting polygon containment. No hidden state.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in nautical miles.
pub const EARTH_RADIUS_NM: f64 = 3440.065;

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub lat: f64,
    pub lon: f64,
}

impl Coord {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Upstream feeds report a zero component when a vessel has no fix.
    pub fn is_unset(&self) -> bool {
        self.lat == 0.0 || self.lon == 0.0
    }
}

impl From<(f64, f64)> for Coord {
    fn from((lat, lon): (f64, f64)) -> Self {
        Self { lat, lon }
    }
}

/// Haversine distance between two coordinates, in nautical miles.
pub fn haversine_nm(a: Coord, b: Coord) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_NM * c
}

/// Ray-casting containment test. Vertices are `(lat, lon)` in drawing order;
/// the ring is closed implicitly. Fewer than three vertices never contain anything.
pub fn point_in_polygon(p: Coord, polygon: &[Coord]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = (polygon[i].lat, polygon[i].lon);
        let (xj, yj) = (polygon[j].lat, polygon[j].lon);
        if (yi > p.lon) != (yj > p.lon) && p.lat < (xj - xi) * (p.lon - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Coord> {
        vec![
            Coord::new(47.0, -122.5),
            Coord::new(47.0, -122.0),
            Coord::new(48.0, -122.0),
            Coord::new(48.0, -122.5),
        ]
    }

    #[test]
    fn zero_distance_to_self() {
        let p = Coord::new(47.97, -122.35);
        assert!(haversine_nm(p, p).abs() < 1e-9);
    }

    #[test]
    fn one_degree_latitude_is_sixty_nm() {
        let a = Coord::new(47.0, -122.0);
        let b = Coord::new(48.0, -122.0);
        let d = haversine_nm(a, b);
        assert!((d - 60.04).abs() < 0.05, "got {d}");
    }

    #[test]
    fn distance_is_symmetric() {
        let a = Coord::new(47.6, -122.3);
        let b = Coord::new(47.9, -122.4);
        assert!((haversine_nm(a, b) - haversine_nm(b, a)).abs() < 1e-9);
    }

    #[test]
    fn polygon_contains_interior_point() {
        assert!(point_in_polygon(Coord::new(47.5, -122.25), &square()));
    }

    #[test]
    fn polygon_rejects_exterior_point() {
        assert!(!point_in_polygon(Coord::new(48.5, -122.25), &square()));
        assert!(!point_in_polygon(Coord::new(47.5, -121.9), &square()));
    }

    #[test]
    fn degenerate_polygon_never_matches() {
        let line = vec![Coord::new(47.0, -122.0), Coord::new(48.0, -122.0)];
        assert!(!point_in_polygon(Coord::new(47.5, -122.0), &line));
    }

    #[test]
    fn concave_polygon_notch_is_outside() {
        // U-shape opening to the north
        let u = vec![
            Coord::new(0.0, 0.0),
            Coord::new(0.0, 3.0),
            Coord::new(3.0, 3.0),
            Coord::new(3.0, 2.0),
            Coord::new(1.0, 2.0),
            Coord::new(1.0, 1.0),
            Coord::new(3.0, 1.0),
            Coord::new(3.0, 0.0),
        ];
        assert!(!point_in_polygon(Coord::new(2.0, 1.5), &u));
        assert!(point_in_polygon(Coord::new(0.5, 1.5), &u));
        assert!(point_in_polygon(Coord::new(2.0, 0.5), &u));
    }
}
