use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Mean Earth radius in kilometres.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// A resolved point. Both components are always finite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    /// Returns `None` unless both components are finite.
    pub fn new(lat: f64, lng: f64) -> Option<Self> {
        (lat.is_finite() && lng.is_finite()).then_some(Self { lat, lng })
    }

    pub fn distance_km(&self, other: &Coordinate) -> f64 {
        haversine_km(self.lat, self.lng, other.lat, other.lng)
    }
}

/// Coerces a loosely-typed JSON value into a finite number.
///
/// Numbers pass through, strings are trimmed and parsed; null, empty strings,
/// booleans, containers and non-finite results all yield `None`.
pub fn to_num(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            s.parse::<f64>().ok()?
        }
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Great-circle distance between two points in kilometres (haversine).
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push `a` a hair above 1.0 for antipodal points.
    2.0 * EARTH_RADIUS_KM * a.clamp(0.0, 1.0).sqrt().asin()
}

/// Rounds to three decimal places, the precision surfaced to callers.
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_num_accepts_numbers_and_numeric_strings() {
        assert_eq!(to_num(&json!(37.5)), Some(37.5));
        assert_eq!(to_num(&json!(" -122.25 ")), Some(-122.25));
        assert_eq!(to_num(&json!(12)), Some(12.0));
    }

    #[test]
    fn test_to_num_rejects_empty_and_garbage() {
        assert_eq!(to_num(&json!(null)), None);
        assert_eq!(to_num(&json!("")), None);
        assert_eq!(to_num(&json!("abc")), None);
        assert_eq!(to_num(&json!("NaN")), None);
        assert_eq!(to_num(&json!("inf")), None);
        assert_eq!(to_num(&json!(true)), None);
        assert_eq!(to_num(&json!([1])), None);
    }

    #[test]
    fn test_coordinate_rejects_non_finite() {
        assert!(Coordinate::new(f64::NAN, 1.0).is_none());
        assert!(Coordinate::new(1.0, f64::INFINITY).is_none());
        assert!(Coordinate::new(1.0, 2.0).is_some());
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        assert_eq!(haversine_km(37.0, -122.0, 37.0, -122.0), 0.0);
    }

    #[test]
    fn test_distance_is_symmetric_and_non_negative() {
        let points = [
            (37.0, -122.0),
            (38.5816, -121.4944),
            (40.7128, -74.0060),
            (-33.8688, 151.2093),
            (0.0, 180.0),
            (0.0, 0.0),
        ];
        for &(a_lat, a_lng) in &points {
            for &(b_lat, b_lng) in &points {
                let ab = haversine_km(a_lat, a_lng, b_lat, b_lng);
                let ba = haversine_km(b_lat, b_lng, a_lat, a_lng);
                assert!(ab >= 0.0);
                assert!(ab.is_finite());
                assert!((ab - ba).abs() < 1e-9, "{ab} != {ba}");
            }
        }
    }

    #[test]
    fn test_known_distance_san_francisco_to_los_angeles() {
        let d = haversine_km(37.7749, -122.4194, 34.0522, -118.2437);
        assert!((d - 559.0).abs() < 5.0, "Distance was {d}");
    }

    #[test]
    fn test_antipodal_points_do_not_produce_nan() {
        let d = haversine_km(0.0, 0.0, 0.0, 180.0);
        assert!(d.is_finite());
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_KM).abs() < 1e-6);
    }

    #[test]
    fn test_round3() {
        assert_eq!(round3(15.123_456), 15.123);
        assert_eq!(round3(0.0), 0.0);
        assert_eq!(round3(139.9996), 140.0);
    }
}
