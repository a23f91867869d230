//! Great-circle distance.

use crate::types::Coordinates;

/// Mean earth radius used by [`haversine_distance`].
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Returns the great-circle distance between two points in meters.
pub fn haversine_distance(a: Coordinates, b: Coordinates) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SF: Coordinates = Coordinates::new(37.7749, -122.4194);

    #[test]
    fn zero_distance_to_self() {
        assert_eq!(haversine_distance(SF, SF), 0.0);
    }

    #[test]
    fn small_latitude_offsets() {
        // 0.0002 deg of latitude is ~22 m, 0.0011 deg is ~122 m
        let near = haversine_distance(SF, Coordinates::new(37.7751, -122.4194));
        assert!((near - 22.2).abs() < 0.5, "near = {near}");

        let far = haversine_distance(SF, Coordinates::new(37.7760, -122.4194));
        assert!((far - 122.3).abs() < 0.5, "far = {far}");
    }

    #[test]
    fn known_city_pair() {
        let la = Coordinates::new(34.0522, -118.2437);
        let d = haversine_distance(SF, la);
        assert!((d - 559_000.0).abs() < 2_000.0, "d = {d}");
    }

    proptest! {
        #[test]
        fn symmetric_and_non_negative(
            lat1 in -89.0f64..89.0, lon1 in -179.0f64..179.0,
            lat2 in -89.0f64..89.0, lon2 in -179.0f64..179.0,
        ) {
            let a = Coordinates::new(lat1, lon1);
            let b = Coordinates::new(lat2, lon2);
            let ab = haversine_distance(a, b);
            let ba = haversine_distance(b, a);
            prop_assert!(ab >= 0.0);
            prop_assert!((ab - ba).abs() < 1e-6);
            prop_assert!(ab <= std::f64::consts::PI * EARTH_RADIUS_METERS + 1.0);
        }
    }
}
