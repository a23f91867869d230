//! Proptest strategies for geofence property tests.

use pourlog_core::{Coordinates, Venue, EARTH_RADIUS_METERS};
use proptest::prelude::*;

/// Coordinates away from the poles, where bearings are well defined.
pub fn coordinates_strategy() -> impl Strategy<Value = Coordinates> {
    (-80.0f64..80.0, -179.0f64..179.0).prop_map(|(lat, lon)| Coordinates::new(lat, lon))
}

/// Geofence radii in meters, from a doorway to a beer garden.
pub fn radius_strategy() -> impl Strategy<Value = f64> {
    20.0f64..500.0
}

/// Compass bearings in degrees.
pub fn bearing_strategy() -> impl Strategy<Value = f64> {
    0.0f64..360.0
}

/// Venues with random ids, centers and radii.
pub fn venue_strategy() -> impl Strategy<Value = Venue> {
    ("[a-z]{4,12}", coordinates_strategy(), radius_strategy())
        .prop_map(|(slug, center, radius)| venue_at(&slug, center, radius))
}

/// A venue plus a point strictly inside its geofence.
///
/// The point lies between 0 and 90% of the radius from the center.
pub fn inside_point_strategy() -> impl Strategy<Value = (Venue, Coordinates)> {
    point_near_venue(0.0..0.9)
}

/// A venue plus a point clearly outside its geofence.
///
/// The point lies between 110% and 10x the radius from the center.
pub fn outside_point_strategy() -> impl Strategy<Value = (Venue, Coordinates)> {
    point_near_venue(1.1..10.0)
}

fn point_near_venue(
    radius_factor: std::ops::Range<f64>,
) -> impl Strategy<Value = (Venue, Coordinates)> {
    (
        "[a-z]{4,12}",
        coordinates_strategy(),
        radius_strategy(),
        radius_factor,
        bearing_strategy(),
    )
        .prop_map(|(slug, center, radius, factor, bearing)| {
            let point = destination(center, radius * factor, bearing);
            (venue_at(&slug, center, radius), point)
        })
}

fn venue_at(slug: &str, center: Coordinates, radius: f64) -> Venue {
    Venue::new(
        format!("venue-{slug}"),
        format!("The {slug} Taproom"),
        center.latitude,
        center.longitude,
    )
    .with_radius(radius)
}

/// Point reached by travelling `meters` from `origin` along `bearing_deg`
/// on a great circle.
pub fn destination(origin: Coordinates, meters: f64, bearing_deg: f64) -> Coordinates {
    let delta = meters / EARTH_RADIUS_METERS;
    let theta = bearing_deg.to_radians();
    let lat1 = origin.latitude.to_radians();
    let lon1 = origin.longitude.to_radians();

    let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * theta.cos()).asin();
    let lon2 = lon1
        + (theta.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * lat2.sin());

    Coordinates::new(lat2.to_degrees(), lon2.to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pourlog_core::haversine_distance;

    proptest! {
        #[test]
        fn destination_travels_the_requested_distance(
            origin in coordinates_strategy(),
            meters in 1.0f64..5000.0,
            bearing in bearing_strategy(),
        ) {
            let travelled = haversine_distance(origin, destination(origin, meters, bearing));
            prop_assert!((travelled - meters).abs() < 0.05, "{travelled} vs {meters}");
        }
    }

    #[test]
    fn due_north_keeps_longitude() {
        let origin = Coordinates::new(37.7749, -122.4194);
        let north = destination(origin, 1000.0, 0.0);
        assert!((north.longitude - origin.longitude).abs() < 1e-9);
        assert!(north.latitude > origin.latitude);
    }
}
