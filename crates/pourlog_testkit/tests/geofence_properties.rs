//! Property tests for geofence boundary evaluation.

use pourlog_core::{
    GeofenceConfig, GeofenceEngine, GeofenceEvent, MockPositionSource, SystemClock,
};
use pourlog_storage::InMemoryStore;
use pourlog_testkit::prelude::*;
use proptest::prelude::*;
use std::sync::Arc;

fn engine() -> GeofenceEngine<MockPositionSource, InMemoryStore> {
    GeofenceEngine::new(
        GeofenceConfig::default(),
        Arc::new(MockPositionSource::new()),
        InMemoryStore::new(),
        Arc::new(SystemClock),
    )
}

proptest! {
    #[test]
    fn inside_point_enters_once((venue, point) in inside_point_strategy()) {
        let engine = engine();
        engine.register(std::slice::from_ref(&venue));

        let first = engine.update_position(sample(point, base_time()));
        prop_assert_eq!(first.len(), 1);
        prop_assert_eq!(first[0].event, GeofenceEvent::Enter);
        prop_assert_eq!(&first[0].venue_id, &venue.id);

        let again = engine.update_position(sample(point, minutes_after_base(1)));
        prop_assert!(again.is_empty());
    }

    #[test]
    fn outside_point_never_enters((venue, point) in outside_point_strategy()) {
        let engine = engine();
        engine.register(std::slice::from_ref(&venue));

        let transitions = engine.update_position(sample(point, base_time()));
        prop_assert!(transitions.is_empty());
        prop_assert!(!engine.is_inside_any_geofence());
    }

    #[test]
    fn exit_waits_for_dwell_threshold(
        (venue, inside) in inside_point_strategy(),
        dwell_minutes in 0i64..30,
    ) {
        let engine = engine();
        engine.register(std::slice::from_ref(&venue));
        let center = venue.coordinates();
        let far = destination(center, venue.radius_meters.unwrap_or(100.0) * 3.0, 90.0);

        engine.update_position(sample(inside, base_time()));
        let exit = engine.update_position(sample(far, minutes_after_base(dwell_minutes)));

        if dwell_minutes >= 10 {
            prop_assert_eq!(exit.len(), 1);
            prop_assert_eq!(exit[0].event, GeofenceEvent::Exit);
        } else {
            prop_assert!(exit.is_empty());
            prop_assert!(engine.is_inside_any_geofence());
        }
    }
}
