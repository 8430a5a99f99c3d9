//! Vehicle heading derived from consecutive observations.

use std::collections::HashSet;

use common::{VehicleClass, VehiclePosition};
use dashmap::DashMap;

type VehicleKey = (VehicleClass, String);

/// Last-seen coordinate per vehicle. Keys include the vehicle class, so the
/// two providers never share state even when ids collide.
#[derive(Debug, Default)]
pub struct BearingTracker {
    last_seen: DashMap<VehicleKey, (f64, f64)>,
}

impl BearingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Heading in degrees `[0, 360)` from the previous coordinate of this
    /// vehicle, or `0.0` on first sight or when it has not moved.
    pub fn bearing_for(&self, pos: &VehiclePosition) -> f64 {
        let current = (pos.lat, pos.lng);
        let previous = self
            .last_seen
            .insert((pos.vehicle_class, pos.id.clone()), current);

        match previous {
            Some(prev) if prev != current => initial_bearing(prev, current),
            _ => 0.0,
        }
    }

    /// Forget vehicles absent from `latest`.
    pub fn prune(&self, latest: &[VehiclePosition]) {
        let keep: HashSet<(VehicleClass, &str)> = latest
            .iter()
            .map(|p| (p.vehicle_class, p.id.as_str()))
            .collect();
        self.last_seen
            .retain(|(class, id), _| keep.contains(&(*class, id.as_str())));
    }

    pub fn clear(&self) {
        self.last_seen.clear();
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

/// Great-circle initial bearing from `from` to `to`, both `(lat, lng)` in degrees.
pub fn initial_bearing(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lat2) = (from.0.to_radians(), to.0.to_radians());
    let delta_lng = (to.1 - from.1).to_radians();

    let y = delta_lng.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * delta_lng.cos();

    y.atan2(x).to_degrees().rem_euclid(360.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::now_millis;

    fn bus(id: &str, class: VehicleClass, lat: f64, lng: f64) -> VehiclePosition {
        VehiclePosition {
            id: id.into(),
            line_id: "343".into(),
            lat,
            lng,
            speed_kmh: 20.0,
            vehicle_class: class,
            direction: None,
            observed_at: now_millis(),
        }
    }

    #[test]
    fn test_first_sight_is_zero_then_heading() {
        let tracker = BearingTracker::new();
        assert_eq!(tracker.bearing_for(&bus("C1", VehicleClass::Municipal, -22.90, -43.17)), 0.0);
        assert_eq!(tracker.bearing_for(&bus("C1", VehicleClass::Municipal, -22.90, -43.17)), 0.0);

        // Due north, then due east.
        let north = tracker.bearing_for(&bus("C1", VehicleClass::Municipal, -22.89, -43.17));
        assert!(north.abs() < 1e-6 || (north - 360.0).abs() < 1e-6);
        let east = tracker.bearing_for(&bus("C1", VehicleClass::Municipal, -22.89, -43.16));
        assert!((east - 90.0).abs() < 0.1);
    }

    #[test]
    fn test_bearing_is_normalized() {
        let west = initial_bearing((-22.9, -43.1), (-22.9, -43.2));
        assert!((west - 270.0).abs() < 0.1);
        let south = initial_bearing((-22.9, -43.1), (-23.0, -43.1));
        assert!((south - 180.0).abs() < 1e-6);
    }

    #[test]
    fn test_classes_do_not_share_state() {
        let tracker = BearingTracker::new();
        tracker.bearing_for(&bus("100", VehicleClass::Municipal, -22.90, -43.17));
        let other = tracker.bearing_for(&bus("100", VehicleClass::Intermunicipal, -22.80, -43.10));
        assert_eq!(other, 0.0);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_prune_keeps_only_latest_ids() {
        let tracker = BearingTracker::new();
        tracker.bearing_for(&bus("C1", VehicleClass::Municipal, -22.90, -43.17));
        tracker.bearing_for(&bus("C2", VehicleClass::Municipal, -22.91, -43.18));
        tracker.bearing_for(&bus("RJ-1", VehicleClass::Intermunicipal, -22.88, -43.11));

        tracker.prune(&[bus("C2", VehicleClass::Municipal, -22.92, -43.18)]);
        assert_eq!(tracker.len(), 1);

        // C1 was forgotten, so it starts over.
        assert_eq!(tracker.bearing_for(&bus("C1", VehicleClass::Municipal, -22.95, -43.17)), 0.0);

        tracker.clear();
        assert!(tracker.is_empty());
    }
}
