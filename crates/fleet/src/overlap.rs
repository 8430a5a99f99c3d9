//! Spread vehicles that report identical coordinates so each stays visible.

use std::collections::HashMap;

use common::VehiclePosition;

/// Displacement step in degrees (roughly 11 m of latitude).
const STEP_DEGREES: f64 = 0.0001;

/// The first vehicle at a coordinate keeps it. The k-th repeat (k >= 1) moves
/// by `k * STEP_DEGREES`: latitude up for even k and down for odd k,
/// longitude east while `k % 4 < 2` and west otherwise.
///
/// Deterministic for a given input order.
pub fn resolve(positions: Vec<VehiclePosition>) -> Vec<VehiclePosition> {
    let mut seen: HashMap<(u64, u64), u32> = HashMap::with_capacity(positions.len());

    positions
        .into_iter()
        .map(|pos| {
            let count = seen.entry((pos.lat.to_bits(), pos.lng.to_bits())).or_insert(0);
            let k = *count;
            *count += 1;

            if k == 0 {
                return pos;
            }

            let offset = STEP_DEGREES * f64::from(k);
            let lat_sign = if k % 2 == 0 { 1.0 } else { -1.0 };
            let lng_sign = if k % 4 < 2 { 1.0 } else { -1.0 };
            let (lat, lng) = (pos.lat + lat_sign * offset, pos.lng + lng_sign * offset);
            pos.with_coordinates(lat, lng)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{now_millis, VehicleClass};

    fn at(id: &str, lat: f64, lng: f64) -> VehiclePosition {
        VehiclePosition {
            id: id.into(),
            line_id: "343".into(),
            lat,
            lng,
            speed_kmh: 0.0,
            vehicle_class: VehicleClass::Municipal,
            direction: None,
            observed_at: now_millis(),
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_three_vehicles_at_one_point() {
        let (lat, lng) = (-22.9, -43.1);
        let out = resolve(vec![at("v1", lat, lng), at("v2", lat, lng), at("v3", lat, lng)]);

        assert_eq!(out[0].lat, lat);
        assert_eq!(out[0].lng, lng);
        assert!(close(out[1].lat, lat - 0.0001) && close(out[1].lng, lng + 0.0001));
        assert!(close(out[2].lat, lat + 0.0002) && close(out[2].lng, lng - 0.0002));
        assert_eq!(
            out.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
            vec!["v1", "v2", "v3"]
        );
    }

    #[test]
    fn test_fourth_and_fifth_repeat_follow_the_pattern() {
        let out = resolve((0..5).map(|i| at(&format!("v{}", i), 0.0, 0.0)).collect());
        // k = 3: lat down, lng west; k = 4: lat up, lng east.
        assert!(close(out[3].lat, -0.0003) && close(out[3].lng, -0.0003));
        assert!(close(out[4].lat, 0.0004) && close(out[4].lng, 0.0004));
    }

    #[test]
    fn test_idempotent_on_spread_output() {
        let once = resolve(vec![
            at("v1", -22.9, -43.1),
            at("v2", -22.9, -43.1),
            at("v3", -22.9, -43.1),
            at("v4", -22.8, -43.2),
        ]);
        let twice = resolve(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_distinct_points_untouched() {
        let input = vec![at("a", -22.9, -43.1), at("b", -22.9, -43.2), at("c", -22.8, -43.1)];
        assert_eq!(resolve(input.clone()), input);
        assert!(resolve(Vec::new()).is_empty());
    }
}
