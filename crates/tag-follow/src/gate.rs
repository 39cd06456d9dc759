//! Sanity check on incoming target fixes.
//!
//! The feed and the vehicle's GNSS are independent, so a bad fix (stale
//! provider state, operator fat-fingering a site, a wrong datum) shows up as
//! a target far from the vehicle. Such fixes must not be forwarded: the
//! vehicle would chase them.

use tag_vehicle::Position;

use crate::TargetLocation;

/// Degrees of latitude per meter.
pub const LATITUDE_DEG_PER_METER: f64 = 8.993e-6;
/// Degrees of longitude per meter, at the mid-latitude operating sites the
/// relay is used at. Good enough for a few-meter threshold.
pub const LONGITUDE_DEG_PER_METER: f64 = 1.675e-5;

#[derive(Debug, Clone, Copy)]
pub struct TargetGate {
    max_distance_m: f64,
}

impl TargetGate {
    pub fn new(max_distance_m: f64) -> Self {
        Self { max_distance_m }
    }

    /// Accept a fix only if it is within the threshold of the vehicle on
    /// both axes. No known vehicle position rejects everything.
    pub fn accept(&self, vehicle: Option<&Position>, target: &TargetLocation) -> bool {
        let Some(vehicle) = vehicle else {
            return false;
        };
        let lat_m = (vehicle.latitude_deg - target.latitude_deg).abs() / LATITUDE_DEG_PER_METER;
        let lon_m = (vehicle.longitude_deg - target.longitude_deg).abs() / LONGITUDE_DEG_PER_METER;
        lat_m < self.max_distance_m && lon_m < self.max_distance_m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vehicle_at(lat: f64, lon: f64) -> Position {
        Position {
            latitude_deg: lat,
            longitude_deg: lon,
            absolute_altitude_m: 50.0,
            relative_altitude_m: 10.0,
        }
    }

    fn target_at(lat: f64, lon: f64) -> TargetLocation {
        TargetLocation {
            latitude_deg: lat,
            longitude_deg: lon,
            absolute_altitude_m: 0.0,
        }
    }

    #[test]
    fn test_accepts_nearby_target() {
        let gate = TargetGate::new(5.0);
        let vehicle = vehicle_at(57.71495, 12.89134);
        // ~2m north of the vehicle
        let target = target_at(57.71495 + 2.0 * LATITUDE_DEG_PER_METER, 12.89134);
        assert!(gate.accept(Some(&vehicle), &target));
    }

    #[test]
    fn test_rejects_target_too_far_on_either_axis() {
        let gate = TargetGate::new(5.0);
        let vehicle = vehicle_at(57.71495, 12.89134);

        let far_north = target_at(57.71495 + 8.0 * LATITUDE_DEG_PER_METER, 12.89134);
        assert!(!gate.accept(Some(&vehicle), &far_north));

        let far_east = target_at(57.71495, 12.89134 + 8.0 * LONGITUDE_DEG_PER_METER);
        assert!(!gate.accept(Some(&vehicle), &far_east));
    }

    #[test]
    fn test_just_past_the_limit_is_rejected() {
        let gate = TargetGate::new(5.0);
        let vehicle = vehicle_at(57.71495, 12.89134);
        let past_limit = target_at(57.71495 + 5.001 * LATITUDE_DEG_PER_METER, 12.89134);
        assert!(!gate.accept(Some(&vehicle), &past_limit));
    }

    #[test]
    fn test_rejects_without_vehicle_position() {
        let gate = TargetGate::new(5.0);
        assert!(!gate.accept(None, &target_at(57.71495, 12.89134)));
    }
}
