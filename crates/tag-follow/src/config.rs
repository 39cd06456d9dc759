//! Follow-me behaviour configuration, applied to the autopilot as the PX4
//! follow-target parameter set.

use serde::Deserialize;

/// Which side of the target the vehicle keeps to.
///
/// Values map to NAV_FT_FS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FollowDirection {
    FrontRight,
    Behind,
    Front,
    FrontLeft,
}

impl FollowDirection {
    pub(crate) fn param_value(self) -> f32 {
        match self {
            Self::FrontRight => 0.0,
            Self::Behind => 1.0,
            Self::Front => 2.0,
            Self::FrontLeft => 3.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FollowConfig {
    /// Minimum follow height above ground. NAV_MIN_FT_HT.
    pub min_height_m: f32,
    /// Horizontal distance kept to the target. NAV_FT_DST.
    pub follow_distance_m: f32,
    pub direction: FollowDirection,
    /// How aggressively the vehicle chases the target, 0..=1. NAV_FT_RS.
    pub responsiveness: f32,
}

impl Default for FollowConfig {
    fn default() -> Self {
        // PX4 defaults
        Self {
            min_height_m: 8.0,
            follow_distance_m: 8.0,
            direction: FollowDirection::Behind,
            responsiveness: 0.5,
        }
    }
}

impl FollowConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.min_height_m < 8.0 {
            return Err(format!(
                "min_height_m {} below the 8m floor the autopilot enforces",
                self.min_height_m
            ));
        }
        if self.follow_distance_m < 1.0 {
            return Err(format!("follow_distance_m {} too small", self.follow_distance_m));
        }
        if !(0.0..=1.0).contains(&self.responsiveness) {
            return Err(format!("responsiveness {} outside 0..=1", self.responsiveness));
        }
        Ok(())
    }

    /// Parameter name/value pairs to push to the autopilot.
    pub(crate) fn params(&self) -> [(&'static str, f32); 4] {
        [
            ("NAV_MIN_FT_HT", self.min_height_m),
            ("NAV_FT_DST", self.follow_distance_m),
            ("NAV_FT_FS", self.direction.param_value()),
            ("NAV_FT_RS", self.responsiveness),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(FollowConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range() {
        let mut cfg = FollowConfig::default();
        cfg.min_height_m = 2.0;
        assert!(cfg.validate().is_err());

        let mut cfg = FollowConfig::default();
        cfg.follow_distance_m = 0.2;
        assert!(cfg.validate().is_err());

        let mut cfg = FollowConfig::default();
        cfg.responsiveness = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_param_mapping() {
        let cfg = FollowConfig {
            min_height_m: 8.0,
            follow_distance_m: 1.0,
            direction: FollowDirection::Front,
            responsiveness: 0.5,
        };
        let params = cfg.params();
        assert_eq!(params[0], ("NAV_MIN_FT_HT", 8.0));
        assert_eq!(params[1], ("NAV_FT_DST", 1.0));
        assert_eq!(params[2], ("NAV_FT_FS", 2.0));
        assert_eq!(params[3], ("NAV_FT_RS", 0.5));
    }
}
