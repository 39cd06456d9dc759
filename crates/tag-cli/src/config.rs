use anyhow::{Context, Result};
use serde::Deserialize;

use tag_follow::{FollowConfig, FollowDirection};
use tag_rcs::RcsConfig;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub link: LinkCfg,
    pub preflight: PreflightCfg,
    pub follow: FollowCfg,
    pub rcs: RcsConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LinkCfg {
    /// Connection URL, e.g. udp://:14540 for a simulator.
    pub url: Option<String>,
    /// MAVLink ids we use (companion side).
    pub system_id: u8,
    pub component_id: u8,
    pub heartbeat_hz: f32,
    pub discovery_timeout_s: u64,
}

impl Default for LinkCfg {
    fn default() -> Self {
        Self {
            url: None,
            system_id: 245,
            component_id: 191,
            heartbeat_hz: 1.0,
            discovery_timeout_s: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PreflightCfg {
    pub health_timeout_s: u64,
    pub takeoff_altitude_m: f32,
    /// Relative altitude at which takeoff counts as done.
    pub liftoff_altitude_m: f32,
}

impl Default for PreflightCfg {
    fn default() -> Self {
        Self {
            health_timeout_s: 60,
            takeoff_altitude_m: 3.0,
            liftoff_altitude_m: 2.4,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FollowCfg {
    pub min_height_m: f32,
    pub follow_distance_m: f32,
    /// front | behind | front-right | front-left
    pub direction: String,
    pub responsiveness: f32,
    /// Fixes further than this from the vehicle are not forwarded.
    pub max_target_distance_m: f64,
    /// How long to keep following before landing.
    pub duration_s: u64,
    /// Re-send rate for the last target while the mode is active.
    pub stream_hz: f32,
}

impl Default for FollowCfg {
    fn default() -> Self {
        Self {
            min_height_m: 8.0,
            follow_distance_m: 1.0,
            direction: "front".into(),
            responsiveness: 0.5,
            max_target_distance_m: 5.0,
            duration_s: 60,
            stream_hz: 1.0,
        }
    }
}

impl FollowCfg {
    pub fn to_follow_config(&self) -> Result<FollowConfig> {
        let direction = match self.direction.as_str() {
            "front" => FollowDirection::Front,
            "behind" => FollowDirection::Behind,
            "front-right" => FollowDirection::FrontRight,
            "front-left" => FollowDirection::FrontLeft,
            other => anyhow::bail!("unknown follow.direction: {}", other),
        };
        Ok(FollowConfig {
            min_height_m: self.min_height_m,
            follow_distance_m: self.follow_distance_m,
            direction,
            responsiveness: self.responsiveness,
        })
    }
}

pub fn load(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    toml::from_str(&s).context("parse config toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_mirror_the_demo_mission() {
        let cfg = Config::default();
        assert_eq!(cfg.follow.min_height_m, 8.0);
        assert_eq!(cfg.follow.follow_distance_m, 1.0);
        assert_eq!(cfg.follow.direction, "front");
        assert_eq!(cfg.follow.max_target_distance_m, 5.0);
        assert_eq!(cfg.follow.duration_s, 60);
        assert_eq!(cfg.preflight.liftoff_altitude_m, 2.4);
        assert_eq!(cfg.rcs.port, 65191);
        assert!(cfg.link.url.is_none());
    }

    #[test]
    fn test_parse_partial_toml() {
        let cfg: Config = toml::from_str(
            r#"
            [link]
            url = "udp://:14540"

            [follow]
            direction = "behind"
            duration_s = 120

            [rcs]
            host = "10.0.0.7"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.link.url.as_deref(), Some("udp://:14540"));
        assert_eq!(cfg.link.system_id, 245);
        assert_eq!(cfg.follow.duration_s, 120);
        assert_eq!(cfg.rcs.host, "10.0.0.7");
        assert_eq!(cfg.rcs.port, 65191);

        let follow = cfg.follow.to_follow_config().unwrap();
        assert_eq!(follow.direction, FollowDirection::Behind);
    }

    #[test]
    fn test_unknown_direction_is_an_error() {
        let mut follow = FollowCfg::default();
        follow.direction = "sideways".into();
        assert!(follow.to_follow_config().is_err());
    }
}
