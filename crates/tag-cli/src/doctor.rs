use anyhow::{Context, Result};
use tracing::info;

use tag_link::url::Transport;

use crate::config::Config;

/// Validate the configuration without touching the vehicle.
pub fn check(cfg: &Config) -> Result<()> {
    let url = cfg
        .link
        .url
        .as_deref()
        .context("link.url missing (set it in the config or pass --url)")?;
    Transport::parse(url).context("link.url invalid")?;

    anyhow::ensure!(cfg.link.heartbeat_hz > 0.0, "link.heartbeat_hz must be positive");
    anyhow::ensure!(cfg.link.discovery_timeout_s >= 1, "link.discovery_timeout_s too small");

    anyhow::ensure!(
        cfg.preflight.takeoff_altitude_m > cfg.preflight.liftoff_altitude_m,
        "preflight.takeoff_altitude_m must exceed liftoff_altitude_m"
    );

    cfg.follow
        .to_follow_config()?
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("follow config invalid")?;
    anyhow::ensure!(
        cfg.follow.max_target_distance_m > 0.0,
        "follow.max_target_distance_m must be positive"
    );
    anyhow::ensure!(cfg.follow.duration_s >= 1, "follow.duration_s too small");
    anyhow::ensure!(cfg.follow.stream_hz > 0.0, "follow.stream_hz must be positive");

    anyhow::ensure!(!cfg.rcs.host.is_empty(), "rcs.host missing");
    anyhow::ensure!(cfg.rcs.port != 0, "rcs.port invalid");

    info!("doctor: OK");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut cfg = Config::default();
        cfg.link.url = Some("udp://:14540".into());
        cfg
    }

    #[test]
    fn test_accepts_valid_config() {
        assert!(check(&valid_config()).is_ok());
    }

    #[test]
    fn test_requires_url() {
        let cfg = Config::default();
        assert!(check(&cfg).is_err());
    }

    #[test]
    fn test_rejects_bad_url() {
        let mut cfg = valid_config();
        cfg.link.url = Some("carrier-pigeon://coop".into());
        assert!(check(&cfg).is_err());
    }

    #[test]
    fn test_rejects_incoherent_altitudes() {
        let mut cfg = valid_config();
        cfg.preflight.takeoff_altitude_m = 2.0;
        assert!(check(&cfg).is_err());
    }

    #[test]
    fn test_rejects_zero_follow_window() {
        let mut cfg = valid_config();
        cfg.follow.duration_s = 0;
        assert!(check(&cfg).is_err());
    }
}
