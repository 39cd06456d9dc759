//! The follow-me mission, phase by phase: discover, preflight, relay, land.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use tag_follow::{FollowMe, TargetGate, TargetLocation};
use tag_link::url::Transport;
use tag_link::{Link, LinkConfig, Vehicle};
use tag_rcs::LocationProvider;
use tag_vehicle::telemetry::{EXTENDED_SYS_STATE_ID, GLOBAL_POSITION_INT_ID};
use tag_vehicle::{Action, FlightMode, Telemetry};

use crate::config::Config;

/// Extra listening time after the first heartbeat, to catch a second vehicle
/// on the same link.
const DISCOVERY_SETTLE: Duration = Duration::from_secs(2);

/// How long the vehicle gets to actually report the follow-me mode after the
/// mode switch was acknowledged.
const MODE_ENGAGE_TIMEOUT: Duration = Duration::from_secs(10);

enum FollowOutcome {
    /// The follow window ran its course.
    WindowElapsed,
    /// The location feed went away.
    ProviderStopped,
    /// Someone else switched modes; the vehicle is theirs now.
    ModeChanged(FlightMode),
}

pub async fn fly(cfg: &Config) -> Result<()> {
    let (link, vehicle, telemetry) = bootstrap(cfg).await?;
    let action = Action::new(link.clone(), vehicle);

    preflight(cfg, &telemetry, &action).await?;

    let follow = FollowMe::new(link.clone(), vehicle, cfg.follow.stream_hz);
    follow
        .set_config(&cfg.follow.to_follow_config()?)
        .await
        .context("apply follow-me configuration")?;
    follow.start().await.context("start follow-me mode")?;

    let outcome = relay(cfg, &telemetry, &follow).await?;
    if let FollowOutcome::ModeChanged(mode) = outcome {
        info!("flight mode changed externally to {mode}, leaving the vehicle to the operator");
        return Ok(());
    }

    follow.stop().await.context("stop follow-me mode")?;
    action.land().await.context("landing failed")?;
    while telemetry.in_air() {
        info!("waiting until landed");
        sleep(Duration::from_secs(1)).await;
    }
    info!("landed");
    Ok(())
}

/// Connect and log telemetry until interrupted.
pub async fn monitor(cfg: &Config) -> Result<()> {
    let (_link, _vehicle, telemetry) = bootstrap(cfg).await?;

    let mut tick = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                return Ok(());
            }
            _ = tick.tick() => {
                let position = telemetry
                    .position()
                    .map(|p| {
                        format!(
                            "{:.7}, {:.7} ({:.1}m rel)",
                            p.latitude_deg, p.longitude_deg, p.relative_altitude_m
                        )
                    })
                    .unwrap_or_else(|| "unknown".into());
                let battery = telemetry
                    .battery()
                    .voltage
                    .map(|v| format!("{:.1}V", v))
                    .unwrap_or_else(|| "n/a".into());
                info!(
                    "mode={} armed={} in_air={} pos={} battery={}",
                    telemetry.flight_mode(),
                    telemetry.armed(),
                    telemetry.in_air(),
                    position,
                    battery,
                );
            }
        }
    }
}

async fn bootstrap(cfg: &Config) -> Result<(Arc<Link>, Vehicle, Telemetry)> {
    let url = cfg
        .link
        .url
        .as_deref()
        .context("link.url missing (set it in the config or pass --url)")?;
    let transport = Transport::parse(url)?;

    let link = Link::open(
        &transport,
        &LinkConfig {
            system_id: cfg.link.system_id,
            component_id: cfg.link.component_id,
            heartbeat_hz: cfg.link.heartbeat_hz,
        },
    )
    .await
    .with_context(|| format!("open link {}", url))?;

    info!("waiting to discover vehicle on {}", url);
    let vehicle = link
        .discover(
            Duration::from_secs(cfg.link.discovery_timeout_s),
            DISCOVERY_SETTLE,
        )
        .await
        .context("vehicle discovery")?;
    info!("discovered vehicle, system id {}", vehicle.system_id);

    let telemetry = Telemetry::spawn(&link, vehicle);

    // Make sure the messages the mission reads are actually streamed.
    // Not every autopilot honors these, so failure is not fatal.
    let action = Action::new(link.clone(), vehicle);
    for (id, hz) in [(GLOBAL_POSITION_INT_ID, 2.0), (EXTENDED_SYS_STATE_ID, 1.0)] {
        if let Err(e) = action.set_message_interval(id, hz).await {
            warn!("message interval for id {id} not accepted: {e}");
        }
    }

    Ok((link, vehicle, telemetry))
}

async fn preflight(cfg: &Config, telemetry: &Telemetry, action: &Action) -> Result<()> {
    let deadline = Instant::now() + Duration::from_secs(cfg.preflight.health_timeout_s);
    while !telemetry.health_all_ok() {
        anyhow::ensure!(
            Instant::now() < deadline,
            "vehicle not ready within {}s (health {:?})",
            cfg.preflight.health_timeout_s,
            telemetry.health(),
        );
        info!("waiting for vehicle to be ready");
        sleep(Duration::from_secs(1)).await;
    }
    info!("vehicle is ready");

    if !telemetry.armed() {
        action.arm().await.context("arming failed")?;
    }
    info!("armed");

    if !telemetry.in_air() {
        action
            .takeoff(cfg.preflight.takeoff_altitude_m)
            .await
            .context("takeoff failed")?;
        loop {
            let altitude = telemetry
                .position()
                .map(|p| p.relative_altitude_m)
                .unwrap_or(0.0);
            if altitude >= cfg.preflight.liftoff_altitude_m {
                break;
            }
            info!("climbing, {:.1}m", altitude);
            sleep(Duration::from_secs(1)).await;
        }
    }
    info!("in air");
    Ok(())
}

async fn relay(cfg: &Config, telemetry: &Telemetry, follow: &FollowMe) -> Result<FollowOutcome> {
    let mut mode_rx = telemetry.flight_mode_watch();

    // The DO_SET_MODE ack only means the command was understood; wait for
    // the reported mode to actually change before watching for departures.
    let engaged = tokio::time::timeout(MODE_ENGAGE_TIMEOUT, async {
        loop {
            if *mode_rx.borrow_and_update() == FlightMode::FollowMe {
                return Ok::<_, anyhow::Error>(());
            }
            mode_rx.changed().await.context("telemetry stopped")?;
        }
    })
    .await;
    match engaged {
        Ok(res) => res?,
        Err(_) => anyhow::bail!("vehicle did not enter follow-me mode"),
    }
    info!("follow-me active");

    let mut provider = LocationProvider::connect(&cfg.rcs)
        .await
        .context("connect rcs location feed")?;
    let gate = TargetGate::new(cfg.follow.max_target_distance_m);

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.tick().await; // the immediate first tick
    let mut elapsed_s = 0u64;

    loop {
        tokio::select! {
            fix = provider.next_fix() => match fix {
                Some(fix) => {
                    let target = TargetLocation {
                        latitude_deg: fix.latitude_deg,
                        longitude_deg: fix.longitude_deg,
                        absolute_altitude_m: 0.0,
                    };
                    if gate.accept(telemetry.position().as_ref(), &target) {
                        follow.set_target_location(target)?;
                    } else {
                        warn!(
                            "skipped position {}, {}",
                            target.latitude_deg, target.longitude_deg
                        );
                    }
                }
                None => {
                    info!("location feed stopped");
                    return Ok(FollowOutcome::ProviderStopped);
                }
            },
            _ = ticker.tick() => {
                elapsed_s += 1;
                if elapsed_s >= cfg.follow.duration_s {
                    info!("follow window of {}s elapsed", cfg.follow.duration_s);
                    return Ok(FollowOutcome::WindowElapsed);
                }
            },
            res = mode_rx.changed() => {
                res.context("telemetry stopped")?;
                let mode = *mode_rx.borrow_and_update();
                if mode == FlightMode::FollowMe {
                    continue;
                }
                if let Some(last) = follow.last_location() {
                    info!(
                        "[FlightMode: {mode}] last target was {:.7}, {:.7}",
                        last.latitude_deg, last.longitude_deg
                    );
                }
                return Ok(FollowOutcome::ModeChanged(mode));
            }
        }
    }
}
