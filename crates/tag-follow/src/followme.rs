//! Driving the autopilot's follow-target mode.
//!
//! Activation is a mode switch; the target itself travels as a stream of
//! FOLLOW_TARGET messages. The autopilot times the stream out, so while the
//! mode is active a background task re-sends the last accepted target at a
//! steady rate even when the feed goes quiet. Fresh fixes are sent
//! immediately, paced so a flooding feed cannot saturate the link.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mavlink::common::{MavMessage, MavParamType, FOLLOW_TARGET_DATA, PARAM_SET_DATA};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tag_link::{Link, LinkError, Vehicle};
use tag_vehicle::{Action, ActionError, FlightMode};

use crate::config::FollowConfig;
use crate::TargetLocation;

const PARAM_ACK_TIMEOUT: Duration = Duration::from_secs(1);
const PARAM_ATTEMPTS: u32 = 2;

/// Floor between consecutive FOLLOW_TARGET sends.
const MIN_SEND_INTERVAL: Duration = Duration::from_millis(100);

/// FOLLOW_TARGET est_capabilities bit: position only.
const EST_CAP_POS: u8 = 1;

#[derive(Debug, Error)]
pub enum FollowError {
    #[error("follow config: {0}")]
    Config(String),
    #[error("param {0} not acknowledged by autopilot")]
    ParamTimeout(String),
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error(transparent)]
    Link(#[from] LinkError),
}

pub struct FollowMe {
    link: Arc<Link>,
    vehicle: Vehicle,
    action: Action,
    shared: Arc<Shared>,
    stream_hz: f32,
    stream_task: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    last_target: Mutex<Option<TargetLocation>>,
    pacer: Mutex<SendPacer>,
    active: AtomicBool,
}

impl FollowMe {
    pub fn new(link: Arc<Link>, vehicle: Vehicle, stream_hz: f32) -> Self {
        Self {
            action: Action::new(link.clone(), vehicle),
            link,
            vehicle,
            shared: Arc::new(Shared {
                last_target: Mutex::new(None),
                pacer: Mutex::new(SendPacer::new(MIN_SEND_INTERVAL)),
                active: AtomicBool::new(false),
            }),
            stream_hz,
            stream_task: Mutex::new(None),
        }
    }

    /// Push the follow parameters to the autopilot, each confirmed by its
    /// PARAM_VALUE echo.
    pub async fn set_config(&self, cfg: &FollowConfig) -> Result<(), FollowError> {
        cfg.validate().map_err(FollowError::Config)?;
        for (name, value) in cfg.params() {
            self.set_param(name, value).await?;
        }
        Ok(())
    }

    /// Switch the vehicle into follow-target mode and start the re-send task.
    pub async fn start(&self) -> Result<(), FollowError> {
        self.action.set_flight_mode(FlightMode::FollowMe).await?;
        self.shared.active.store(true, Ordering::SeqCst);

        let link = self.link.clone();
        let shared = self.shared.clone();
        let interval = Duration::from_secs_f32(1.0 / self.stream_hz.max(0.2));
        let task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            while shared.active.load(Ordering::SeqCst) {
                tick.tick().await;
                let target = *shared.last_target.lock().unwrap();
                if let Some(target) = target {
                    if let Err(e) = shared.send_paced(&link, &target) {
                        warn!("follow: target re-send failed: {e}");
                    }
                }
            }
        });
        *self.stream_task.lock().unwrap() = Some(task);
        info!("follow: started");
        Ok(())
    }

    /// Stop streaming and park the vehicle in Hold.
    pub async fn stop(&self) -> Result<(), FollowError> {
        self.shared.active.store(false, Ordering::SeqCst);
        if let Some(task) = self.stream_task.lock().unwrap().take() {
            task.abort();
        }
        self.action.set_flight_mode(FlightMode::Hold).await?;
        info!("follow: stopped");
        Ok(())
    }

    /// Record a fresh target and forward it. Returns false when the send was
    /// paced out; the re-send task will deliver the target shortly.
    pub fn set_target_location(&self, target: TargetLocation) -> Result<bool, FollowError> {
        *self.shared.last_target.lock().unwrap() = Some(target);
        self.shared.send_paced(&self.link, &target)
    }

    pub fn last_location(&self) -> Option<TargetLocation> {
        *self.shared.last_target.lock().unwrap()
    }

    async fn set_param(&self, name: &'static str, value: f32) -> Result<(), FollowError> {
        for _ in 0..PARAM_ATTEMPTS {
            let mut rx = self.link.subscribe();
            self.link.send(&MavMessage::PARAM_SET(PARAM_SET_DATA {
                param_value: value,
                target_system: self.vehicle.system_id,
                target_component: self.vehicle.component_id,
                param_id: param_id(name),
                param_type: MavParamType::MAV_PARAM_TYPE_REAL32,
            }))?;
            if self.wait_param_echo(&mut rx, name).await {
                debug!("follow: {name} = {value}");
                return Ok(());
            }
            warn!("follow: no echo for {name}, retrying");
        }
        Err(FollowError::ParamTimeout(name.to_string()))
    }

    async fn wait_param_echo(
        &self,
        rx: &mut broadcast::Receiver<tag_link::Frame>,
        name: &str,
    ) -> bool {
        let wanted = param_id(name);
        let wait = async {
            loop {
                match rx.recv().await {
                    Ok((header, MavMessage::PARAM_VALUE(pv))) => {
                        if header.system_id == self.vehicle.system_id && pv.param_id == wanted {
                            return true;
                        }
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return false,
                }
            }
        };
        tokio::time::timeout(PARAM_ACK_TIMEOUT, wait)
            .await
            .unwrap_or(false)
    }
}

impl Shared {
    fn send_paced(&self, link: &Link, target: &TargetLocation) -> Result<bool, FollowError> {
        if !self.pacer.lock().unwrap().allow() {
            return Ok(false);
        }
        link.send(&MavMessage::FOLLOW_TARGET(build_follow_target(target, now_ms())))?;
        Ok(true)
    }
}

fn now_ms() -> u64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as u64
}

fn build_follow_target(target: &TargetLocation, timestamp_ms: u64) -> FOLLOW_TARGET_DATA {
    FOLLOW_TARGET_DATA {
        timestamp: timestamp_ms,
        custom_state: 0,
        lat: (target.latitude_deg * 1e7).round() as i32,
        lon: (target.longitude_deg * 1e7).round() as i32,
        alt: target.absolute_altitude_m,
        vel: [0.0; 3],
        acc: [0.0; 3],
        attitude_q: [1.0, 0.0, 0.0, 0.0],
        rates: [0.0; 3],
        position_cov: [0.0; 3],
        est_capabilities: EST_CAP_POS,
    }
}

/// Parameter names go on the wire as a zero-padded 16 byte field.
fn param_id(name: &str) -> [u8; 16] {
    let mut id = [0u8; 16];
    for (dst, src) in id.iter_mut().zip(name.bytes()) {
        *dst = src;
    }
    id
}

#[derive(Debug)]
struct SendPacer {
    last: Option<Instant>,
    min_interval: Duration,
}

impl SendPacer {
    fn new(min_interval: Duration) -> Self {
        Self { last: None, min_interval }
    }

    fn allow(&mut self) -> bool {
        let now = Instant::now();
        if let Some(last) = self.last {
            if now.duration_since(last) < self.min_interval {
                return false;
            }
        }
        self.last = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_id_padding() {
        let id = param_id("NAV_FT_DST");
        assert_eq!(&id[..10], b"NAV_FT_DST");
        assert!(id[10..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_follow_target_scaling() {
        let target = TargetLocation {
            latitude_deg: 47.3977419,
            longitude_deg: 8.5455938,
            absolute_altitude_m: 488.0,
        };
        let msg = build_follow_target(&target, 1_700_000_000_123);
        assert_eq!(msg.timestamp, 1_700_000_000_123);
        assert_eq!(msg.lat, 473_977_419);
        assert_eq!(msg.lon, 85_455_938);
        assert_eq!(msg.alt, 488.0);
        assert_eq!(msg.est_capabilities, EST_CAP_POS);
        assert_eq!(msg.attitude_q, [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_pacer_blocks_bursts() {
        let mut pacer = SendPacer::new(Duration::from_millis(100));
        assert!(pacer.allow());
        assert!(!pacer.allow());

        let mut instant_pacer = SendPacer::new(Duration::ZERO);
        assert!(instant_pacer.allow());
        assert!(instant_pacer.allow());
    }
}
