use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mavlink::common::{
    MavAutopilot, MavMessage, MavModeFlag, MavState, MavType, HEARTBEAT_DATA,
};
use mavlink::error::{MessageReadError, MessageWriteError};
use mavlink::{MavConnection, MavHeader, MavlinkVersion};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::url::{Transport, UrlError};
use crate::LinkConfig;

/// One decoded inbound frame.
pub type Frame = (MavHeader, MavMessage);

/// The autopilot we ended up talking to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vehicle {
    pub system_id: u8,
    pub component_id: u8,
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error(transparent)]
    Url(#[from] UrlError),
    #[error("open serial device {path}: {source}")]
    Serial {
        path: String,
        source: tokio_serial::Error,
    },
    #[error("mavlink connect {address}: {source}")]
    Connect { address: String, source: io::Error },
    #[error("mavlink send: {0}")]
    Write(#[from] MessageWriteError),
    #[error("no vehicle heartbeat within {0:?}")]
    DiscoveryTimeout(Duration),
    #[error("discovered {0} vehicles, expected exactly one")]
    MultipleVehicles(usize),
    #[error("link closed")]
    Closed,
}

/// A shared MAVLink connection.
///
/// Owns the transport, stamps outbound headers, keeps a companion heartbeat
/// going and fans inbound frames out to any number of subscribers. Receiving
/// happens on a dedicated blocking task because the underlying reads block.
pub struct Link {
    conn: Arc<Box<dyn MavConnection<MavMessage> + Sync + Send>>,
    header: Mutex<MavHeader>,
    events: broadcast::Sender<Frame>,
}

impl Link {
    pub async fn open(transport: &Transport, cfg: &LinkConfig) -> Result<Arc<Self>, LinkError> {
        if let Transport::Serial { path, baud } = transport {
            // quick validate device before handing it to the mavlink backend
            let _ = tokio_serial::new(path, *baud)
                .open_native_async()
                .map_err(|source| LinkError::Serial { path: path.clone(), source })?;
        }

        let address = transport.connect_address();
        let mut conn = {
            let connect_address = address.clone();
            tokio::task::spawn_blocking(move || mavlink::connect::<MavMessage>(&connect_address))
                .await
                .map_err(|e| LinkError::Connect {
                    address: address.clone(),
                    source: io::Error::other(e),
                })?
                .map_err(|source| LinkError::Connect { address: address.clone(), source })?
        };
        conn.set_protocol_version(MavlinkVersion::V2);
        info!("link: connected via {}", address);

        let (events, _) = broadcast::channel(256);
        let link = Arc::new(Self {
            conn: Arc::new(conn),
            header: Mutex::new(MavHeader {
                system_id: cfg.system_id,
                component_id: cfg.component_id,
                sequence: 0,
            }),
            events,
        });

        link.spawn_reader();
        link.spawn_heartbeat(cfg.heartbeat_hz.max(0.2));

        Ok(link)
    }

    /// Reader loop in a blocking task (mavlink recv can block).
    fn spawn_reader(self: &Arc<Self>) {
        let conn = self.conn.clone();
        let events = self.events.clone();
        tokio::task::spawn_blocking(move || loop {
            match conn.recv() {
                Ok((header, msg)) => {
                    // No receivers is fine, frames are simply dropped.
                    let _ = events.send((header, msg));
                }
                Err(MessageReadError::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    debug!("link: recv error: {e}");
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        });
    }

    fn spawn_heartbeat(self: &Arc<Self>, hz: f32) {
        let link = self.clone();
        let interval = Duration::from_secs_f32(1.0 / hz);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                if let Err(e) = link.send_heartbeat() {
                    warn!("link: heartbeat send failed: {e}");
                }
            }
        });
    }

    pub fn send(&self, msg: &MavMessage) -> Result<(), LinkError> {
        let header = {
            let mut h = self.header.lock().unwrap();
            h.sequence = h.sequence.wrapping_add(1);
            *h
        };
        self.conn.send(&header, msg)?;
        Ok(())
    }

    pub fn send_heartbeat(&self) -> Result<(), LinkError> {
        let hb = HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_ONBOARD_CONTROLLER,
            autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
            base_mode: MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED,
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        };
        self.send(&MavMessage::HEARTBEAT(hb))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.events.subscribe()
    }

    /// Wait for the first autopilot heartbeat, then keep listening for a
    /// settle window; more than one distinct vehicle is an error.
    pub async fn discover(
        &self,
        timeout: Duration,
        settle: Duration,
    ) -> Result<Vehicle, LinkError> {
        let mut rx = self.subscribe();
        let deadline = Instant::now() + timeout;

        let vehicle = loop {
            match next_heartbeat(&mut rx, deadline).await? {
                Some((header, hb)) if is_autopilot(&hb) => {
                    break Vehicle {
                        system_id: header.system_id,
                        component_id: header.component_id,
                    }
                }
                Some(_) => continue,
                None => return Err(LinkError::DiscoveryTimeout(timeout)),
            }
        };
        debug!("link: first heartbeat from system {}", vehicle.system_id);

        let mut systems = vec![vehicle.system_id];
        let settle_deadline = Instant::now() + settle;
        while let Some((header, hb)) = next_heartbeat(&mut rx, settle_deadline).await? {
            if is_autopilot(&hb) && !systems.contains(&header.system_id) {
                systems.push(header.system_id);
            }
        }
        if systems.len() > 1 {
            return Err(LinkError::MultipleVehicles(systems.len()));
        }

        Ok(vehicle)
    }
}

/// Next heartbeat before `deadline`, or `None` once it passes.
async fn next_heartbeat(
    rx: &mut broadcast::Receiver<Frame>,
    deadline: Instant,
) -> Result<Option<(MavHeader, HEARTBEAT_DATA)>, LinkError> {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Ok((header, MavMessage::HEARTBEAT(hb)))) => return Ok(Some((header, hb))),
            Ok(Ok(_)) => continue,
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) => return Err(LinkError::Closed),
            Err(_) => return Ok(None),
        }
    }
}

fn is_autopilot(hb: &HEARTBEAT_DATA) -> bool {
    hb.autopilot != MavAutopilot::MAV_AUTOPILOT_INVALID && hb.mavtype != MavType::MAV_TYPE_GCS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn autopilot_heartbeat() -> HEARTBEAT_DATA {
        HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_QUADROTOR,
            autopilot: MavAutopilot::MAV_AUTOPILOT_PX4,
            base_mode: MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED,
            system_status: MavState::MAV_STATE_STANDBY,
            mavlink_version: 3,
        }
    }

    #[test]
    fn test_autopilot_detection() {
        assert!(is_autopilot(&autopilot_heartbeat()));

        // A ground station announces itself with an invalid autopilot type.
        let mut gcs = autopilot_heartbeat();
        gcs.autopilot = MavAutopilot::MAV_AUTOPILOT_INVALID;
        gcs.mavtype = MavType::MAV_TYPE_GCS;
        assert!(!is_autopilot(&gcs));

        // Our own companion heartbeat must not count as a vehicle either.
        let mut companion = autopilot_heartbeat();
        companion.autopilot = MavAutopilot::MAV_AUTOPILOT_INVALID;
        companion.mavtype = MavType::MAV_TYPE_ONBOARD_CONTROLLER;
        assert!(!is_autopilot(&companion));
    }
}
