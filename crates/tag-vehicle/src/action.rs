//! Acknowledged vehicle commands.
//!
//! Everything here is a COMMAND_LONG followed by a wait for the matching
//! COMMAND_ACK. An IN_PROGRESS result extends the wait, a missing ack is
//! retried with an incremented confirmation counter.

use std::sync::Arc;
use std::time::Duration;

use mavlink::common::{MavCmd, MavMessage, MavModeFlag, MavResult, COMMAND_LONG_DATA};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use tag_link::{Frame, Link, LinkError, Vehicle};

use crate::mode::FlightMode;

const ACK_TIMEOUT: Duration = Duration::from_secs(1);
const ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("{command:?} not acknowledged after {attempts} attempts")]
    AckTimeout { command: MavCmd, attempts: u32 },
    #[error("{command:?} rejected by autopilot: {result:?}")]
    Denied { command: MavCmd, result: MavResult },
    #[error("no mode word for flight mode {0}")]
    UnsupportedMode(FlightMode),
    #[error(transparent)]
    Link(#[from] LinkError),
}

pub struct Action {
    link: Arc<Link>,
    vehicle: Vehicle,
}

impl Action {
    pub fn new(link: Arc<Link>, vehicle: Vehicle) -> Self {
        Self { link, vehicle }
    }

    pub async fn arm(&self) -> Result<(), ActionError> {
        self.command(
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
            [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
        .await
    }

    pub async fn disarm(&self) -> Result<(), ActionError> {
        self.command(
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
        .await
    }

    /// Take off to `altitude_m` above ground.
    pub async fn takeoff(&self, altitude_m: f32) -> Result<(), ActionError> {
        self.command(
            MavCmd::MAV_CMD_NAV_TAKEOFF,
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, altitude_m],
        )
        .await
    }

    pub async fn land(&self) -> Result<(), ActionError> {
        self.command(MavCmd::MAV_CMD_NAV_LAND, [0.0; 7]).await
    }

    pub async fn set_flight_mode(&self, mode: FlightMode) -> Result<(), ActionError> {
        let custom = mode
            .to_custom_mode()
            .ok_or(ActionError::UnsupportedMode(mode))?;
        let base = MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits() as f32;
        let main = ((custom >> 16) & 0xff) as f32;
        let sub = ((custom >> 24) & 0xff) as f32;
        self.command(MavCmd::MAV_CMD_DO_SET_MODE, [base, main, sub, 0.0, 0.0, 0.0, 0.0])
            .await
    }

    /// Ask the autopilot to stream a message at `hz`.
    pub async fn set_message_interval(&self, message_id: u32, hz: f32) -> Result<(), ActionError> {
        let interval_us = if hz > 0.0 { 1_000_000.0 / hz } else { -1.0 };
        self.command(
            MavCmd::MAV_CMD_SET_MESSAGE_INTERVAL,
            [message_id as f32, interval_us, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
        .await
    }

    async fn command(&self, command: MavCmd, params: [f32; 7]) -> Result<(), ActionError> {
        for attempt in 0..ATTEMPTS {
            let mut rx = self.link.subscribe();
            self.link.send(&MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
                param1: params[0],
                param2: params[1],
                param3: params[2],
                param4: params[3],
                param5: params[4],
                param6: params[5],
                param7: params[6],
                command,
                target_system: self.vehicle.system_id,
                target_component: self.vehicle.component_id,
                confirmation: attempt as u8,
            }))?;

            match self.wait_ack(&mut rx, command).await {
                Some(MavResult::MAV_RESULT_ACCEPTED) => {
                    debug!("action: {command:?} accepted");
                    return Ok(());
                }
                Some(result) => return Err(ActionError::Denied { command, result }),
                None => warn!("action: {command:?} not acknowledged, retrying"),
            }
        }
        Err(ActionError::AckTimeout { command, attempts: ATTEMPTS })
    }

    /// `None` on timeout. IN_PROGRESS keeps the wait alive.
    async fn wait_ack(
        &self,
        rx: &mut broadcast::Receiver<Frame>,
        command: MavCmd,
    ) -> Option<MavResult> {
        let wait = async {
            loop {
                match rx.recv().await {
                    Ok((header, MavMessage::COMMAND_ACK(ack))) => {
                        if header.system_id != self.vehicle.system_id || ack.command != command {
                            continue;
                        }
                        if ack.result == MavResult::MAV_RESULT_IN_PROGRESS {
                            debug!("action: {command:?} in progress");
                            continue;
                        }
                        return Some(ack.result);
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        };
        tokio::time::timeout(ACK_TIMEOUT, wait).await.ok().flatten()
    }
}
