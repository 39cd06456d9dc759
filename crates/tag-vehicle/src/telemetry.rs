//! Cached vehicle telemetry.
//!
//! A background task subscribes to the link fan-out, filters frames to the
//! discovered vehicle and keeps the latest state around for the blocking-style
//! queries the mission loop makes (`health_all_ok`, `armed`, `in_air`, ...).
//! Flight mode changes are additionally published on a watch channel so the
//! mode watchdog does not have to poll.

use std::sync::{Arc, Mutex};

use mavlink::common::{
    MavLandedState, MavModeFlag, MavMessage, MavSysStatusSensor, SYS_STATUS_DATA,
};
use tokio::sync::{broadcast, watch};
use tracing::warn;

use tag_link::{Link, Vehicle};

use crate::mode::FlightMode;

/// MAVLink message ids for MAV_CMD_SET_MESSAGE_INTERVAL requests.
pub const GLOBAL_POSITION_INT_ID: u32 = 33;
pub const EXTENDED_SYS_STATE_ID: u32 = 245;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub absolute_altitude_m: f32,
    pub relative_altitude_m: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Health {
    pub gyro_ok: bool,
    pub accel_ok: bool,
    pub mag_ok: bool,
    pub gps_ok: bool,
}

impl Health {
    pub fn all_ok(&self) -> bool {
        self.gyro_ok && self.accel_ok && self.mag_ok && self.gps_ok
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatteryStatus {
    pub voltage: Option<f32>,  // Volts
    pub current: Option<f32>,  // Amps
    pub remaining: Option<u8>, // Percent 0-100
}

#[derive(Debug, Default)]
struct State {
    health: Health,
    armed: bool,
    landed: Option<MavLandedState>,
    position: Option<Position>,
    battery: BatteryStatus,
}

pub struct Telemetry {
    state: Arc<Mutex<State>>,
    mode_rx: watch::Receiver<FlightMode>,
}

impl Telemetry {
    /// Start consuming frames for `vehicle` from the link fan-out.
    pub fn spawn(link: &Arc<Link>, vehicle: Vehicle) -> Self {
        let state = Arc::new(Mutex::new(State::default()));
        let (mode_tx, mode_rx) = watch::channel(FlightMode::Unknown);
        let mut rx = link.subscribe();
        let shared = state.clone();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok((header, msg)) => {
                        if header.system_id != vehicle.system_id {
                            continue;
                        }
                        {
                            let mut s = shared.lock().unwrap();
                            apply(&mut s, &msg);
                        }
                        if let MavMessage::HEARTBEAT(hb) = &msg {
                            let mode = FlightMode::from_heartbeat(hb);
                            mode_tx.send_if_modified(|current| {
                                if *current != mode {
                                    *current = mode;
                                    true
                                } else {
                                    false
                                }
                            });
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("telemetry: dropped {n} frames");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self { state, mode_rx }
    }

    /// Sensors healthy and a global position seen.
    pub fn health_all_ok(&self) -> bool {
        let s = self.state.lock().unwrap();
        s.health.all_ok() && s.position.is_some()
    }

    pub fn health(&self) -> Health {
        self.state.lock().unwrap().health
    }

    pub fn armed(&self) -> bool {
        self.state.lock().unwrap().armed
    }

    /// In the air, including the takeoff and landing transients.
    pub fn in_air(&self) -> bool {
        matches!(
            self.state.lock().unwrap().landed,
            Some(
                MavLandedState::MAV_LANDED_STATE_IN_AIR
                    | MavLandedState::MAV_LANDED_STATE_TAKEOFF
                    | MavLandedState::MAV_LANDED_STATE_LANDING
            )
        )
    }

    pub fn position(&self) -> Option<Position> {
        self.state.lock().unwrap().position
    }

    pub fn battery(&self) -> BatteryStatus {
        self.state.lock().unwrap().battery.clone()
    }

    pub fn flight_mode(&self) -> FlightMode {
        *self.mode_rx.borrow()
    }

    pub fn flight_mode_watch(&self) -> watch::Receiver<FlightMode> {
        self.mode_rx.clone()
    }
}

fn apply(state: &mut State, msg: &MavMessage) {
    match msg {
        MavMessage::HEARTBEAT(hb) => {
            state.armed = hb
                .base_mode
                .contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED);
        }
        MavMessage::SYS_STATUS(status) => {
            state.health = decode_health(status);
            update_battery(&mut state.battery, status);
        }
        MavMessage::GLOBAL_POSITION_INT(p) => {
            state.position = Some(Position {
                latitude_deg: p.lat as f64 / 1e7,
                longitude_deg: p.lon as f64 / 1e7,
                absolute_altitude_m: p.alt as f32 / 1000.0,
                relative_altitude_m: p.relative_alt as f32 / 1000.0,
            });
        }
        MavMessage::EXTENDED_SYS_STATE(e) => {
            state.landed = Some(e.landed_state);
        }
        _ => {}
    }
}

fn decode_health(status: &SYS_STATUS_DATA) -> Health {
    let ok = |sensor: MavSysStatusSensor| {
        status.onboard_control_sensors_present.contains(sensor)
            && status.onboard_control_sensors_health.contains(sensor)
    };
    Health {
        gyro_ok: ok(MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_GYRO),
        accel_ok: ok(MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_ACCEL),
        mag_ok: ok(MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_MAG),
        gps_ok: ok(MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_GPS),
    }
}

fn update_battery(battery: &mut BatteryStatus, status: &SYS_STATUS_DATA) {
    // voltage_battery is in millivolts, u16::MAX means invalid
    if status.voltage_battery != u16::MAX {
        battery.voltage = Some(status.voltage_battery as f32 / 1000.0);
    }
    // current_battery is in centiamps, -1 means invalid
    if status.current_battery != -1 {
        battery.current = Some(status.current_battery as f32 / 100.0);
    }
    // battery_remaining is a percentage, -1 means invalid
    if (0..=100).contains(&status.battery_remaining) {
        battery.remaining = Some(status.battery_remaining as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavlink::common::{
        MavAutopilot, MavState, MavType, MavVtolState,
        EXTENDED_SYS_STATE_DATA, GLOBAL_POSITION_INT_DATA, HEARTBEAT_DATA,
    };

    fn sys_status(present_and_healthy: MavSysStatusSensor) -> SYS_STATUS_DATA {
        SYS_STATUS_DATA {
            onboard_control_sensors_present: present_and_healthy,
            onboard_control_sensors_enabled: present_and_healthy,
            onboard_control_sensors_health: present_and_healthy,
            load: 0,
            voltage_battery: u16::MAX,
            current_battery: -1,
            battery_remaining: -1,
            drop_rate_comm: 0,
            errors_comm: 0,
            errors_count1: 0,
            errors_count2: 0,
            errors_count3: 0,
            errors_count4: 0,
        }
    }

    fn all_sensors() -> MavSysStatusSensor {
        MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_GYRO
            | MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_ACCEL
            | MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_MAG
            | MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_GPS
    }

    #[test]
    fn test_armed_from_heartbeat() {
        let mut state = State::default();
        let hb = HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_QUADROTOR,
            autopilot: MavAutopilot::MAV_AUTOPILOT_PX4,
            base_mode: MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED
                | MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED,
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        };
        apply(&mut state, &MavMessage::HEARTBEAT(hb.clone()));
        assert!(state.armed);

        let mut disarmed = hb;
        disarmed.base_mode = MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED;
        apply(&mut state, &MavMessage::HEARTBEAT(disarmed));
        assert!(!state.armed);
    }

    #[test]
    fn test_health_needs_every_sensor() {
        let mut state = State::default();
        apply(&mut state, &MavMessage::SYS_STATUS(sys_status(all_sensors())));
        assert!(state.health.all_ok());

        let missing_mag = all_sensors() & !MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_MAG;
        apply(&mut state, &MavMessage::SYS_STATUS(sys_status(missing_mag)));
        assert!(state.health.gyro_ok);
        assert!(!state.health.mag_ok);
        assert!(!state.health.all_ok());
    }

    #[test]
    fn test_battery_sentinels() {
        let mut state = State::default();
        let mut status = sys_status(all_sensors());
        apply(&mut state, &MavMessage::SYS_STATUS(status.clone()));
        assert_eq!(state.battery.voltage, None);
        assert_eq!(state.battery.current, None);
        assert_eq!(state.battery.remaining, None);

        status.voltage_battery = 11_400;
        status.current_battery = 250;
        status.battery_remaining = 87;
        apply(&mut state, &MavMessage::SYS_STATUS(status));
        assert_eq!(state.battery.voltage, Some(11.4));
        assert_eq!(state.battery.current, Some(2.5));
        assert_eq!(state.battery.remaining, Some(87));
    }

    #[test]
    fn test_position_scaling() {
        let mut state = State::default();
        let p = GLOBAL_POSITION_INT_DATA {
            time_boot_ms: 1000,
            lat: 356_812_360,
            lon: 1_397_671_250,
            alt: 52_000,
            relative_alt: 12_000,
            vx: 0,
            vy: 0,
            vz: 0,
            hdg: 0,
        };
        apply(&mut state, &MavMessage::GLOBAL_POSITION_INT(p));
        let pos = state.position.unwrap();
        assert!((pos.latitude_deg - 35.681236).abs() < 1e-9);
        assert!((pos.longitude_deg - 139.767125).abs() < 1e-9);
        assert!((pos.absolute_altitude_m - 52.0).abs() < 1e-3);
        assert!((pos.relative_altitude_m - 12.0).abs() < 1e-3);
    }

    #[test]
    fn test_landed_state() {
        let mut state = State::default();
        assert_eq!(state.landed, None);
        let e = EXTENDED_SYS_STATE_DATA {
            vtol_state: MavVtolState::MAV_VTOL_STATE_UNDEFINED,
            landed_state: MavLandedState::MAV_LANDED_STATE_IN_AIR,
        };
        apply(&mut state, &MavMessage::EXTENDED_SYS_STATE(e));
        assert_eq!(state.landed, Some(MavLandedState::MAV_LANDED_STATE_IN_AIR));
    }
}
