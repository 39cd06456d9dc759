//! PX4 flight mode words.
//!
//! PX4 reports its mode in the HEARTBEAT custom_mode field: the main mode in
//! bits 16..24, the sub mode (for AUTO) in bits 24..32.

use std::fmt;

use mavlink::common::{MavModeFlag, HEARTBEAT_DATA};

const MAIN_MANUAL: u32 = 1;
const MAIN_ALTCTL: u32 = 2;
const MAIN_POSCTL: u32 = 3;
const MAIN_AUTO: u32 = 4;
const MAIN_ACRO: u32 = 5;
const MAIN_OFFBOARD: u32 = 6;
const MAIN_STABILIZED: u32 = 7;
const MAIN_RATTITUDE: u32 = 8;

const AUTO_READY: u32 = 1;
const AUTO_TAKEOFF: u32 = 2;
const AUTO_LOITER: u32 = 3;
const AUTO_MISSION: u32 = 4;
const AUTO_RTL: u32 = 5;
const AUTO_LAND: u32 = 6;
const AUTO_FOLLOW_TARGET: u32 = 8;
const AUTO_PRECLAND: u32 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightMode {
    Unknown,
    Manual,
    Altctl,
    Posctl,
    Acro,
    Offboard,
    Stabilized,
    Rattitude,
    Ready,
    Takeoff,
    Hold,
    Mission,
    ReturnToLaunch,
    Land,
    FollowMe,
    Precland,
}

impl FlightMode {
    pub fn from_heartbeat(hb: &HEARTBEAT_DATA) -> Self {
        if !hb
            .base_mode
            .contains(MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED)
        {
            return Self::Unknown;
        }
        Self::from_custom_mode(hb.custom_mode)
    }

    pub fn from_custom_mode(custom_mode: u32) -> Self {
        let main = (custom_mode >> 16) & 0xff;
        let sub = (custom_mode >> 24) & 0xff;
        match main {
            MAIN_MANUAL => Self::Manual,
            MAIN_ALTCTL => Self::Altctl,
            MAIN_POSCTL => Self::Posctl,
            MAIN_ACRO => Self::Acro,
            MAIN_OFFBOARD => Self::Offboard,
            MAIN_STABILIZED => Self::Stabilized,
            MAIN_RATTITUDE => Self::Rattitude,
            MAIN_AUTO => match sub {
                AUTO_READY => Self::Ready,
                AUTO_TAKEOFF => Self::Takeoff,
                AUTO_LOITER => Self::Hold,
                AUTO_MISSION => Self::Mission,
                AUTO_RTL => Self::ReturnToLaunch,
                AUTO_LAND => Self::Land,
                AUTO_FOLLOW_TARGET => Self::FollowMe,
                AUTO_PRECLAND => Self::Precland,
                _ => Self::Unknown,
            },
            _ => Self::Unknown,
        }
    }

    /// The custom_mode word to command this mode, where one exists.
    pub fn to_custom_mode(self) -> Option<u32> {
        let (main, sub) = match self {
            Self::Manual => (MAIN_MANUAL, 0),
            Self::Altctl => (MAIN_ALTCTL, 0),
            Self::Posctl => (MAIN_POSCTL, 0),
            Self::Acro => (MAIN_ACRO, 0),
            Self::Offboard => (MAIN_OFFBOARD, 0),
            Self::Stabilized => (MAIN_STABILIZED, 0),
            Self::Rattitude => (MAIN_RATTITUDE, 0),
            Self::Ready => (MAIN_AUTO, AUTO_READY),
            Self::Takeoff => (MAIN_AUTO, AUTO_TAKEOFF),
            Self::Hold => (MAIN_AUTO, AUTO_LOITER),
            Self::Mission => (MAIN_AUTO, AUTO_MISSION),
            Self::ReturnToLaunch => (MAIN_AUTO, AUTO_RTL),
            Self::Land => (MAIN_AUTO, AUTO_LAND),
            Self::FollowMe => (MAIN_AUTO, AUTO_FOLLOW_TARGET),
            Self::Precland => (MAIN_AUTO, AUTO_PRECLAND),
            Self::Unknown => return None,
        };
        Some((main << 16) | (sub << 24))
    }
}

impl fmt::Display for FlightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "Unknown",
            Self::Manual => "Manual",
            Self::Altctl => "Altctl",
            Self::Posctl => "Posctl",
            Self::Acro => "Acro",
            Self::Offboard => "Offboard",
            Self::Stabilized => "Stabilized",
            Self::Rattitude => "Rattitude",
            Self::Ready => "Ready",
            Self::Takeoff => "Takeoff",
            Self::Hold => "Hold",
            Self::Mission => "Mission",
            Self::ReturnToLaunch => "ReturnToLaunch",
            Self::Land => "Land",
            Self::FollowMe => "FollowMe",
            Self::Precland => "Precland",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavlink::common::{MavAutopilot, MavState, MavType};

    #[test]
    fn test_decode_follow_target() {
        let custom = (MAIN_AUTO << 16) | (AUTO_FOLLOW_TARGET << 24);
        assert_eq!(FlightMode::from_custom_mode(custom), FlightMode::FollowMe);
    }

    #[test]
    fn test_decode_plain_main_modes() {
        assert_eq!(FlightMode::from_custom_mode(MAIN_MANUAL << 16), FlightMode::Manual);
        assert_eq!(FlightMode::from_custom_mode(MAIN_POSCTL << 16), FlightMode::Posctl);
        assert_eq!(
            FlightMode::from_custom_mode((MAIN_AUTO << 16) | (AUTO_LOITER << 24)),
            FlightMode::Hold
        );
        assert_eq!(FlightMode::from_custom_mode(0), FlightMode::Unknown);
    }

    #[test]
    fn test_encode_matches_decode() {
        for mode in [
            FlightMode::Manual,
            FlightMode::Hold,
            FlightMode::FollowMe,
            FlightMode::ReturnToLaunch,
            FlightMode::Land,
        ] {
            let word = mode.to_custom_mode().unwrap();
            assert_eq!(FlightMode::from_custom_mode(word), mode);
        }
        assert_eq!(FlightMode::Unknown.to_custom_mode(), None);
    }

    #[test]
    fn test_heartbeat_without_custom_mode_is_unknown() {
        let hb = HEARTBEAT_DATA {
            custom_mode: (MAIN_AUTO << 16) | (AUTO_FOLLOW_TARGET << 24),
            mavtype: MavType::MAV_TYPE_QUADROTOR,
            autopilot: MavAutopilot::MAV_AUTOPILOT_PX4,
            base_mode: MavModeFlag::empty(),
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        };
        assert_eq!(FlightMode::from_heartbeat(&hb), FlightMode::Unknown);
    }
}
