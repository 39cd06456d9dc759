pub mod link;
pub mod url;

pub use link::{Frame, Link, LinkError, Vehicle};

/// MAVLink identity and heartbeat cadence of the relay itself.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// MAVLink ids we use (companion side).
    pub system_id: u8,
    pub component_id: u8,

    /// Companion heartbeat rate. Clamped to a 0.2 Hz floor.
    pub heartbeat_hz: f32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            system_id: 245,
            component_id: 191, // MAV_COMP_ID_ONBOARD_COMPUTER
            heartbeat_hz: 1.0,
        }
    }
}
