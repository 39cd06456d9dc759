pub mod config;
pub mod followme;
pub mod gate;

pub use config::{FollowConfig, FollowDirection};
pub use followme::{FollowError, FollowMe};
pub use gate::TargetGate;

/// A target position to follow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetLocation {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub absolute_altitude_m: f32,
}
