pub mod action;
pub mod mode;
pub mod telemetry;

pub use action::{Action, ActionError};
pub use mode::FlightMode;
pub use telemetry::{BatteryStatus, Health, Position, Telemetry};
