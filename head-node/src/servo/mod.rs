//! Head actuator, servo drivers and axis calibration.

pub mod actuator;
pub mod calibration;
pub mod driver;

use std::sync::Arc;

pub use actuator::{ActuatorState, HeadActuator};
pub use calibration::{Axis, AxisCalibration, HeadCalibration, UsRange};
pub use driver::{ServoConnector, ServoDriver};

use crate::config::DriverKind;
use driver::{MaestroConnector, SimulatedConnector, SimulatedServoState};

pub fn connector_for(kind: DriverKind) -> Arc<dyn ServoConnector> {
    match kind {
        DriverKind::Maestro => Arc::new(MaestroConnector),
        DriverKind::Simulated => Arc::new(SimulatedConnector::new(SimulatedServoState::new())),
    }
}
