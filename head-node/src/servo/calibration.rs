//! Degree <-> microsecond conversion for the three head servos.
//!
//! Every constant here was measured on one physical head and belongs in
//! configuration, not code.

use rizmo_common::ServoTarget;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::config::{all_finite, invalid};

/// Pulse width that means "de-powered" to the servo controller.
pub const OFF_US: f64 = 0.0;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Validate)]
#[validate(schema(function = "validate_us_range"))]
pub struct UsRange {
    #[validate(range(min = 0.0, max = 4095.0))]
    pub min: f64,
    #[validate(range(min = 0.0, max = 4095.0))]
    pub max: f64,
}

fn validate_us_range(range: &UsRange) -> std::result::Result<(), ValidationError> {
    all_finite(&[("min", range.min), ("max", range.max)])?;
    if range.min > range.max {
        return Err(invalid("ordered", format!("min {} > max {}", range.min, range.max)));
    }
    Ok(())
}

impl UsRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, us: f64) -> f64 {
        us.clamp(self.min, self.max)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Validate)]
#[validate(schema(function = "validate_axis"))]
pub struct AxisCalibration {
    pub channel: u8,
    #[validate(range(min = 0.1, max = 100.0))]
    pub us_per_deg: f64,
    #[validate(range(min = 0.0, max = 4095.0))]
    pub center_us: f64,
    /// Hardware limits programmed into the controller.
    #[validate]
    pub limits_us: UsRange,
    /// Bounds for relative moves and head-speed steps.
    #[validate]
    pub travel_us: UsRange,
    /// Positive degrees lower the pulse width.
    pub inverted: bool,
}

fn validate_axis(axis: &AxisCalibration) -> std::result::Result<(), ValidationError> {
    all_finite(&[("us_per_deg", axis.us_per_deg), ("center_us", axis.center_us)])
}

impl AxisCalibration {
    /// Absolute pulse width for a target; `Off` maps to [`OFF_US`].
    pub fn position_us(&self, target: ServoTarget) -> f64 {
        match target {
            ServoTarget::Off => OFF_US,
            ServoTarget::Degrees(deg) => {
                let offset = deg * self.us_per_deg;
                if self.inverted {
                    self.center_us - offset
                } else {
                    self.center_us + offset
                }
            }
        }
    }

    /// Signed pulse-width change for a relative move.
    pub fn delta_us(&self, deg: f64) -> f64 {
        deg * self.us_per_deg
    }

    pub fn speed_us_per_s(&self, dps: f64) -> f64 {
        dps * self.us_per_deg
    }

    /// `current + delta_us`, held inside the travel range.
    pub fn step(&self, current_us: f64, delta_us: f64) -> f64 {
        self.travel_us.clamp(current_us + delta_us)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Pan,
    /// tilt0
    Lean,
    /// tilt1
    Tilt,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::Pan, Axis::Lean, Axis::Tilt];

    pub fn name(&self) -> &'static str {
        match self {
            Axis::Pan => "pan",
            Axis::Lean => "lean",
            Axis::Tilt => "tilt",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Validate)]
#[serde(default)]
pub struct HeadCalibration {
    #[validate]
    pub pan: AxisCalibration,
    #[validate]
    pub lean: AxisCalibration,
    #[validate]
    pub tilt: AxisCalibration,
}

impl HeadCalibration {
    pub fn axis(&self, axis: Axis) -> &AxisCalibration {
        match axis {
            Axis::Pan => &self.pan,
            Axis::Lean => &self.lean,
            Axis::Tilt => &self.tilt,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &AxisCalibration)> {
        Axis::ALL.into_iter().map(move |axis| (axis.name(), self.axis(axis)))
    }
}

impl Default for HeadCalibration {
    fn default() -> Self {
        Self {
            pan: AxisCalibration {
                channel: 0,
                us_per_deg: 500.0 / 72.3,
                center_us: 1500.0,
                limits_us: UsRange::new(400.0, 2600.0),
                travel_us: UsRange::new(0.0, 4090.0),
                inverted: false,
            },
            // The lean joint only travels forward of center.
            lean: AxisCalibration {
                channel: 1,
                us_per_deg: 500.0 / 45.0,
                center_us: 1500.0,
                limits_us: UsRange::new(512.0, 2488.0),
                travel_us: UsRange::new(1500.0, 1750.0),
                inverted: false,
            },
            tilt: AxisCalibration {
                channel: 2,
                us_per_deg: 500.0 / 45.0,
                center_us: 1500.0,
                limits_us: UsRange::new(512.0, 2208.0),
                travel_us: UsRange::new(0.0, 4090.0),
                inverted: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pan_degrees_to_us() {
        let cal = HeadCalibration::default();
        let us = cal.pan.position_us(ServoTarget::Degrees(90.0));
        assert!((us - (1500.0 + 90.0 * 500.0 / 72.3)).abs() < 1e-9);
    }

    #[test]
    fn test_off_is_zero_us() {
        let cal = HeadCalibration::default();
        for (_, axis) in cal.iter() {
            assert_eq!(axis.position_us(ServoTarget::Off), 0.0);
        }
    }

    #[test]
    fn test_tilt_is_inverted() {
        let cal = HeadCalibration::default();
        assert!((cal.tilt.position_us(ServoTarget::Degrees(45.0)) - 1000.0).abs() < 1e-9);
        assert!((cal.lean.position_us(ServoTarget::Degrees(9.0)) - 1600.0).abs() < 1e-9);
    }

    #[test]
    fn test_step_clamps_to_travel() {
        let cal = HeadCalibration::default();
        assert_eq!(cal.pan.step(4000.0, 500.0), 4090.0);
        assert_eq!(cal.pan.step(100.0, -500.0), 0.0);
        assert_eq!(cal.lean.step(1600.0, 400.0), 1750.0);
        assert_eq!(cal.lean.step(1600.0, -400.0), 1500.0);
    }
}
