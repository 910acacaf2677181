use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis-aligned box in pixels: top-left corner plus extent.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(from = "BoxFields")]
pub struct BBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Wire form of [`BBox`]; extents are clamped on the way in.
#[derive(Deserialize)]
struct BoxFields {
    x: i32,
    y: i32,
    width: i32,
    height: i32,
}

impl From<BoxFields> for BBox {
    fn from(fields: BoxFields) -> Self {
        BBox::new(fields.x, fields.y, fields.width, fields.height)
    }
}

impl BBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width: width.max(0),
            height: height.max(0),
        }
    }

    pub fn area(&self) -> i64 {
        i64::from(self.width) * i64::from(self.height)
    }

    pub fn center_x(&self) -> f64 {
        f64::from(self.x) + f64::from(self.width) / 2.0
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: BBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }
}

/// All objects found in one camera frame.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Detections {
    /// Capture time of the image, seconds since the epoch.
    pub timestamp: f64,
    /// Width and height of the image in pixels.
    pub image_size: (u32, u32),
    pub objects: Vec<Detection>,
}

/// Target for one servo channel: an angle, or `"off"` to de-power it.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(try_from = "ServoTargetRepr", into = "ServoTargetRepr")]
pub enum ServoTarget {
    Degrees(f64),
    Off,
}

#[derive(Serialize, Deserialize, Clone)]
#[serde(untagged)]
enum ServoTargetRepr {
    Degrees(f64),
    Keyword(String),
}

impl TryFrom<ServoTargetRepr> for ServoTarget {
    type Error = String;

    fn try_from(repr: ServoTargetRepr) -> Result<Self, Self::Error> {
        match repr {
            ServoTargetRepr::Degrees(deg) => Ok(ServoTarget::Degrees(deg)),
            ServoTargetRepr::Keyword(word) if word.eq_ignore_ascii_case("off") => Ok(ServoTarget::Off),
            ServoTargetRepr::Keyword(word) => Err(format!("invalid servo target: {:?}", word)),
        }
    }
}

impl From<ServoTarget> for ServoTargetRepr {
    fn from(target: ServoTarget) -> Self {
        match target {
            ServoTarget::Degrees(deg) => ServoTargetRepr::Degrees(deg),
            ServoTarget::Off => ServoTargetRepr::Keyword("off".to_string()),
        }
    }
}

/// Absolute head position. Absent axes are left where they are.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(default)]
pub struct SetServoPosition {
    pub pan_deg: Option<ServoTarget>,
    /// Lean axis.
    pub tilt0_deg: Option<ServoTarget>,
    /// Tilt axis.
    pub tilt1_deg: Option<ServoTarget>,
    /// Motion speed applied to every moved axis before moving.
    pub speed_dps: Option<f64>,
}

impl SetServoPosition {
    pub fn off() -> Self {
        Self {
            pan_deg: Some(ServoTarget::Off),
            tilt0_deg: Some(ServoTarget::Off),
            tilt1_deg: Some(ServoTarget::Off),
            speed_dps: None,
        }
    }
}

/// Relative head motion in degrees.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(default)]
pub struct ChangeServoPosition {
    pub pan_deg: Option<f64>,
    pub tilt0_deg: Option<f64>,
    pub tilt1_deg: Option<f64>,
}

/// Angular rates in degrees per second. Absent axes are not changed.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(default)]
pub struct SetHeadSpeed {
    pub pan_dps: Option<f64>,
    pub tilt_dps: Option<f64>,
    pub lean_dps: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(tag = "type")]
pub enum MaestroCommand {
    SetServoPosition(SetServoPosition),
    ChangeServoPosition(ChangeServoPosition),
    SetHeadSpeed(SetHeadSpeed),
}

impl fmt::Display for MaestroCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaestroCommand::SetServoPosition(cmd) => write!(
                f,
                "SetServoPosition(pan={:?}, tilt0={:?}, tilt1={:?}, speed={:?})",
                cmd.pan_deg, cmd.tilt0_deg, cmd.tilt1_deg, cmd.speed_dps
            ),
            MaestroCommand::ChangeServoPosition(cmd) => write!(
                f,
                "ChangeServoPosition(pan={:?}, tilt0={:?}, tilt1={:?})",
                cmd.pan_deg, cmd.tilt0_deg, cmd.tilt1_deg
            ),
            MaestroCommand::SetHeadSpeed(cmd) => write!(
                f,
                "SetHeadSpeed(pan={:?}, tilt={:?}, lean={:?})",
                cmd.pan_dps, cmd.tilt_dps, cmd.lean_dps
            ),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct MotorSystemCommand {
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_area_and_negative_extent() {
        assert_eq!(BBox::new(0, 0, 10, 20).area(), 200);
        assert_eq!(BBox::new(5, 5, -3, 4).area(), 0);
    }

    #[test]
    fn test_servo_target_accepts_off_keyword() {
        let cmd: SetServoPosition =
            serde_json::from_str(r#"{"pan_deg": "off", "tilt1_deg": 12.5}"#).unwrap();

        assert_eq!(cmd.pan_deg, Some(ServoTarget::Off));
        assert_eq!(cmd.tilt0_deg, None);
        assert_eq!(cmd.tilt1_deg, Some(ServoTarget::Degrees(12.5)));
        assert!(serde_json::from_str::<SetServoPosition>(r#"{"pan_deg": "up"}"#).is_err());
    }

    #[test]
    fn test_maestro_command_is_tagged_by_type() {
        let cmd = MaestroCommand::SetHeadSpeed(SetHeadSpeed {
            pan_dps: Some(-4.0),
            ..Default::default()
        });

        let json = serde_json::to_value(cmd).unwrap();
        assert_eq!(json["type"], "SetHeadSpeed");

        let unknown = serde_json::from_str::<MaestroCommand>(r#"{"type": "Dance"}"#);
        assert!(unknown.is_err());
    }

    #[test]
    fn test_detection_box_field_name() {
        let det: Detection = serde_json::from_str(
            r#"{"label": "cat", "confidence": 0.9, "box": {"x": 1, "y": 2, "width": 3, "height": 4}}"#,
        )
        .unwrap();

        assert_eq!(det.bbox, BBox::new(1, 2, 3, 4));
    }

    #[test]
    fn test_received_box_never_has_negative_extent() {
        let bbox: BBox =
            serde_json::from_str(r#"{"x": 100, "y": 50, "width": -40, "height": -10}"#).unwrap();

        assert_eq!(bbox, BBox::new(100, 50, 0, 0));
        assert_eq!(bbox.area(), 0);
        assert_eq!(bbox.center_x(), 100.0);
    }
}
