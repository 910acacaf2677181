use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use validator::{Validate, ValidationError};

use crate::error::Result;
use crate::servo::calibration::HeadCalibration;

#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
#[serde(default)]
pub struct HeadConfig {
    #[validate(length(min = 1))]
    pub node_id: String,
    #[validate]
    pub tracking: TrackingConfig,
    #[validate]
    pub attention: AttentionConfig,
    #[validate]
    pub servo: ServoConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_tracking"))]
pub struct TrackingConfig {
    /// Label -> rank, lower ranks win.
    #[validate(length(min = 1))]
    pub label_priorities: HashMap<String, u32>,
    /// Seconds without the tracked class before lower classes compete again.
    #[validate(range(min = 0.0))]
    pub hysteresis_secs: f64,
    /// Fraction of the image a target should fill at the desired distance.
    #[validate(range(min = 0.001, max = 1.0))]
    pub target_area: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub max_x_dead_zone: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub max_y_dead_zone: f64,
    #[validate(range(min = 0.001))]
    pub dead_zone_growth_secs: f64,
    pub gains: PdGains,
    /// Pipeline latency the gains were tuned with.
    #[validate(range(min = 0.001))]
    pub reference_latency_secs: f64,
    /// Floor for dt and latency denominators.
    #[validate(range(min = 0.000001))]
    pub min_interval_secs: f64,
    pub output_signs: OutputSigns,
    /// Aim this far below the top of a person box, unless the box
    /// reaches the bottom of the image.
    #[validate(range(min = 0.0, max = 1.0))]
    pub person_anchor_fraction: f64,
    #[validate(range(min = 0.0))]
    pub bottom_margin_px: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct PdGains {
    pub kp_pan: f64,
    pub kd_pan: f64,
    pub kp_tilt: f64,
    pub kp_lean: f64,
}

/// Sign applied to each rate before it is sent. Depends on how the head
/// is mounted.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct OutputSigns {
    pub pan: f64,
    pub tilt: f64,
    pub lean: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_attention"))]
pub struct AttentionConfig {
    /// Wait before the first look once exploring becomes possible.
    #[validate(range(min = 0.0))]
    pub start_delay_secs: f64,
    #[validate(range(min = 0.001))]
    pub initial_delay_secs: f64,
    #[validate(range(min = 0.001))]
    pub max_delay_secs: f64,
    pub pan_min_deg: f64,
    pub pan_max_deg: f64,
    pub tilt_min_deg: f64,
    pub tilt_max_deg: f64,
    #[validate(range(min = 0.0))]
    pub explore_speed_dps: f64,
    #[validate(range(min = 0.0))]
    pub covered_speed_dps: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    Maestro,
    Simulated,
}

#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_servo"))]
pub struct ServoConfig {
    pub driver: DriverKind,
    #[validate(length(min = 1))]
    pub model: String,
    #[validate(length(min = 1))]
    pub port: String,
    #[validate(range(min = 0.01))]
    pub connect_retry_secs: f64,
    pub motor_system_enabled: bool,
    #[validate(range(min = 1.0))]
    pub default_speed_us: f64,
    #[validate(range(min = 1.0))]
    pub shutdown_speed_us: f64,
    /// Each head-speed command moves the target this many seconds ahead.
    #[validate(range(min = 0.01, max = 5.0))]
    pub head_speed_runtime_secs: f64,
    #[validate(range(min = 0.0))]
    pub min_speed_us: f64,
    #[validate(range(min = 1.0))]
    pub max_rate_dps: f64,
    /// How much lean motion is mirrored onto the tilt axis.
    pub lean_tilt_coupling: f64,
    #[validate]
    pub axes: HeadCalibration,
}

impl Default for HeadConfig {
    fn default() -> Self {
        Self {
            node_id: "rizmo-head".to_string(),
            tracking: TrackingConfig::default(),
            attention: AttentionConfig::default(),
            servo: ServoConfig::default(),
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            label_priorities: HashMap::from([
                ("cat".to_string(), 0),
                ("dog".to_string(), 0),
                ("face".to_string(), 1),
                ("person".to_string(), 2),
            ]),
            hysteresis_secs: 5.0,
            target_area: 0.15,
            max_x_dead_zone: 0.2,
            max_y_dead_zone: 0.2,
            dead_zone_growth_secs: 5.0,
            gains: PdGains::default(),
            reference_latency_secs: 0.085,
            min_interval_secs: 0.001,
            output_signs: OutputSigns::default(),
            person_anchor_fraction: 0.3,
            bottom_margin_px: 10.0,
        }
    }
}

impl Default for PdGains {
    fn default() -> Self {
        Self {
            kp_pan: 50.0,
            kd_pan: 10.0,
            kp_tilt: 50.0,
            kp_lean: 25.0,
        }
    }
}

impl Default for OutputSigns {
    fn default() -> Self {
        Self {
            pan: -1.0,
            tilt: -1.0,
            lean: 1.0,
        }
    }
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            start_delay_secs: 5.0,
            initial_delay_secs: 1.0,
            max_delay_secs: 60.0,
            pan_min_deg: -120.0,
            pan_max_deg: 120.0,
            tilt_min_deg: 0.0,
            tilt_max_deg: 45.0,
            explore_speed_dps: 15.0,
            covered_speed_dps: 30.0,
        }
    }
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            driver: DriverKind::Maestro,
            model: "mini12".to_string(),
            port: "/dev/ttyACM0".to_string(),
            connect_retry_secs: 5.0,
            motor_system_enabled: true,
            default_speed_us: 1000.0,
            shutdown_speed_us: 250.0,
            head_speed_runtime_secs: 0.2,
            min_speed_us: 25.0,
            max_rate_dps: 90.0,
            lean_tilt_coupling: 1.0,
            axes: HeadCalibration::default(),
        }
    }
}

impl TrackingConfig {
    pub fn hysteresis(&self) -> Duration {
        Duration::from_secs_f64(self.hysteresis_secs)
    }
}

impl AttentionConfig {
    pub fn start_delay(&self) -> Duration {
        Duration::from_secs_f64(self.start_delay_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs_f64(self.initial_delay_secs)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs_f64(self.max_delay_secs)
    }
}

impl ServoConfig {
    pub fn connect_retry(&self) -> Duration {
        Duration::from_secs_f64(self.connect_retry_secs)
    }
}

impl HeadConfig {
    /// Layer an optional YAML file and `RIZMO_*` environment variables
    /// over the built-in defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path).required(false))
            .add_source(
                ::config::Environment::with_prefix("RIZMO")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: HeadConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        Validate::validate(self)?;
        Ok(())
    }
}

pub(crate) fn invalid(code: &'static str, message: String) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(message.into());
    error
}

/// Range rules let NaN through, so every float is also checked here.
pub(crate) fn all_finite(values: &[(&str, f64)]) -> std::result::Result<(), ValidationError> {
    match values.iter().find(|(_, value)| !value.is_finite()) {
        Some((name, value)) => Err(invalid("finite", format!("{} must be finite, got {}", name, value))),
        None => Ok(()),
    }
}

fn validate_tracking(tracking: &TrackingConfig) -> std::result::Result<(), ValidationError> {
    let gains = &tracking.gains;
    let signs = &tracking.output_signs;
    all_finite(&[
        ("hysteresis_secs", tracking.hysteresis_secs),
        ("target_area", tracking.target_area),
        ("max_x_dead_zone", tracking.max_x_dead_zone),
        ("max_y_dead_zone", tracking.max_y_dead_zone),
        ("dead_zone_growth_secs", tracking.dead_zone_growth_secs),
        ("reference_latency_secs", tracking.reference_latency_secs),
        ("min_interval_secs", tracking.min_interval_secs),
        ("person_anchor_fraction", tracking.person_anchor_fraction),
        ("bottom_margin_px", tracking.bottom_margin_px),
        ("gains.kp_pan", gains.kp_pan),
        ("gains.kd_pan", gains.kd_pan),
        ("gains.kp_tilt", gains.kp_tilt),
        ("gains.kp_lean", gains.kp_lean),
        ("output_signs.pan", signs.pan),
        ("output_signs.tilt", signs.tilt),
        ("output_signs.lean", signs.lean),
    ])
}

fn validate_attention(attention: &AttentionConfig) -> std::result::Result<(), ValidationError> {
    all_finite(&[
        ("start_delay_secs", attention.start_delay_secs),
        ("initial_delay_secs", attention.initial_delay_secs),
        ("max_delay_secs", attention.max_delay_secs),
        ("pan_min_deg", attention.pan_min_deg),
        ("pan_max_deg", attention.pan_max_deg),
        ("tilt_min_deg", attention.tilt_min_deg),
        ("tilt_max_deg", attention.tilt_max_deg),
        ("explore_speed_dps", attention.explore_speed_dps),
        ("covered_speed_dps", attention.covered_speed_dps),
    ])?;
    if attention.max_delay_secs < attention.initial_delay_secs {
        return Err(invalid("ordered", "max_delay_secs must be >= initial_delay_secs".to_string()));
    }
    if attention.pan_min_deg > attention.pan_max_deg || attention.tilt_min_deg > attention.tilt_max_deg {
        return Err(invalid("ordered", "look ranges must have min <= max".to_string()));
    }
    Ok(())
}

fn validate_servo(servo: &ServoConfig) -> std::result::Result<(), ValidationError> {
    all_finite(&[
        ("connect_retry_secs", servo.connect_retry_secs),
        ("default_speed_us", servo.default_speed_us),
        ("shutdown_speed_us", servo.shutdown_speed_us),
        ("head_speed_runtime_secs", servo.head_speed_runtime_secs),
        ("min_speed_us", servo.min_speed_us),
        ("max_rate_dps", servo.max_rate_dps),
        ("lean_tilt_coupling", servo.lean_tilt_coupling),
    ])
}
