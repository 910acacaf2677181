use rizmo_common::SetHeadSpeed;

use super::error_signal::TrackingErrors;
use crate::config::{OutputSigns, PdGains, TrackingConfig};

/// PD control on pan, P control on tilt and lean, with every rate scaled
/// by `reference_latency / latency`.
#[derive(Debug, Clone)]
pub struct PdController {
    gains: PdGains,
    signs: OutputSigns,
    reference_latency: f64,
    /// Floor for both `dt` and `latency`.
    min_interval: f64,
}

impl PdController {
    pub fn new(config: &TrackingConfig) -> Self {
        Self {
            gains: config.gains,
            signs: config.output_signs,
            reference_latency: config.reference_latency_secs,
            min_interval: config.min_interval_secs,
        }
    }

    pub fn gain_scalar(&self, latency: f64) -> f64 {
        self.reference_latency / latency.max(self.min_interval)
    }

    /// `dt` is `None` when there is no previous update to differentiate
    /// against.
    pub fn command(&self, errors: TrackingErrors, prev_x_error: f64, dt: Option<f64>, latency: f64) -> SetHeadSpeed {
        let derivative = match dt {
            Some(dt) => (errors.x - prev_x_error) / dt.max(self.min_interval),
            None => 0.0,
        };

        let pan = self.gains.kp_pan * errors.x + self.gains.kd_pan * derivative;
        let tilt = self.gains.kp_tilt * errors.y;
        let lean = self.gains.kp_lean * errors.z;
        let scale = self.gain_scalar(latency);

        SetHeadSpeed {
            pan_dps: Some(self.signs.pan * pan * scale),
            tilt_dps: Some(self.signs.tilt * tilt * scale),
            lean_dps: Some(self.signs.lean * lean * scale),
        }
    }
}
