/// Error band that widens while the error stays small and collapses as
/// soon as it grows past `max_width`.
#[derive(Debug, Clone)]
pub struct DeadZone {
    width: f64,
    max_width: f64,
    growth_secs: f64,
}

impl DeadZone {
    pub fn new(max_width: f64, growth_secs: f64) -> Self {
        Self {
            width: 0.0,
            max_width,
            growth_secs,
        }
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    /// Filter one sample. `None` means the error fell inside the band and
    /// should be treated as zero. Without a `dt` the band does not grow.
    pub fn apply(&mut self, error: f64, dt: Option<f64>) -> Option<f64> {
        let filtered = (error.abs() >= self.width).then_some(error);

        if filtered.unwrap_or(0.0).abs() > self.max_width {
            self.width = 0.0;
        } else if let Some(dt) = dt {
            let growth = self.max_width * dt.max(0.0) / self.growth_secs;
            self.width = (self.width + growth).min(self.max_width);
        }

        filtered
    }
}
