//! Servo controller drivers.
//!
//! Positions are pulse widths in microseconds and speeds are microseconds
//! per second; drivers convert to their controller's native units.

pub mod maestro;
pub mod simulated;

use async_trait::async_trait;

use crate::error::Result;

pub use maestro::{MaestroConnector, MaestroModel};
pub use simulated::{SimulatedConnector, SimulatedServoState};

#[async_trait]
pub trait ServoDriver: Send {
    async fn set_limits(&mut self, channel: u8, min_us: f64, max_us: f64) -> Result<()>;

    async fn set_speed(&mut self, channel: u8, us_per_s: f64) -> Result<()>;

    async fn get_position(&mut self, channel: u8) -> Result<f64>;

    /// A target of 0 de-powers the channel.
    async fn set_position(&mut self, channel: u8, us: f64) -> Result<()>;

    /// Halt all motion in progress.
    async fn stop(&mut self) -> Result<()>;
}

#[async_trait]
pub trait ServoConnector: Send + Sync {
    async fn connect(&self, model: &str, port: &str) -> Result<Box<dyn ServoDriver>>;
}
