//! In-memory servo controller for tests and `driver: simulated` runs.
//!
//! Moves are instantaneous. The shared [`SimulatedServoState`] handle lets
//! a test inspect what was sent and inject connection failures.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use super::{ServoConnector, ServoDriver};
use crate::error::{HeadError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ServoCall {
    Limits { channel: u8, min_us: f64, max_us: f64 },
    Speed { channel: u8, us_per_s: f64 },
    /// Target as requested, before the limit clamp.
    Position { channel: u8, us: f64 },
    Stop,
}

#[derive(Debug, Default)]
struct State {
    connect_attempts: usize,
    failing_connects: usize,
    /// Bumped on every drop so stale drivers notice.
    generation: u64,
    connected: bool,
    positions: HashMap<u8, f64>,
    speeds: HashMap<u8, f64>,
    limits: HashMap<u8, (f64, f64)>,
    calls: Vec<ServoCall>,
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedServoState {
    inner: Arc<Mutex<State>>,
}

impl SimulatedServoState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next `count` connects fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.lock().failing_connects = count;
    }

    /// Sever the current connection; the driver's next call fails.
    pub fn drop_connection(&self) {
        let mut state = self.lock();
        state.connected = false;
        state.generation += 1;
    }

    pub fn connect_attempts(&self) -> usize {
        self.lock().connect_attempts
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Clamped pulse width the channel currently holds.
    pub fn position(&self, channel: u8) -> Option<f64> {
        self.lock().positions.get(&channel).copied()
    }

    pub fn speed(&self, channel: u8) -> Option<f64> {
        self.lock().speeds.get(&channel).copied()
    }

    pub fn calls(&self) -> Vec<ServoCall> {
        self.lock().calls.clone()
    }

    /// Raw position targets sent to one channel, in order.
    pub fn targets(&self, channel: u8) -> Vec<f64> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                ServoCall::Position { channel: c, us } if *c == channel => Some(*us),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }
}

pub struct SimulatedDriver {
    state: SimulatedServoState,
    generation: u64,
}

impl SimulatedDriver {
    fn live(&self) -> Result<MutexGuard<'_, State>> {
        let state = self.state.lock();
        if state.connected && state.generation == self.generation {
            Ok(state)
        } else {
            Err(HeadError::ConnectionLost("simulated link dropped".to_string()))
        }
    }
}

#[async_trait]
impl ServoDriver for SimulatedDriver {
    async fn set_limits(&mut self, channel: u8, min_us: f64, max_us: f64) -> Result<()> {
        let mut state = self.live()?;
        state.limits.insert(channel, (min_us, max_us));
        state.calls.push(ServoCall::Limits { channel, min_us, max_us });
        Ok(())
    }

    async fn set_speed(&mut self, channel: u8, us_per_s: f64) -> Result<()> {
        let mut state = self.live()?;
        state.speeds.insert(channel, us_per_s);
        state.calls.push(ServoCall::Speed { channel, us_per_s });
        Ok(())
    }

    async fn get_position(&mut self, channel: u8) -> Result<f64> {
        let state = self.live()?;
        Ok(state.positions.get(&channel).copied().unwrap_or(0.0))
    }

    async fn set_position(&mut self, channel: u8, us: f64) -> Result<()> {
        let mut state = self.live()?;
        state.calls.push(ServoCall::Position { channel, us });
        let held = match state.limits.get(&channel) {
            Some(&(min, max)) if us != 0.0 => us.clamp(min, max),
            _ => us,
        };
        state.positions.insert(channel, held);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.live()?.calls.push(ServoCall::Stop);
        Ok(())
    }
}

pub struct SimulatedConnector {
    state: SimulatedServoState,
}

impl SimulatedConnector {
    pub fn new(state: SimulatedServoState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ServoConnector for SimulatedConnector {
    async fn connect(&self, model: &str, port: &str) -> Result<Box<dyn ServoDriver>> {
        let mut state = self.state.lock();
        state.connect_attempts += 1;
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(HeadError::ConnectionLost(format!("no simulated {} at {}", model, port)));
        }

        state.connected = true;
        debug!("Simulated {} connected on {}", model, port);
        Ok(Box::new(SimulatedDriver {
            state: self.state.clone(),
            generation: state.generation,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fails_requested_number_of_connects() {
        let state = SimulatedServoState::new();
        state.fail_next_connects(2);
        let connector = SimulatedConnector::new(state.clone());

        assert!(connector.connect("mini12", "sim").await.is_err());
        assert!(connector.connect("mini12", "sim").await.is_err());
        assert!(connector.connect("mini12", "sim").await.is_ok());
        assert_eq!(state.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn test_limits_clamp_held_position_but_not_record() {
        let state = SimulatedServoState::new();
        let mut driver = SimulatedConnector::new(state.clone())
            .connect("mini12", "sim")
            .await
            .unwrap();

        driver.set_limits(0, 400.0, 2600.0).await.unwrap();
        driver.set_position(0, 4090.0).await.unwrap();
        assert_eq!(state.targets(0), vec![4090.0]);
        assert_eq!(state.position(0), Some(2600.0));

        driver.set_position(0, 0.0).await.unwrap();
        assert_eq!(state.position(0), Some(0.0));
    }

    #[tokio::test]
    async fn test_dropped_connection_fails_old_driver() {
        let state = SimulatedServoState::new();
        let connector = SimulatedConnector::new(state.clone());
        let mut old = connector.connect("mini12", "sim").await.unwrap();

        state.drop_connection();
        assert!(matches!(old.stop().await, Err(HeadError::ConnectionLost(_))));

        let mut fresh = connector.connect("mini12", "sim").await.unwrap();
        assert!(fresh.stop().await.is_ok());
        assert!(old.stop().await.is_err());
    }
}
