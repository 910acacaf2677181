use rizmo_common::utils::format_duration;
use rizmo_common::{
    ChangeServoPosition, LocalBus, MaestroCommand, Message, SetHeadSpeed, SetServoPosition,
    Subscription, Topic,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::calibration::{Axis, AxisCalibration};
use super::driver::{ServoConnector, ServoDriver};
use crate::config::ServoConfig;
use crate::error::{HeadError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorState {
    Disconnected,
    Connecting,
    Ready,
    Moving,
}

/// Owns the servo controller connection and turns head commands into
/// servo targets.
pub struct HeadActuator {
    config: ServoConfig,
    connector: Arc<dyn ServoConnector>,
    driver: Option<Box<dyn ServoDriver>>,
    state: ActuatorState,
    enabled: bool,
}

impl HeadActuator {
    pub fn new(config: ServoConfig, connector: Arc<dyn ServoConnector>) -> Self {
        let enabled = config.motor_system_enabled;
        Self {
            config,
            connector,
            driver: None,
            state: ActuatorState::Disconnected,
            enabled,
        }
    }

    pub fn state(&self) -> ActuatorState {
        self.state
    }

    fn calibration(&self, axis: Axis) -> AxisCalibration {
        *self.config.axes.axis(axis)
    }

    fn driver(&mut self) -> Result<&mut Box<dyn ServoDriver>> {
        self.driver
            .as_mut()
            .ok_or_else(|| HeadError::ConnectionLost("not connected".to_string()))
    }

    /// Retry until the controller is connected and initialized.
    ///
    /// Returns `false` if `cancel` fired first.
    pub async fn connect(&mut self, cancel: &CancellationToken) -> Result<bool> {
        let retry = self.config.connect_retry();
        self.state = ActuatorState::Connecting;

        loop {
            info!("Connecting to {} servo controller on {}", self.config.model, self.config.port);
            match self.connector.connect(&self.config.model, &self.config.port).await {
                Ok(driver) => {
                    self.driver = Some(driver);
                    match self.initialize().await {
                        Ok(()) => {
                            info!("Servo controller ready");
                            self.state = ActuatorState::Ready;
                            return Ok(true);
                        }
                        Err(HeadError::ConnectionLost(reason)) => {
                            self.driver = None;
                            warn!("Lost servo controller during setup: {}", reason);
                        }
                        Err(e) => {
                            self.driver = None;
                            self.state = ActuatorState::Disconnected;
                            return Err(e);
                        }
                    }
                }
                Err(HeadError::ConfigError(reason)) => {
                    self.state = ActuatorState::Disconnected;
                    return Err(HeadError::ConfigError(reason));
                }
                Err(e) => warn!("Failed to connect: {}; retrying in {}", e, format_duration(retry)),
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    self.state = ActuatorState::Disconnected;
                    return Ok(false);
                }
                _ = tokio::time::sleep(retry) => {}
            }
        }
    }

    /// Halt motion, program limits and speeds, then center every axis.
    async fn initialize(&mut self) -> Result<()> {
        let speed = self.config.default_speed_us;
        let axes = self.config.axes;
        let driver = self.driver()?;

        driver.stop().await?;
        for (_, axis) in axes.iter() {
            driver.set_limits(axis.channel, axis.limits_us.min, axis.limits_us.max).await?;
        }
        for (_, axis) in axes.iter() {
            driver.set_speed(axis.channel, speed).await?;
        }
        for (_, axis) in axes.iter() {
            driver.set_position(axis.channel, axis.center_us).await?;
        }
        Ok(())
    }

    #[instrument(skip_all, fields(command = %command))]
    pub async fn handle_command(&mut self, command: &MaestroCommand) -> Result<()> {
        self.state = ActuatorState::Moving;
        let result = match command {
            MaestroCommand::SetServoPosition(cmd) => self.set_servo_position(cmd).await,
            MaestroCommand::ChangeServoPosition(cmd) => self.change_servo_position(cmd).await,
            MaestroCommand::SetHeadSpeed(cmd) => self.set_head_speed(cmd).await,
        };
        if self.driver.is_some() {
            self.state = ActuatorState::Ready;
        }
        result
    }

    async fn set_servo_position(&mut self, cmd: &SetServoPosition) -> Result<()> {
        let targets = [
            (Axis::Pan, cmd.pan_deg),
            (Axis::Lean, cmd.tilt0_deg),
            (Axis::Tilt, cmd.tilt1_deg),
        ];

        for (axis, target) in targets {
            let Some(target) = target else { continue };
            let cal = self.calibration(axis);
            let driver = self.driver()?;
            if let Some(speed_dps) = cmd.speed_dps {
                driver.set_speed(cal.channel, cal.speed_us_per_s(speed_dps).abs()).await?;
            }
            driver.set_position(cal.channel, cal.position_us(target)).await?;
        }
        Ok(())
    }

    async fn change_servo_position(&mut self, cmd: &ChangeServoPosition) -> Result<()> {
        let deltas = [
            (Axis::Pan, cmd.pan_deg),
            (Axis::Lean, cmd.tilt0_deg),
            (Axis::Tilt, cmd.tilt1_deg),
        ];

        for (axis, delta) in deltas {
            let Some(delta) = delta else { continue };
            let cal = self.calibration(axis);
            self.step(&cal, cal.delta_us(delta)).await?;
        }
        Ok(())
    }

    /// Rate control through short position steps: each command moves the
    /// target as far as the axis would travel in `head_speed_runtime_secs`.
    async fn set_head_speed(&mut self, cmd: &SetHeadSpeed) -> Result<()> {
        let max_rate = self.config.max_rate_dps;
        let runtime = self.config.head_speed_runtime_secs;
        let limit = |dps: Option<f64>| dps.map(|v| v.clamp(-max_rate, max_rate));
        let (pan, tilt, lean) = (limit(cmd.pan_dps), limit(cmd.tilt_dps), limit(cmd.lean_dps));

        if let Some(pan) = pan {
            let cal = self.calibration(Axis::Pan);
            self.step_at_speed(&cal, cal.speed_us_per_s(pan), runtime).await?;
        }

        if let Some(lean) = lean {
            let cal = self.calibration(Axis::Lean);
            self.step_at_speed(&cal, cal.speed_us_per_s(lean), runtime).await?;
        }

        if tilt.is_some() || lean.is_some() {
            let cal = self.calibration(Axis::Tilt);
            let coupled = tilt.unwrap_or(0.0) + self.config.lean_tilt_coupling * lean.unwrap_or(0.0);
            let coupled = coupled.clamp(-max_rate, max_rate);
            self.step_at_speed(&cal, cal.speed_us_per_s(coupled), runtime).await?;
        }
        Ok(())
    }

    async fn step_at_speed(&mut self, cal: &AxisCalibration, us_per_s: f64, runtime: f64) -> Result<()> {
        let speed = us_per_s.abs().max(self.config.min_speed_us);
        self.driver()?.set_speed(cal.channel, speed).await?;
        self.step(cal, us_per_s * runtime).await
    }

    async fn step(&mut self, cal: &AxisCalibration, delta_us: f64) -> Result<()> {
        let driver = self.driver()?;
        let current = driver.get_position(cal.channel).await?;
        let target = cal.step(current, delta_us);
        debug!("ch{}: {:.1} -> {:.1} µs", cal.channel, current, target);
        driver.set_position(cal.channel, target).await
    }

    /// Handle one command, reconnecting if the controller went away.
    pub async fn execute(&mut self, command: &MaestroCommand, cancel: &CancellationToken) -> Result<()> {
        match self.handle_command(command).await {
            Err(HeadError::ConnectionLost(reason)) => {
                error!("Servo connection lost: {}", reason);
                self.driver = None;
                self.state = ActuatorState::Disconnected;
                self.connect(cancel).await?;
                Ok(())
            }
            other => other,
        }
    }

    /// Return every axis to center at the shutdown speed and release the
    /// controller.
    pub async fn shutdown(&mut self) {
        let speed = self.config.shutdown_speed_us;
        let axes = self.config.axes;
        let Some(mut driver) = self.driver.take() else {
            return;
        };

        info!("Centering head before shutdown");
        for (name, axis) in axes.iter() {
            let result = match driver.set_speed(axis.channel, speed).await {
                Ok(()) => driver.set_position(axis.channel, axis.center_us).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!("Could not center {} on shutdown: {}", name, e);
            }
        }
        self.state = ActuatorState::Disconnected;
    }

    fn set_enabled(&mut self, enabled: bool, bus: &LocalBus, commands: &mut Option<Subscription>) {
        if enabled == self.enabled && enabled == commands.is_some() {
            return;
        }
        info!("Motor system {}", if enabled { "enabled" } else { "disabled" });
        self.enabled = enabled;
        *commands = enabled.then(|| bus.subscribe(Topic::MaestroCmd));
    }

    /// Connect, then follow `maestro_cmd` while the motor system is enabled.
    pub async fn run(mut self, bus: LocalBus, cancel: CancellationToken) -> Result<()> {
        let mut motor_system = bus.subscribe(Topic::MotorSystem);

        if !self.connect(&cancel).await? {
            return Ok(());
        }

        let mut commands = None;
        let enabled = self.enabled;
        self.set_enabled(enabled, &bus, &mut commands);

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                message = motor_system.recv() => match message {
                    Some(Message::MotorSystem(cmd)) => self.set_enabled(cmd.enabled, &bus, &mut commands),
                    Some(other) => warn!("Unexpected message on {}: {:?}", Topic::MotorSystem, other),
                    None => break Ok(()),
                },
                message = next_command(&mut commands) => match message {
                    Some(Message::MaestroCmd(command)) => {
                        if let Err(e) = self.execute(&command, &cancel).await {
                            error!("Servo command failed: {}", e);
                            break Err(e);
                        }
                    }
                    Some(other) => warn!("Unexpected message on {}: {:?}", Topic::MaestroCmd, other),
                    None => break Ok(()),
                },
            }
        };

        drop(commands);
        self.shutdown().await;
        result
    }
}

async fn next_command(commands: &mut Option<Subscription>) -> Option<Message> {
    match commands {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}
