//! Pololu Maestro over its USB command port, compact protocol.

use async_trait::async_trait;
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{debug, info};

use super::{ServoConnector, ServoDriver};
use crate::error::{HeadError, Result};

const CMD_SET_TARGET: u8 = 0x84;
const CMD_SET_SPEED: u8 = 0x87;
const CMD_GET_POSITION: u8 = 0x90;
const CMD_STOP_SCRIPT: u8 = 0xA4;

/// Largest value the 14-bit payload can carry.
const MAX_PAYLOAD: u16 = 0x3FFF;

/// The USB command port ignores the baud rate, but the TTL port needs one.
const BAUD_RATE: u32 = 9600;
const REPLY_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaestroModel {
    Micro6,
    Mini12,
    Mini18,
    Mini24,
}

impl MaestroModel {
    pub fn channels(&self) -> u8 {
        match self {
            MaestroModel::Micro6 => 6,
            MaestroModel::Mini12 => 12,
            MaestroModel::Mini18 => 18,
            MaestroModel::Mini24 => 24,
        }
    }
}

impl FromStr for MaestroModel {
    type Err = HeadError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "micro6" => Ok(MaestroModel::Micro6),
            "mini12" => Ok(MaestroModel::Mini12),
            "mini18" => Ok(MaestroModel::Mini18),
            "mini24" => Ok(MaestroModel::Mini24),
            other => Err(HeadError::ConfigError(format!("Unknown Maestro model: {}", other))),
        }
    }
}

/// Microseconds to the controller's quarter-microsecond units.
fn quarter_us(us: f64) -> u16 {
    (us * 4.0).round().clamp(0.0, MAX_PAYLOAD as f64) as u16
}

/// µs/s to quarter-µs per 10 ms.
fn speed_units(us_per_s: f64) -> u16 {
    (us_per_s.abs() * 4.0 / 100.0).round().clamp(0.0, MAX_PAYLOAD as f64) as u16
}

fn encode(command: u8, channel: u8, value: u16) -> [u8; 4] {
    [command, channel, (value & 0x7F) as u8, ((value >> 7) & 0x7F) as u8]
}

fn lost(e: std::io::Error) -> HeadError {
    HeadError::ConnectionLost(e.to_string())
}

fn serial_lost(e: tokio_serial::Error) -> HeadError {
    HeadError::ConnectionLost(e.to_string())
}

pub struct MaestroDriver {
    port: SerialStream,
    model: MaestroModel,
    /// Per-channel software limits in µs. The compact protocol has no
    /// limit command, so targets are clamped here.
    limits: Vec<Option<(f64, f64)>>,
}

impl MaestroDriver {
    /// Open the port raw, 8N1, without flow control.
    pub fn open(model: MaestroModel, path: &str) -> Result<Self> {
        let port = tokio_serial::new(path, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(REPLY_TIMEOUT)
            .open_native_async()
            .map_err(serial_lost)?;

        info!("Opened Maestro {:?} on {}", model, path);
        Ok(Self::from_port(model, port))
    }

    pub fn from_port(model: MaestroModel, port: SerialStream) -> Self {
        Self {
            port,
            model,
            limits: vec![None; model.channels() as usize],
        }
    }

    fn check_channel(&self, channel: u8) -> Result<()> {
        if channel < self.model.channels() {
            Ok(())
        } else {
            Err(HeadError::ServoError(format!(
                "Channel {} out of range for {:?}",
                channel, self.model
            )))
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.port.write_all(bytes).await.map_err(lost)?;
        self.port.flush().await.map_err(lost)
    }
}

#[async_trait]
impl ServoDriver for MaestroDriver {
    async fn set_limits(&mut self, channel: u8, min_us: f64, max_us: f64) -> Result<()> {
        self.check_channel(channel)?;
        self.limits[channel as usize] = Some((min_us, max_us));
        Ok(())
    }

    async fn set_speed(&mut self, channel: u8, us_per_s: f64) -> Result<()> {
        self.check_channel(channel)?;
        let units = speed_units(us_per_s);
        debug!("Maestro ch{} speed {} ({} µs/s)", channel, units, us_per_s);
        self.write(&encode(CMD_SET_SPEED, channel, units)).await
    }

    async fn get_position(&mut self, channel: u8) -> Result<f64> {
        self.check_channel(channel)?;
        self.write(&[CMD_GET_POSITION, channel]).await?;

        let mut reply = [0u8; 2];
        timeout(REPLY_TIMEOUT, self.port.read_exact(&mut reply))
            .await
            .map_err(|_| HeadError::ConnectionLost(format!("No position reply for ch{}", channel)))?
            .map_err(lost)?;
        Ok(u16::from_le_bytes(reply) as f64 / 4.0)
    }

    async fn set_position(&mut self, channel: u8, us: f64) -> Result<()> {
        self.check_channel(channel)?;
        // 0 de-powers the channel and is never clamped.
        let us = match self.limits[channel as usize] {
            Some((min, max)) if us != 0.0 => us.clamp(min, max),
            _ => us,
        };
        self.write(&encode(CMD_SET_TARGET, channel, quarter_us(us))).await
    }

    async fn stop(&mut self) -> Result<()> {
        self.write(&[CMD_STOP_SCRIPT]).await?;
        for channel in 0..self.model.channels() {
            let position = self.get_position(channel).await?;
            self.write(&encode(CMD_SET_TARGET, channel, quarter_us(position))).await?;
        }
        Ok(())
    }
}

pub struct MaestroConnector;

#[async_trait]
impl ServoConnector for MaestroConnector {
    async fn connect(&self, model: &str, port: &str) -> Result<Box<dyn ServoDriver>> {
        let model: MaestroModel = model.parse()?;
        Ok(Box::new(MaestroDriver::open(model, port)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_target_in_quarter_us() {
        // 1500 µs = 6000 quarter-µs = 0x1770
        assert_eq!(encode(CMD_SET_TARGET, 2, quarter_us(1500.0)), [0x84, 0x02, 0x70, 0x2E]);
    }

    #[test]
    fn test_speed_units() {
        assert_eq!(speed_units(1000.0), 40);
        assert_eq!(speed_units(-250.0), 10);
    }

    #[test]
    fn test_parse_models() {
        assert_eq!("mini12".parse::<MaestroModel>().unwrap().channels(), 12);
        assert_eq!("Micro6".parse::<MaestroModel>().unwrap(), MaestroModel::Micro6);
        assert!("mega48".parse::<MaestroModel>().is_err());
    }

    /// A pty pair stands in for the USB port; the master end plays the controller.
    #[cfg(unix)]
    fn over_pty() -> (MaestroDriver, SerialStream) {
        let (device, port) = SerialStream::pair().unwrap();
        (MaestroDriver::from_port(MaestroModel::Mini12, port), device)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_position_reply_over_pty() {
        let (mut driver, mut device) = over_pty();

        let controller = tokio::spawn(async move {
            let mut request = [0u8; 2];
            device.read_exact(&mut request).await.unwrap();
            // 0x1770 quarter-µs, with a byte that a cooked tty would eat.
            device.write_all(&[0x70, 0x17]).await.unwrap();
            // Hand the master back so the slave isn't hung up before the driver reads.
            (request, device)
        });

        let position = driver.get_position(0).await.unwrap();
        assert_eq!(position, 1500.0);
        assert_eq!(controller.await.unwrap().0, [CMD_GET_POSITION, 0]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_commands_reach_port_unmodified() {
        let (mut driver, mut device) = over_pty();

        driver.set_limits(1, 1500.0, 1750.0).await.unwrap();
        driver.set_position(1, 2000.0).await.unwrap();
        driver.set_speed(1, 1000.0).await.unwrap();

        let mut written = [0u8; 8];
        device.read_exact(&mut written).await.unwrap();
        let mut expected = encode(CMD_SET_TARGET, 1, quarter_us(1750.0)).to_vec();
        expected.extend(encode(CMD_SET_SPEED, 1, 40));
        assert_eq!(written.to_vec(), expected);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_silent_controller_is_connection_lost() {
        let (mut driver, _device) = over_pty();

        let result = driver.get_position(2).await;
        assert!(matches!(result, Err(HeadError::ConnectionLost(_))));
    }

    #[tokio::test]
    async fn test_missing_port_is_connection_lost() {
        let result = MaestroConnector.connect("mini12", "/nonexistent/ttyACM9").await;
        assert!(matches!(result, Err(HeadError::ConnectionLost(_))));
    }
}
