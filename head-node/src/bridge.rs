//! Feeds the bus from outside the process: JSON messages from an external
//! detector, or hand-typed servo targets.

use clap::ValueEnum;
use rizmo_common::{LocalBus, MaestroCommand, Message, MessagePublisher, ServoTarget, SetServoPosition};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{HeadError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InputMode {
    None,
    /// One JSON `Message` per line.
    JsonLines,
    /// `<channel> <deg|off>[, ...]` or `off`.
    Manual,
}

fn invalid(part: &str) -> HeadError {
    HeadError::SerializationError(format!("expected `<channel> <deg|off>`, got {:?}", part))
}

/// Parse one line of the manual servo syntax. Channel 0 is pan, 1 is lean
/// (tilt0) and 2 is tilt (tilt1). An empty line yields an empty command.
pub fn parse_manual_command(line: &str) -> Result<SetServoPosition> {
    let line = line.trim();
    if line.eq_ignore_ascii_case("off") {
        return Ok(SetServoPosition::off());
    }

    let mut command = SetServoPosition::default();
    for part in line.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        let mut fields = part.split_whitespace();
        let (Some(channel), Some(target), None) = (fields.next(), fields.next(), fields.next()) else {
            return Err(invalid(part));
        };

        let target = if target.eq_ignore_ascii_case("off") {
            ServoTarget::Off
        } else {
            ServoTarget::Degrees(target.parse().map_err(|_| invalid(part))?)
        };

        match channel.parse::<u8>() {
            Ok(0) => command.pan_deg = Some(target),
            Ok(1) => command.tilt0_deg = Some(target),
            Ok(2) => command.tilt1_deg = Some(target),
            _ => {
                return Err(HeadError::SerializationError(format!(
                    "unknown servo channel {:?}",
                    channel
                )))
            }
        }
    }
    Ok(command)
}

fn parse_json_line(line: &str) -> Result<Option<Message>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line)?))
}

fn parse_manual_line(line: &str) -> Result<Option<Message>> {
    let command = parse_manual_command(line)?;
    Ok(Some(Message::MaestroCmd(MaestroCommand::SetServoPosition(command))))
}

/// Publish one message per accepted line until EOF or cancellation.
/// Returns how many messages were published.
async fn pump<R, F>(reader: R, publisher: &dyn MessagePublisher, cancel: &CancellationToken, parse: F) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    F: Fn(&str) -> Result<Option<Message>>,
{
    let mut lines = reader.lines();
    let mut published = 0;

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => {
                    info!("Input closed");
                    break;
                }
            },
        };

        match parse(&line) {
            Ok(Some(message)) => {
                publisher.publish(message).await?;
                published += 1;
            }
            Ok(None) => {}
            Err(e) => warn!("Skipping input line {:?}: {}", line, e),
        }
    }

    Ok(published)
}

pub async fn pump_json_lines<R>(reader: R, publisher: &dyn MessagePublisher, cancel: &CancellationToken) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    pump(reader, publisher, cancel, parse_json_line).await
}

pub async fn pump_manual<R>(reader: R, publisher: &dyn MessagePublisher, cancel: &CancellationToken) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    pump(reader, publisher, cancel, parse_manual_line).await
}

/// Read stdin in the given mode until it closes.
pub async fn run_bridge(mode: InputMode, bus: LocalBus, cancel: CancellationToken) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let published = match mode {
        InputMode::None => return Ok(()),
        InputMode::JsonLines => pump_json_lines(stdin, &bus, &cancel).await?,
        InputMode::Manual => pump_manual(stdin, &bus, &cancel).await?,
    };
    info!("Input bridge finished after {} messages", published);
    Ok(())
}
