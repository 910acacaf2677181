use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::types::{Detection, Detections, MaestroCommand, MotorSystemCommand};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    ObjectsDetected,
    Tracking,
    MaestroCmd,
    CameraCovered,
    MotorSystem,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::ObjectsDetected => "objects_detected",
            Topic::Tracking => "tracking",
            Topic::MaestroCmd => "maestro_cmd",
            Topic::CameraCovered => "camera_covered",
            Topic::MotorSystem => "motor_system",
        }
    }

    /// Head commands fully describe the target state, so only the newest
    /// one is worth keeping.
    fn capacity(&self) -> usize {
        match self {
            Topic::MaestroCmd => 1,
            _ => 16,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", content = "data", rename_all = "snake_case")]
pub enum Message {
    ObjectsDetected(Detections),
    /// `None` means the tracked target was lost.
    Tracking(Option<Detection>),
    MaestroCmd(MaestroCommand),
    CameraCovered(bool),
    MotorSystem(MotorSystemCommand),
}

impl Message {
    pub fn topic(&self) -> Topic {
        match self {
            Message::ObjectsDetected(_) => Topic::ObjectsDetected,
            Message::Tracking(_) => Topic::Tracking,
            Message::MaestroCmd(_) => Topic::MaestroCmd,
            Message::CameraCovered(_) => Topic::CameraCovered,
            Message::MotorSystem(_) => Topic::MotorSystem,
        }
    }
}

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Topic {0} is closed")]
    Closed(Topic),
}

#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publish on the message's topic. Returns how many subscribers got it.
    async fn publish(&self, message: Message) -> Result<usize, BusError>;

    fn has_listeners(&self, topic: Topic) -> bool;
}

/// In-process pub/sub with one broadcast channel per topic.
///
/// Delivery order is preserved per sender and topic. A subscriber that
/// falls behind skips the stale messages it missed.
#[derive(Clone, Default)]
pub struct LocalBus {
    channels: Arc<DashMap<Topic, broadcast::Sender<Message>>>,
    closed: Arc<AtomicBool>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, topic: Topic) -> broadcast::Sender<Message> {
        self.channels
            .entry(topic)
            .or_insert_with(|| broadcast::channel(topic.capacity()).0)
            .value()
            .clone()
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        debug!("New subscription on {}", topic);
        let receiver = if self.is_closed() {
            broadcast::channel(1).1
        } else {
            self.sender(topic).subscribe()
        };
        Subscription { topic, receiver }
    }

    /// Drop every channel. Subscribers drain what is queued and then see
    /// the end of their stream; later publishes fail with
    /// [`BusError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.channels.clear();
        debug!("Bus closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self, topic: Topic) -> usize {
        self.channels
            .get(&topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessagePublisher for LocalBus {
    async fn publish(&self, message: Message) -> Result<usize, BusError> {
        let topic = message.topic();
        if self.is_closed() {
            return Err(BusError::Closed(topic));
        }
        match self.sender(topic).send(message) {
            Ok(receivers) => Ok(receivers),
            Err(_) => {
                trace!("No listeners on {}, message dropped", topic);
                Ok(0)
            }
        }
    }

    fn has_listeners(&self, topic: Topic) -> bool {
        self.listener_count(topic) > 0
    }
}

/// Receiving end of one topic. Dropping it unsubscribes.
pub struct Subscription {
    topic: Topic,
    receiver: broadcast::Receiver<Message>,
}

impl Subscription {
    /// Next message, skipping any that were overwritten while lagging.
    /// `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Subscriber on {} lagged, skipped {} messages", self.topic, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<Message> {
        loop {
            match self.receiver.try_recv() {
                Ok(message) => return Some(message),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
