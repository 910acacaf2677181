//! Message shapes and runtime primitives shared by the rizmo head nodes.

pub mod bus;
pub mod delayed;
pub mod types;
pub mod utils;

pub use bus::{BusError, LocalBus, Message, MessagePublisher, Subscription, Topic};
pub use delayed::DelayedTask;
pub use types::{
    BBox, ChangeServoPosition, Detection, Detections, MaestroCommand, MotorSystemCommand,
    ServoTarget, SetHeadSpeed, SetServoPosition,
};
