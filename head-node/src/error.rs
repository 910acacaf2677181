use rizmo_common::BusError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HeadError {
    #[error("Servo error: {0}")]
    ServoError(String),

    /// The servo controller stopped answering; the actuator reconnects.
    #[error("Servo connection lost: {0}")]
    ConnectionLost(String),

    #[error("Messaging error: {0}")]
    MessagingError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<BusError> for HeadError {
    fn from(error: BusError) -> Self {
        HeadError::MessagingError(error.to_string())
    }
}

impl From<serde_json::Error> for HeadError {
    fn from(error: serde_json::Error) -> Self {
        HeadError::SerializationError(error.to_string())
    }
}

impl From<serde_yaml::Error> for HeadError {
    fn from(error: serde_yaml::Error) -> Self {
        HeadError::SerializationError(error.to_string())
    }
}

impl From<::config::ConfigError> for HeadError {
    fn from(error: ::config::ConfigError) -> Self {
        HeadError::ConfigError(error.to_string())
    }
}

impl From<validator::ValidationErrors> for HeadError {
    fn from(errors: validator::ValidationErrors) -> Self {
        HeadError::ConfigError(errors.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HeadError>;
