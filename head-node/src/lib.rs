//! Attention and motor control for the rizmo robot head.

pub mod attention;
pub mod bridge;
pub mod config;
pub mod error;
pub mod servo;
pub mod tracking;

pub use config::HeadConfig;
pub use error::{HeadError, Result};
