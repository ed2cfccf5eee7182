//! Core utilities and common types for Concord.

pub mod error;
pub mod logging;
pub mod types;

pub use error::{Error, Result};
pub use logging::{init_logging, LogLevel, LoggingConfig};
pub use types::*;
