use std::time::Duration;

use thiserror::Error;

use crate::interface::Signal;

#[derive(Error, Debug)]
pub enum HvError {
    #[error("Invalid mode selection: {0:?}")]
    InvalidModeSelection(char),

    #[error("Malformed hex input: {0:?} is not a hex digit")]
    MalformedHexInput(char),

    #[error("Target not responding: {line} did not go high within {timeout:?}")]
    TargetTimeout { line: Signal, timeout: Duration },

    #[error("Console error: {0}")]
    Console(String),

    #[error("Hardware error: {0}")]
    Hardware(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

pub type HvResult<T> = std::result::Result<T, HvError>;
