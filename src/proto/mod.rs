use std::time::Duration;
use thiserror::Error;

use crate::error::DomainError;
use response::Response;

pub mod codec;
pub mod command;
pub mod conv;
pub mod response;

#[cfg(test)]
pub(crate) mod fake;

#[derive(Error, Debug)]
pub enum ProtoError {
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No reply from device within {0:?}")]
    Timeout(Duration),
    #[error("Connection to device closed")]
    Abort,
    #[error("Unexpected response from device: {0:?}")]
    Unexpected(Response),
    #[error("Invalid reply to {command:?}: {reply:?}")]
    InvalidReply { command: String, reply: String },
    #[error("Device is not supported: {0}")]
    UnsupportedModel(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

pub type Result<T> = std::result::Result<T, ProtoError>;
