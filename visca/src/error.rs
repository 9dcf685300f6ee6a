use crate::protocol::ErrorCode;
use std::{io::Error as IoError, sync::Arc};
use thiserror::Error;

/// Error types
#[derive(Debug, Error)]
pub enum Error {
    #[cfg(test)]
    #[error(transparent)]
    FromHexError(#[from] hex::FromHexError),

    #[error(transparent)]
    IoError(#[from] IoError),

    #[error(transparent)]
    Protocol(#[from] crate::protocol::Error),

    /// The device replied with an error frame.
    #[error("device reported error 0x{0:02x}")]
    Device(u8),

    #[error("timeout waiting for response")]
    Timeout,

    /// The link to the device failed while the command was outstanding.
    #[error("transport error: {0}")]
    Transport(Arc<IoError>),

    #[error("channel unavailable, likely dropped")]
    ChannelUnavailable,

    #[error("cancelled")]
    Cancelled,

    #[error("disconnected")]
    Disconnected,

    #[error("not found")]
    NotFound,

    #[error("internal error")]
    Internal,
}

impl Error {
    /// The error code reported by the device, if it is a known one.
    pub fn device_error(&self) -> Option<ErrorCode> {
        match self {
            Self::Device(code) => ErrorCode::from_code(*code),
            _ => None,
        }
    }
}
