use thiserror::Error;

/// Error types.
///
/// Everything here is raised synchronously while building or parsing a
/// frame; none of these describe a device response.
#[derive(Debug, Error)]
pub enum Error {
    #[cfg(test)]
    #[error(transparent)]
    FromHexError(#[from] hex::FromHexError),

    #[error("invalid length")]
    InvalidLength,

    #[error("parameter out of valid range")]
    ParameterOutOfRange,

    #[error("invalid device address: {0}")]
    InvalidAddress(u8),

    #[error("payload contains the reserved terminator byte")]
    ReservedByte,

    #[error("unknown parameter slot")]
    UnknownSlot,

    #[error("unknown limits: {0}")]
    UnknownLimits(String),

    #[error("malformed frame")]
    MalformedFrame,

    #[error("data parse error: {0}")]
    BinRwError(#[from] binrw::Error),
}
