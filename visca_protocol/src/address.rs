use crate::{Error, Result};
use std::fmt;

/// A device on a VISCA link.
///
/// Cameras are numbered `1..=7` along the daisy chain. The broadcast address
/// reaches every device on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u8", into = "u8"))]
pub struct Address(u8);

impl Address {
    /// Broadcast to all devices on the link.
    pub const BROADCAST: Self = Self(8);

    /// Highest individually addressable camera.
    pub const MAX_CAMERA: u8 = 7;

    /// Creates the address of camera `id`.
    ///
    /// ## Errors
    ///
    /// * [`Error::InvalidAddress`] when `id` is not in `1..=7`
    pub fn camera(id: u8) -> Result<Self> {
        if id == 0 || id > Self::MAX_CAMERA {
            return Err(Error::InvalidAddress(id));
        }
        Ok(Self(id))
    }

    /// The camera number, or `8` for [`Address::BROADCAST`].
    pub const fn id(self) -> u8 {
        self.0
    }

    pub const fn is_broadcast(self) -> bool {
        self.0 == Self::BROADCAST.0
    }
}

impl TryFrom<u8> for Address {
    type Error = Error;

    fn try_from(id: u8) -> Result<Self> {
        if id == Self::BROADCAST.0 {
            Ok(Self::BROADCAST)
        } else {
            Self::camera(id)
        }
    }
}

impl From<Address> for u8 {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_broadcast() {
            write!(f, "broadcast")
        } else {
            write!(f, "camera {}", self.0)
        }
    }
}
