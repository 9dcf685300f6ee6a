//! Parameter encoding
//!
//! Integers wider than 4 bits are sent as 4 bytes, each holding one nibble of
//! the value in its low bits, most significant nibble first. `0x1234` is sent
//! as `01 02 03 04`. Signed values (eg: pan and tilt positions) use 16-bit
//! two's complement.
use crate::{limits::Limits, Error, Result, TERMINATOR};

/// Number of bytes used by a packed integer.
pub const PACKED_LENGTH: usize = 4;

/// Packs `v` into 4 nibbles, most significant first.
pub const fn pack_nibbles(v: u16) -> [u8; PACKED_LENGTH] {
    [
        ((v >> 12) & 0xf) as u8,
        ((v >> 8) & 0xf) as u8,
        ((v >> 4) & 0xf) as u8,
        (v & 0xf) as u8,
    ]
}

/// Unpacks 4 nibbles into an unsigned value.
///
/// ## Errors
///
/// * [`Error::InvalidLength`] if `b` is not exactly 4 bytes
/// * [`Error::MalformedFrame`] if any byte has its high nibble set
pub fn unpack_nibbles(b: &[u8]) -> Result<u16> {
    if b.len() != PACKED_LENGTH {
        return Err(Error::InvalidLength);
    }

    b.iter().try_fold(0u16, |acc, &n| {
        if n > 0xf {
            return Err(Error::MalformedFrame);
        }
        Ok((acc << 4) | u16::from(n))
    })
}

/// Unpacks 4 nibbles into a two's complement signed value.
pub fn unpack_signed_nibbles(b: &[u8]) -> Result<i16> {
    unpack_nibbles(b).map(|v| v as i16)
}

/// A mutable parameter slot in a [Command][crate::Command].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    /// A single raw byte, eg: a speed or direction nibble already combined
    /// with its command code.
    Byte(u8),

    /// A bounded integer, sent as 4 packed nibbles.
    Word { value: i32, limits: Limits },

    /// A code from an enumeration, eg: a white balance mode.
    Code(u8),
}

impl Param {
    /// Creates a [`Param::Word`], checking `value` against `limits`.
    pub fn word(value: i32, limits: Limits) -> Result<Self> {
        let mut p = Self::Word {
            value: 0,
            limits: limits.representable()?,
        };
        p.set(value)?;
        Ok(p)
    }

    /// Replaces the value of this slot.
    ///
    /// ## Errors
    ///
    /// * [`Error::ParameterOutOfRange`] if `value` is outside this slot's
    ///   limits, or cannot be sent in a single byte
    pub fn set(&mut self, value: i32) -> Result {
        match self {
            Self::Byte(b) | Self::Code(b) => {
                *b = u8::try_from(value)
                    .ok()
                    .filter(|&b| b != TERMINATOR)
                    .ok_or(Error::ParameterOutOfRange)?;
            }
            Self::Word { value: v, limits } => {
                *v = limits.check(value)?;
            }
        }
        Ok(())
    }

    pub fn value(&self) -> i32 {
        match self {
            Self::Byte(b) | Self::Code(b) => i32::from(*b),
            Self::Word { value, .. } => *value,
        }
    }

    /// Number of bytes this parameter takes on the wire.
    pub const fn encoded_len(&self) -> usize {
        match self {
            Self::Byte(_) | Self::Code(_) => 1,
            Self::Word { .. } => PACKED_LENGTH,
        }
    }

    /// Appends the wire encoding of this parameter to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::Byte(b) | Self::Code(b) => out.push(*b),
            // Limits are checked to fit in 16 bits, negative values wrap to
            // two's complement.
            Self::Word { value, .. } => out.extend_from_slice(&pack_nibbles(*value as u16)),
        }
    }
}
