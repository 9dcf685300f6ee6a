#![doc = include_str!("../README.md")]

#[macro_use]
extern crate lazy_static;

#[macro_use]
extern crate num_derive;

#[macro_use]
extern crate tracing;

mod address;
mod error;
mod frame;
pub mod limits;
mod message;
mod param;
mod reply;

pub use crate::{
    address::Address,
    error::Error,
    frame::{
        Frame, FrameDecoder, FrameHeader, Frames, MAX_FRAME_LENGTH, MAX_PAYLOAD_LENGTH, TERMINATOR,
    },
    limits::{Limits, LimitsTable},
    message::{Command, Inquiry, Message, SlotId, COMMAND, INQUIRY},
    param::{pack_nibbles, unpack_nibbles, unpack_signed_nibbles, Param},
    reply::{ErrorCode, Reply},
};

/// Result type.
pub type Result<T = ()> = std::result::Result<T, Error>;
