//! # Frame codec
//!
//! [Frame] is the basic unit of communication on a VISCA link. Everything
//! else is built on top of it.
//!
//! ## Frame format
//!
//! * `u8`: [header][FrameHeader]
//! * 1 to 14 bytes of payload
//! * `u8`: [terminator][TERMINATOR] (`0xff`)
//!
//! The terminator never appears inside a payload, so the byte stream from a
//! device can be split into frames without any length information.
#![allow(rustdoc::private_intra_doc_links)]

use crate::{Address, Error, Reply, Result};
use binrw::{binrw, helpers::until_eof, BinRead, BinWrite};
use modular_bitfield::{bitfield, specifiers::B3};
use std::io::Cursor;

/// Marks the end of every frame.
pub const TERMINATOR: u8 = 0xff;

/// Maximum frame size, including the header and terminator.
pub const MAX_FRAME_LENGTH: usize = 16;

/// Maximum payload size (minus header and terminator).
pub const MAX_PAYLOAD_LENGTH: usize = MAX_FRAME_LENGTH - 2;

/// The controller's own address on the link.
const CONTROLLER_ADDRESS: u8 = 0;

/// Frame header byte.
///
/// ## Format
///
/// Fields from LSB to MSB:
///
/// * `u3 0x07`: receiver address
/// * `bit 0x08`: broadcast
/// * `u3 0x70`: sender address
/// * `bit 0x80`: always set
///
/// So a command from the controller to camera 1 starts with `0x81`, a
/// broadcast starts with `0x88`, and replies from camera 1 start with `0x90`.
#[bitfield(bits = 8)]
#[repr(u8)]
#[derive(BinRead, BinWrite, Debug, Default, PartialEq, Eq, Clone, Copy)]
#[brw(big)]
#[br(map = From::<u8>::from)]
#[bw(map = |&x| Into::<u8>::into(x))]
pub struct FrameHeader {
    pub receiver: B3,
    pub broadcast: bool,
    pub sender: B3,
    marker: bool,
}

impl FrameHeader {
    /// Header for a message from the controller to `address`.
    pub fn to_device(address: Address) -> Self {
        let header = Self::new()
            .with_marker(true)
            .with_sender(CONTROLLER_ADDRESS);

        if address.is_broadcast() {
            header.with_broadcast(true)
        } else {
            header.with_receiver(address.id())
        }
    }

    /// Header for a reply from the camera at `address` to the controller.
    ///
    /// Returns [`Error::InvalidAddress`] for [`Address::BROADCAST`], which
    /// never sends anything.
    pub fn from_device(address: Address) -> Result<Self> {
        if address.is_broadcast() {
            return Err(Error::InvalidAddress(address.id()));
        }

        Ok(Self::new()
            .with_marker(true)
            .with_sender(address.id())
            .with_receiver(CONTROLLER_ADDRESS))
    }

    /// The device which sent this frame, if it was a camera.
    pub fn source(&self) -> Option<Address> {
        Address::camera(self.sender()).ok()
    }

    /// The device this frame is addressed to, if it is not the controller.
    pub fn destination(&self) -> Option<Address> {
        if self.broadcast() {
            Some(Address::BROADCAST)
        } else {
            Address::camera(self.receiver()).ok()
        }
    }

    /// Returns `true` if the high bit is set, as it must be on every header.
    pub fn is_valid(&self) -> bool {
        self.marker()
    }
}

/// One header-prefixed, terminator-delimited unit of wire data.
///
/// The [terminator][TERMINATOR] is not stored; it is added by
/// [`Frame::to_bytes()`] and stripped by [`FrameDecoder`].
#[binrw]
#[derive(Debug, Clone, PartialEq, Eq)]
#[brw(big)]
pub struct Frame {
    pub header: FrameHeader,

    #[br(parse_with = until_eof)]
    pub payload: Vec<u8>,
}

impl Frame {
    /// Creates a frame addressed from the controller to `address`.
    ///
    /// ## Errors
    ///
    /// * [`Error::InvalidLength`] if the payload is empty or longer than
    ///   [`MAX_PAYLOAD_LENGTH`]
    /// * [`Error::ReservedByte`] if the payload contains [`TERMINATOR`]
    pub fn new(address: Address, payload: Vec<u8>) -> Result<Self> {
        Self::with_header(FrameHeader::to_device(address), payload)
    }

    /// Creates a frame with an explicit header.
    ///
    /// This is mostly useful for building device replies.
    pub fn with_header(header: FrameHeader, payload: Vec<u8>) -> Result<Self> {
        check_payload(&payload)?;
        Ok(Self { header, payload })
    }

    /// Encodes `payload` for `address`, including the header and terminator.
    pub fn encode(address: Address, payload: &[u8]) -> Result<Vec<u8>> {
        Self::new(address, payload.to_vec())?.to_bytes()
    }

    /// Writes the frame in wire format, including the terminator.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::with_capacity(self.payload.len() + 2));
        self.write(&mut out)?;
        let mut out = out.into_inner();
        out.push(TERMINATOR);
        Ok(out)
    }

    /// Parses a frame with its terminator already removed.
    pub fn parse(b: &[u8]) -> Result<Self> {
        let frame = Self::read(&mut Cursor::new(b))?;
        if !frame.header.is_valid() {
            return Err(Error::MalformedFrame);
        }
        check_payload(&frame.payload)?;
        Ok(frame)
    }

    /// The camera which sent this frame, if any.
    pub fn source(&self) -> Option<Address> {
        self.header.source()
    }

    /// The device this frame is addressed to, if any.
    pub fn destination(&self) -> Option<Address> {
        self.header.destination()
    }

    /// Classifies the frame as a device reply.
    pub fn reply(&self) -> Reply {
        Reply::parse(&self.payload)
    }
}

fn check_payload(payload: &[u8]) -> Result {
    if payload.is_empty() || payload.len() > MAX_PAYLOAD_LENGTH {
        return Err(Error::InvalidLength);
    }
    if payload.contains(&TERMINATOR) {
        return Err(Error::ReservedByte);
    }
    Ok(())
}

/// Splits an incoming byte stream into [Frame]s.
///
/// Bytes may arrive in arbitrarily small pieces: anything after the last
/// terminator is kept for the next call.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes received from the transport.
    pub fn extend(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    /// Number of bytes waiting for a terminator.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Discards any partially received frame.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Decodes the next complete frame.
    ///
    /// Returns [None] when no terminator has arrived yet. A malformed frame is
    /// reported as an error and dropped, so the next call carries on from the
    /// following frame.
    pub fn next_frame(&mut self) -> Option<Result<Frame>> {
        // Every frame starts with a header byte, which always has its high bit
        // set. Anything else is line noise or the tail of a lost frame.
        match self.buf.iter().position(|&b| b & 0x80 != 0 && b != TERMINATOR) {
            None => {
                if !self.buf.is_empty() {
                    trace!("discarding {} stray byte(s)", self.buf.len());
                    self.buf.clear();
                }
                return None;
            }
            Some(0) => (),
            Some(start) => {
                trace!("discarding {start} stray byte(s)");
                self.buf.drain(..start);
            }
        }

        let Some(end) = self.buf.iter().position(|&b| b == TERMINATOR) else {
            if self.buf.len() >= MAX_FRAME_LENGTH {
                warn!(
                    "no terminator after {} bytes, dropping: {}",
                    self.buf.len(),
                    hex::encode(&self.buf)
                );
                self.buf.clear();
                return Some(Err(Error::InvalidLength));
            }
            return None;
        };

        let raw: Vec<u8> = self.buf.drain(..=end).collect();
        let r = Frame::parse(&raw[..end]);
        if let Err(e) = &r {
            warn!("dropping malformed frame {}: {e}", hex::encode(&raw));
        }
        Some(r)
    }

    /// Iterates over every frame that can be decoded from the bytes received
    /// so far.
    pub fn frames(&mut self) -> Frames<'_> {
        Frames { decoder: self }
    }
}

/// Iterator returned by [`FrameDecoder::frames()`].
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.next_frame()
    }
}
