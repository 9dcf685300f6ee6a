//! Commands and inquiries
//!
//! A [Command] asks a device to do something; an [Inquiry] asks it for a
//! value. Both carry the [Address] they are sent to, and a payload made of a
//! message type byte ([COMMAND] or [INQUIRY]), fixed category and command
//! codes, and parameters.
//!
//! Commands are built once and then reconfigured through their parameter
//! slots, so the caller can keep a copy, [set][Command::set] a new value and
//! submit a clone:
//!
//! ```rust
//! use visca_protocol::{Address, Command, Limits, Param};
//!
//! // CAM_Zoom Direct
//! let mut zoom = Command::with_bytes(Address::camera(1)?, &[0x04, 0x47])?;
//! let position = zoom.push_param(Param::word(0, Limits::new(0, 0x4000))?)?;
//!
//! zoom.set(position, 0x1234)?;
//! assert_eq!(vec![0x01, 0x04, 0x47, 0x01, 0x02, 0x03, 0x04], zoom.payload());
//! # Ok::<(), visca_protocol::Error>(())
//! ```
use crate::{Address, Error, Frame, Param, Result, MAX_PAYLOAD_LENGTH, TERMINATOR};
use std::{fmt, sync::Arc};

/// Message type byte for commands.
pub const COMMAND: u8 = 0x01;

/// Message type byte for inquiries.
pub const INQUIRY: u8 = 0x09;

type Continuation = Arc<dyn Fn() + Send + Sync>;
type Handler = Arc<dyn Fn(&[u8]) -> Result + Send + Sync>;

/// Refers to a parameter slot in a [Command].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Fixed(u8),
    Slot(Param),
}

impl Part {
    const fn encoded_len(&self) -> usize {
        match self {
            Self::Fixed(_) => 1,
            Self::Slot(p) => p.encoded_len(),
        }
    }
}

fn check_bytes(b: &[u8]) -> Result {
    if b.contains(&TERMINATOR) {
        return Err(Error::ReservedByte);
    }
    Ok(())
}

/// A command, with mutable parameter slots.
///
/// Cloning is cheap: clones share the completion continuation, but have their
/// own parameter values.
#[derive(Clone)]
pub struct Command {
    address: Address,
    parts: Vec<Part>,
    on_completion: Option<Continuation>,
}

impl Command {
    /// Creates an empty command for `address`.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            parts: vec![Part::Fixed(COMMAND)],
            on_completion: None,
        }
    }

    /// Creates a command for `address` with fixed category and command codes.
    pub fn with_bytes(address: Address, b: &[u8]) -> Result<Self> {
        let mut o = Self::new(address);
        o.push_bytes(b)?;
        Ok(o)
    }

    pub const fn address(&self) -> Address {
        self.address
    }

    fn encoded_len(&self) -> usize {
        self.parts.iter().map(Part::encoded_len).sum()
    }

    fn check_room(&self, extra: usize) -> Result {
        if self.encoded_len() + extra > MAX_PAYLOAD_LENGTH {
            return Err(Error::InvalidLength);
        }
        Ok(())
    }

    /// Appends fixed bytes to the payload.
    pub fn push_bytes(&mut self, b: &[u8]) -> Result<&mut Self> {
        check_bytes(b)?;
        self.check_room(b.len())?;
        self.parts.extend(b.iter().copied().map(Part::Fixed));
        Ok(self)
    }

    /// Appends a parameter slot to the payload.
    pub fn push_param(&mut self, param: Param) -> Result<SlotId> {
        self.check_room(param.encoded_len())?;
        self.parts.push(Part::Slot(param));
        Ok(SlotId(self.parts.len() - 1))
    }

    /// Sets the value of a parameter slot. Nothing else in the payload
    /// changes.
    ///
    /// ## Errors
    ///
    /// * [`Error::UnknownSlot`] if `slot` is not a parameter of this command
    /// * [`Error::ParameterOutOfRange`] if `value` is not valid for the slot
    pub fn set(&mut self, slot: SlotId, value: i32) -> Result<&mut Self> {
        match self.parts.get_mut(slot.0) {
            Some(Part::Slot(p)) => p.set(value)?,
            _ => return Err(Error::UnknownSlot),
        }
        Ok(self)
    }

    /// Gets a parameter slot.
    pub fn param(&self, slot: SlotId) -> Result<&Param> {
        match self.parts.get(slot.0) {
            Some(Part::Slot(p)) => Ok(p),
            _ => Err(Error::UnknownSlot),
        }
    }

    /// Sets a function to run when the device reports that this command has
    /// completed.
    ///
    /// Only the last continuation set is kept.
    pub fn on_completion(&mut self, f: impl Fn() + Send + Sync + 'static) -> &mut Self {
        self.on_completion = Some(Arc::new(f));
        self
    }

    pub fn has_continuation(&self) -> bool {
        self.on_completion.is_some()
    }

    /// Runs the completion continuation, if any.
    pub fn complete(&self) {
        if let Some(f) = &self.on_completion {
            f();
        }
    }

    /// The payload as sent on the wire, without header or terminator.
    pub fn payload(&self) -> Vec<u8> {
        let mut o = Vec::with_capacity(self.encoded_len());
        for part in &self.parts {
            match part {
                Part::Fixed(b) => o.push(*b),
                Part::Slot(p) => p.encode_into(&mut o),
            }
        }
        o
    }

    /// Encodes the full frame.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Frame::encode(self.address, &self.payload())
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("address", &self.address)
            .field("payload", &hex::encode(self.payload()))
            .field("on_completion", &self.on_completion.is_some())
            .finish()
    }
}

/// An inquiry, with a function which decodes the device's answer and a
/// callback which receives the decoded value.
#[derive(Clone)]
pub struct Inquiry {
    address: Address,
    payload: Vec<u8>,
    handler: Handler,
}

impl Inquiry {
    /// Creates an inquiry for `address`.
    ///
    /// `b` holds the category and inquiry codes, without the [INQUIRY] type
    /// byte.
    pub fn new<T, D, F>(address: Address, b: &[u8], decode: D, callback: F) -> Result<Self>
    where
        D: Fn(&[u8]) -> Result<T> + Send + Sync + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        check_bytes(b)?;
        if b.len() + 1 > MAX_PAYLOAD_LENGTH {
            return Err(Error::InvalidLength);
        }

        let mut payload = Vec::with_capacity(b.len() + 1);
        payload.push(INQUIRY);
        payload.extend_from_slice(b);

        Ok(Self {
            address,
            payload,
            handler: Arc::new(move |data: &[u8]| {
                callback(decode(data)?);
                Ok(())
            }),
        })
    }

    pub const fn address(&self) -> Address {
        self.address
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Decodes the answer data from a completion and passes it to the
    /// callback.
    ///
    /// The callback is not called if the data cannot be decoded.
    pub fn deliver(&self, data: &[u8]) -> Result {
        (self.handler)(data)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Frame::encode(self.address, &self.payload)
    }
}

impl fmt::Debug for Inquiry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inquiry")
            .field("address", &self.address)
            .field("payload", &hex::encode(&self.payload))
            .finish_non_exhaustive()
    }
}

/// Anything which can be submitted to a device.
#[derive(Debug, Clone)]
pub enum Message {
    Command(Command),
    Inquiry(Inquiry),
}

impl Message {
    pub const fn address(&self) -> Address {
        match self {
            Self::Command(c) => c.address(),
            Self::Inquiry(i) => i.address(),
        }
    }

    pub fn payload(&self) -> Vec<u8> {
        match self {
            Self::Command(c) => c.payload(),
            Self::Inquiry(i) => i.payload().to_vec(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Self::Command(c) => c.encode(),
            Self::Inquiry(i) => i.encode(),
        }
    }

    pub const fn is_inquiry(&self) -> bool {
        matches!(self, Self::Inquiry(_))
    }
}

impl From<Command> for Message {
    fn from(c: Command) -> Self {
        Self::Command(c)
    }
}

impl From<Inquiry> for Message {
    fn from(i: Inquiry) -> Self {
        Self::Inquiry(i)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{unpack_nibbles, Limits};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    fn camera(id: u8) -> Address {
        Address::camera(id).unwrap()
    }

    #[test]
    fn zoom_direct() -> Result {
        let mut cmd = Command::with_bytes(camera(1), &[0x04, 0x47])?;
        let slot = cmd.push_param(Param::word(0, Limits::new(0, 0x4000))?)?;
        assert_eq!(hex::decode("8101044700000000ff")?, cmd.encode()?);

        cmd.set(slot, 0x1234)?;
        assert_eq!(hex::decode("8101044701020304ff")?, cmd.encode()?);
        assert_eq!(0x1234, cmd.param(slot)?.value());

        // Out of range values leave the payload alone
        assert!(matches!(
            cmd.set(slot, 0x4001),
            Err(Error::ParameterOutOfRange)
        ));
        assert_eq!(hex::decode("01044701020304")?, cmd.payload());
        Ok(())
    }

    #[test]
    fn pan_tilt() -> Result {
        // CAM_PanTiltDrive Absolute with speeds, pan -2, tilt 0x10
        let mut cmd = Command::with_bytes(camera(2), &[0x06, 0x02])?;
        let pan_speed = cmd.push_param(Param::Byte(0x01))?;
        let tilt_speed = cmd.push_param(Param::Byte(0x01))?;
        let pan = cmd.push_param(Param::word(0, Limits::new(-0x990, 0x990))?)?;
        let tilt = cmd.push_param(Param::word(0, Limits::new(-0x1b0, 0x510))?)?;

        cmd.set(pan_speed, 0x18)?
            .set(tilt_speed, 0x14)?
            .set(pan, -2)?
            .set(tilt, 0x10)?;
        assert_eq!(
            hex::decode("8201060218140f0f0f0e00000100ff")?,
            cmd.encode()?
        );

        // Payload is full
        assert!(matches!(
            cmd.push_bytes(&[0x00, 0x00]),
            Err(Error::InvalidLength)
        ));
        Ok(())
    }

    #[test]
    fn slots() -> Result {
        let mut a = Command::with_bytes(camera(1), &[0x04, 0x07])?;
        let mut b = Command::new(camera(1));
        let slot = b.push_param(Param::Code(0x02))?;

        // Slot from another command, pointing at a fixed byte
        assert!(matches!(a.set(slot, 0x03), Err(Error::UnknownSlot)));
        assert!(matches!(a.param(SlotId(10)), Err(Error::UnknownSlot)));
        assert!(matches!(a.push_bytes(&[0xff]), Err(Error::ReservedByte)));

        let copy = b.clone();
        b.set(slot, 0x03)?;
        assert_eq!(vec![0x01, 0x02], copy.payload());
        assert_eq!(vec![0x01, 0x03], b.payload());
        Ok(())
    }

    #[test]
    fn continuation_replaced() -> Result {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let mut cmd = Command::with_bytes(camera(1), &[0x04, 0x00, 0x02])?;
        assert!(!cmd.has_continuation());
        cmd.complete();

        let f = first.clone();
        cmd.on_completion(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        let s = second.clone();
        cmd.on_completion(move || {
            s.fetch_add(1, Ordering::SeqCst);
        });

        // Clones share the continuation
        cmd.clone().complete();
        cmd.complete();
        assert_eq!(0, first.load(Ordering::SeqCst));
        assert_eq!(2, second.load(Ordering::SeqCst));
        Ok(())
    }

    #[test]
    fn inquiry() -> Result {
        let got = Arc::new(Mutex::new(Vec::new()));
        let g = got.clone();

        // CAM_ZoomPosInq
        let inq = Inquiry::new(camera(1), &[0x04, 0x47], unpack_nibbles, move |v| {
            g.lock().unwrap().push(v);
        })?;
        assert_eq!(hex::decode("81090447ff")?, inq.encode()?);

        inq.deliver(&hex::decode("01020304")?)?;
        assert!(inq.deliver(&hex::decode("02")?).is_err());
        assert_eq!(vec![0x1234], *got.lock().unwrap());

        let m = Message::from(inq);
        assert!(m.is_inquiry());
        assert_eq!(camera(1), m.address());
        assert_eq!(hex::decode("090447")?, m.payload());
        Ok(())
    }

    #[test]
    fn inquiry_limits() {
        let ignore = |_: u8| ();
        let first = |b: &[u8]| b.first().copied().ok_or(Error::InvalidLength);
        assert!(Inquiry::new(camera(1), &[0x04; 14], first, ignore).is_err());
        assert!(Inquiry::new(camera(1), &[0x04, 0xff], first, ignore).is_err());
        assert!(Inquiry::new(camera(1), &[0x04; 13], first, ignore).is_ok());
    }
}
