//! Device replies
//!
//! Every reply payload starts with a marker byte. Its high nibble says what
//! kind of reply it is, and its low nibble carries the socket the device
//! assigned to the command:
//!
//! Marker | Reply | Rest of payload
//! ------ | ----- | ---------------
//! `0x4y` | [Ack][Reply::Ack] | nothing
//! `0x5y` | [Completion][Reply::Completion] | inquiry return data, if any
//! `0x6y` | [Error][Reply::Error] | one error code byte
//!
//! Inquiries are normally answered directly with a socket 0 completion.
use modular_bitfield::{bitfield, specifiers::B4};
use num_traits::FromPrimitive;

/// Reply marker byte.
///
/// Fields from LSB to MSB:
///
/// * `u4 0x0f`: socket
/// * `u4 0xf0`: reply kind
#[bitfield(bits = 8)]
#[repr(u8)]
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
struct ReplyMarker {
    socket: B4,
    kind: B4,
}

impl ReplyMarker {
    const ACK: u8 = 0x4;
    const COMPLETION: u8 = 0x5;
    const ERROR: u8 = 0x6;
}

/// Error codes carried by [`Reply::Error`].
#[derive(Debug, FromPrimitive, ToPrimitive, PartialEq, Eq, Clone, Copy, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    /// The frame was too long, or had no terminator.
    MessageLength = 0x01,
    /// The command was not understood.
    Syntax = 0x02,
    /// Both sockets on the device are busy.
    CommandBufferFull = 0x03,
    /// The command was cancelled by a `CAM_Cancel` command.
    CommandCancelled = 0x04,
    /// A cancel command named a socket which is not in use.
    NoSocket = 0x05,
    /// The command cannot run in the device's current state, eg: setting
    /// the zoom position while the camera is powered off.
    NotExecutable = 0x41,
}

impl ErrorCode {
    /// Looks up a raw error code byte.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::from_u8(code)
    }

    /// Returns `true` if sending the same command again later may succeed.
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::CommandBufferFull)
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::MessageLength => "message length error",
            Self::Syntax => "syntax error",
            Self::CommandBufferFull => "command buffer full",
            Self::CommandCancelled => "command cancelled",
            Self::NoSocket => "no socket",
            Self::NotExecutable => "command not executable",
        }
    }
}

/// A classified device reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The command was accepted and assigned `socket`.
    Ack { socket: u8 },

    /// The command on `socket` finished. For inquiries, `data` holds the
    /// answer.
    Completion { socket: u8, data: Vec<u8> },

    /// The command on `socket` failed. Errors raised before the command was
    /// accepted use socket 0.
    Error { socket: u8, code: u8 },

    /// Anything else, eg: address assignment or network change
    /// notifications.
    Unknown(Vec<u8>),
}

impl Reply {
    /// Classifies a reply payload (everything between the header and the
    /// terminator).
    pub fn parse(payload: &[u8]) -> Self {
        let Some((&marker, rest)) = payload.split_first() else {
            return Self::Unknown(Vec::new());
        };
        let marker = ReplyMarker::from(marker);
        let socket = marker.socket();

        match (marker.kind(), rest) {
            (ReplyMarker::ACK, []) => Self::Ack { socket },
            (ReplyMarker::COMPLETION, data) => Self::Completion {
                socket,
                data: data.to_vec(),
            },
            (ReplyMarker::ERROR, &[code]) => Self::Error { socket, code },
            _ => Self::Unknown(payload.to_vec()),
        }
    }

    /// Builds the payload for this reply.
    ///
    /// Sockets above `0xf` are truncated to their low nibble.
    pub fn to_payload(&self) -> Vec<u8> {
        let marker = |kind: u8, socket: u8| {
            u8::from(
                ReplyMarker::new()
                    .with_kind(kind)
                    .with_socket(socket & 0x0f),
            )
        };

        match self {
            Self::Ack { socket } => vec![marker(ReplyMarker::ACK, *socket)],
            Self::Completion { socket, data } => {
                let mut o = Vec::with_capacity(data.len() + 1);
                o.push(marker(ReplyMarker::COMPLETION, *socket));
                o.extend_from_slice(data);
                o
            }
            Self::Error { socket, code } => vec![marker(ReplyMarker::ERROR, *socket), *code],
            Self::Unknown(payload) => payload.clone(),
        }
    }

    /// The socket this reply refers to, if any.
    pub const fn socket(&self) -> Option<u8> {
        match self {
            Self::Ack { socket } | Self::Completion { socket, .. } | Self::Error { socket, .. } => {
                Some(*socket)
            }
            Self::Unknown(_) => None,
        }
    }

    /// The error code, if this is a known [`Reply::Error`].
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Error { code, .. } => ErrorCode::from_code(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Result;

    #[test]
    fn classify() -> Result {
        assert_eq!(Reply::Ack { socket: 1 }, Reply::parse(&hex::decode("41")?));
        assert_eq!(
            Reply::Completion {
                socket: 2,
                data: vec![]
            },
            Reply::parse(&hex::decode("52")?)
        );
        assert_eq!(
            Reply::Completion {
                socket: 0,
                data: vec![0x01, 0x02, 0x03, 0x04]
            },
            Reply::parse(&hex::decode("5001020304")?)
        );
        assert_eq!(
            Reply::Error {
                socket: 0,
                code: 0x41
            },
            Reply::parse(&hex::decode("6041")?)
        );

        // Address set / network change
        assert!(matches!(
            Reply::parse(&hex::decode("3002")?),
            Reply::Unknown(_)
        ));
        // Ack with trailing data
        assert!(matches!(
            Reply::parse(&hex::decode("4101")?),
            Reply::Unknown(_)
        ));
        // Error without a code
        assert!(matches!(Reply::parse(&hex::decode("61")?), Reply::Unknown(_)));
        assert_eq!(Reply::Unknown(vec![]), Reply::parse(&[]));
        Ok(())
    }

    #[test]
    fn build() -> Result {
        for reply in [
            Reply::Ack { socket: 2 },
            Reply::Completion {
                socket: 1,
                data: vec![],
            },
            Reply::Completion {
                socket: 0,
                data: vec![0x02],
            },
            Reply::Error {
                socket: 1,
                code: 0x03,
            },
        ] {
            assert_eq!(reply, Reply::parse(&reply.to_payload()));
        }
        assert_eq!(hex::decode("6203")?, Reply::Error { socket: 2, code: 3 }.to_payload());
        Ok(())
    }

    #[test]
    fn error_codes() {
        let r = Reply::Error {
            socket: 1,
            code: 0x03,
        };
        assert_eq!(Some(ErrorCode::CommandBufferFull), r.error_code());
        assert!(ErrorCode::CommandBufferFull.is_retryable());
        assert!(!ErrorCode::NotExecutable.is_retryable());
        assert!(!ErrorCode::Syntax.is_retryable());
        assert_eq!(None, ErrorCode::from_code(0x7f));
        assert_eq!(Some(ErrorCode::NotExecutable), ErrorCode::from_code(0x41));
        assert_eq!(None, Reply::Ack { socket: 1 }.error_code());
    }
}
