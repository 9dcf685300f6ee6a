//! Submission handles.
use crate::{protocol::Message, socket::EntryState, Error, Result};
use std::fmt;
use tokio::sync::{
    oneshot::{self, error::TryRecvError},
    watch,
};

/// Identifies a submitted message for the life of its
/// [Dispatcher][crate::Dispatcher].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(pub(crate) u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A successful outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    /// The socket the device reported the completion on. Inquiry answers
    /// normally use socket 0.
    pub socket: u8,

    /// Data returned with the completion. This is empty for commands.
    pub data: Vec<u8>,
}

/// Tracks a submitted message.
///
/// Dropping a [Handle] does not cancel the message.
#[derive(Debug)]
pub struct Handle {
    id: EntryId,
    state: watch::Receiver<EntryState>,
    outcome: oneshot::Receiver<Result<Response>>,
}

impl Handle {
    pub fn id(&self) -> EntryId {
        self.id
    }

    /// Current lifecycle state. This never blocks.
    pub fn status(&self) -> EntryState {
        *self.state.borrow()
    }

    /// Watches the lifecycle state, without holding on to the outcome.
    pub(crate) fn state_watcher(&self) -> watch::Receiver<EntryState> {
        self.state.clone()
    }

    /// Waits for the message to reach a terminal state.
    ///
    /// ## Errors
    ///
    /// * [`Error::Device`] if the device rejected the message
    /// * [`Error::Timeout`] if the device never answered, including retries
    /// * [`Error::Cancelled`] if the message was cancelled
    /// * [`Error::Transport`] if the link failed while the message was
    ///   outstanding
    /// * [`Error::ChannelUnavailable`] if the engine went away
    pub async fn outcome(self) -> Result<Response> {
        self.outcome.await.map_err(|_| Error::ChannelUnavailable)?
    }

    /// Gets the outcome if it is already available.
    pub fn try_outcome(&mut self) -> Option<Result<Response>> {
        match self.outcome.try_recv() {
            Ok(r) => Some(r),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(Error::ChannelUnavailable)),
        }
    }
}

/// Engine side of a [Handle].
pub(crate) struct Responder {
    id: EntryId,
    state: watch::Sender<EntryState>,
    outcome: Option<oneshot::Sender<Result<Response>>>,
}

impl Responder {
    pub fn set_state(&self, state: EntryState) {
        self.state.send_replace(state);
    }

    /// Returns `true` if the outcome has already been sent.
    pub fn is_resolved(&self) -> bool {
        self.outcome.is_none()
    }

    /// Sends the outcome. Only the first call has any effect.
    pub fn resolve(&mut self, r: Result<Response>) {
        let Some(outcome) = self.outcome.take() else {
            return;
        };

        if outcome.send(r).is_err() {
            // Fire-and-forget submissions drop their handles.
            trace!("handle for {} was dropped", self.id);
        }
    }
}

/// A message which has been encoded and is ready to queue.
pub(crate) struct Submission {
    pub(crate) id: EntryId,
    pub(crate) message: Message,
    pub(crate) frame: Vec<u8>,
    pub(crate) responder: Responder,
}

impl Submission {
    /// Encodes `message`, creating a new queue entry and its [Handle].
    pub(crate) fn new(id: EntryId, message: Message) -> Result<(Self, Handle)> {
        let frame = message.encode()?;
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (state_tx, state_rx) = watch::channel(EntryState::Queued);

        Ok((
            Self {
                id,
                message,
                frame,
                responder: Responder {
                    id,
                    state: state_tx,
                    outcome: Some(outcome_tx),
                },
            },
            Handle {
                id,
                state: state_rx,
                outcome: outcome_rx,
            },
        ))
    }
}

impl fmt::Debug for Submission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Submission")
            .field("id", &self.id)
            .field("frame", &hex::encode(&self.frame))
            .finish_non_exhaustive()
    }
}
