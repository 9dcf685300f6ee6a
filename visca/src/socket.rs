//! Per-message lifecycle.
//!
//! ```text
//!            pump            Ack              Completion
//! Queued ---------> Sent ---------> Acked ----------------> Completed
//!                    |                |
//!                    |   timeout      |   Error            +-> Errored
//!                    +-------+--------+--------------------+
//!                            |                             +-> TimedOut
//!                            '--- retry (back to Sent) ----'
//! ```
//!
//! A device error before the Ack (socket 0) ends an entry in the same way as
//! one after it.
use crate::{
    config::DispatcherConfig,
    handle::{EntryId, Responder, Response, Submission},
    protocol::{Address, Message},
    Error,
};
use tokio::time::Instant;

/// Lifecycle state of a submitted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryState {
    /// Waiting for a free socket on the device.
    Queued,
    /// Written to the link, waiting for an Ack.
    Sent,
    /// Accepted by the device, waiting for a Completion.
    Acked,
    Completed,
    Errored,
    TimedOut,
    /// Cancelled by the caller. Entries cancelled after they were sent still
    /// hold their socket until the device answers.
    Cancelled,
}

impl EntryState {
    /// Returns `true` if the entry will never change state again.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Errored | Self::TimedOut | Self::Cancelled
        )
    }

    /// Returns `true` if the entry holds one of the device's sockets.
    pub const fn is_in_flight(self) -> bool {
        matches!(self, Self::Sent | Self::Acked)
    }
}

/// A message owned by the dispatcher, and its lifecycle state.
pub(crate) struct Entry {
    pub id: EntryId,
    message: Message,
    /// Encoded frame, which is sent again as-is on retry.
    pub frame: Vec<u8>,
    pub state: EntryState,
    /// Socket assigned by the device in its Ack.
    pub socket: Option<u8>,
    /// When the entry last changed state. Timeouts count from here.
    pub since: Instant,
    /// Earliest time the entry may be sent.
    pub not_before: Option<Instant>,
    pub retries_left: u8,
    /// Cancelled while in flight: the outcome has already been delivered, and
    /// whatever the device replies with is ignored.
    pub suppressed: bool,
    responder: Responder,
}

impl Entry {
    pub fn new(submission: Submission, config: &DispatcherConfig, now: Instant) -> Self {
        Self {
            id: submission.id,
            message: submission.message,
            frame: submission.frame,
            state: EntryState::Queued,
            socket: None,
            since: now,
            not_before: None,
            retries_left: config.retry_limit,
            suppressed: false,
            responder: submission.responder,
        }
    }

    pub fn address(&self) -> Address {
        self.message.address()
    }

    pub fn is_inquiry(&self) -> bool {
        self.message.is_inquiry()
    }

    /// The state reported to the caller.
    pub fn status(&self) -> EntryState {
        if self.suppressed {
            EntryState::Cancelled
        } else {
            self.state
        }
    }

    fn set_state(&mut self, state: EntryState, now: Instant) {
        trace!(
            "{} ({}): {:?} -> {state:?}",
            self.id,
            self.address(),
            self.state
        );
        self.state = state;
        self.since = now;
        if !self.suppressed {
            self.responder.set_state(state);
        }
    }

    /// Returns `true` if the entry may be sent at `now`.
    pub fn ready(&self, now: Instant) -> bool {
        !matches!(self.not_before, Some(t) if t > now)
    }

    pub fn mark_sent(&mut self, now: Instant) {
        self.not_before = None;
        self.socket = None;
        self.set_state(EntryState::Sent, now);
    }

    pub fn ack(&mut self, socket: u8, now: Instant) {
        debug!("{} ({}): acked on socket {socket}", self.id, self.address());
        self.socket = Some(socket);
        self.set_state(EntryState::Acked, now);
    }

    /// When the current state times out, if it can.
    pub fn deadline(&self, config: &DispatcherConfig) -> Option<Instant> {
        match self.state {
            EntryState::Sent => Some(self.since + config.ack_timeout),
            EntryState::Acked => Some(self.since + config.completion_timeout),
            _ => None,
        }
    }

    /// Uses up a retry, if there are any left.
    ///
    /// Returns `false` if the entry has run out of retries, or was cancelled.
    pub fn take_retry(&mut self) -> bool {
        if self.suppressed || self.retries_left == 0 {
            return false;
        }
        self.retries_left -= 1;
        true
    }

    /// Puts the entry back in the queue, to be sent no earlier than
    /// `not_before`.
    pub fn requeue(&mut self, not_before: Instant, now: Instant) {
        self.socket = None;
        self.not_before = Some(not_before);
        self.set_state(EntryState::Queued, now);
    }

    /// Retires the entry after a Completion.
    ///
    /// Inquiries pass `data` to their callback, commands run their completion
    /// continuation. Neither happens for a cancelled entry.
    pub fn complete(mut self, socket: u8, data: Vec<u8>, now: Instant) {
        if self.suppressed {
            debug!("{} ({}): ignoring completion, cancelled", self.id, self.address());
            self.set_state(EntryState::Completed, now);
            return;
        }

        let r = match &self.message {
            Message::Command(c) => {
                c.complete();
                Ok(())
            }
            Message::Inquiry(i) => i.deliver(&data),
        };

        match r {
            Ok(()) => {
                self.set_state(EntryState::Completed, now);
                self.responder.resolve(Ok(Response { socket, data }));
            }
            Err(e) => {
                error!(
                    "{} ({}): could not decode answer {}: {e}",
                    self.id,
                    self.address(),
                    hex::encode(&data)
                );
                self.set_state(EntryState::Errored, now);
                self.responder.resolve(Err(e.into()));
            }
        }
    }

    /// Retires the entry with an error.
    pub fn fail(mut self, state: EntryState, e: Error, now: Instant) {
        if self.suppressed {
            debug!("{} ({}): cancelled entry ended with {e}", self.id, self.address());
        } else {
            error!("{} ({}): {e}", self.id, self.address());
        }
        self.set_state(state, now);
        self.responder.resolve(Err(e));
    }

    /// Cancels the entry.
    ///
    /// The caller is told straight away. An entry which is still queued should
    /// be dropped afterwards; one which is in flight keeps its socket until
    /// the device answers or it times out.
    pub fn cancel(&mut self) {
        if self.responder.is_resolved() {
            return;
        }
        debug!("{} ({}): cancelled in {:?}", self.id, self.address(), self.state);
        self.suppressed = true;
        self.responder.set_state(EntryState::Cancelled);
        self.responder.resolve(Err(Error::Cancelled));
    }
}
