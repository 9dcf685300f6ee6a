//! Command queue.
//!
//! [Dispatcher] is a synchronous state machine. It never does any I/O itself:
//! bytes from the device go in through [`Dispatcher::receive()`], and frames
//! for the device come out of [`Dispatcher::poll_transmit()`].
//! [`Dispatcher::pump()`] handles timeouts and sends queued messages.
//!
//! ## Sockets
//!
//! Each device has a small number of command buffers (sockets). The
//! dispatcher keeps at most [`max_sockets`][DispatcherConfig::max_sockets]
//! messages in flight per device; anything else waits in the queue, in
//! submission order.
//!
//! Replies are matched to in-flight messages like this:
//!
//! * An Ack goes to the oldest unacknowledged command for the device, or
//!   failing that, the oldest unacknowledged inquiry. Inquiries are usually
//!   answered without an Ack.
//! * A Completion or Error with a socket number goes to the oldest message
//!   acknowledged on that socket, or failing that, the oldest unacknowledged
//!   message.
//! * A Completion on socket 0 (an inquiry answer) goes to the oldest
//!   unacknowledged inquiry, or failing that, the oldest unacknowledged
//!   command.
//! * A Completion carrying data only ever goes to an inquiry.
//! * An Error on socket 0 (rejected before an Ack) goes to the oldest
//!   unacknowledged message.
//!
//! Broadcast messages don't get replies, and complete as soon as they are
//! sent.
use crate::{
    config::DispatcherConfig,
    handle::{EntryId, Handle, Submission},
    protocol::{Address, ErrorCode, Frame, FrameDecoder, Message, Reply},
    socket::{Entry, EntryState},
    Error, Result,
};
use std::{collections::VecDeque, io::Error as IoError, sync::Arc};
use tokio::time::Instant;

pub struct Dispatcher {
    config: DispatcherConfig,
    decoder: FrameDecoder,
    /// Entries waiting for a socket. This is kept sorted by [EntryId].
    queue: VecDeque<Entry>,
    /// Entries in [Sent][EntryState::Sent] or [Acked][EntryState::Acked]
    /// state.
    in_flight: Vec<Entry>,
    /// Frames waiting to be written to the link.
    outbox: VecDeque<Vec<u8>>,
    next_id: u64,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            config,
            decoder: FrameDecoder::new(),
            queue: VecDeque::new(),
            in_flight: Vec::new(),
            outbox: VecDeque::new(),
            next_id: 0,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Queues a message.
    ///
    /// The message is encoded straight away, so encoding errors are returned
    /// here. Nothing is sent until the next [`pump()`][Self::pump].
    pub fn submit(&mut self, message: impl Into<Message>) -> Result<Handle> {
        self.next_id += 1;
        let (submission, handle) = Submission::new(EntryId(self.next_id), message.into())?;
        self.enqueue(submission);
        Ok(handle)
    }

    /// Queues a message which has already been encoded.
    pub(crate) fn enqueue(&mut self, submission: Submission) {
        let entry = Entry::new(submission, &self.config, Instant::now());
        debug!("{} ({}): queued", entry.id, entry.address());
        self.insert_queued(entry);
    }

    fn insert_queued(&mut self, entry: Entry) {
        let pos = self.queue.partition_point(|e| e.id < entry.id);
        self.queue.insert(pos, entry);
    }

    /// Cancels a message.
    ///
    /// A queued message is dropped, and is never sent. A message which has
    /// already been sent stays in flight until the device answers or it times
    /// out, but nothing is done with the answer.
    ///
    /// Either way, the message's [Handle] resolves to [`Error::Cancelled`].
    ///
    /// ## Errors
    ///
    /// * [`Error::NotFound`] if `id` has already finished, or was never
    ///   submitted
    pub fn cancel(&mut self, id: EntryId) -> Result {
        if let Some(pos) = self.queue.iter().position(|e| e.id == id) {
            if let Some(mut entry) = self.queue.remove(pos) {
                entry.cancel();
            }
            return Ok(());
        }

        let entry = self
            .in_flight
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(Error::NotFound)?;
        if !entry.suppressed {
            entry.cancel();
        }
        Ok(())
    }

    /// Gets the state of a message which has not finished yet.
    pub fn status(&self, id: EntryId) -> Option<EntryState> {
        self.queue
            .iter()
            .chain(self.in_flight.iter())
            .find(|e| e.id == id)
            .map(Entry::status)
    }

    /// Number of messages in flight for `address`.
    pub fn in_flight(&self, address: Address) -> usize {
        self.in_flight
            .iter()
            .filter(|e| e.address() == address)
            .count()
    }

    /// Number of messages which have not finished yet.
    pub fn len(&self) -> usize {
        self.queue.len() + self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty() && self.in_flight.is_empty()
    }

    /// Handles bytes received from the link.
    ///
    /// Bytes may arrive in any size pieces. Malformed, unknown and unexpected
    /// frames are logged and dropped.
    pub fn receive(&mut self, b: &[u8], now: Instant) {
        self.decoder.extend(b);
        while let Some(frame) = self.decoder.next_frame() {
            // Already logged by the decoder
            let Ok(frame) = frame else {
                continue;
            };
            self.handle_frame(frame, now);
        }
    }

    fn handle_frame(&mut self, frame: Frame, now: Instant) {
        trace!(
            "<<< {:02x}{}ff",
            u8::from(frame.header),
            hex::encode(&frame.payload)
        );
        let Some(address) = frame.source() else {
            warn!("ignoring frame from invalid sender: {frame:?}");
            return;
        };

        match frame.reply() {
            Reply::Ack { socket } => {
                let sent = |e: &Entry| e.address() == address && e.state == EntryState::Sent;
                let Some(i) = self
                    .oldest(|e| sent(e) && !e.is_inquiry())
                    .or_else(|| self.oldest(|e| sent(e) && e.is_inquiry()))
                else {
                    warn!("{address}: unexpected ack on socket {socket}");
                    return;
                };
                self.in_flight[i].ack(socket, now);
            }

            Reply::Completion { socket, data } => {
                let Some(i) = self.find_completion(address, socket, &data) else {
                    warn!(
                        "{address}: unexpected completion on socket {socket}: {}",
                        hex::encode(&data)
                    );
                    return;
                };
                let entry = self.in_flight.remove(i);
                debug!("{} ({address}): completed on socket {socket}", entry.id);
                entry.complete(socket, data, now);
            }

            Reply::Error { socket, code } => {
                let Some(i) = self.find_error(address, socket) else {
                    warn!("{address}: unexpected error 0x{code:02x} on socket {socket}");
                    return;
                };
                let mut entry = self.in_flight.remove(i);
                let retryable = ErrorCode::from_code(code).is_some_and(ErrorCode::is_retryable);

                if retryable && entry.take_retry() {
                    debug!(
                        "{} ({address}): command buffer full, trying again ({} retries left)",
                        entry.id, entry.retries_left
                    );
                    entry.requeue(now + self.config.retry_delay, now);
                    self.insert_queued(entry);
                } else {
                    entry.fail(EntryState::Errored, Error::Device(code), now);
                }
            }

            Reply::Unknown(payload) => {
                warn!("{address}: ignoring unknown reply: {}", hex::encode(payload));
            }
        }
    }

    /// Finds the oldest in-flight entry matching `f`.
    fn oldest(&self, f: impl Fn(&Entry) -> bool) -> Option<usize> {
        self.in_flight
            .iter()
            .enumerate()
            .filter(|(_, e)| f(*e))
            .min_by_key(|(_, e)| e.id)
            .map(|(i, _)| i)
    }

    fn find_acked(&self, address: Address, socket: u8) -> Option<usize> {
        if socket == 0 {
            return None;
        }
        self.oldest(|e| {
            e.address() == address && e.state == EntryState::Acked && e.socket == Some(socket)
        })
    }

    fn find_completion(&self, address: Address, socket: u8, data: &[u8]) -> Option<usize> {
        // Commands never return data
        let sent = |e: &Entry| {
            e.address() == address
                && e.state == EntryState::Sent
                && (e.is_inquiry() || data.is_empty())
        };

        if let Some(i) = self.find_acked(address, socket) {
            return Some(i);
        }
        if socket == 0 {
            if let Some(i) = self.oldest(|e| sent(e) && e.is_inquiry()) {
                return Some(i);
            }
        }
        self.oldest(sent)
    }

    fn find_error(&self, address: Address, socket: u8) -> Option<usize> {
        self.find_acked(address, socket)
            .or_else(|| self.oldest(|e| e.address() == address && e.state == EntryState::Sent))
    }

    /// Handles timeouts, then sends queued messages as sockets allow.
    pub fn pump(&mut self, now: Instant) {
        self.check_timeouts(now);
        self.dispatch(now);
    }

    fn check_timeouts(&mut self, now: Instant) {
        let mut i = 0;
        while i < self.in_flight.len() {
            let entry = &mut self.in_flight[i];
            if !matches!(entry.deadline(&self.config), Some(d) if d <= now) {
                i += 1;
                continue;
            }

            if entry.take_retry() {
                debug!(
                    "{} ({}): no reply while {:?}, sending again ({} retries left)",
                    entry.id,
                    entry.address(),
                    entry.state,
                    entry.retries_left
                );
                entry.mark_sent(now);
                self.outbox.push_back(entry.frame.clone());
                i += 1;
            } else {
                let entry = self.in_flight.remove(i);
                entry.fail(EntryState::TimedOut, Error::Timeout, now);
            }
        }
    }

    fn dispatch(&mut self, now: Instant) {
        // Addresses which can't take anything else in this pass. Later
        // entries for them have to wait, so order is kept.
        let mut blocked = Vec::new();
        let mut i = 0;

        while i < self.queue.len() {
            let entry = &self.queue[i];
            let address = entry.address();
            if blocked.contains(&address) {
                i += 1;
                continue;
            }

            let full =
                !address.is_broadcast() && self.in_flight(address) >= self.config.max_sockets;
            if full || !entry.ready(now) {
                blocked.push(address);
                i += 1;
                continue;
            }

            let Some(mut entry) = self.queue.remove(i) else {
                break;
            };
            entry.mark_sent(now);
            self.outbox.push_back(entry.frame.clone());

            if address.is_broadcast() {
                entry.complete(0, Vec::new(), now);
            } else {
                self.in_flight.push(entry);
            }
        }
    }

    /// Gets the next frame to write to the link.
    pub fn poll_transmit(&mut self) -> Option<Vec<u8>> {
        let frame = self.outbox.pop_front()?;
        trace!(">>> {}", hex::encode(&frame));
        Some(frame)
    }

    /// The next time [`pump()`][Self::pump] has something to do, other than
    /// sending newly submitted messages.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.in_flight
            .iter()
            .filter_map(|e| e.deadline(&self.config))
            .chain(self.queue.iter().filter_map(|e| e.not_before))
            .min()
    }

    /// Ends every in-flight message with [`Error::Transport`], after the link
    /// to the device failed.
    ///
    /// Queued messages are kept.
    pub fn fail_link(&mut self, e: Arc<IoError>) {
        error!("link failed with {} message(s) in flight: {e}", self.in_flight.len());
        let now = Instant::now();
        self.outbox.clear();
        self.decoder.clear();
        for entry in self.in_flight.drain(..) {
            entry.fail(EntryState::Errored, Error::Transport(e.clone()), now);
        }
    }

    /// Ends every outstanding message with [`Error::Disconnected`].
    pub fn shutdown(&mut self) {
        if self.is_empty() {
            return;
        }

        info!("shutting down with {} outstanding message(s)", self.len());
        let now = Instant::now();
        self.outbox.clear();
        for entry in self.in_flight.drain(..).chain(self.queue.drain(..)) {
            entry.fail(EntryState::Errored, Error::Disconnected, now);
        }
    }
}
