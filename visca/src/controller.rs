use crate::{
    config::DispatcherConfig,
    dispatcher::Dispatcher,
    error::Error,
    handle::{EntryId, Handle, Response, Submission},
    protocol::Message,
};
use futures::{pin_mut, StreamExt};
use std::{
    io::{Error as IoError, ErrorKind},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::{
    io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    net::{TcpStream, ToSocketAddrs},
    select,
    sync::mpsc,
    time::{interval, Instant, MissedTickBehavior},
};
use tokio_stream::wrappers::IntervalStream;

/// Internal type for asynchronous message passing.
enum AsyncCommand {
    /// Queue an encoded message.
    Submit(Submission),

    /// Cancel a message.
    Cancel(EntryId),
}

#[allow(rustdoc::private_intra_doc_links)]
/// [ViscaController] sends commands and inquiries to the devices on a VISCA
/// link.
///
/// ## General design
///
/// The link is owned by a [ViscaReceiver] task, which runs a [Dispatcher].
/// It waits for:
///
/// * messages submitted through any clone of the [ViscaController],
/// * bytes from the link,
/// * a periodic tick, to handle timeouts.
///
/// After each of these, it pumps the [Dispatcher] and writes any frames it
/// produces to the link.
///
/// The task stops when the link closes or fails, or once every
/// [ViscaController] has been dropped and all outstanding messages have
/// finished.
#[derive(Clone)]
pub struct ViscaController {
    cmd_tx: mpsc::UnboundedSender<AsyncCommand>,
    next_id: Arc<AtomicU64>,
}

impl ViscaController {
    /// Starts a controller on `transport`.
    ///
    /// This must be called from within a tokio runtime.
    pub fn new<T>(transport: T, config: DispatcherConfig) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (receiver, cmd_tx) = ViscaReceiver::new(transport, config);

        debug!("Spawning receiver task...");
        tokio::task::spawn(async move { receiver.run().await });

        Self {
            cmd_tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Connects to a VISCA-over-IP device or a serial bridge over TCP.
    pub async fn connect_tcp<A: ToSocketAddrs>(
        addr: A,
        config: DispatcherConfig,
    ) -> Result<Self, Error> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        info!("connected to {}", stream.peer_addr()?);
        Ok(Self::new(stream, config))
    }

    /// Queues a message for sending.
    ///
    /// The message is encoded straight away, so encoding errors are returned
    /// here. This never blocks.
    ///
    /// ## Errors
    ///
    /// * [`Error::Protocol`] if the message could not be encoded
    /// * [`Error::ChannelUnavailable`] if the receiver task has stopped
    pub fn submit(&self, message: impl Into<Message>) -> Result<Handle, Error> {
        let id = EntryId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (submission, handle) = Submission::new(id, message.into())?;
        self.cmd_tx
            .send(AsyncCommand::Submit(submission))
            .map_err(|_| Error::ChannelUnavailable)?;
        Ok(handle)
    }

    /// Cancels a message.
    ///
    /// See [`Dispatcher::cancel()`] for details. Cancelling a message which
    /// has already finished does nothing.
    pub fn cancel(&self, handle: &Handle) -> Result<(), Error> {
        self.cmd_tx
            .send(AsyncCommand::Cancel(handle.id()))
            .map_err(|_| Error::ChannelUnavailable)
    }

    /// Sends a message, and waits for it to finish.
    pub async fn send(&self, message: impl Into<Message>) -> Result<Response, Error> {
        self.submit(message)?.outcome().await
    }

    /// Returns `true` if the receiver task has stopped.
    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }
}

/// Owns the link to the device.
///
/// This runs its own event loop ([`ViscaReceiver::run()`]).
struct ViscaReceiver<T> {
    reader: ReadHalf<T>,
    writer: WriteHalf<T>,
    cmd_rx: mpsc::UnboundedReceiver<AsyncCommand>,
    dispatcher: Dispatcher,
    /// Every [ViscaController] has been dropped.
    closing: bool,
}

impl<T> ViscaReceiver<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Size of the read buffer. This is more than a few frames' worth.
    const READ_BUFFER_SIZE: usize = 64;

    fn new(transport: T, config: DispatcherConfig) -> (Self, mpsc::UnboundedSender<AsyncCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (reader, writer) = split(transport);
        (
            Self {
                reader,
                writer,
                cmd_rx,
                dispatcher: Dispatcher::new(config),
                closing: false,
            },
            cmd_tx,
        )
    }

    async fn run(mut self) {
        debug!("starting main_loop");
        match self.main_loop().await {
            Ok(()) => debug!("main_loop done"),
            Err(e) => error!("main_loop stopped: {e}"),
        }

        self.dispatcher.shutdown();
        if let Err(e) = self.writer.shutdown().await {
            debug!("error closing link: {e}");
        }
    }

    /// Main event loop.
    async fn main_loop(&mut self) -> Result<(), Error> {
        let mut ticker = interval(self.dispatcher.config().tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let tick = IntervalStream::new(ticker);
        pin_mut!(tick);

        let mut buf = [0; Self::READ_BUFFER_SIZE];

        loop {
            select! {
                // Look for something to send
                cmd = self.cmd_rx.recv(), if !self.closing => {
                    match cmd {
                        Some(AsyncCommand::Submit(submission)) => {
                            self.dispatcher.enqueue(submission);
                        }
                        Some(AsyncCommand::Cancel(id)) => {
                            if let Err(e) = self.dispatcher.cancel(id) {
                                debug!("cancel {id}: {e}");
                            }
                        }
                        None => {
                            debug!("all controllers dropped, finishing outstanding messages");
                            self.closing = true;
                        }
                    }
                }

                // Get bytes from the device
                r = self.reader.read(&mut buf) => {
                    match r {
                        Ok(0) => {
                            info!("link closed by device");
                            let e = Arc::new(IoError::from(ErrorKind::UnexpectedEof));
                            self.dispatcher.fail_link(e.clone());
                            return Err(Error::Transport(e));
                        }
                        Ok(l) => self.dispatcher.receive(&buf[..l], Instant::now()),
                        Err(e) => {
                            let e = Arc::new(e);
                            self.dispatcher.fail_link(e.clone());
                            return Err(Error::Transport(e));
                        }
                    }
                }

                Some(_) = tick.next() => (),
            }

            self.dispatcher.pump(Instant::now());
            if let Err(e) = self.flush().await {
                let e = Arc::new(e);
                self.dispatcher.fail_link(e.clone());
                return Err(Error::Transport(e));
            }

            if self.closing && self.dispatcher.is_empty() {
                return Ok(());
            }
        }
    }

    /// Writes every pending frame to the link.
    async fn flush(&mut self) -> Result<(), IoError> {
        let mut wrote = false;
        while let Some(frame) = self.dispatcher.poll_transmit() {
            self.writer.write_all(&frame).await?;
            wrote = true;
        }

        if wrote {
            self.writer.flush().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{protocol::Address, socket::EntryState, Result};
    use std::time::Duration;
    use tokio::io::{duplex, DuplexStream};

    async fn read_frame(camera: &mut DuplexStream) -> Result<Vec<u8>> {
        let mut o = Vec::new();
        loop {
            let b = camera.read_u8().await?;
            o.push(b);
            if b == 0xff {
                return Ok(o);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn round_trip() -> Result {
        let (link, mut camera) = duplex(64);
        let controller = ViscaController::new(link, DispatcherConfig::default());

        let cmd = crate::protocol::Command::with_bytes(Address::camera(1)?, &[0x04, 0x00, 0x02])?;
        let handle = controller.submit(cmd)?;
        assert_eq!(hex::decode("8101040002ff")?, read_frame(&mut camera).await?);

        camera.write_all(&hex::decode("9041ff90")?).await?;
        camera.write_all(&hex::decode("51ff")?).await?;
        assert_eq!(1, handle.outcome().await?.socket);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn retransmit() -> Result {
        let (link, mut camera) = duplex(64);
        let config = DispatcherConfig::default()
            .with_ack_timeout(Duration::from_millis(50))
            .with_retry_limit(1);
        let controller = ViscaController::new(link, config);

        let cmd = crate::protocol::Command::with_bytes(Address::camera(1)?, &[0x04, 0x00, 0x02])?;
        let handle = controller.submit(cmd)?;
        let first = read_frame(&mut camera).await?;
        let start = Instant::now();
        assert_eq!(first, read_frame(&mut camera).await?);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(EntryState::Sent, handle.status());

        assert!(matches!(handle.outcome().await, Err(Error::Timeout)));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn link_closed() -> Result {
        let (link, mut camera) = duplex(64);
        let controller = ViscaController::new(link, DispatcherConfig::default());

        let cmd = crate::protocol::Command::with_bytes(Address::camera(1)?, &[0x04, 0x00, 0x02])?;
        let sent = controller.submit(cmd.clone())?;
        read_frame(&mut camera).await?;
        drop(camera);

        assert!(matches!(sent.outcome().await, Err(Error::Transport(_))));
        // The receiver task stops
        while !controller.is_closed() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(matches!(
            controller.submit(cmd),
            Err(Error::ChannelUnavailable)
        ));
        Ok(())
    }
}
