//! A framed, stoppable connection to one peer
//!
//! The read loop decodes frames and delivers them to per-type subscribers
//! inside the channel's synchronized section, so a channel's protocols never
//! observe two of their callbacks at once. Writes are queued and performed in
//! order by a dedicated task. Any fatal read or write error stops the channel;
//! stopping is idempotent and notifies every subscriber exactly once.

use super::authority::Authority;
use super::connector::Connection;
use super::message_subscriber::{MessageResult, MessageSubscriber, Routed};
use super::pending::Pendable;
use super::socket::BoxedSocket;
use crate::concurrency::{Deadline, Dispatcher, ExecutionContext, Subscriber};
use crate::error::{Error, Result};
use crate::message::{Frame, FrameCodec, Message, Version};
use crate::settings::Settings;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use rand::Rng;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

type SendHandler = Box<dyn FnOnce(Result<()>) + Send + 'static>;
type Reader = SplitStream<Framed<BoxedSocket, FrameCodec>>;
type Writer = SplitSink<Framed<BoxedSocket, FrameCodec>, Frame>;

struct Outgoing {
    frame: Frame,
    handler: SendHandler,
}

struct Io {
    reader: Reader,
    writer: Writer,
    queue: mpsc::UnboundedReceiver<Outgoing>,
}

static NEXT_CHANNEL: AtomicU64 = AtomicU64::new(1);

pub struct Channel {
    id: u64,
    authority: Authority,
    local: Option<Authority>,
    inbound: bool,
    magic: u32,
    nonce: u64,
    negotiated_version: AtomicU32,
    peer_version: Mutex<Option<Arc<Version>>>,
    stopped: AtomicBool,
    strand: Dispatcher,
    messages: Arc<MessageSubscriber>,
    stop_subscriber: Arc<Subscriber<Error>>,
    outbound: mpsc::UnboundedSender<Outgoing>,
    io: Mutex<Option<Io>>,
    cancel: CancellationToken,
    inactivity: Deadline,
    expiration: Deadline,
}

impl Channel {
    /// Channel for a connection accepted from `authority`.
    pub fn inbound(
        socket: BoxedSocket,
        authority: Authority,
        settings: &Settings,
        context: ExecutionContext,
    ) -> Arc<Self> {
        Self::new(socket, authority, None, true, settings, context)
    }

    /// Channel for a connection this node initiated.
    pub fn outbound(
        connection: Connection,
        settings: &Settings,
        context: ExecutionContext,
    ) -> Arc<Self> {
        Self::new(
            connection.socket,
            connection.remote,
            connection.local,
            false,
            settings,
            context,
        )
    }

    fn new(
        socket: BoxedSocket,
        authority: Authority,
        local: Option<Authority>,
        inbound: bool,
        settings: &Settings,
        context: ExecutionContext,
    ) -> Arc<Self> {
        let codec = FrameCodec::new(settings.identifier, settings.maximum_payload);
        let (writer, reader) = Framed::new(socket, codec).split();
        let (outbound, queue) = mpsc::unbounded_channel();

        Arc::new(Self {
            id: NEXT_CHANNEL.fetch_add(1, Ordering::Relaxed),
            authority,
            local,
            inbound,
            magic: settings.identifier,
            nonce: rand::thread_rng().gen_range(1..=u64::MAX),
            negotiated_version: AtomicU32::new(settings.protocol_maximum),
            peer_version: Mutex::new(None),
            stopped: AtomicBool::new(false),
            strand: Dispatcher::new(context.clone(), "channel"),
            messages: Arc::new(MessageSubscriber::new(&context)),
            stop_subscriber: Arc::new(Subscriber::new(context.clone(), "channel stop")),
            outbound,
            io: Mutex::new(Some(Io {
                reader,
                writer,
                queue,
            })),
            cancel: CancellationToken::new(),
            inactivity: Deadline::new(context.clone(), settings.channel_inactivity()),
            expiration: Deadline::new(context, settings.channel_expiration()),
        })
    }

    // -- Accessors -------------------------------------------------------------

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn authority(&self) -> Authority {
        self.authority
    }

    /// Local end of an outbound connection.
    pub fn local(&self) -> Option<Authority> {
        self.local
    }

    pub fn is_inbound(&self) -> bool {
        self.inbound
    }

    /// Random nonce sent in our version message, used to detect connecting
    /// to ourselves.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn negotiated_version(&self) -> u32 {
        self.negotiated_version.load(Ordering::Acquire)
    }

    pub fn set_negotiated_version(&self, value: u32) {
        self.negotiated_version.store(value, Ordering::Release);
    }

    pub fn peer_version(&self) -> Option<Arc<Version>> {
        self.peer_version
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_peer_version(&self, version: Arc<Version>) {
        *self.peer_version.lock().unwrap_or_else(PoisonError::into_inner) = Some(version);
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Dispatcher whose synchronized section also covers message delivery.
    pub fn strand(&self) -> &Dispatcher {
        &self.strand
    }

    pub fn context(&self) -> &ExecutionContext {
        self.strand.context()
    }

    // -- Lifecycle -------------------------------------------------------------

    /// Begin reading and writing. Subscribe protocols before starting so no
    /// early message is missed.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.stopped() {
            return Err(Error::ChannelStopped);
        }

        let io = self.io.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(io) = io else {
            return Err(Error::OperationFailed);
        };

        log::debug!(
            "Starting {} channel [{}]",
            if self.inbound { "inbound" } else { "outbound" },
            self.authority
        );

        let context = self.context().clone();
        context.spawn(self.clone().write_loop(io.writer, io.queue));
        context.spawn(self.clone().read_loop(io.reader));
        self.reset_inactivity();
        self.start_expiration();
        Ok(())
    }

    /// Stop the channel. Only the first call has any effect.
    pub fn stop(&self, code: Error) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        log::debug!("Stopping channel [{}]: {}", self.authority, code);
        self.cancel.cancel();
        self.inactivity.stop();
        self.expiration.stop();

        // Never started: fail anything already queued.
        let io = self.io.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut io) = io {
            io.queue.close();
            while let Ok(outgoing) = io.queue.try_recv() {
                (outgoing.handler)(Err(Error::ChannelStopped));
            }
        }

        let messages = self.messages.clone();
        let stop_subscriber = self.stop_subscriber.clone();
        self.strand.synchronized(move || {
            messages.stop(Error::ChannelStopped);
            stop_subscriber.stop(code);
        });
    }

    // -- Subscription ----------------------------------------------------------

    /// Receive messages of type `M` while `handler` returns true. After the
    /// channel stops the handler receives `ChannelStopped` once.
    pub fn subscribe<M, H>(&self, handler: H)
    where
        M: Routed,
        H: FnMut(MessageResult<M>) -> bool + Send + 'static,
    {
        self.messages.subscribe::<M, H>(handler);
    }

    /// Be told once, with the stop reason, when the channel stops.
    pub fn subscribe_stop<H>(&self, handler: H)
    where
        H: FnOnce(Error) + Send + 'static,
    {
        self.stop_subscriber.subscribe(handler);
    }

    // -- Sending ---------------------------------------------------------------

    /// Queue `message`; `handler` receives the write result.
    pub fn send<M, H>(&self, message: &M, handler: H)
    where
        M: Message,
        H: FnOnce(Result<()>) + Send + 'static,
    {
        if self.stopped() {
            handler(Err(Error::ChannelStopped));
            return;
        }

        let frame = Frame::from_message(self.magic, message, self.negotiated_version());
        let outgoing = Outgoing {
            frame,
            handler: Box::new(handler),
        };
        if let Err(mpsc::error::SendError(outgoing)) = self.outbound.send(outgoing) {
            (outgoing.handler)(Err(Error::ChannelStopped));
        }
    }

    /// Send and wait for the write to complete.
    pub async fn send_async<M: Message>(&self, message: &M) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(message, move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or(Err(Error::ChannelStopped))
    }

    // -- Tasks -----------------------------------------------------------------

    async fn read_loop(self: Arc<Self>, mut reader: Reader) {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = reader.next() => next,
            };

            let frame = match next {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    log::debug!("Invalid stream from [{}]: {}", self.authority, e);
                    self.stop(e);
                    break;
                }
                None => {
                    log::debug!("Peer [{}] closed the connection", self.authority);
                    self.stop(Error::BadStream("connection closed".to_string()));
                    break;
                }
            };

            self.reset_inactivity();
            log::trace!("Received {} from [{}]", frame.command(), self.authority);

            let _guard = self.strand.lock().await;
            if self.stopped() {
                break;
            }
            match self
                .messages
                .load(frame.command(), &frame.payload, self.negotiated_version())
            {
                Ok(()) => {}
                Err(Error::UnknownMessage(command)) => {
                    log::trace!("Ignoring {} from [{}]", command, self.authority);
                }
                Err(e) => log::debug!("Dropped message from [{}]: {}", self.authority, e),
            }
        }
    }

    async fn write_loop(
        self: Arc<Self>,
        mut writer: Writer,
        mut queue: mpsc::UnboundedReceiver<Outgoing>,
    ) {
        loop {
            let outgoing = tokio::select! {
                _ = self.cancel.cancelled() => break,
                outgoing = queue.recv() => match outgoing {
                    Some(outgoing) => outgoing,
                    None => break,
                },
            };

            let command = outgoing.frame.heading.command.clone();
            let result = tokio::select! {
                _ = self.cancel.cancelled() => Err(Error::ChannelStopped),
                result = writer.send(outgoing.frame) => result,
            };

            match &result {
                Ok(()) => log::trace!("Sent {} to [{}]", command, self.authority),
                Err(e) => {
                    log::debug!("Failed to send {} to [{}]: {}", command, self.authority, e);
                    self.stop(e.clone());
                }
            }
            (outgoing.handler)(result);
        }

        queue.close();
        while let Ok(outgoing) = queue.try_recv() {
            (outgoing.handler)(Err(Error::ChannelStopped));
        }
    }

    // -- Timers ----------------------------------------------------------------

    fn reset_inactivity(self: &Arc<Self>) {
        if self.inactivity.duration().is_zero() || self.stopped() {
            return;
        }
        let channel = Arc::downgrade(self);
        self.inactivity.start(move |result| {
            if let (Ok(()), Some(channel)) = (result, channel.upgrade()) {
                log::debug!("Channel inactivity timeout [{}]", channel.authority);
                channel.stop(Error::ChannelTimeout);
            }
        });
    }

    fn start_expiration(self: &Arc<Self>) {
        if self.expiration.duration().is_zero() {
            return;
        }
        let channel = Arc::downgrade(self);
        self.expiration.start(move |result| {
            if let (Ok(()), Some(channel)) = (result, channel.upgrade()) {
                log::debug!("Channel lifetime expired [{}]", channel.authority);
                channel.stop(Error::ChannelTimeout);
            }
        });
    }
}

impl Pendable for Channel {
    type Key = u64;

    fn key(&self) -> u64 {
        self.nonce
    }

    fn cancel(&self, code: Error) {
        self.stop(code);
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("authority", &self.authority)
            .field("inbound", &self.inbound)
            .field("stopped", &self.stopped())
            .finish()
    }
}
