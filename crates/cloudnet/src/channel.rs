//! # Network Channel
//!
//! One addressable, full-duplex endpoint bound to one transport.
//!
//! ## Invariants
//!
//! 1. A correlation id is present in `pending` from just before its query is
//!    transmitted until the query is answered, times out, or the channel closes.
//! 2. An inbound packet whose correlation id has a waiter resolves that waiter
//!    and is not seen by any listener.
//! 3. Closing is idempotent. The first close removes the channel from the
//!    active set, fails every pending query, runs the close hook, and only then
//!    releases the transport.

use std::fmt;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::listener::PacketListenerRegistry;
use crate::packet::Packet;
use crate::task::AsyncResult;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Closed(ChannelId),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed(id) => write!(f, "{} is closed", id),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Per-channel hooks.
pub trait ChannelHandler: Send + Sync + 'static {
    /// Called before general dispatch. Returning `false` swallows the packet.
    fn on_packet(&self, _channel: &Arc<NetworkChannel>, _packet: &Packet) -> bool {
        true
    }

    fn on_close(&self, _channel: &Arc<NetworkChannel>) {}
}

/// Accepts every packet and ignores close.
pub struct DefaultChannelHandler;

impl ChannelHandler for DefaultChannelHandler {}

pub(crate) type ActiveSet = DashMap<ChannelId, Arc<NetworkChannel>>;

pub struct NetworkChannel {
    id: ChannelId,
    outbound: mpsc::UnboundedSender<Packet>,
    pending: Arc<DashMap<Uuid, AsyncResult<Packet>>>,
    closed: AtomicBool,
    handler: Arc<dyn ChannelHandler>,
    transport: Arc<dyn Transport>,
    active: Weak<ActiveSet>,
    io: Handle,
    query_timeout: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl NetworkChannel {
    pub(crate) fn new(
        id: ChannelId,
        outbound: mpsc::UnboundedSender<Packet>,
        handler: Arc<dyn ChannelHandler>,
        transport: Arc<dyn Transport>,
        active: Weak<ActiveSet>,
        io: Handle,
        query_timeout: Duration,
    ) -> Self {
        Self {
            id,
            outbound,
            pending: Arc::new(DashMap::new()),
            closed: AtomicBool::new(false),
            handler,
            transport,
            active,
            io,
            query_timeout,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    pub fn pending_queries(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn attach_task(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        if self.is_open() {
            tasks.push(task);
        } else {
            task.abort();
        }
    }

    /// Queues `packet` for transmission. Never blocks.
    pub fn send_packet(&self, packet: Packet) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Closed(self.id));
        }
        self.outbound.send(packet).map_err(|_| Error::Closed(self.id))
    }

    /// Sends `packet` under a fresh correlation id and waits for the reply with
    /// the channel's default timeout.
    pub fn send_query(&self, packet: Packet) -> AsyncResult<Packet> {
        self.send_query_with_timeout(packet, self.query_timeout)
    }

    /// On timeout the result is cancelled and its id released; a reply that
    /// arrives later finds no waiter.
    pub fn send_query_with_timeout(&self, packet: Packet, timeout: Duration) -> AsyncResult<Packet> {
        let id = Uuid::new_v4();
        let waiter = AsyncResult::new();
        self.pending.insert(id, waiter.clone());

        if let Err(e) = self.send_packet(packet.with_correlation(id)) {
            self.pending.remove(&id);
            waiter.fail(e.into());
            return waiter;
        }

        let pending = Arc::downgrade(&self.pending);
        let channel = self.id;
        self.io.spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(pending) = pending.upgrade() else { return };
            if let Some((_, waiter)) = pending.remove(&id) {
                tracing::debug!(%channel, query = %id, "query timed out");
                waiter.cancel();
            }
        });
        waiter
    }

    /// Routes one inbound packet: waiter first, then the handler hook, then
    /// the listeners of the packet's channel.
    pub(crate) fn dispatch(self: &Arc<Self>, packet: Packet, listeners: &PacketListenerRegistry) {
        if let Some(id) = packet.correlation {
            if let Some((_, waiter)) = self.pending.remove(&id) {
                waiter.complete(packet);
                return;
            }
        }
        if !self.handler.on_packet(self, &packet) {
            return;
        }
        if !listeners.dispatch(self, &packet) {
            tracing::trace!(channel = %self.id, packet = packet.channel, "no listener for packet");
        }
    }

    pub fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(channel = %self.id, "closing channel");

        if let Some(active) = self.active.upgrade() {
            active.remove(&self.id);
        }

        let keys: Vec<Uuid> = self.pending.iter().map(|e| *e.key()).collect();
        for key in keys {
            if let Some((_, waiter)) = self.pending.remove(&key) {
                waiter.fail(Error::Closed(self.id).into());
            }
        }

        self.handler.on_close(self);

        self.transport.close();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl fmt::Debug for NetworkChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkChannel")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .field("pending", &self.pending.len())
            .finish()
    }
}
