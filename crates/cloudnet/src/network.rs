//! # Network Component
//!
//! Owns the set of active channels and the tasks that drive them.
//!
//! Each connected transport gets three tasks:
//!
//! - a reader on the I/O runtime, decoding frames into packets,
//! - a writer on the I/O runtime, draining the channel's outbound queue,
//! - a dispatch loop on the dispatcher runtime, handling packets one at a time
//!   in receipt order.
//!
//! The I/O tasks never run listener code. A frame that does not decode closes
//! the channel; a listener error or panic only gets logged.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::channel::ChannelHandler;
use crate::channel::ChannelId;
use crate::channel::NetworkChannel;
use crate::listener::PacketListenerRegistry;
use crate::listener::panic_message;
use crate::packet::Packet;
use crate::transport::Transport;

pub struct NetworkComponent {
    channels: Arc<DashMap<ChannelId, Arc<NetworkChannel>>>,
    listeners: Arc<PacketListenerRegistry>,
    io: Handle,
    dispatch: Handle,
    next_id: AtomicU64,
    query_timeout: Duration,
}

impl NetworkComponent {
    pub fn new(listeners: Arc<PacketListenerRegistry>, io: Handle, dispatch: Handle, query_timeout: Duration) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            listeners,
            io,
            dispatch,
            next_id: AtomicU64::new(1),
            query_timeout,
        }
    }

    pub fn listeners(&self) -> &Arc<PacketListenerRegistry> {
        &self.listeners
    }

    pub fn channel(&self, id: ChannelId) -> Option<Arc<NetworkChannel>> {
        self.channels.get(&id).map(|c| c.value().clone())
    }

    pub fn channels(&self) -> Vec<Arc<NetworkChannel>> {
        self.channels.iter().map(|c| c.value().clone()).collect()
    }

    /// Binds a channel to `transport` and starts driving it.
    pub fn connect(&self, transport: Arc<dyn Transport>, handler: Arc<dyn ChannelHandler>) -> Arc<NetworkChannel> {
        let id = ChannelId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Packet>();
        let (in_tx, mut in_rx) = mpsc::unbounded_channel::<Packet>();

        let channel = Arc::new(NetworkChannel::new(
            id,
            out_tx,
            handler,
            transport.clone(),
            Arc::downgrade(&self.channels),
            self.io.clone(),
            self.query_timeout,
        ));
        self.channels.insert(id, channel.clone());

        let reader = {
            let transport = transport.clone();
            let channel = Arc::downgrade(&channel);
            self.io.spawn(async move {
                loop {
                    match transport.recv().await {
                        Ok(Some(frame)) => match Packet::decode(&frame) {
                            Ok(packet) => {
                                if in_tx.send(packet).is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(channel = %id, error = %e, "malformed frame, closing channel");
                                break;
                            }
                        },
                        Ok(None) => {
                            tracing::debug!(channel = %id, "peer closed the connection");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(channel = %id, error = %e, "transport receive failed");
                            break;
                        }
                    }
                }
                if let Some(channel) = channel.upgrade() {
                    channel.close();
                }
            })
        };

        let writer = {
            let channel = Arc::downgrade(&channel);
            self.io.spawn(async move {
                while let Some(packet) = out_rx.recv().await {
                    if let Err(e) = transport.send(&packet.encode()).await {
                        tracing::warn!(channel = %id, error = %e, "transport send failed");
                        if let Some(channel) = channel.upgrade() {
                            channel.close();
                        }
                        break;
                    }
                }
            })
        };

        {
            let channel = channel.clone();
            let listeners = self.listeners.clone();
            self.dispatch.spawn(async move {
                while let Some(packet) = in_rx.recv().await {
                    let handled = std::panic::catch_unwind(AssertUnwindSafe(|| channel.dispatch(packet, &listeners)));
                    if let Err(panic) = handled {
                        tracing::error!(
                            channel = %channel.id(),
                            panic = %panic_message(&*panic),
                            "packet dispatch panicked"
                        );
                    }
                }
            });
        }

        channel.attach_task(reader);
        channel.attach_task(writer);
        tracing::debug!(channel = %id, "channel connected");
        channel
    }

    /// Closes every active channel.
    pub fn close_all(&self) {
        for channel in self.channels() {
            channel.close();
        }
    }
}

impl std::fmt::Debug for NetworkComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkComponent").field("channels", &self.channels.len()).finish()
    }
}
