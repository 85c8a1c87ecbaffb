use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;

use crate::channel::NetworkChannel;
use crate::packet::Packet;

/// Application-level handling of packets on one packet channel.
///
/// Errors and panics are logged by the registry and never close the connection.
pub trait PacketListener: Send + Sync + 'static {
    fn handle(&self, channel: &Arc<NetworkChannel>, packet: &Packet) -> anyhow::Result<()>;
}

impl<F> PacketListener for F
where
    F: Fn(&Arc<NetworkChannel>, &Packet) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn handle(&self, channel: &Arc<NetworkChannel>, packet: &Packet) -> anyhow::Result<()> {
        self(channel, packet)
    }
}

/// Listeners keyed by packet channel id, called in registration order.
#[derive(Default)]
pub struct PacketListenerRegistry {
    listeners: DashMap<u32, Vec<Arc<dyn PacketListener>>>,
}

impl PacketListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, channel: u32, listener: impl PacketListener) {
        self.listeners.entry(channel).or_default().push(Arc::new(listener));
    }

    pub fn remove_listeners(&self, channel: u32) {
        self.listeners.remove(&channel);
    }

    pub fn has_listeners(&self, channel: u32) -> bool {
        self.listeners.get(&channel).is_some_and(|l| !l.is_empty())
    }

    /// Returns whether any listener saw the packet.
    pub fn dispatch(&self, channel: &Arc<NetworkChannel>, packet: &Packet) -> bool {
        // clone out so a listener may register listeners without deadlocking
        let Some(listeners) = self.listeners.get(&packet.channel).map(|l| l.value().clone()) else {
            return false;
        };
        for listener in &listeners {
            match std::panic::catch_unwind(AssertUnwindSafe(|| listener.handle(channel, packet))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(
                    channel = %channel.id(),
                    packet = packet.channel,
                    error = %format!("{:#}", e),
                    "packet listener failed"
                ),
                Err(panic) => tracing::error!(
                    channel = %channel.id(),
                    packet = packet.channel,
                    panic = %panic_message(&*panic),
                    "packet listener panicked"
                ),
            }
        }
        !listeners.is_empty()
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
