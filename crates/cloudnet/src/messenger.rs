//! # Cluster Messenger
//!
//! Node-to-node delivery of `ChannelMessage`s over `CHANNEL_MESSAGE_CHANNEL`.
//!
//! Sending is fire-and-forget; a query goes to exactly one node and resolves
//! with every response its subscribers produced. Messages are never delivered
//! back to the sending node.

use std::sync::Arc;

use anyhow::Context;
use cloudpack::Blob;
use cloudpack::Decoder;
use cloudpack::Encoder;
use dashmap::DashMap;

use crate::channel::NetworkChannel;
use crate::listener::PacketListener;
use crate::message::ChannelMessage;
use crate::message::Target;
use crate::packet::CHANNEL_MESSAGE_CHANNEL;
use crate::packet::Packet;
use crate::task::AsyncResult;

/// Receives messages published under one namespace.
pub trait MessageSubscriber: Send + Sync + 'static {
    /// Returns an optional response buffer for queries.
    fn on_message(&self, message: &ChannelMessage) -> anyhow::Result<Option<Vec<u8>>>;
}

impl<F> MessageSubscriber for F
where
    F: Fn(&ChannelMessage) -> anyhow::Result<Option<Vec<u8>>> + Send + Sync + 'static,
{
    fn on_message(&self, message: &ChannelMessage) -> anyhow::Result<Option<Vec<u8>>> {
        self(message)
    }
}

#[derive(Default)]
pub struct MessageBus {
    subscribers: DashMap<String, Vec<Arc<dyn MessageSubscriber>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, channel: impl Into<String>, subscriber: Arc<dyn MessageSubscriber>) {
        self.subscribers.entry(channel.into()).or_default().push(subscriber);
    }

    /// Delivers `message` to its namespace and collects the responses.
    /// Subscriber errors are logged and skipped.
    pub fn publish(&self, message: &ChannelMessage) -> Vec<Vec<u8>> {
        let Some(subscribers) = self.subscribers.get(&message.channel).map(|s| s.value().clone()) else {
            tracing::trace!(channel = %message.channel, message = %message.message, "no subscriber");
            return Vec::new();
        };
        let mut responses = Vec::new();
        for subscriber in subscribers {
            match subscriber.on_message(message) {
                Ok(Some(response)) => responses.push(response),
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    channel = %message.channel,
                    message = %message.message,
                    sender = %message.sender,
                    error = %format!("{:#}", e),
                    "message subscriber failed"
                ),
            }
        }
        responses
    }
}

pub struct ClusterMessenger {
    node_id: String,
    nodes: DashMap<String, Arc<NetworkChannel>>,
}

impl ClusterMessenger {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self { node_id: node_id.into(), nodes: DashMap::new() }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn register_node(&self, node_id: impl Into<String>, channel: Arc<NetworkChannel>) {
        let node_id = node_id.into();
        tracing::info!(node = %node_id, channel = %channel.id(), "node connected");
        self.nodes.insert(node_id, channel);
    }

    /// Removes `node_id` if it is still bound to `channel`.
    pub fn unregister_channel(&self, channel: &NetworkChannel) {
        self.nodes.retain(|node, bound| {
            let keep = bound.id() != channel.id();
            if !keep {
                tracing::info!(node = %node, "node disconnected");
            }
            keep
        });
    }

    pub fn node_channel(&self, node_id: &str) -> Option<Arc<NetworkChannel>> {
        self.nodes.get(node_id).map(|c| c.value().clone())
    }

    pub fn nodes(&self) -> Vec<String> {
        self.nodes.iter().map(|e| e.key().clone()).collect()
    }

    /// Sends `message` to every targeted, connected node except this one.
    /// Returns the number of nodes it was queued for.
    pub fn send(&self, mut message: ChannelMessage) -> anyhow::Result<usize> {
        message.sender = self.node_id.clone();
        let payload = pack(&message)?;

        let mut sent = 0;
        for entry in self.nodes.iter() {
            if entry.key() == &self.node_id || !message.target.includes(entry.key()) {
                continue;
            }
            match entry.value().send_packet(Packet::new(CHANNEL_MESSAGE_CHANNEL, payload.clone())) {
                Ok(()) => sent += 1,
                Err(e) => tracing::debug!(node = %entry.key(), error = %e, "skipping node"),
            }
        }
        Ok(sent)
    }

    /// Sends `message` to one node and resolves with its subscribers' responses.
    pub fn query_node(&self, node_id: &str, mut message: ChannelMessage) -> AsyncResult<Vec<Vec<u8>>> {
        let Some(channel) = self.node_channel(node_id) else {
            return AsyncResult::failed(anyhow::anyhow!("node {} is not connected", node_id));
        };
        message.sender = self.node_id.clone();
        message.target = Target::Nodes(vec![node_id.to_string()]);
        let payload = match pack(&message) {
            Ok(payload) => payload,
            Err(e) => return AsyncResult::failed(e),
        };
        channel
            .send_query(Packet::new(CHANNEL_MESSAGE_CHANNEL, payload))
            .try_map(|packet| {
                let responses: Vec<Blob> = Decoder::new(&packet.payload).unpack()?;
                Ok(responses.into_iter().map(|b| b.0).collect())
            })
    }
}

fn pack(message: &ChannelMessage) -> anyhow::Result<Vec<u8>> {
    let mut enc = Encoder::new();
    enc.pack(message)?;
    Ok(enc.into_bytes()?)
}

/// Delivers inbound channel messages to the bus and answers queries with the
/// collected responses.
pub struct ChannelMessageListener {
    bus: Arc<MessageBus>,
}

impl ChannelMessageListener {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self { bus }
    }
}

impl PacketListener for ChannelMessageListener {
    fn handle(&self, channel: &Arc<NetworkChannel>, packet: &Packet) -> anyhow::Result<()> {
        let message: ChannelMessage = Decoder::new(&packet.payload)
            .unpack()
            .context("decoding channel message")?;
        let responses = self.bus.publish(&message);

        if packet.is_query() {
            let responses: Vec<Blob> = responses.into_iter().map(Blob).collect();
            let mut enc = Encoder::new();
            enc.pack(&responses)?;
            channel.send_packet(packet.response(enc.into_bytes()?))?;
        }
        Ok(())
    }
}
