//! RPC over packet channels.
//!
//! `RpcPacketListener` serves calls arriving on `RPC_CHANNEL`; `RpcSender` is
//! the calling side, bound to one remote type name and one channel.

use std::sync::Arc;

use anyhow::Context;
use cloudpack::Unpack;
use cloudrpc::Invoker;
use cloudrpc::RpcCall;
use cloudrpc::RpcChain;
use cloudrpc::reply;

use crate::channel::NetworkChannel;
use crate::listener::PacketListener;
use crate::packet::Packet;
use crate::packet::RPC_CHANNEL;
use crate::task::AsyncResult;

pub struct RpcPacketListener {
    invoker: Invoker,
}

impl RpcPacketListener {
    pub fn new(invoker: Invoker) -> Self {
        Self { invoker }
    }
}

impl PacketListener for RpcPacketListener {
    fn handle(&self, channel: &Arc<NetworkChannel>, packet: &Packet) -> anyhow::Result<()> {
        let reply = self
            .invoker
            .handle(&packet.payload)
            .with_context(|| format!("rpc call on {}", channel.id()))?;

        // without a correlation id nobody is waiting, even if a result was asked for
        if let (Some(reply), true) = (reply, packet.is_query()) {
            channel.send_packet(packet.response(reply))?;
        }
        Ok(())
    }
}

/// Calls methods of one remote handler type.
#[derive(Debug, Clone)]
pub struct RpcSender {
    type_name: String,
    channel: Arc<NetworkChannel>,
}

impl RpcSender {
    pub fn new(type_name: impl Into<String>, channel: Arc<NetworkChannel>) -> Self {
        Self { type_name: type_name.into(), channel }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn channel(&self) -> &Arc<NetworkChannel> {
        &self.channel
    }

    /// Starts a call on this sender's type.
    pub fn call(&self, method: &str) -> RpcCall {
        RpcCall::new(self.type_name.clone(), method)
    }

    /// Sends a call or chain and decodes its value reply.
    pub fn invoke<T>(&self, call: impl IntoPayload) -> AsyncResult<T>
    where
        T: Unpack + Clone + Send + 'static,
    {
        match call.into_payload() {
            Ok(payload) => self.query(payload).try_map(|packet| decode_value(&packet.payload)),
            Err(e) => AsyncResult::failed(e.into()),
        }
    }

    pub fn invoke_void(&self, call: impl IntoPayload) -> AsyncResult<()> {
        match call.into_payload() {
            Ok(payload) => self.query(payload).try_map(|packet| decode_void(&packet.payload)),
            Err(e) => AsyncResult::failed(e.into()),
        }
    }

    /// Sends the call without a correlation id; no reply is produced.
    pub fn fire(&self, call: RpcCall) -> anyhow::Result<()> {
        let payload = call.fire_and_forget().encode()?;
        self.channel.send_packet(Packet::new(RPC_CHANNEL, payload))?;
        Ok(())
    }

    fn query(&self, payload: Vec<u8>) -> AsyncResult<Packet> {
        self.channel.send_query(Packet::new(RPC_CHANNEL, payload))
    }
}

/// Anything that encodes to an RPC call payload.
pub trait IntoPayload {
    fn into_payload(self) -> cloudrpc::Result<Vec<u8>>;
}

impl IntoPayload for RpcCall {
    fn into_payload(self) -> cloudrpc::Result<Vec<u8>> {
        self.encode()
    }
}

impl IntoPayload for RpcChain {
    fn into_payload(self) -> cloudrpc::Result<Vec<u8>> {
        self.encode()
    }
}

/// Lets `sender.invoke(sender.call("m").arg(&x))` skip the `?`.
impl<P: IntoPayload> IntoPayload for cloudrpc::Result<P> {
    fn into_payload(self) -> cloudrpc::Result<Vec<u8>> {
        self?.into_payload()
    }
}

fn decode_value<T: Unpack>(payload: &[u8]) -> anyhow::Result<T> {
    Ok(reply::decode::<T>(payload)??)
}

fn decode_void(payload: &[u8]) -> anyhow::Result<()> {
    Ok(reply::decode_void(payload)??)
}
