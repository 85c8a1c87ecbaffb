//! # Cluster Data Synchronization
//!
//! Replicates entity mutations between nodes over the `cloudnet:internal`
//! message namespace.
//!
//! ## Messages
//!
//! | message            | payload   | effect                                  |
//! |--------------------|-----------|-----------------------------------------|
//! | `add_<key>`        | `T`       | upsert                                  |
//! | `remove_<key>`     | `T`       | delete by `T`'s key                     |
//! | `set_<key>s`       | `Vec<T>`  | replace everything, drop the rest       |
//! | `request_data_snapshot` | none | answered with every type's collection |
//!
//! ## Invariants
//!
//! 1. Remote mutations go through the same writer as local ones, so applying a
//!    message once or twice leaves the same state.
//! 2. Unknown messages and unknown keys are ignored, so mixed-version
//!    clusters keep working.
//! 3. Last write observed wins. There is no versioning.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cloudpack::Blob;
use cloudpack::Decoder;
use cloudpack::Encoder;
use cloudpack::Pack;
use cloudpack::Unpack;
use dashmap::DashMap;

use crate::message::ChannelMessage;
use crate::message::Target;
use crate::messenger::ClusterMessenger;
use crate::messenger::MessageSubscriber;

pub const INTERNAL_CHANNEL: &str = "cloudnet:internal";
pub const SNAPSHOT_REQUEST: &str = "request_data_snapshot";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Add,
    Remove,
    SetAll,
}

impl Verb {
    pub fn message(self, key: &str) -> String {
        match self {
            Verb::Add => format!("add_{}", key),
            Verb::Remove => format!("remove_{}", key),
            Verb::SetAll => format!("set_{}s", key),
        }
    }

    /// Splits a message name into verb and key. The key is not checked.
    pub fn parse(message: &str) -> Option<(Verb, &str)> {
        if let Some(key) = message.strip_prefix("add_") {
            return Some((Verb::Add, key));
        }
        if let Some(key) = message.strip_prefix("remove_") {
            return Some((Verb::Remove, key));
        }
        message
            .strip_prefix("set_")
            .and_then(|rest| rest.strip_suffix('s'))
            .map(|key| (Verb::SetAll, key))
    }
}

/// How one entity type is identified, stored and enumerated.
pub struct DataSyncHandler<T> {
    key: String,
    name_extractor: Box<dyn Fn(&T) -> String + Send + Sync>,
    writer: Box<dyn Fn(T) -> anyhow::Result<()> + Send + Sync>,
    remover: Box<dyn Fn(&str) -> anyhow::Result<()> + Send + Sync>,
    data_collector: Box<dyn Fn() -> Vec<T> + Send + Sync>,
    current_getter: Box<dyn Fn(&str) -> Option<T> + Send + Sync>,
}

impl<T: Pack + Unpack + Send + Sync + 'static> DataSyncHandler<T> {
    pub fn builder(key: impl Into<String>) -> DataSyncHandlerBuilder<T> {
        DataSyncHandlerBuilder {
            key: key.into(),
            name_extractor: None,
            writer: None,
            remover: None,
            data_collector: None,
            current_getter: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn current(&self, name: &str) -> Option<T> {
        (self.current_getter)(name)
    }

    fn replace_all(&self, entities: Vec<T>) -> anyhow::Result<()> {
        let keep: HashSet<String> = entities.iter().map(|e| (self.name_extractor)(e)).collect();
        for entity in entities {
            (self.writer)(entity)?;
        }
        for stale in (self.data_collector)() {
            let name = (self.name_extractor)(&stale);
            if !keep.contains(&name) {
                (self.remover)(&name)?;
            }
        }
        Ok(())
    }
}

pub struct DataSyncHandlerBuilder<T> {
    key: String,
    name_extractor: Option<Box<dyn Fn(&T) -> String + Send + Sync>>,
    writer: Option<Box<dyn Fn(T) -> anyhow::Result<()> + Send + Sync>>,
    remover: Option<Box<dyn Fn(&str) -> anyhow::Result<()> + Send + Sync>>,
    data_collector: Option<Box<dyn Fn() -> Vec<T> + Send + Sync>>,
    current_getter: Option<Box<dyn Fn(&str) -> Option<T> + Send + Sync>>,
}

impl<T: Pack + Unpack + Send + Sync + 'static> DataSyncHandlerBuilder<T> {
    pub fn name_extractor(mut self, f: impl Fn(&T) -> String + Send + Sync + 'static) -> Self {
        self.name_extractor = Some(Box::new(f));
        self
    }

    /// Stores an entity without publishing it.
    pub fn writer(mut self, f: impl Fn(T) -> anyhow::Result<()> + Send + Sync + 'static) -> Self {
        self.writer = Some(Box::new(f));
        self
    }

    /// Deletes an entity by name without publishing it.
    pub fn remover(mut self, f: impl Fn(&str) -> anyhow::Result<()> + Send + Sync + 'static) -> Self {
        self.remover = Some(Box::new(f));
        self
    }

    pub fn data_collector(mut self, f: impl Fn() -> Vec<T> + Send + Sync + 'static) -> Self {
        self.data_collector = Some(Box::new(f));
        self
    }

    pub fn current_getter(mut self, f: impl Fn(&str) -> Option<T> + Send + Sync + 'static) -> Self {
        self.current_getter = Some(Box::new(f));
        self
    }

    pub fn build(self) -> anyhow::Result<DataSyncHandler<T>> {
        let missing = |what: &str| anyhow::anyhow!("sync handler '{}' has no {}", self.key, what);
        Ok(DataSyncHandler {
            name_extractor: self.name_extractor.ok_or_else(|| missing("name extractor"))?,
            writer: self.writer.ok_or_else(|| missing("writer"))?,
            remover: self.remover.ok_or_else(|| missing("remover"))?,
            data_collector: self.data_collector.ok_or_else(|| missing("data collector"))?,
            current_getter: self.current_getter.ok_or_else(|| missing("current getter"))?,
            key: self.key,
        })
    }
}

/// Type-erased view of a `DataSyncHandler`.
trait SyncEntry: Send + Sync {
    fn apply(&self, verb: Verb, payload: &[u8]) -> anyhow::Result<()>;
    fn collect(&self) -> anyhow::Result<Vec<u8>>;
    fn apply_snapshot(&self, payload: &[u8]) -> anyhow::Result<()>;
}

impl<T: Pack + Unpack + Send + Sync + 'static> SyncEntry for DataSyncHandler<T> {
    fn apply(&self, verb: Verb, payload: &[u8]) -> anyhow::Result<()> {
        let mut dec = Decoder::new(payload);
        match verb {
            Verb::Add => (self.writer)(dec.unpack()?),
            Verb::Remove => {
                let entity: T = dec.unpack()?;
                (self.remover)(&(self.name_extractor)(&entity))
            }
            Verb::SetAll => self.replace_all(dec.unpack()?),
        }
    }

    fn collect(&self) -> anyhow::Result<Vec<u8>> {
        let mut enc = Encoder::new();
        enc.pack(&(self.data_collector)())?;
        Ok(enc.into_bytes()?)
    }

    fn apply_snapshot(&self, payload: &[u8]) -> anyhow::Result<()> {
        self.replace_all(Decoder::new(payload).unpack()?)
    }
}

pub struct DataSyncRegistry {
    handlers: DashMap<String, Arc<dyn SyncEntry>>,
    messenger: Arc<ClusterMessenger>,
}

impl DataSyncRegistry {
    pub fn new(messenger: Arc<ClusterMessenger>) -> Self {
        Self { handlers: DashMap::new(), messenger }
    }

    pub fn register<T: Pack + Unpack + Send + Sync + 'static>(&self, handler: DataSyncHandler<T>) {
        tracing::debug!(key = %handler.key, "registered sync handler");
        self.handlers.insert(handler.key.clone(), Arc::new(handler));
    }

    pub fn unregister(&self, key: &str) -> bool {
        self.handlers.remove(key).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        self.handlers.iter().map(|e| e.key().clone()).collect()
    }

    /// Broadcasts a mutation that has already been applied locally.
    pub fn publish<P: Pack + ?Sized>(&self, verb: Verb, key: &str, payload: &P, target: Target) -> anyhow::Result<()> {
        let mut message = ChannelMessage::new(INTERNAL_CHANNEL, verb.message(key)).with_payload(payload)?;
        message.target = target;
        let sent = self.messenger.send(message)?;
        tracing::trace!(key, ?verb, nodes = sent, "published mutation");
        Ok(())
    }

    /// Applies one inbound mutation message. Unknown messages are ignored.
    pub fn apply(&self, message: &ChannelMessage) -> anyhow::Result<()> {
        let Some((verb, key)) = Verb::parse(&message.message) else {
            tracing::trace!(message = %message.message, "ignoring unknown sync message");
            return Ok(());
        };
        let Some(handler) = self.handlers.get(key).map(|h| h.value().clone()) else {
            tracing::trace!(key, "ignoring sync message for unknown key");
            return Ok(());
        };
        handler
            .apply(verb, &message.buffer.0)
            .with_context(|| format!("applying {} from {}", message.message, message.sender))
    }

    /// Every registered type's collection, keyed by sync key.
    pub fn prepare_snapshot(&self) -> anyhow::Result<Vec<u8>> {
        let handlers: Vec<(String, Arc<dyn SyncEntry>)> =
            self.handlers.iter().map(|e| (e.key().clone(), e.value().clone())).collect();
        let mut snapshot = HashMap::new();
        for (key, handler) in handlers {
            snapshot.insert(key, Blob(handler.collect()?));
        }
        let mut enc = Encoder::new();
        enc.pack(&snapshot)?;
        Ok(enc.into_bytes()?)
    }

    /// Replaces local state with `snapshot`, type by type. Types missing from
    /// the snapshot are left alone.
    pub fn apply_snapshot(&self, snapshot: &[u8]) -> anyhow::Result<()> {
        let entries: HashMap<String, Blob> = Decoder::new(snapshot).unpack()?;
        for (key, payload) in entries {
            let Some(handler) = self.handlers.get(&key).map(|h| h.value().clone()) else {
                tracing::debug!(key = %key, "snapshot has data for unknown key");
                continue;
            };
            handler
                .apply_snapshot(&payload.0)
                .with_context(|| format!("applying snapshot of {}", key))?;
        }
        Ok(())
    }

    /// Asks `node_id` for its full state and applies it. Blocks the caller.
    pub fn request_snapshot(&self, node_id: &str, timeout: Duration) -> anyhow::Result<()> {
        let request = ChannelMessage::new(INTERNAL_CHANNEL, SNAPSHOT_REQUEST);
        let responses = self
            .messenger
            .query_node(node_id, request)
            .get(timeout)
            .with_context(|| format!("requesting data snapshot from {}", node_id))?;
        let Some(snapshot) = responses.first() else {
            anyhow::bail!("{} sent no data snapshot", node_id);
        };
        self.apply_snapshot(snapshot)?;
        tracing::info!(node = %node_id, "applied data snapshot");
        Ok(())
    }
}

impl MessageSubscriber for DataSyncRegistry {
    fn on_message(&self, message: &ChannelMessage) -> anyhow::Result<Option<Vec<u8>>> {
        if message.message == SNAPSHOT_REQUEST {
            return self.prepare_snapshot().map(Some);
        }
        self.apply(message)?;
        Ok(None)
    }
}

impl std::fmt::Debug for DataSyncRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSyncRegistry").field("keys", &self.keys()).finish()
    }
}
