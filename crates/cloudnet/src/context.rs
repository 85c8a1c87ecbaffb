//! # Node Context
//!
//! Everything one node runs, constructed explicitly and torn down explicitly.
//!
//! ## Initialization order
//!
//! 1. handler registry
//! 2. I/O and dispatch runtimes
//! 3. packet listeners and the network component
//! 4. messenger and message bus
//! 5. data sync registry, subscribed to `cloudnet:internal`
//! 6. entity providers, which register their sync and RPC handlers
//!
//! `shutdown` closes every channel, which fails its pending queries, then
//! stops both runtimes.

use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use anyhow::Context;
use cloudrpc::HandlerRegistry;
use cloudrpc::Invoker;
use cloudrpc::RpcHandler;

use crate::channel::ChannelHandler;
use crate::channel::DefaultChannelHandler;
use crate::channel::NetworkChannel;
use crate::config::NodeConfig;
use crate::dispatcher::Dispatcher;
use crate::listener::PacketListenerRegistry;
use crate::messenger::ChannelMessageListener;
use crate::messenger::ClusterMessenger;
use crate::messenger::MessageBus;
use crate::messenger::MessageSubscriber;
use crate::network::NetworkComponent;
use crate::packet::CHANNEL_MESSAGE_CHANNEL;
use crate::packet::RPC_CHANNEL;
use crate::provider::GroupConfigurationProvider;
use crate::provider::ServiceTaskProvider;
use crate::rpc::RpcPacketListener;
use crate::sync::DataSyncRegistry;
use crate::sync::INTERNAL_CHANNEL;
use crate::task::AsyncResult;
use crate::transport::Transport;

pub struct NodeContextBuilder {
    config: NodeConfig,
    handlers: Vec<RpcHandler>,
    subscribers: Vec<(String, Arc<dyn MessageSubscriber>)>,
}

impl NodeContextBuilder {
    /// Registers an extra RPC handler once the registry exists.
    pub fn handler(mut self, handler: RpcHandler) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Subscribes to a message namespace once the bus exists.
    pub fn subscriber(mut self, channel: impl Into<String>, subscriber: Arc<dyn MessageSubscriber>) -> Self {
        self.subscribers.push((channel.into(), subscriber));
        self
    }

    pub fn build(self) -> anyhow::Result<NodeContext> {
        let config = self.config;

        let registry = Arc::new(HandlerRegistry::new());
        for handler in self.handlers {
            registry.register(handler);
        }

        let io = Dispatcher::new(format!("{}-io", config.node_id), config.io_threads)
            .context("starting io runtime")?;
        let dispatcher = Dispatcher::new(format!("{}-dispatch", config.node_id), config.dispatcher_threads)
            .context("starting dispatch runtime")?;

        let bus = Arc::new(MessageBus::new());
        let listeners = Arc::new(PacketListenerRegistry::new());
        listeners.add_listener(RPC_CHANNEL, RpcPacketListener::new(Invoker::new(registry.clone())));
        listeners.add_listener(CHANNEL_MESSAGE_CHANNEL, ChannelMessageListener::new(bus.clone()));
        let network = NetworkComponent::new(
            listeners,
            io.handle().clone(),
            dispatcher.handle().clone(),
            config.query_timeout(),
        );

        let messenger = Arc::new(ClusterMessenger::new(config.node_id.clone()));
        for (channel, subscriber) in self.subscribers {
            bus.subscribe(channel, subscriber);
        }

        let sync = Arc::new(DataSyncRegistry::new(messenger.clone()));
        bus.subscribe(INTERNAL_CHANNEL, sync.clone());

        let groups = GroupConfigurationProvider::open(
            config.group_directory.clone(),
            &config.legacy_group_file,
            sync.clone(),
        )
        .context("opening group configurations")?;
        groups.register_rpc(&registry);

        let tasks = ServiceTaskProvider::open(config.task_directory.clone(), &config.legacy_task_file, sync.clone())
            .context("opening service tasks")?;
        tasks.register_rpc(&registry);

        tracing::info!(node = %config.node_id, handlers = registry.len(), "node context ready");
        Ok(NodeContext {
            config,
            registry,
            io,
            dispatcher,
            network,
            messenger,
            bus,
            sync,
            groups,
            tasks,
        })
    }
}

pub struct NodeContext {
    config: NodeConfig,
    registry: Arc<HandlerRegistry>,
    io: Dispatcher,
    dispatcher: Dispatcher,
    network: NetworkComponent,
    messenger: Arc<ClusterMessenger>,
    bus: Arc<MessageBus>,
    sync: Arc<DataSyncRegistry>,
    groups: Arc<GroupConfigurationProvider>,
    tasks: Arc<ServiceTaskProvider>,
}

impl NodeContext {
    pub fn builder(config: NodeConfig) -> NodeContextBuilder {
        NodeContextBuilder { config, handlers: Vec::new(), subscribers: Vec::new() }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn io(&self) -> &Dispatcher {
        &self.io
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn network(&self) -> &NetworkComponent {
        &self.network
    }

    pub fn messenger(&self) -> &Arc<ClusterMessenger> {
        &self.messenger
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn sync(&self) -> &Arc<DataSyncRegistry> {
        &self.sync
    }

    pub fn groups(&self) -> &Arc<GroupConfigurationProvider> {
        &self.groups
    }

    pub fn tasks(&self) -> &Arc<ServiceTaskProvider> {
        &self.tasks
    }

    /// Connects a peer node. The node is reachable through the messenger until
    /// its channel closes.
    pub fn connect_node(&self, node_id: impl Into<String>, transport: Arc<dyn Transport>) -> Arc<NetworkChannel> {
        let handler = Arc::new(NodeChannelHandler { messenger: Arc::downgrade(&self.messenger) });
        let channel = self.network.connect(transport, handler);
        self.messenger.register_node(node_id, channel.clone());
        if !channel.is_open() {
            // closed before it was registered
            self.messenger.unregister_channel(&channel);
        }
        channel
    }

    /// Connects a non-node peer, such as a wrapper or a driver client. It can
    /// make and serve RPC calls but receives no cluster messages.
    pub fn connect_client(&self, transport: Arc<dyn Transport>) -> Arc<NetworkChannel> {
        self.network.connect(transport, Arc::new(DefaultChannelHandler))
    }

    /// Replaces local entity state with `node_id`'s. Blocks; do not call from
    /// the dispatch runtime.
    pub fn sync_with(&self, node_id: &str, timeout: Duration) -> anyhow::Result<()> {
        self.sync.request_snapshot(node_id, timeout)
    }

    /// Runs a blocking operation on the dispatch runtime.
    pub fn supply<T, F>(&self, f: F) -> AsyncResult<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        self.dispatcher.supply(f)
    }

    pub fn shutdown(&self) {
        tracing::info!(node = %self.config.node_id, "shutting down");
        self.network.close_all();
        self.dispatcher.shutdown();
        self.io.shutdown();
    }
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("node_id", &self.config.node_id)
            .field("network", &self.network)
            .field("registry", &self.registry)
            .finish()
    }
}

struct NodeChannelHandler {
    messenger: Weak<ClusterMessenger>,
}

impl ChannelHandler for NodeChannelHandler {
    fn on_close(&self, channel: &Arc<NetworkChannel>) {
        if let Some(messenger) = self.messenger.upgrade() {
            messenger.unregister_channel(channel);
        }
    }
}
