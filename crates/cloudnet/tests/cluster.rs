//! Two and three node clusters wired over in-memory transports.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use anyhow::Result;
use cloudnet::NodeContext;
use cloudnet::channel::NetworkChannel;
use cloudnet::config::NodeConfig;
use cloudnet::entity::GroupConfiguration;
use cloudnet::entity::ServiceTask;
use cloudnet::message::ChannelMessage;
use cloudnet::messenger::MessageSubscriber;
use cloudnet::packet::Packet;
use cloudnet::packet::RPC_CHANNEL;
use cloudnet::remote::RemoteGroupConfigurationProvider;
use cloudnet::remote::RemoteServiceTaskProvider;
use cloudnet::rpc::RpcSender;
use cloudnet::task::TaskError;
use cloudnet::transport::DuplexTransport;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(5);

struct Node {
    context: NodeContext,
    _dir: TempDir,
}

impl std::ops::Deref for Node {
    type Target = NodeContext;

    fn deref(&self) -> &NodeContext {
        &self.context
    }
}

fn node(id: &str) -> Result<Node> {
    node_with(id, |builder| builder)
}

fn node_with(
    id: &str,
    customize: impl FnOnce(cloudnet::context::NodeContextBuilder) -> cloudnet::context::NodeContextBuilder,
) -> Result<Node> {
    cloudnet::logging::init();
    let dir = tempfile::tempdir()?;
    let config = NodeConfig {
        node_id: id.to_string(),
        dispatcher_threads: 2,
        io_threads: 1,
        query_timeout_ms: 2_000,
        ..NodeConfig::default()
    }
    .rooted_at(dir.path());
    let context = customize(NodeContext::builder(config)).build()?;
    Ok(Node { context, _dir: dir })
}

/// Links `a` and `b` as cluster peers. Returns `a`'s channel to `b`.
fn link(a: &Node, b: &Node) -> Arc<NetworkChannel> {
    let (ta, tb) = DuplexTransport::pair();
    let channel = a.connect_node(b.node_id(), Arc::new(ta));
    b.connect_node(a.node_id(), Arc::new(tb));
    channel
}

fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(10));
    }
}

// ============================================================================
// Replication
// ============================================================================

#[test]
fn test_add_is_replicated_to_peers() -> Result<()> {
    let a = node("Node-1")?;
    let b = node("Node-2")?;
    let c = node("Node-3")?;
    link(&a, &b);
    link(&a, &c);

    a.groups().add(GroupConfiguration::new("Lobby").with_property("motd", "welcome"))?;

    for peer in [&b, &c] {
        eventually("group to replicate", || peer.groups().is_present("Lobby"));
        assert!(peer.groups().store().file_of("Lobby").exists());
        let motd = peer.groups().get("Lobby").and_then(|g| g.properties.get("motd").cloned());
        assert_eq!(motd.as_deref(), Some("welcome"));
    }

    a.groups().remove_by_name("Lobby")?;
    eventually("removal to replicate", || !b.groups().is_present("Lobby"));
    assert!(!b.groups().store().file_of("Lobby").exists());
    Ok(())
}

#[test]
fn test_set_all_replaces_peer_state() -> Result<()> {
    let a = node("Node-1")?;
    let b = node("Node-2")?;
    link(&a, &b);

    b.tasks().add_silently(ServiceTask::new("Stale", "jvm"))?;
    a.tasks().set_all(vec![ServiceTask::new("Lobby", "jvm"), ServiceTask::new("Proxy", "jvm")])?;

    eventually("set-all to replicate", || {
        b.tasks().is_present("Proxy") && !b.tasks().is_present("Stale")
    });
    assert_eq!(b.tasks().all().len(), 2);
    assert!(!b.tasks().store().file_of("Stale").exists());
    Ok(())
}

#[test]
fn test_snapshot_sync_reconciles_stale_files() -> Result<()> {
    let a = node("Node-1")?;
    a.groups().add(GroupConfiguration::new("Lobby"))?;
    a.tasks().add(ServiceTask::new("Lobby", "jvm").with_groups(["Lobby"]))?;

    let b = node("Node-2")?;
    b.groups().add_silently(GroupConfiguration::new("old-group"))?;
    let stale = b.groups().store().file_of("old-group");
    assert!(stale.exists());

    link(&a, &b);
    b.sync_with("Node-1", WAIT)?;

    assert!(b.groups().get("old-group").is_none());
    assert!(!stale.exists());
    assert!(b.groups().is_present("Lobby"));
    assert!(b.tasks().is_present("Lobby"));
    Ok(())
}

#[test]
fn test_snapshot_from_unknown_node_fails() -> Result<()> {
    let a = node("Node-1")?;
    assert!(a.sync_with("Node-9", WAIT).is_err());
    Ok(())
}

// ============================================================================
// Remote providers
// ============================================================================

#[test]
fn test_remote_provider_round_trip() -> Result<()> {
    let a = node("Node-1")?;
    let b = node("Node-2")?;
    let to_b = link(&a, &b);
    let remote = RemoteGroupConfigurationProvider::new(to_b);

    remote.add(&GroupConfiguration::new("survival-1")).get(WAIT)?;
    assert!(b.groups().is_present("survival-1"));
    eventually("rpc-driven add to replicate back", || a.groups().is_present("survival-1"));

    assert!(remote.is_present("survival-1").get(WAIT)?);
    assert_eq!(remote.get("survival-1").get(WAIT)?.map(|g| g.name).as_deref(), Some("survival-1"));
    assert_eq!(remote.all().get(WAIT)?.len(), 1);
    assert_eq!(remote.get("nope").get(WAIT)?, None);

    let name: String = remote.property("survival-1", "getName").get(WAIT)?;
    assert_eq!(name, "survival-1");

    match remote.property::<String>("nope", "getName").get(WAIT) {
        Err(TaskError::Failed(e)) => assert!(e.to_string().contains("NoSuchElement"), "{:#}", e),
        other => panic!("expected a remote failure, got {:?}", other),
    }

    assert!(remote.remove_by_name("survival-1").get(WAIT)?);
    assert!(!remote.remove_by_name("survival-1").get(WAIT)?);
    Ok(())
}

#[test]
fn test_remote_task_chain() -> Result<()> {
    let a = node("Node-1")?;
    let b = node("Node-2")?;
    let to_b = link(&a, &b);
    b.tasks().add(ServiceTask::new("Lobby", "jvm").with_minimum_service_count(2))?;

    let remote = RemoteServiceTaskProvider::new(to_b);
    let count: i32 = remote.property("Lobby", "getMinServiceCount").get(WAIT)?;
    assert_eq!(count, 2);
    let groups: Vec<String> = remote.property("Lobby", "getGroups").get(WAIT)?;
    assert!(groups.is_empty());
    Ok(())
}

#[test]
fn test_client_channel_serves_rpc_but_not_messages() -> Result<()> {
    let a = node("Node-1")?;
    let (client_end, node_end) = DuplexTransport::pair();
    a.connect_client(Arc::new(node_end));

    let driver = node("Driver")?;
    let channel = driver.connect_client(Arc::new(client_end));
    let remote = RemoteGroupConfigurationProvider::new(channel);
    remote.add(&GroupConfiguration::new("Lobby")).get(WAIT)?;

    assert!(a.groups().is_present("Lobby"));
    assert!(!driver.groups().is_present("Lobby"));
    assert!(a.messenger().nodes().is_empty());
    Ok(())
}

// ============================================================================
// Channels
// ============================================================================

#[test]
fn test_query_timeout_returns_default() -> Result<()> {
    let a = node("Node-1")?;
    let (ours, _silent) = DuplexTransport::pair();
    let channel = a.connect_client(Arc::new(ours));

    let started = Instant::now();
    let reply = channel
        .send_query_with_timeout(Packet::new(RPC_CHANNEL, vec![1]), Duration::from_millis(1))
        .map(|packet| packet.payload.clone())
        .get_or_timeout(WAIT, b"default".to_vec());

    assert_eq!(reply, b"default");
    assert!(started.elapsed() < WAIT);
    eventually("timed out query to be released", || channel.pending_queries() == 0);
    Ok(())
}

#[test]
fn test_unknown_handler_gets_no_reply() -> Result<()> {
    let a = node("Node-1")?;
    let b = node("Node-2")?;
    let to_b = link(&a, &b);

    let sender = RpcSender::new("NoSuchProvider", to_b);
    let reply = sender.invoke::<String>(sender.call("getName"));
    assert!(matches!(reply.get(WAIT), Err(TaskError::Cancelled)));
    Ok(())
}

#[test]
fn test_close_fails_pending_queries_and_unregisters_node() -> Result<()> {
    let a = node("Node-1")?;
    let (ours, _silent) = DuplexTransport::pair();
    let channel = a.connect_node("Node-9", Arc::new(ours));
    assert_eq!(a.messenger().nodes(), vec!["Node-9".to_string()]);

    let pending = channel.send_query_with_timeout(Packet::new(RPC_CHANNEL, vec![1]), Duration::from_secs(60));
    assert_eq!(channel.pending_queries(), 1);

    channel.close();
    channel.close();

    assert!(matches!(pending.get(WAIT), Err(TaskError::Failed(_))));
    assert_eq!(channel.pending_queries(), 0);
    assert!(!channel.is_open());
    assert!(a.messenger().nodes().is_empty());
    assert!(a.network().channels().is_empty());
    assert!(channel.send_packet(Packet::new(RPC_CHANNEL, vec![1])).is_err());
    Ok(())
}

#[test]
fn test_concurrent_queries_and_close() -> Result<()> {
    use rand::Rng;

    let a = node("Node-1")?;
    let (ours, _silent) = DuplexTransport::pair();
    let channel = a.connect_node("Node-9", Arc::new(ours));

    let senders: Vec<_> = (0..4)
        .map(|_| {
            let channel = channel.clone();
            std::thread::spawn(move || {
                let mut rng = rand::thread_rng();
                let mut results = Vec::new();
                for _ in 0..rng.gen_range(50..200) {
                    let payload = vec![rng.r#gen::<u8>()];
                    results.push(channel.send_query_with_timeout(Packet::new(RPC_CHANNEL, payload), Duration::from_secs(60)));
                    if rng.gen_bool(0.1) {
                        std::thread::yield_now();
                    }
                }
                results
            })
        })
        .collect();

    std::thread::sleep(Duration::from_millis(rand::thread_rng().gen_range(0..5)));
    channel.close();

    for sender in senders {
        let results = sender.join().expect("sender panicked");
        for result in results {
            assert!(matches!(result.get(WAIT), Err(TaskError::Failed(_))));
        }
    }
    assert_eq!(channel.pending_queries(), 0);
    assert!(a.messenger().nodes().is_empty());
    Ok(())
}

#[test]
fn test_peer_shutdown_closes_the_link() -> Result<()> {
    let a = node("Node-1")?;
    let b = node("Node-2")?;
    link(&a, &b);

    a.shutdown();
    eventually("peer to notice the hang-up", || b.messenger().nodes().is_empty());
    assert!(b.network().channels().is_empty());
    Ok(())
}

#[test]
fn test_malformed_frame_closes_the_channel() -> Result<()> {
    let a = node("Node-1")?;
    let (ours, theirs) = DuplexTransport::pair();
    let channel = a.connect_node("Node-9", Arc::new(ours));

    let io = a.io().handle().clone();
    io.block_on(async {
        use cloudnet::transport::Transport;
        theirs.send(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff]).await
    })?;

    eventually("malformed frame to close the channel", || !channel.is_open());
    assert!(a.messenger().nodes().is_empty());
    Ok(())
}

#[test]
fn test_panicking_listener_keeps_the_channel_open() -> Result<()> {
    let a = node("Node-1")?;
    let b = node("Node-2")?;
    let to_b = link(&a, &b);

    let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let seen = calls.clone();
    b.network().listeners().add_listener(9, move |_: &Arc<NetworkChannel>, _: &Packet| -> anyhow::Result<()> {
        if seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
            panic!("listener blew up");
        }
        Ok(())
    });

    to_b.send_packet(Packet::new(9, vec![1]))?;
    to_b.send_packet(Packet::new(9, vec![2]))?;
    eventually("both packets to be handled", || calls.load(std::sync::atomic::Ordering::SeqCst) == 2);

    assert!(to_b.is_open());
    let remote = RemoteGroupConfigurationProvider::new(to_b.clone());
    assert!(remote.all().get(WAIT)?.is_empty());
    assert_eq!(b.messenger().nodes(), vec!["Node-1".to_string()]);
    Ok(())
}

// ============================================================================
// Messaging
// ============================================================================

#[test]
fn test_custom_subscriber_and_targeting() -> Result<()> {
    let received = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = received.clone();
    let subscriber: Arc<dyn MessageSubscriber> = Arc::new(move |message: &ChannelMessage| -> anyhow::Result<Option<Vec<u8>>> {
        sink.lock().push((message.sender.clone(), message.message.clone()));
        Ok(Some(b"pong".to_vec()))
    });

    let a = node("Node-1")?;
    let b = node_with("Node-2", |builder| builder.subscriber("test", subscriber))?;
    let c = node("Node-3")?;
    link(&a, &b);
    link(&a, &c);

    let sent = a.messenger().send(ChannelMessage::new("test", "hello").to_nodes(["Node-2"]))?;
    assert_eq!(sent, 1);
    eventually("message to arrive", || !received.lock().is_empty());
    assert_eq!(received.lock()[0], ("Node-1".to_string(), "hello".to_string()));

    let responses = a.messenger().query_node("Node-2", ChannelMessage::new("test", "ping")).get(WAIT)?;
    assert_eq!(responses, vec![b"pong".to_vec()]);

    let empty = a.messenger().query_node("Node-3", ChannelMessage::new("test", "ping")).get(WAIT)?;
    assert!(empty.is_empty());
    Ok(())
}
