use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use cloudpack::Decoder;
use cloudpack::Encoder;

use crate::*;

#[derive(Debug, Clone, PartialEq)]
struct Service {
    name: String,
    port: i32,
}

cloudpack::record!(Service { name; port });

struct ServiceDirectory {
    lookups: AtomicUsize,
}

fn registry_with_services(calls_on_service: Arc<AtomicUsize>) -> Arc<HandlerRegistry> {
    let directory = Arc::new(ServiceDirectory { lookups: AtomicUsize::new(0) });
    let registry = Arc::new(HandlerRegistry::new());

    registry.register(
        RpcHandler::builder::<ServiceDirectory>("ServiceDirectory")
            .bind(directory)
            .method("getService", 1, |this, args| {
                this.lookups.fetch_add(1, Ordering::SeqCst);
                let name: String = args.next()?;
                Ok(Service { name, port: 25565 })
            })
            .method("count", 0, |this, _| Ok(this.lookups.load(Ordering::SeqCst) as i64))
            .method("describe", 1, |_, args| {
                let region: Option<String> = args.next()?;
                Ok(region.unwrap_or_else(|| "global".to_string()))
            })
            .method("add", 2, |_, args| {
                let a: i64 = args.next()?;
                let b: i64 = args.next()?;
                Ok(a + b)
            })
            .build(),
    );

    let name_calls = calls_on_service.clone();
    registry.register(
        RpcHandler::builder::<Service>("Service")
            .method("getName", 0, move |this, _| {
                name_calls.fetch_add(1, Ordering::SeqCst);
                Ok(this.name.clone())
            })
            .method("getPort", 0, |this, _| Ok(this.port))
            .void_method("restart", 0, |this, _| {
                Err(RemoteFailure::new("IllegalStateException", format!("{} is not running", this.name)))
            })
            .void_method("ping", 0, |_, _| Ok(()))
            .method("explode", 0, |_, _| -> std::result::Result<String, RemoteFailure> { panic!("boom") })
            .build(),
    );

    registry
}

// ============================================================================
//  REGISTRY
// ============================================================================

#[test]
fn test_register_lookup_unregister() {
    let registry = registry_with_services(Arc::new(AtomicUsize::new(0)));
    assert_eq!(registry.len(), 2);
    assert!(registry.contains("Service"));

    let handler = registry.lookup("ServiceDirectory").expect("registered");
    assert_eq!(handler.type_name(), "ServiceDirectory");
    assert!(handler.method("getService", 1).is_some());
    assert!(handler.method("getService", 2).is_none());
    assert!(handler.method("ping", 0).is_none());

    assert!(registry.unregister("Service").is_some());
    assert!(registry.lookup("Service").is_none());
    assert!(registry.unregister("Service").is_none());
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.all().len(), 1);
}

#[test]
fn test_concurrent_register_and_lookup() {
    use rand::Rng;

    let registry = Arc::new(HandlerRegistry::new());
    let threads: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            std::thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..500 {
                    let name = format!("Type-{}", rng.gen_range(0..16));
                    match rng.gen_range(0..3) {
                        0 => {
                            registry.register(RpcHandler::builder::<()>(&name).method("id", 0, |_, _| Ok(1i32)).build());
                        }
                        1 => {
                            registry.unregister(&name);
                        }
                        _ => {
                            if let Some(handler) = registry.lookup(&name) {
                                assert_eq!(handler.type_name(), name);
                                assert!(handler.method("id", 0).is_some());
                            }
                        }
                    }
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().expect("worker panicked");
    }

    assert!(registry.len() <= 16);
    assert_eq!(registry.all().len(), registry.len());
    for n in 0..16 {
        let name = format!("Type-{}", n);
        registry.register(RpcHandler::builder::<()>(&name).build());
    }
    assert_eq!(registry.len(), 16);
}

#[test]
fn test_last_registration_wins() {
    let registry = HandlerRegistry::new();
    registry.register(RpcHandler::builder::<()>("Echo").method("a", 0, |_, _| Ok(1i32)).build());
    let previous = registry.register(RpcHandler::builder::<()>("Echo").method("b", 0, |_, _| Ok(2i32)).build());

    assert!(previous.is_some());
    let handler = registry.lookup("Echo").expect("registered");
    assert!(handler.method("a", 0).is_none());
    assert!(handler.method("b", 0).is_some());
}

// ============================================================================
//  SINGLE CALLS
// ============================================================================

#[test]
fn test_single_call_uses_bound_instance() -> Result<()> {
    let invoker = Invoker::new(registry_with_services(Arc::new(AtomicUsize::new(0))));
    let payload = RpcCall::new("ServiceDirectory", "getService").arg("Lobby-1")?.encode()?;

    let reply = invoker.handle(&payload)?.expect("result expected");
    let service: Service = reply::decode(&reply)?.expect("success");
    assert_eq!(service, Service { name: "Lobby-1".into(), port: 25565 });
    Ok(())
}

#[test]
fn test_overload_by_arity_and_normalized_arguments() -> Result<()> {
    let invoker = Invoker::new(registry_with_services(Arc::new(AtomicUsize::new(0))));
    // i32 and u8 on the wire, i64 parameters on the handler
    let payload = RpcCall::new("ServiceDirectory", "add").arg(&40i32)?.arg(&2u8)?.encode()?;

    let reply = invoker.handle(&payload)?.expect("result expected");
    assert_eq!(reply::decode::<i64>(&reply)?, Ok(42));
    Ok(())
}

#[test]
fn test_optional_argument_counts_as_one() -> Result<()> {
    let invoker = Invoker::new(registry_with_services(Arc::new(AtomicUsize::new(0))));

    for (region, expected) in [(Some("eu".to_string()), "eu"), (None, "global")] {
        let call = RpcCall::new("ServiceDirectory", "describe").arg(&region)?;
        assert_eq!(call.arity(), 1);
        let reply = invoker.handle(&call.encode()?)?.expect("result expected");
        assert_eq!(reply::decode::<String>(&reply)?, Ok(expected.to_string()));
    }
    Ok(())
}

#[test]
fn test_fire_and_forget_has_no_reply() -> Result<()> {
    let invoker = Invoker::new(registry_with_services(Arc::new(AtomicUsize::new(0))));
    let payload = RpcCall::new("ServiceDirectory", "getService")
        .arg("Lobby-1")?
        .fire_and_forget()
        .encode()?;
    assert_eq!(invoker.handle(&payload)?, None);

    let count = RpcCall::new("ServiceDirectory", "count").encode()?;
    let reply = invoker.handle(&count)?.expect("result expected");
    assert_eq!(reply::decode::<i64>(&reply)?, Ok(1));
    Ok(())
}

#[test]
fn test_unknown_handler_is_dropped() -> Result<()> {
    let invoker = Invoker::new(registry_with_services(Arc::new(AtomicUsize::new(0))));
    let payload = RpcCall::new("NodeServerProvider", "getNodeServers").encode()?;
    assert_eq!(invoker.handle(&payload)?, None);
    Ok(())
}

#[test]
fn test_unknown_method_is_a_failure() -> Result<()> {
    let invoker = Invoker::new(registry_with_services(Arc::new(AtomicUsize::new(0))));
    let payload = RpcCall::new("ServiceDirectory", "getService").encode()?;

    let reply = invoker.handle(&payload)?.expect("result expected");
    let failure = reply::decode::<Service>(&reply)?.expect_err("no zero-arg overload");
    assert_eq!(failure.type_name, "MethodNotFound");
    Ok(())
}

#[test]
fn test_strict_frame_without_instance_fails() -> Result<()> {
    let invoker = Invoker::new(registry_with_services(Arc::new(AtomicUsize::new(0))));
    // Service has no bound instance, so even the lenient first frame has none
    let payload = RpcCall::new("Service", "getName").encode()?;

    let reply = invoker.handle(&payload)?.expect("result expected");
    let failure = reply::decode::<String>(&reply)?.expect_err("no instance");
    assert_eq!(failure.type_name, "NoInstance");
    Ok(())
}

#[test]
fn test_void_reply_and_failure_reply() -> Result<()> {
    let invoker = Invoker::new(registry_with_services(Arc::new(AtomicUsize::new(0))));

    let ping = RpcCall::new("ServiceDirectory", "getService")
        .arg("Lobby-1")?
        .then(RpcCall::new("Service", "ping"))
        .encode()?;
    let reply = invoker.handle(&ping)?.expect("result expected");
    assert_eq!(reply, {
        let mut enc = Encoder::new();
        enc.bool(true)?;
        enc.bool(false)?;
        enc.into_bytes()?
    });
    assert_eq!(reply::decode_void(&reply)?, Ok(()));

    let restart = RpcCall::new("ServiceDirectory", "getService")
        .arg("Lobby-1")?
        .then(RpcCall::new("Service", "restart"))
        .encode()?;
    let reply = invoker.handle(&restart)?.expect("result expected");
    let failure = reply::decode_void(&reply)?.expect_err("restart fails");
    assert_eq!(failure.type_name, "IllegalStateException");
    assert_eq!(failure.message, "Lobby-1 is not running");
    Ok(())
}

#[test]
fn test_handler_panic_becomes_failure() -> Result<()> {
    let invoker = Invoker::new(registry_with_services(Arc::new(AtomicUsize::new(0))));
    let payload = RpcCall::new("ServiceDirectory", "getService")
        .arg("Lobby-1")?
        .then(RpcCall::new("Service", "explode"))
        .encode()?;

    let reply = invoker.handle(&payload)?.expect("result expected");
    let failure = reply::decode::<String>(&reply)?.expect_err("panicked");
    assert_eq!(failure.type_name, "panic");
    assert_eq!(failure.message, "boom");
    Ok(())
}

// ============================================================================
//  CHAINS
// ============================================================================

#[test]
fn test_chain_runs_on_previous_result() -> Result<()> {
    let invoker = Invoker::new(registry_with_services(Arc::new(AtomicUsize::new(0))));
    let payload = RpcCall::new("ServiceDirectory", "getService")
        .arg("survival-1")?
        .then(RpcCall::new("Service", "getName"))
        .encode()?;

    let reply = invoker.handle(&payload)?.expect("result expected");
    assert_eq!(reply::decode::<String>(&reply)?, Ok("survival-1".to_string()));
    Ok(())
}

#[test]
fn test_failed_frame_skips_rest_of_chain() -> Result<()> {
    let calls = Arc::new(AtomicUsize::new(0));
    let invoker = Invoker::new(registry_with_services(calls.clone()));
    let payload = RpcCall::new("ServiceDirectory", "getService")
        .arg("survival-1")?
        .then(RpcCall::new("Service", "restart"))
        .then(RpcCall::new("Service", "getName"))
        .encode()?;

    // a frame left in the buffer would surface as a protocol violation
    let reply = invoker.handle(&payload)?.expect("result expected");
    let failure = reply::decode::<String>(&reply)?.expect_err("second frame failed");
    assert_eq!(failure.type_name, "IllegalStateException");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn test_last_frame_decides_reply_after_failure() -> Result<()> {
    let invoker = Invoker::new(registry_with_services(Arc::new(AtomicUsize::new(0))));
    let chain = |middle: RpcCall, last: RpcCall| -> Result<Vec<u8>> {
        RpcCall::new("ServiceDirectory", "getService")
            .arg("survival-1")?
            .then(RpcCall::new("Service", "restart"))
            .then(middle)
            .then(last)
            .encode()
    };

    let silent_last = chain(RpcCall::new("Service", "getName"), RpcCall::new("Service", "ping").fire_and_forget())?;
    assert!(invoker.handle(&silent_last)?.is_none());

    let silent_middle = chain(RpcCall::new("Service", "ping").fire_and_forget(), RpcCall::new("Service", "getName"))?;
    let reply = invoker.handle(&silent_middle)?.expect("last frame expects a result");
    let failure = reply::decode::<String>(&reply)?.expect_err("second frame failed");
    assert_eq!(failure.type_name, "IllegalStateException");
    Ok(())
}

#[test]
fn test_chain_frames_after_first_are_strict() -> Result<()> {
    let invoker = Invoker::new(registry_with_services(Arc::new(AtomicUsize::new(0))));
    // ping returns nothing, so the third frame has no instance and may not
    // fall back to the bound directory
    let payload = RpcCall::new("ServiceDirectory", "getService")
        .arg("survival-1")?
        .then(RpcCall::new("Service", "ping"))
        .then(RpcCall::new("ServiceDirectory", "count"))
        .encode()?;

    let reply = invoker.handle(&payload)?.expect("result expected");
    let failure = reply::decode::<i64>(&reply)?.expect_err("strict");
    assert_eq!(failure.type_name, "NoInstance");
    Ok(())
}

#[test]
fn test_chain_with_wrong_target_type() -> Result<()> {
    let invoker = Invoker::new(registry_with_services(Arc::new(AtomicUsize::new(0))));
    let payload = RpcCall::new("ServiceDirectory", "count")
        .then(RpcCall::new("Service", "getName"))
        .encode()?;

    let reply = invoker.handle(&payload)?.expect("result expected");
    let failure = reply::decode::<String>(&reply)?.expect_err("i64 is not a Service");
    assert_eq!(failure.type_name, "InstanceMismatch");
    Ok(())
}

// ============================================================================
//  MALFORMED PAYLOADS
// ============================================================================

#[test]
fn test_empty_chain_is_rejected() -> Result<()> {
    let invoker = Invoker::new(Arc::new(HandlerRegistry::new()));
    let mut enc = Encoder::new();
    enc.bool(true)?;
    enc.i32(0)?;
    let payload = enc.into_bytes()?;

    assert!(matches!(invoker.handle(&payload), Err(Error::ProtocolViolation(_))));
    Ok(())
}

#[test]
fn test_truncated_payload_is_codec_error() -> Result<()> {
    let invoker = Invoker::new(registry_with_services(Arc::new(AtomicUsize::new(0))));
    let payload = RpcCall::new("ServiceDirectory", "getService").arg("Lobby-1")?.encode()?;

    let cut = &payload[..payload.len() - 3];
    assert!(matches!(invoker.handle(cut), Err(Error::Codec(_))));
    Ok(())
}

#[test]
fn test_random_garbage_never_panics() {
    use rand::Rng;

    let invoker = Invoker::new(registry_with_services(Arc::new(AtomicUsize::new(0))));
    let mut rng = rand::thread_rng();
    for _ in 0..256 {
        let len = rng.gen_range(0..64);
        let bytes: Vec<u8> = (0..len).map(|_| rng.r#gen()).collect();
        let _ = invoker.handle(&bytes);
    }
}

#[test]
fn test_failure_trace_survives_the_wire() -> Result<()> {
    let failure = RemoteFailure {
        type_name: "java.io.IOException".into(),
        message: "disk full".into(),
        trace: vec!["caused by quota".into()],
    };
    let bytes = reply::encode_failure(&failure)?;
    let mut dec = Decoder::new(&bytes);
    assert!(!dec.bool()?);
    assert_eq!(reply::decode::<String>(&bytes)?, Err(failure));
    Ok(())
}
