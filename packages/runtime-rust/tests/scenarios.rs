//! End-to-end behaviour across core and runtime: codec plugins, data bag
//! isolation, stream termination, flat-text errors, and pool admission.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use switchyard_core::codec::{normalize_integers, CONTENT_TYPE_JSON, CONTENT_TYPE_OCTET_STREAM};
use switchyard_core::{
    Codec, DataBag, ErrCode, FlatError, JsonCodec, MsgPackCodec, Receiver, StructuredError, Value,
};
use switchyard_runtime::compute::{ComputeError, ComputeHandler, ComputeInstance, ComputeModule, ComputePool};
use switchyard_runtime::config::{self, PoolConfig, RuntimeConfig};
use switchyard_runtime::invoke::{
    handler_fn, stream_fn, Dispatcher, Exchange, ExchangeRequest, Invocation, Invoker, Router,
};
use switchyard_runtime::plugin::{Lifecycle, ManagedPlugin, PluginContext, RegistryBuilder, ResolverBuilder};
use switchyard_runtime::shutdown::{HealthState, ShutdownController};
use switchyard_runtime::stream::StreamError;
use tokio_util::sync::CancellationToken;

fn dispatcher(router: Router) -> Dispatcher {
    Dispatcher::new(
        router,
        Arc::new(RuntimeConfig::default()),
        Arc::new(ShutdownController::new()),
    )
}

// ---------------------------------------------------------------------------
// Scenario A: codec resolved by name, integer normalization
// ---------------------------------------------------------------------------

#[test]
fn json_codec_resolved_by_name_normalizes_integers() {
    let mut codecs = RegistryBuilder::<Arc<dyn Codec>>::new();
    codecs
        .register("json", |_config, _resolver| Ok(Arc::new(JsonCodec) as Arc<dyn Codec>))
        .register("msgpack", |_config, _resolver| {
            Ok(Arc::new(MsgPackCodec) as Arc<dyn Codec>)
        });
    let codecs = codecs.freeze();
    let resolver = ResolverBuilder::new().freeze();

    let json = codecs.load("json", None, &resolver).unwrap();
    assert_eq!(json.content_type(), CONTENT_TYPE_JSON);

    let decoded = json.decode(br#"{"id":1234.0}"#).unwrap();
    assert_eq!(decoded.get("id"), Some(&Value::Int(1234)));
    assert_eq!(normalize_integers(decoded.clone()), decoded);

    // The normalized integer survives a binary encoding as an integer.
    let msgpack = codecs.load("msgpack", None, &resolver).unwrap();
    let round_tripped = msgpack.decode(&msgpack.encode(&decoded).unwrap()).unwrap();
    assert_eq!(round_tripped.get("id"), Some(&Value::Int(1234)));
}

// ---------------------------------------------------------------------------
// Scenario B: data bag clones are independent at the top level
// ---------------------------------------------------------------------------

#[test]
fn data_bag_clone_is_independent() {
    let original: DataBag = [("one", 1234)].into_iter().collect();
    let mut clone = original.clone();

    assert_eq!(clone, original);
    assert!(Arc::ptr_eq(
        original.get_shared("one").unwrap(),
        clone.get_shared("one").unwrap()
    ));

    clone.insert("one", 1);
    clone.insert("two", 2);
    assert_eq!(original.get("one"), Some(&Value::Int(1234)));
    assert!(!original.contains_key("two"));
}

#[tokio::test]
async fn handler_mutations_do_not_leak_into_caller_bag() {
    let mut router = Router::new();
    router
        .register(
            "bag.v1",
            "touch",
            handler_fn(|mut ctx, _payload| async move {
                ctx.data.insert("one", 0);
                Ok::<_, StructuredError>(Bytes::new())
            }),
        )
        .unwrap();
    let d = dispatcher(router);

    let bag: DataBag = [("one", 1234)].into_iter().collect();
    let ctx = d.context(&Receiver::new("bag.v1", "touch")).with_data(bag.clone());
    d.invoke_with(Invocation::with_context(ctx, Bytes::new()))
        .await
        .unwrap();
    assert_eq!(bag.get("one"), Some(&Value::Int(1234)));
}

// ---------------------------------------------------------------------------
// Scenario C: reading past a terminal frame
// ---------------------------------------------------------------------------

#[tokio::test]
async fn receive_after_end_frame_is_end_of_stream() {
    let mut router = Router::new();
    router
        .register_stream(
            "echo.v1",
            "once",
            stream_fn(|_ctx, mut stream| async move {
                let value = stream.recv_data().await?;
                stream.send_reply(value.as_ref()).await?;
                Ok::<_, StructuredError>(())
            }),
        )
        .unwrap();
    let d = dispatcher(router);

    let mut stream = d.invoke_stream(&Receiver::new("echo.v1", "once")).await.unwrap();
    stream.send_value(&Value::from("ping"), true).await.unwrap();

    assert_eq!(stream.recv_data().await.unwrap(), Some(Value::from("ping")));
    for _ in 0..2 {
        let next = tokio::time::timeout(Duration::from_secs(1), stream.recv_data())
            .await
            .expect("receive after end must not hang");
        assert_eq!(next.unwrap(), None);
    }
    assert!(matches!(
        stream.send_data(Bytes::from_static(b"late"), false).await,
        Err(StreamError::Protocol { .. })
    ));
}

// ---------------------------------------------------------------------------
// Scenario D: flat-text errors
// ---------------------------------------------------------------------------

#[test]
fn not_found_flat_text_round_trip() {
    let flat = FlatError::new("not_found")
        .with("store", "statestore")
        .with("key", "abcdef");
    let text = flat.to_string();
    assert_eq!(text, "not_found\n[key] abcdef\n[store] statestore");

    let parsed = FlatError::parse(&text);
    assert_eq!(parsed, flat);
    assert_eq!(parsed.err_code(), ErrCode::NotFound);
}

#[tokio::test]
async fn flat_text_errors_cross_streams_and_raw_exchanges() {
    let mut router = Router::new();
    router
        .register_stream(
            "state.v1.Store",
            "watch",
            stream_fn(|_ctx, _stream| async move {
                Err::<(), _>(
                    StructuredError::new(ErrCode::NotFound, "missing key")
                        .with_metadata("key", "abcdef")
                        .with_metadata("store", "statestore"),
                )
            }),
        )
        .unwrap();

    let config = RuntimeConfig {
        expose_error_metadata: true,
        ..RuntimeConfig::default()
    };
    let d = Dispatcher::new(router, Arc::new(config), Arc::new(ShutdownController::new()));

    let mut stream = d
        .invoke_stream(&Receiver::new("state.v1.Store", "watch"))
        .await
        .unwrap();
    match stream.recv_data().await {
        Err(StreamError::Remote(err)) => {
            assert_eq!(err.code, ErrCode::NotFound);
            assert_eq!(err.metadata.get("store"), Some(&Value::from("statestore")));
        }
        other => panic!("expected remote error, got {other:?}"),
    }

    let resp = Exchange::new(d)
        .handle(
            ExchangeRequest::new("state.v1.Store/get", Bytes::new())
                .with_content_type(CONTENT_TYPE_OCTET_STREAM),
        )
        .await;
    assert_eq!(resp.status.as_u16(), 404);
    assert_eq!(FlatError::parse(std::str::from_utf8(&resp.body).unwrap()).code(), "not_found");
}

// ---------------------------------------------------------------------------
// Scenario E: pool admission
// ---------------------------------------------------------------------------

struct Counter {
    created: AtomicUsize,
}

struct CounterInstance;

#[async_trait]
impl ComputeModule for Counter {
    type Instance = CounterInstance;

    fn name(&self) -> &str {
        "counter"
    }

    async fn instantiate(&self) -> anyhow::Result<CounterInstance> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(CounterInstance)
    }
}

#[async_trait]
impl ComputeInstance for CounterInstance {
    async fn invoke(&mut self, _operation: &str, payload: Bytes) -> Result<Bytes, ComputeError> {
        Ok(payload)
    }
}

#[tokio::test(start_paused = true)]
async fn pool_of_two_admits_two_and_queues_the_third() {
    let config = PoolConfig {
        size: Some(2),
        checkout_timeout_ms: None,
    };
    let pool = ComputePool::new(
        Counter {
            created: AtomicUsize::new(0),
        },
        &config,
    )
    .await
    .unwrap();
    let cancel = CancellationToken::new();

    let first = pool.checkout(&cancel).await.unwrap();
    let second = pool.checkout(&cancel).await.unwrap();
    assert_eq!(pool.available(), 0);

    let third = {
        let pool = pool.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut instance = pool.checkout(&cancel).await.unwrap();
            instance.invoke("echo", Bytes::from("third")).await.unwrap()
        })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!third.is_finished(), "third checkout must wait for a check-in");

    drop(second);
    assert_eq!(third.await.unwrap(), Bytes::from("third"));
    drop(first);
    assert_eq!(pool.available(), 2);
}

// ---------------------------------------------------------------------------
// Startup and shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pool_plugin_served_through_dispatcher_and_shut_down() {
    // Pools are built from plugin config, registered with the lifecycle, and
    // routed to through a compute handler.
    let raw_config = Value::from(serde_json::json!({"size": 1}));
    let pool_config: PoolConfig = config::decode(Some(&raw_config)).unwrap();
    let pool = ComputePool::new(
        Counter {
            created: AtomicUsize::new(0),
        },
        &pool_config,
    )
    .await
    .unwrap();
    assert_eq!(pool.size(), 1);

    let mut router = Router::new();
    router
        .register("compute.v1.Counter", "echo", ComputeHandler::new(pool.clone()))
        .unwrap();
    let shutdown = Arc::new(ShutdownController::new());
    let d = Dispatcher::new(router, Arc::new(RuntimeConfig::default()), Arc::clone(&shutdown));

    let mut lifecycle = Lifecycle::new();
    lifecycle.register(Arc::new(pool.clone()) as Arc<dyn ManagedPlugin>);
    lifecycle.init_all(&PluginContext::default()).await.unwrap();
    shutdown.set_ready();

    let out = d
        .invoke(&Receiver::new("compute.v1.Counter", "echo"), Bytes::from("hi"))
        .await
        .unwrap();
    assert_eq!(out, Bytes::from("hi"));

    shutdown.trigger_shutdown();
    assert!(shutdown.wait_for_drain(Duration::from_secs(1)).await);
    assert_eq!(shutdown.health_state(), HealthState::Stopped);
    lifecycle.shutdown_all().await.unwrap();
    assert!(pool.is_closed());

    let err = d
        .invoke(&Receiver::new("compute.v1.Counter", "echo"), Bytes::from("hi"))
        .await
        .unwrap_err();
    assert_eq!(StructuredError::from(err).code, ErrCode::Unavailable);
}
