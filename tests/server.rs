// tests/server.rs
//
// Client and RpcServer talking over one in-memory hub.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use common::{client_transport, init_logging, server_transport};
use mq_rpc::{
    // ---
    Envelope,
    MemoryHub,
    RequestEnvelope,
    Result,
    RpcClient,
    RpcClientBuilder,
    RpcError,
    RpcServer,
    Subscription,
    SubscriptionHandle,
    Transport,
    TransportBase,
    TransportPtr,
};

const FUNC_ADD: i32 = 0;
const FUNC_SHOUT: i32 = 1;
const FUNC_FAIL: i32 = 2;

#[derive(Debug, Serialize, Deserialize)]
struct AddRequest {
    a: i64,
    b: i64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct AddResponse {
    sum: i64,
}

async fn start_pair(hub: &Arc<MemoryHub>, queue: &str) -> Result<(RpcServer, RpcClient)> {
    // ---
    let server = RpcServer::new(server_transport(hub, queue).await?)?;

    server.register_typed(FUNC_ADD, |req: AddRequest| async move {
        Ok(AddResponse { sum: req.a + req.b })
    });
    server.register(FUNC_SHOUT, |body: Bytes| async move {
        Ok(Bytes::from(body.to_ascii_uppercase()))
    });
    server.register(FUNC_FAIL, |_body: Bytes| async move {
        Err(RpcError::Remote("bad input".into()))
    });
    server.spawn().await?;

    let client = RpcClientBuilder::new(client_transport(hub, &format!("{queue}-client")).await?)
        .default_destination(queue)
        .request_timeout(Duration::from_secs(5))
        .build()
        .await?;

    Ok((server, client))
}

#[tokio::test]
async fn typed_request_round_trips() -> Result<()> {
    // ---
    init_logging();
    let hub = MemoryHub::new();
    let (server, client) = start_pair(&hub, "rpc-calc").await?;

    let resp: AddResponse = client
        .request_to("rpc-calc", FUNC_ADD, &AddRequest { a: 40, b: 2 })
        .await?;
    assert_eq!(resp, AddResponse { sum: 42 });

    client.close().await?;
    server.close().await
}

#[tokio::test]
async fn remote_call_uses_default_destination() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let (server, client) = start_pair(&hub, "rpc-shout").await?;

    let reply = client.remote_call(FUNC_SHOUT, &b"ping"[..]).await?;
    assert_eq!(reply, Bytes::from_static(b"PING"));

    client.close().await?;
    server.close().await
}

#[tokio::test]
async fn handler_error_becomes_remote_error() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let (server, client) = start_pair(&hub, "rpc-fail").await?;

    match client.remote_call(FUNC_FAIL, &b"x"[..]).await {
        Err(RpcError::Remote(text)) => assert_eq!(text, "bad input"),
        other => panic!("expected remote error, got {other:?}"),
    }

    client.close().await?;
    server.close().await
}

#[tokio::test]
async fn unknown_function_is_reported() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let (server, client) = start_pair(&hub, "rpc-unknown").await?;

    match client.remote_call(99, Bytes::new()).await {
        Err(RpcError::Remote(text)) => assert_eq!(text, "unknown function with code: 99"),
        other => panic!("expected remote error, got {other:?}"),
    }

    client.close().await?;
    server.close().await
}

#[tokio::test]
async fn malformed_typed_body_is_reported() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let (server, client) = start_pair(&hub, "rpc-typed").await?;

    let request = RequestEnvelope::new(FUNC_ADD, &b"{\"a\": \"nope\"}"[..]).encode()?;
    match client.call("rpc-typed", request).await {
        Err(RpcError::Remote(text)) => assert!(text.contains("decode"), "got {text}"),
        other => panic!("expected remote error, got {other:?}"),
    }

    client.close().await?;
    server.close().await
}

#[tokio::test]
async fn remote_call_without_destination_is_config_error() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let client = common::client(&hub, "no-dest", Duration::from_secs(1)).await?;

    assert!(matches!(
        client.remote_call(FUNC_ADD, Bytes::new()).await,
        Err(RpcError::MissingConfig(_))
    ));

    client.close().await
}

#[tokio::test]
async fn server_close_is_idempotent_and_final() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let (server, client) = start_pair(&hub, "rpc-stop").await?;

    server.close().await?;
    server.close().await?;
    assert!(matches!(server.spawn().await, Err(RpcError::InvalidMode(_))));

    // Nobody serves the queue anymore.
    assert!(matches!(
        client
            .call_with_timeout("rpc-stop", Bytes::new(), Duration::from_millis(30))
            .await,
        Err(RpcError::Timeout)
    ));

    client.close().await
}

#[tokio::test]
async fn client_only_transport_cannot_serve() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let transport = client_transport(&hub, "not-a-server").await?;
    assert!(matches!(RpcServer::new(transport), Err(RpcError::InvalidMode(_))));
    Ok(())
}

/// Delegating transport that counts subscriptions.
struct CountingTransport {
    inner: TransportPtr,
    subscribes: AtomicUsize,
}

#[async_trait::async_trait]
impl Transport for CountingTransport {
    fn base(&self) -> &TransportBase {
        self.inner.base()
    }

    async fn publish(&self, env: Envelope) -> Result<()> {
        self.inner.publish(env).await
    }

    async fn subscribe(&self, sub: Subscription) -> Result<SubscriptionHandle> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        self.inner.subscribe(sub).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

#[tokio::test]
async fn concurrent_spawn_subscribes_once() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let counting = Arc::new(CountingTransport {
        inner: server_transport(&hub, "rpc-racy").await?,
        subscribes: AtomicUsize::new(0),
    });
    let server = RpcServer::new(counting.clone())?;
    server.register(FUNC_SHOUT, |body: Bytes| async move {
        Ok(Bytes::from(body.to_ascii_uppercase()))
    });

    let (first, second) = tokio::join!(server.spawn(), server.spawn());
    assert!(first.is_ok() != second.is_ok(), "exactly one spawn must win");
    assert!(matches!(
        first.and(second),
        Err(RpcError::InvalidMode(_))
    ));
    assert_eq!(counting.subscribes.load(Ordering::SeqCst), 1);

    // The winner serves normally.
    let client = RpcClientBuilder::new(client_transport(&hub, "racy-client").await?)
        .default_destination("rpc-racy")
        .request_timeout(Duration::from_secs(5))
        .build()
        .await?;
    assert_eq!(
        client.remote_call(FUNC_SHOUT, &b"once"[..]).await?,
        Bytes::from_static(b"ONCE")
    );

    client.close().await?;
    server.close().await
}
