// tests/client.rs
//
// Correlation engine behaviour: routing, timeouts, cleanup and close.

mod common;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;

use common::{client, init_logging, wait_for_pending, FakeRemote};
use mq_rpc::{
    // ---
    Envelope,
    MemoryHub,
    ReplyEnvelope,
    Result,
    RpcClientBuilder,
    RpcError,
    Subscription,
    SubscriptionHandle,
    Transport,
    TransportBase,
    TransportMode,
};

#[tokio::test]
async fn ping_returns_pong() -> Result<()> {
    // ---
    init_logging();
    let hub = MemoryHub::new();
    let mut remote = FakeRemote::start(&hub, "rpc-ping").await?;
    let client = client(&hub, "ping-client", Duration::from_secs(5)).await?;

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.call("rpc-ping", &b"ping"[..]).await }
    });

    let request = remote.next_request().await;
    assert_eq!(request.payload, Bytes::from_static(b"ping"));
    assert_eq!(request.reply_to.as_ref(), Some(client.reply_address()));
    assert_eq!(request.expiration, Some(Duration::from_secs(5)));

    remote
        .reply(&request, ReplyEnvelope::success(Bytes::from_static(b"pong")))
        .await;

    let reply = call.await.unwrap()?;
    assert_eq!(reply, Bytes::from_static(b"pong"));
    assert_eq!(client.pending_calls(), 0);

    client.close().await
}

#[tokio::test]
async fn remote_failure_surfaces_as_remote_error() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let mut remote = FakeRemote::start(&hub, "rpc-strict").await?;
    let client = client(&hub, "strict-client", Duration::from_secs(5)).await?;

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.call("rpc-strict", &b"x"[..]).await }
    });

    let request = remote.next_request().await;
    remote.reply(&request, ReplyEnvelope::failure("bad input")).await;

    match call.await.unwrap() {
        Err(RpcError::Remote(text)) => assert_eq!(text, "bad input"),
        other => panic!("expected remote error, got {other:?}"),
    }
    assert_eq!(client.pending_calls(), 0);

    client.close().await
}

#[tokio::test]
async fn undecodable_reply_is_decode_error() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let mut remote = FakeRemote::start(&hub, "rpc-garbled").await?;
    let client = client(&hub, "garbled-client", Duration::from_secs(5)).await?;

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.call("rpc-garbled", &b"?"[..]).await }
    });

    let request = remote.next_request().await;
    remote
        .reply_raw(&request, Bytes::from_static(b"\x00not an envelope"))
        .await;

    assert!(matches!(call.await.unwrap(), Err(RpcError::Decode(_))));
    assert_eq!(client.pending_calls(), 0);

    client.close().await
}

#[tokio::test(start_paused = true)]
async fn unanswered_call_times_out_at_deadline() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let client = client(&hub, "lonely-client", Duration::from_secs(30)).await?;

    let started = Instant::now();
    let result = client
        .call_with_timeout("rpc-nobody", &b"hello?"[..], Duration::from_millis(50))
        .await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(RpcError::Timeout)));
    assert!(result.unwrap_err().is_unknown_outcome());
    assert!(elapsed >= Duration::from_millis(50), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(60), "returned late: {elapsed:?}");
    assert_eq!(client.pending_calls(), 0);

    client.close().await
}

#[tokio::test]
async fn unbounded_timeout_still_gets_reply() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let mut remote = FakeRemote::start(&hub, "rpc-forever").await?;
    let client = client(&hub, "patient-client", Duration::MAX).await?;

    let call = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .call_with_timeout("rpc-forever", &b"ping"[..], Duration::MAX)
                .await
        }
    });

    let request = remote.next_request().await;
    let expiration = request.expiration.expect("request without expiration");
    assert!(expiration < Duration::MAX);
    assert!(expiration >= Duration::from_secs(86_400 * 365));

    remote
        .reply(&request, ReplyEnvelope::success(Bytes::from_static(b"pong")))
        .await;
    assert_eq!(call.await.unwrap()?, Bytes::from_static(b"pong"));

    // Same through the client's configured default.
    let call = tokio::spawn({
        let client = client.clone();
        async move { client.call("rpc-forever", &b"again"[..]).await }
    });
    let request = remote.next_request().await;
    remote
        .reply(&request, ReplyEnvelope::success(Bytes::from_static(b"pong")))
        .await;
    assert_eq!(call.await.unwrap()?, Bytes::from_static(b"pong"));
    assert_eq!(client.pending_calls(), 0);

    client.close().await
}

#[tokio::test]
async fn late_reply_is_dropped_silently() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let mut remote = FakeRemote::start(&hub, "rpc-slow").await?;
    let client = client(&hub, "impatient-client", Duration::from_secs(5)).await?;

    let result = client
        .call_with_timeout("rpc-slow", &b"first"[..], Duration::from_millis(20))
        .await;
    assert!(matches!(result, Err(RpcError::Timeout)));
    assert_eq!(client.pending_calls(), 0);

    // Answer the abandoned request now; nothing may pick it up.
    let stale = remote.next_request().await;
    remote
        .reply(&stale, ReplyEnvelope::success(Bytes::from_static(b"too late")))
        .await;

    // The client keeps working and the next call gets its own reply.
    let call = tokio::spawn({
        let client = client.clone();
        async move { client.call("rpc-slow", &b"second"[..]).await }
    });
    let fresh = remote.next_request().await;
    assert_ne!(fresh.correlation_id, stale.correlation_id);
    remote
        .reply(&fresh, ReplyEnvelope::success(Bytes::from_static(b"on time")))
        .await;

    assert_eq!(call.await.unwrap()?, Bytes::from_static(b"on time"));
    assert_eq!(client.pending_calls(), 0);

    client.close().await
}

#[tokio::test]
async fn duplicate_reply_does_not_disturb_result() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let mut remote = FakeRemote::start(&hub, "rpc-chatty").await?;
    let client = client(&hub, "dup-client", Duration::from_secs(5)).await?;

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.call("rpc-chatty", &b"once"[..]).await }
    });

    let request = remote.next_request().await;
    remote
        .reply(&request, ReplyEnvelope::success(Bytes::from_static(b"one")))
        .await;
    remote
        .reply(&request, ReplyEnvelope::success(Bytes::from_static(b"two")))
        .await;

    assert_eq!(call.await.unwrap()?, Bytes::from_static(b"one"));
    client.close().await
}

#[tokio::test]
async fn replies_in_reverse_order_reach_their_own_callers() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let mut remote = FakeRemote::start(&hub, "rpc-shuffle").await?;
    let client = client(&hub, "shuffle-client", Duration::from_secs(5)).await?;

    let call_a = tokio::spawn({
        let client = client.clone();
        async move { client.call("rpc-shuffle", &b"A"[..]).await }
    });
    let call_b = tokio::spawn({
        let client = client.clone();
        async move { client.call("rpc-shuffle", &b"B"[..]).await }
    });

    let first = remote.next_request().await;
    let second = remote.next_request().await;
    assert_ne!(first.correlation_id, second.correlation_id);

    // Answer in the opposite order to arrival.
    for request in [&second, &first] {
        let body = [b"reply-".as_slice(), &request.payload].concat();
        remote.reply(request, ReplyEnvelope::success(body)).await;
    }

    assert_eq!(call_a.await.unwrap()?, Bytes::from_static(b"reply-A"));
    assert_eq!(call_b.await.unwrap()?, Bytes::from_static(b"reply-B"));
    assert_eq!(client.pending_calls(), 0);

    client.close().await
}

#[tokio::test]
async fn close_wakes_every_pending_call() -> Result<()> {
    // ---
    init_logging();
    let hub = MemoryHub::new();
    let mut remote = FakeRemote::start(&hub, "rpc-void").await?;
    let client = client(&hub, "closing-client", Duration::from_secs(60)).await?;

    let calls: Vec<_> = (0..4)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move { client.call("rpc-void", vec![i as u8]).await })
        })
        .collect();

    for _ in 0..4 {
        remote.next_request().await;
    }
    wait_for_pending(&client, 4).await;

    client.close().await?;
    assert!(client.is_closed());

    for call in calls {
        let result = tokio::time::timeout(Duration::from_secs(1), call)
            .await
            .expect("call did not resolve after close")
            .unwrap();
        assert!(matches!(result, Err(RpcError::Closed)), "got {result:?}");
    }
    assert_eq!(client.pending_calls(), 0);

    // Closing again is harmless, and new calls fail fast.
    client.close().await?;
    assert!(matches!(
        client.call("rpc-void", &b"after"[..]).await,
        Err(RpcError::Closed)
    ));

    Ok(())
}

#[tokio::test]
async fn dropped_call_future_releases_its_entry() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let mut remote = FakeRemote::start(&hub, "rpc-abandon").await?;
    let client = client(&hub, "abandon-client", Duration::from_secs(60)).await?;

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.call("rpc-abandon", &b"bye"[..]).await }
    });
    remote.next_request().await;
    wait_for_pending(&client, 1).await;

    call.abort();
    let _ = call.await;
    assert_eq!(client.pending_calls(), 0);

    client.close().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ten_thousand_concurrent_calls_stay_correlated() -> Result<()> {
    // ---
    const N: usize = 10_000;

    let hub = MemoryHub::new();
    let mut remote = FakeRemote::start(&hub, "rpc-echo").await?;
    let client = client(&hub, "stress-client", Duration::from_secs(60)).await?;

    // Echo server that records every correlation id it sees.
    let seen = Arc::new(Mutex::new(HashSet::new()));
    let echo = tokio::spawn({
        let seen = seen.clone();
        async move {
            for _ in 0..N {
                let request = remote.next_request().await;
                let id = request.correlation_id.clone().unwrap();
                assert!(seen.lock().unwrap().insert(id), "correlation id reused");
                let reply = ReplyEnvelope::success(request.payload.clone());
                remote.reply(&request, reply).await;
            }
        }
    });

    let calls: Vec<_> = (0..N)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move {
                let payload = Bytes::from(i.to_string());
                let reply = client.call("rpc-echo", payload.clone()).await?;
                assert_eq!(reply, payload);
                Ok::<_, RpcError>(())
            })
        })
        .collect();

    for call in calls {
        call.await.unwrap()?;
    }
    echo.await.unwrap();

    assert_eq!(seen.lock().unwrap().len(), N);
    assert_eq!(client.pending_calls(), 0);

    client.close().await
}

//
// Transport doubles
//

/// Transport whose publish always fails but whose reply inbox stays open.
struct BrokenPublishTransport {
    base: TransportBase,
    keep_open: Mutex<Vec<mpsc::Sender<Envelope>>>,
}

#[async_trait::async_trait]
impl Transport for BrokenPublishTransport {
    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn publish(&self, _env: Envelope) -> Result<()> {
        Err(RpcError::Transport("broker unreachable".into()))
    }

    async fn subscribe(&self, _sub: Subscription) -> Result<SubscriptionHandle> {
        let (tx, rx) = mpsc::channel(1);
        self.keep_open.lock().unwrap().push(tx);
        Ok(SubscriptionHandle { inbox: rx })
    }

    async fn close(&self) -> Result<()> {
        self.keep_open.lock().unwrap().clear();
        Ok(())
    }
}

#[tokio::test]
async fn publish_failure_surfaces_without_leaking() -> Result<()> {
    // ---
    let transport = Arc::new(BrokenPublishTransport {
        base: TransportBase {
            transport_id: "broken".into(),
            mode: TransportMode::Client,
            request_queue: None,
            reply_queue: Some("rpc-reply-broken".into()),
        },
        keep_open: Mutex::new(Vec::new()),
    });

    let client = RpcClientBuilder::new(transport).build().await?;

    match client.call("rpc-anything", &b"x"[..]).await {
        Err(RpcError::Transport(msg)) => assert!(msg.contains("broker unreachable")),
        other => panic!("expected transport error, got {other:?}"),
    }
    assert_eq!(client.pending_calls(), 0);

    client.close().await
}

#[tokio::test]
async fn transport_ending_reply_inbox_closes_client() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let mut remote = FakeRemote::start(&hub, "rpc-fragile").await?;
    let transport = common::client_transport(&hub, "fragile-client").await?;
    let client = RpcClientBuilder::new(transport.clone())
        .request_timeout(Duration::from_secs(60))
        .build()
        .await?;

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.call("rpc-fragile", &b"x"[..]).await }
    });
    remote.next_request().await;
    wait_for_pending(&client, 1).await;

    // Connection lost underneath the client.
    transport.close().await?;

    let result = tokio::time::timeout(Duration::from_secs(1), call)
        .await
        .expect("call hung after transport loss")
        .unwrap();
    assert!(matches!(result, Err(RpcError::Closed)));
    assert!(client.is_closed());

    client.close().await
}

#[tokio::test]
async fn server_only_transport_cannot_host_client() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let transport = common::server_transport(&hub, "rpc-svc").await?;

    assert!(matches!(
        RpcClientBuilder::new(transport).build().await,
        Err(RpcError::InvalidMode(_))
    ));
    Ok(())
}
