// tests/common/mod.rs
#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;

use bytes::Bytes;

use mq_rpc::{
    // ---
    create_memory_transport_with_hub,
    Envelope,
    MemoryHub,
    ReplyEnvelope,
    Result,
    RpcClient,
    RpcClientBuilder,
    SubscriptionHandle,
    TransportConfig,
    TransportMode,
    TransportPtr,
};

static INIT: Once = Once::new();

pub fn init_logging() {
    // ---
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub async fn server_transport(hub: &Arc<MemoryHub>, queue: &str) -> Result<TransportPtr> {
    // ---
    let config = TransportConfig {
        uri: "memory://".into(),
        node_id: format!("server-{queue}"),
        mode: TransportMode::Server,
        request_queue: Some(queue.into()),
        reply_queue: None,
    };
    create_memory_transport_with_hub(config, hub.clone()).await
}

pub async fn client_transport(hub: &Arc<MemoryHub>, node_id: &str) -> Result<TransportPtr> {
    // ---
    let config = TransportConfig {
        uri: "memory://".into(),
        node_id: node_id.into(),
        mode: TransportMode::Client,
        request_queue: None,
        reply_queue: Some(format!("rpc-reply-{node_id}")),
    };
    create_memory_transport_with_hub(config, hub.clone()).await
}

pub async fn client(hub: &Arc<MemoryHub>, node_id: &str, timeout: Duration) -> Result<RpcClient> {
    // ---
    let transport = client_transport(hub, node_id).await?;
    RpcClientBuilder::new(transport)
        .request_timeout(timeout)
        .build()
        .await
}

/// A hand-driven remote: the test reads requests from `inbox` and decides
/// when (and whether) to answer them.
pub struct FakeRemote {
    pub transport: TransportPtr,
    pub inbox: SubscriptionHandle,
}

impl FakeRemote {
    // ---
    pub async fn start(hub: &Arc<MemoryHub>, queue: &str) -> Result<Self> {
        // ---
        let transport = server_transport(hub, queue).await?;
        let inbox = transport.subscribe(queue.into()).await?;
        Ok(Self { transport, inbox })
    }

    pub async fn next_request(&mut self) -> Envelope {
        // ---
        tokio::time::timeout(Duration::from_secs(5), self.inbox.inbox.recv())
            .await
            .expect("timed out waiting for request")
            .expect("request inbox closed")
    }

    pub async fn reply_raw(&self, request: &Envelope, payload: Bytes) {
        // ---
        let env = Envelope::response(
            request.reply_to.clone().expect("request without reply_to"),
            payload,
            request.correlation_id.clone().expect("request without correlation_id"),
        );
        self.transport.publish(env).await.expect("reply publish failed");
    }

    pub async fn reply(&self, request: &Envelope, reply: ReplyEnvelope) {
        // ---
        self.reply_raw(request, reply.encode().unwrap()).await;
    }
}

/// Yield until `client` has `n` calls registered.
pub async fn wait_for_pending(client: &RpcClient, n: usize) {
    // ---
    tokio::time::timeout(Duration::from_secs(5), async {
        while client.pending_calls() != n {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("pending calls never reached expected count");
}
