// src/client/mod.rs
//! RPC client implementation.
//!
//! [`RpcClient`] turns the asynchronous transport into blocking-style
//! request/reply calls.
//!
//! # Architecture
//!
//! On start the client subscribes to its private reply queue and spawns a
//! delivery router task that drains that queue. Each call:
//!
//! 1. generates a fresh [`CorrelationId`];
//! 2. registers a pending call (a oneshot channel) in the correlation
//!    registry;
//! 3. publishes the request with the correlation id, the client's reply
//!    queue and an expiration hint equal to the timeout;
//! 4. races the reply against its deadline and the client's close signal;
//! 5. decodes the [`ReplyEnvelope`] on success.
//!
//! The registry entry is removed by the call itself on every exit path.
//!
//! # Concurrency
//!
//! Any number of calls can be in flight. The registry mutex is held only
//! for single HashMap operations, so calls and the router never contend
//! for long.

mod registry;
mod router;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::domain::FAR_FUTURE;
use crate::protocol::{ReplyEnvelope, RequestEnvelope};
use crate::{
    // ---
    log_debug,
    log_info,
    log_warn,
    Address,
    CorrelationId,
    Envelope,
    Result,
    RpcConfig,
    RpcError,
    Subscription,
    TransportPtr,
};

use registry::{lock_ignore_poison, CorrelationRegistry, PendingGuard};

/// Running RPC client.
///
/// Cheap to clone (internally `Arc`-backed); all clones share one reply
/// queue, one registry and one delivery router.
///
/// # Example
///
/// ```no_run
/// # use mq_rpc::{RpcClient, RpcConfig};
/// # use std::time::Duration;
/// # async fn example() -> mq_rpc::Result<()> {
/// let config = RpcConfig::with_broker("amqp://localhost:5672/%2f", "calc-client")
///     .with_server_queue("rpc-calc")
///     .with_request_timeout(Duration::from_secs(5));
///
/// let client = RpcClient::connect(&config).await?;
/// let reply = client.call("rpc-calc", &b"ping"[..]).await?;
/// client.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

struct Inner {
    // ---
    transport: TransportPtr,
    node_id: String,
    reply_address: Address,
    default_destination: Option<Address>,
    request_timeout: Duration,

    registry: Arc<CorrelationRegistry>,

    /// Raised once by `close()` (or by the router when the transport ends
    /// the reply inbox). Every waiting call also watches it.
    closed: Arc<watch::Sender<bool>>,
    close_started: AtomicBool,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Last clone gone without close(): still stop the router.
        self.closed.send_replace(true);
    }
}

impl RpcClient {
    // ---
    /// Connect using `config`, creating the transport it describes.
    ///
    /// An `amqp://` URI selects the lapin transport (feature
    /// `transport_lapin`); no URI selects the in-memory transport.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::Transport` if the connection or the reply queue
    /// subscription cannot be established.
    pub async fn connect(config: &RpcConfig) -> Result<Self> {
        // ---
        let transport = crate::create_client_transport(config).await?;
        Self::with_transport(transport, config).await
    }

    /// Start a client on an existing transport.
    ///
    /// The transport must own a reply queue (client or full-duplex mode).
    ///
    /// # Errors
    ///
    /// Returns `RpcError::InvalidMode` for a server-only transport and
    /// `RpcError::Transport` if the reply subscription fails.
    pub async fn with_transport(transport: TransportPtr, config: &RpcConfig) -> Result<Self> {
        // ---
        let mut builder = crate::RpcClientBuilder::new(transport)
            .node_id(config.transport_id.clone())
            .request_timeout(config.request_timeout);

        if let Some(queue) = &config.server_queue {
            builder = builder.default_destination(queue.clone());
        }

        builder.build().await
    }

    /// Subscribe to the reply queue and spawn the delivery router
    /// (internal use by RpcClientBuilder).
    pub(crate) async fn start(
        transport: TransportPtr,
        node_id: String,
        default_destination: Option<Address>,
        request_timeout: Duration,
    ) -> Result<Self> {
        // ---
        if !transport.mode().can_call() {
            return Err(RpcError::InvalidMode(
                "RpcClient requires a transport with a reply queue".into(),
            ));
        }

        let reply_queue = transport
            .reply_queue()
            .ok_or_else(|| RpcError::MissingConfig("reply queue".into()))?
            .to_string();

        // Subscribe before anything can be published so no reply is missed.
        let handle = transport
            .subscribe(Subscription::from(reply_queue.as_str()))
            .await?;

        let registry = CorrelationRegistry::new();
        let (closed, _) = watch::channel(false);
        let closed = Arc::new(closed);

        let router = router::spawn(
            Arc::clone(&registry),
            handle,
            Arc::clone(&closed),
            reply_queue.clone(),
        );

        log_info!("[{node_id}] rpc client listening on {reply_queue}");

        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                node_id,
                reply_address: Address::from(reply_queue),
                default_destination,
                request_timeout,
                registry,
                closed,
                close_started: AtomicBool::new(false),
                router: Mutex::new(Some(router)),
            }),
        })
    }

    /// Call `destination` with an already-encoded payload, using the
    /// client's configured request timeout.
    ///
    /// # Errors
    ///
    /// See [`call_with_timeout`](Self::call_with_timeout).
    pub async fn call(&self, destination: &str, payload: impl Into<Bytes>) -> Result<Bytes> {
        // ---
        self.call_with_timeout(destination, payload, self.inner.request_timeout)
            .await
    }

    /// Call `destination` and wait at most `timeout` for the reply.
    ///
    /// The deadline is taken just before publishing. The payload must
    /// already be in the destination's wire format; it is not inspected.
    ///
    /// # Errors
    ///
    /// Exactly one of:
    /// - `RpcError::Transport` - publish failed
    /// - `RpcError::Timeout` - no reply before the deadline (unknown outcome)
    /// - `RpcError::Decode` - the reply was not a valid reply envelope
    /// - `RpcError::Remote` - the remote reported failure; carries its text
    /// - `RpcError::Closed` - the client was closed before a reply arrived
    pub async fn call_with_timeout(
        &self,
        destination: &str,
        payload: impl Into<Bytes>,
        timeout: Duration,
    ) -> Result<Bytes> {
        // ---
        let inner = &self.inner;

        let mut closed = inner.closed.subscribe();
        if *closed.borrow() {
            return Err(RpcError::Closed);
        }

        let correlation_id = CorrelationId::generate();

        // Registered before publish so a fast reply always finds its waiter.
        // `_pending` removes the entry on every return path below.
        let (_pending, reply_rx) = PendingGuard::register(&inner.registry, correlation_id.clone())?;

        let env = Envelope::request(
            Address::from(destination),
            payload.into(),
            correlation_id.as_shared(),
            inner.reply_address.clone(),
            timeout,
        );

        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);

        tokio::select! {
            biased;

            published = inner.transport.publish(env) => published?,
            _ = closed.wait_for(|closed| *closed) => return Err(RpcError::Closed),
            _ = time::sleep_until(deadline) => return Err(RpcError::Timeout),
        }

        let reply = tokio::select! {
            biased;

            reply = reply_rx => reply.map_err(|_| RpcError::Closed)?,
            _ = closed.wait_for(|closed| *closed) => return Err(RpcError::Closed),
            _ = time::sleep_until(deadline) => {
                log_debug!(
                    "[{}] call to {destination} timed out (correlation_id: {correlation_id})",
                    inner.node_id
                );
                return Err(RpcError::Timeout);
            }
        };

        ReplyEnvelope::decode(&reply)?.into_result()
    }

    /// Invoke function `func_id` on the configured server queue.
    ///
    /// # Errors
    ///
    /// `RpcError::MissingConfig` if no server queue was configured, otherwise
    /// as [`call_with_timeout`](Self::call_with_timeout).
    pub async fn remote_call(&self, func_id: i32, body: impl Into<Bytes>) -> Result<Bytes> {
        // ---
        let destination = self
            .inner
            .default_destination
            .clone()
            .ok_or_else(|| RpcError::MissingConfig("server_queue".into()))?;

        let request = RequestEnvelope::new(func_id, body).encode()?;
        self.call(destination.as_str(), request).await
    }

    /// Typed call: JSON-encode `req`, invoke `func_id` on `destination` and
    /// JSON-decode the reply body.
    ///
    /// # Errors
    ///
    /// `RpcError::Serialization` if either side fails to (de)serialize,
    /// otherwise as [`call_with_timeout`](Self::call_with_timeout).
    pub async fn request_to<TReq, TResp>(
        &self,
        destination: &str,
        func_id: i32,
        req: &TReq,
    ) -> Result<TResp>
    where
        TReq: Serialize,
        TResp: DeserializeOwned,
    {
        // ---
        let body = serde_json::to_vec(req)?;
        let request = RequestEnvelope::new(func_id, body).encode()?;

        let reply = self.call(destination, request).await?;
        let resp: TResp = serde_json::from_slice(&reply)?;
        Ok(resp)
    }

    /// Close the client.
    ///
    /// Raises the close signal (every waiting call returns
    /// `RpcError::Closed`), joins the delivery router, then closes the
    /// transport. Safe to call more than once and from several clones; only
    /// the first call closes the transport.
    pub async fn close(&self) -> Result<()> {
        // ---
        let first = !self.inner.close_started.swap(true, Ordering::AcqRel);
        self.inner.closed.send_replace(true);

        let router = lock_ignore_poison(&self.inner.router).take();
        if let Some(task) = router {
            if let Err(err) = task.await {
                log_warn!("[{}] delivery router ended abnormally: {err}", self.inner.node_id);
            }
        }

        if !first {
            return Ok(());
        }

        log_info!("[{}] rpc client closed", self.inner.node_id);
        self.inner.transport.close().await
    }

    /// True once the client has been closed or its reply inbox has ended.
    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Number of calls currently waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.inner.registry.len()
    }

    /// The private queue replies are addressed to.
    pub fn reply_address(&self) -> &Address {
        &self.inner.reply_address
    }

    /// Node id used in this client's log output.
    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }
}
