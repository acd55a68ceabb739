// src/domain/transport.rs

//! Transport domain abstractions.
//!
//! This module defines the capability set the RPC client and server need
//! from a messaging connection:
//!
//! - publish an opaque payload to a named destination, tagged with a
//!   correlation id, a reply destination and an expiration hint;
//! - subscribe to a destination and receive a lazy sequence of inbound
//!   envelopes, each carrying the correlation id it answers;
//! - close the connection.
//!
//! It intentionally avoids any reference to concrete protocols, brokers,
//! or client libraries. Correlation, timeouts and reply decoding happen in
//! the client layer, not here.
//!
//! Concrete implementations of this interface live under `src/transport/`.
use crate::Result;
use std::borrow::Borrow;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

/// Operational mode of a transport.
///
/// Determines which queues the transport owns and therefore which of
/// [`RpcClient`](crate::RpcClient) / [`RpcServer`](crate::RpcServer) can be
/// built on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    // ---
    /// Owns a reply queue only. Supports `RpcClient`.
    Client,

    /// Owns a request queue only. Supports `RpcServer`.
    Server,

    /// Owns both queues.
    FullDuplex,
}

impl TransportMode {
    /// True when the transport owns a reply queue.
    pub fn can_call(self) -> bool {
        matches!(self, TransportMode::Client | TransportMode::FullDuplex)
    }

    /// True when the transport owns a request queue.
    pub fn can_serve(self) -> bool {
        matches!(self, TransportMode::Server | TransportMode::FullDuplex)
    }
}

/// Shared base state for all transport implementations.
///
/// Each concrete transport embeds this as a field named `base` and returns
/// it from [`Transport::base`], so the identity and queue accessors have a
/// single default implementation.
#[derive(Debug, Clone)]
pub struct TransportBase {
    /// Unique identifier for this transport instance (the node_id).
    pub transport_id: String,
    /// Operational mode of this transport.
    pub mode: TransportMode,
    /// Request queue name (set for Server and FullDuplex modes).
    pub request_queue: Option<String>,
    /// Reply queue name (set for Client and FullDuplex modes).
    pub reply_queue: Option<String>,
}

impl From<&TransportConfig> for TransportBase {
    fn from(config: &TransportConfig) -> Self {
        // ---
        Self {
            transport_id: config.node_id.clone(),
            mode: config.mode,
            request_queue: config.request_queue.clone(),
            reply_queue: config.reply_queue.clone(),
        }
    }
}

/// Configuration for creating a transport instance.
///
/// Usually produced by [`TransportBuilder`](crate::TransportBuilder) and
/// handed to one of the `create_*_transport()` factories.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Broker URI (e.g. `"amqp://localhost:5672/%2f"`, `"memory://"`).
    pub uri: String,
    /// Node ID for this transport instance.
    pub node_id: String,
    /// Operational mode.
    pub mode: TransportMode,
    /// Request queue name (required for Server and FullDuplex modes).
    pub request_queue: Option<String>,
    /// Reply queue name (required for Client and FullDuplex modes).
    pub reply_queue: Option<String>,
}

/// A transport address.
///
/// A destination to which messages may be published: a queue name for
/// AMQP, an exact-match key for the memory transport. Opaque at the
/// domain level, cheap to clone.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address(pub Arc<str>);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<T> From<T> for Address
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        // ---
        Address(value.into())
    }
}

/// A subscription identifier.
///
/// How a subscription matches an address is defined by the transport.
/// The in-memory transport provides the reference semantics: exact string
/// equality.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Subscription(pub Arc<str>);

// Lets the memory hub look subscriptions up by address string.
impl Borrow<str> for Subscription {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<Address> for Subscription {
    fn from(address: Address) -> Self {
        // ---
        Subscription(address.0)
    }
}

impl<T> From<T> for Subscription
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        // ---
        Subscription(value.into())
    }
}

/// An opaque message envelope.
///
/// The unit of transport between producers and consumers. Carries the
/// payload plus the metadata the RPC layer needs for reply routing. The
/// transport never interprets the payload.
///
/// # Examples
///
/// ```
/// # use mq_rpc::{Envelope, Address};
/// # use bytes::Bytes;
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// let request = Envelope::request(
///     Address::from("rpc-calc"),
///     Bytes::from_static(b"payload"),
///     Arc::from("correlation-123"),
///     Address::from("rpc-reply-client-1"),
///     Duration::from_secs(5),
/// );
///
/// let reply = Envelope::response(
///     Address::from("rpc-reply-client-1"),
///     Bytes::from_static(b"result"),
///     Arc::from("correlation-123"),
/// );
/// assert_eq!(reply.correlation_id, request.correlation_id);
/// ```
#[derive(Clone, Debug)]
pub struct Envelope {
    // ---
    /// Delivery address used by the transport.
    pub address: Address,

    /// Opaque payload bytes.
    pub payload: Bytes,

    /// Correlation identifier linking a reply to its request.
    pub correlation_id: Option<Arc<str>>,

    /// Where the server must publish the reply. Set on requests only.
    pub reply_to: Option<Address>,

    /// Advisory time-to-live. Brokers that support message TTL may drop
    /// the request once it expires; correctness never depends on it.
    pub expiration: Option<Duration>,

    /// Content type metadata, informational only.
    pub content_type: Option<Arc<str>>,
}

/// Content type stamped on every envelope this crate produces.
pub const CONTENT_TYPE: &str = "application/octet-stream";

/// Stand-in for "no timeout" (about 30 years). Call deadlines and advisory
/// expirations are clamped to it so huge durations never overflow.
pub(crate) const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

impl Envelope {
    // ---
    /// Create a request envelope.
    ///
    /// * `address` - destination queue of the serving node
    /// * `payload` - encoded request, already in the destination's wire format
    /// * `correlation_id` - fresh token for this call
    /// * `reply_to` - reply queue owned by the calling client
    /// * `expiration` - advisory TTL derived from the call timeout, capped
    ///   at roughly thirty years
    pub fn request(
        address: Address,
        payload: Bytes,
        correlation_id: Arc<str>,
        reply_to: Address,
        expiration: Duration,
    ) -> Self {
        // ---
        Self {
            address,
            payload,
            correlation_id: Some(correlation_id),
            reply_to: Some(reply_to),
            expiration: Some(expiration.min(FAR_FUTURE)),
            content_type: Some(Arc::from(CONTENT_TYPE)),
        }
    }

    /// Create a reply envelope addressed to a request's `reply_to`.
    pub fn response(address: Address, payload: Bytes, correlation_id: Arc<str>) -> Self {
        // ---
        Self {
            address,
            payload,
            correlation_id: Some(correlation_id),
            reply_to: None,
            expiration: None,
            content_type: Some(Arc::from(CONTENT_TYPE)),
        }
    }
}

/// Handle returned from a successful subscription.
///
/// `inbox` is the lazy, effectively infinite delivery sequence for the
/// subscribed destination. It yields `None` once the transport is closed
/// and cannot be restarted in place; a new subscription is required.
///
/// # Example
///
/// ```no_run
/// # use mq_rpc::{TransportBuilder, Subscription};
/// # async fn example() -> mq_rpc::Result<()> {
/// let transport = TransportBuilder::new()
///     .uri("memory://")
///     .node_id("app")
///     .full_duplex()
///     .build()
///     .await?;
///
/// let mut handle = transport.subscribe(Subscription::from("notifications")).await?;
///
/// while let Some(envelope) = handle.inbox.recv().await {
///     println!("received {:?}", envelope.correlation_id);
/// }
/// # Ok(())
/// # }
/// ```
pub struct SubscriptionHandle {
    // ---
    /// Receiver channel for delivered envelopes matching this subscription.
    pub inbox: mpsc::Receiver<Envelope>,
}

/// Transport abstraction.
///
/// Best-effort delivery of envelopes between producers and subscribers.
/// Implementations must ensure that:
///
/// - Once `subscribe()` returns successfully, messages published *after*
///   that point and matching the subscription are deliverable.
/// - `publish()` is safe to call concurrently from many tasks. A transport
///   whose client library is not concurrency-safe must serialize publishes
///   internally (the AMQP transport does so through its actor task).
/// - No ordering, durability or retry guarantees are made.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    // ---
    /// Returns a reference to the shared base state.
    fn base(&self) -> &TransportBase;

    /// Returns the transport_id of the transport.
    fn transport_id(&self) -> &str {
        &self.base().transport_id
    }

    /// Returns the operational mode of the transport.
    fn mode(&self) -> TransportMode {
        self.base().mode
    }

    /// Request queue this transport serves, if any.
    fn request_queue(&self) -> Option<&str> {
        self.base().request_queue.as_deref()
    }

    /// Private reply queue this transport listens on, if any.
    fn reply_queue(&self) -> Option<&str> {
        self.base().reply_queue.as_deref()
    }

    /// Publish an envelope to `env.address`.
    async fn publish(&self, env: Envelope) -> Result<()>;

    /// Register a subscription and return a handle for receiving messages.
    async fn subscribe(&self, sub: Subscription) -> Result<SubscriptionHandle>;

    /// Close the transport and release any associated resources.
    ///
    /// Every open [`SubscriptionHandle`] inbox terminates afterwards.
    async fn close(&self) -> Result<()>;
}

/// Shared transport pointer.
///
/// Clones share the same underlying connection.
pub type TransportPtr = Arc<dyn Transport>;
