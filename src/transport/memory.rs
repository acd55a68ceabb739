//! In-memory transport implementation.
//!
//! This module provides a pure in-process implementation of the domain-level
//! `Transport` trait. It is intended primarily for testing, local execution,
//! and as a reference for transport semantics.
//!
//! ## Reference Semantics
//!
//! - Once `subscribe()` returns successfully, messages published *after* that
//!   point and matching the subscription are deliverable.
//! - A subscription matches an address when both strings are equal.
//! - Publishing to an address nobody subscribes to succeeds and the message
//!   is discarded, like a broker's default exchange with no bound queue.
//! - `expiration` is ignored; nothing ever expires in memory.
//! - Closing a transport ends the inboxes it subscribed and makes its own
//!   `publish()` fail. Other transports on the same hub are unaffected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::{mpsc, RwLock};

use crate::{
    // ---
    log_debug,
    Envelope,
    Result,
    RpcError,
    Subscription,
    SubscriptionHandle,
    Transport,
    TransportBase,
    TransportConfig,
    TransportPtr,
};

/// Inbox depth per subscriber.
const INBOX_CAPACITY: usize = 64;

struct Subscriber {
    owner: u64,
    tx: mpsc::Sender<Envelope>,
}

/// Shared message bus for the in-memory transport.
///
/// Simulates a message broker within a single process. All memory transports
/// sharing a `MemoryHub` can publish and receive each other's messages,
/// exactly as nodes connected to one broker would.
///
/// # Usage in Integration Tests
///
/// Construct a hub per test and pass it to [`create_memory_transport_with_hub`]
/// to keep parallel tests isolated:
///
/// ```
/// # use mq_rpc::{MemoryHub, TransportConfig, TransportMode};
/// # async fn example() -> mq_rpc::Result<()> {
/// let hub = MemoryHub::new();
///
/// let server_config = TransportConfig {
///     uri: "memory://".into(), node_id: "server".into(), mode: TransportMode::Server,
///     request_queue: Some("rpc-calc".into()), reply_queue: None,
/// };
/// let client_config = TransportConfig {
///     uri: "memory://".into(), node_id: "client".into(), mode: TransportMode::Client,
///     request_queue: None, reply_queue: Some("rpc-reply-client".into()),
/// };
///
/// let server = mq_rpc::create_memory_transport_with_hub(server_config, hub.clone()).await?;
/// let client = mq_rpc::create_memory_transport_with_hub(client_config, hub.clone()).await?;
/// # Ok(())
/// # }
/// ```
pub struct MemoryHub {
    // ---
    subscriptions: RwLock<HashMap<Subscription, Vec<Subscriber>>>,
    next_owner: AtomicU64,
}

impl MemoryHub {
    /// Create a new, empty hub.
    pub fn new() -> Arc<Self> {
        // ---
        Arc::new(Self::default())
    }

    async fn publish(&self, transport_id: &str, env: Envelope) -> Result<()> {
        // ---
        let subs = self.subscriptions.read().await;

        let Some(subscribers) = subs.get(env.address.as_str()) else {
            log_debug!("{transport_id}: no subscriber for {}", env.address.as_str());
            return Ok(());
        };

        for sub in subscribers {
            // A closed channel means the SubscriptionHandle was dropped.
            if sub.tx.send(env.clone()).await.is_err() {
                log_debug!("{transport_id}: dropped envelope for closed inbox");
            }
        }

        Ok(())
    }

    async fn subscribe(&self, owner: u64, sub: Subscription) -> SubscriptionHandle {
        // ---
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);

        let mut subs = self.subscriptions.write().await;
        subs.entry(sub).or_default().push(Subscriber { owner, tx });

        SubscriptionHandle { inbox: rx }
    }

    async fn unsubscribe_all(&self, owner: u64) {
        // ---
        let mut subs = self.subscriptions.write().await;
        for subscribers in subs.values_mut() {
            subscribers.retain(|sub| sub.owner != owner);
        }
        subs.retain(|_, subscribers| !subscribers.is_empty());
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        // ---
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_owner: AtomicU64::new(1),
        }
    }
}

/// Process-global hub used by [`create_memory_transport`].
static GLOBAL_HUB: OnceLock<Arc<MemoryHub>> = OnceLock::new();

fn global_hub() -> Arc<MemoryHub> {
    GLOBAL_HUB.get_or_init(MemoryHub::new).clone()
}

/// In-memory transport.
struct MemoryTransport {
    // ---
    base: TransportBase,
    hub: Arc<MemoryHub>,
    owner: u64,
    closed: AtomicBool,
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    // ---
    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn publish(&self, env: Envelope) -> Result<()> {
        // ---
        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::Transport(format!(
                "{}: memory transport closed",
                self.transport_id()
            )));
        }
        self.hub.publish(self.transport_id(), env).await
    }

    async fn subscribe(&self, sub: Subscription) -> Result<SubscriptionHandle> {
        // ---
        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::Transport(format!(
                "{}: memory transport closed",
                self.transport_id()
            )));
        }
        log_debug!("{}: subscribe to {sub:?}", self.transport_id());
        Ok(self.hub.subscribe(self.owner, sub).await)
    }

    /// Drop this transport's subscriptions; their inboxes end.
    async fn close(&self) -> Result<()> {
        // ---
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        log_debug!("{}: closing memory transport", self.transport_id());
        self.hub.unsubscribe_all(self.owner).await;
        Ok(())
    }
}

/// Create a new in-memory transport on the process-global hub.
///
/// All transports created this way share one message bus. For isolated
/// parallel testing use [`create_memory_transport_with_hub`].
///
/// # Errors
///
/// Currently infallible; always returns `Ok`.
pub async fn create_memory_transport(config: TransportConfig) -> Result<TransportPtr> {
    // ---
    create_memory_transport_with_hub(config, global_hub()).await
}

/// Create a new in-memory transport on the provided hub.
///
/// # Errors
///
/// Currently infallible; always returns `Ok`.
pub async fn create_memory_transport_with_hub(
    config: TransportConfig,
    hub: Arc<MemoryHub>,
) -> Result<TransportPtr> {
    // ---
    log_debug!("{}: create memory transport", config.node_id);

    let owner = hub.next_owner.fetch_add(1, Ordering::Relaxed);
    let transport = MemoryTransport {
        base: TransportBase::from(&config),
        hub,
        owner,
        closed: AtomicBool::new(false),
    };

    Ok(Arc::new(transport))
}
