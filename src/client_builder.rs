//! RPC client builder.
//!
//! Fluent configuration of an [`RpcClient`] on top of an existing transport.

use crate::{Address, Result, RpcClient, TransportPtr, DEFAULT_REQUEST_TIMEOUT};
use std::time::Duration;

/// Builder for [`RpcClient`] instances.
///
/// # Example
///
/// ```no_run
/// use mq_rpc::{TransportBuilder, RpcClientBuilder};
/// use std::time::Duration;
///
/// # async fn example() -> mq_rpc::Result<()> {
/// let transport = TransportBuilder::new()
///     .uri("amqp://localhost:5672/%2f")
///     .node_id("calc-client")
///     .transport_type("lapin")
///     .client_mode()
///     .build()
///     .await?;
///
/// let client = RpcClientBuilder::new(transport)
///     .default_destination("rpc-calc")
///     .request_timeout(Duration::from_millis(500))
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct RpcClientBuilder {
    // ---
    transport: TransportPtr,
    node_id: Option<String>,
    default_destination: Option<String>,

    // default: 30s
    request_timeout: Option<Duration>,
}

impl RpcClientBuilder {
    /// Create a new client builder.
    ///
    /// The client's `node_id` defaults to `transport.transport_id()`.
    pub fn new(transport: TransportPtr) -> Self {
        // ---
        Self {
            transport,
            node_id: None,
            default_destination: None,
            request_timeout: None,
        }
    }

    /// Override the client's node ID (used in log output).
    pub fn node_id(mut self, id: impl Into<String>) -> Self {
        self.node_id = Some(id.into());
        self
    }

    /// Queue targeted by [`RpcClient::remote_call`].
    pub fn default_destination(mut self, queue: impl Into<String>) -> Self {
        self.default_destination = Some(queue.into());
        self
    }

    /// Set the per-call reply timeout.
    ///
    /// Default: 30s.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Subscribe to the reply queue and start the client (consumes self).
    ///
    /// # Errors
    ///
    /// Returns `RpcError::InvalidMode` if the transport has no reply queue,
    /// or `RpcError::Transport` if the subscription fails.
    pub async fn build(self) -> Result<RpcClient> {
        // ---
        let node_id = self
            .node_id
            .unwrap_or_else(|| self.transport.transport_id().to_string());

        let request_timeout = self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let default_destination = self.default_destination.map(Address::from);

        RpcClient::start(self.transport, node_id, default_destination, request_timeout).await
    }
}
