//! Public, transport-agnostic client configuration.
//!
//! Contains no broker-specific options. [`RpcClient::connect`](crate::RpcClient::connect)
//! turns it into a transport via [`TransportBuilder`](crate::TransportBuilder).

use std::time::Duration;

/// Default time a call waits for its reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection and call parameters for an [`RpcClient`](crate::RpcClient).
#[derive(Debug, Clone)]
pub struct RpcConfig {
    // ---
    /// Broker URI, e.g. `"amqp://localhost:5672/%2f"`.
    ///
    /// `None` selects the in-memory transport.
    pub transport_uri: Option<String>,

    /// Identity of this node, used for logging and the default reply queue name.
    pub transport_id: String,

    /// Queue of the serving node that `call()` and `remote_call()` target.
    pub server_queue: Option<String>,

    /// Explicit reply queue name.
    ///
    /// If `None`, a private `rpc-reply-{transport_id}-{uuid}` queue is used so
    /// that two clients sharing a `transport_id` never consume each other's
    /// replies.
    pub reply_queue_name: Option<String>,

    /// Time each call waits for its reply, measured from just before publish.
    ///
    /// Default: 30 seconds
    pub request_timeout: Duration,
}

impl RpcConfig {
    /// Config for a broker-backed transport.
    pub fn with_broker(transport_uri: impl Into<String>, transport_id: impl Into<String>) -> Self {
        Self {
            transport_uri: Some(transport_uri.into()),
            transport_id: transport_id.into(),
            server_queue: None,
            reply_queue_name: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Config for the in-memory transport (no broker).
    pub fn memory(transport_id: impl Into<String>) -> Self {
        Self {
            transport_uri: None,
            transport_id: transport_id.into(),
            server_queue: None,
            reply_queue_name: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Set the default destination queue.
    pub fn with_server_queue(mut self, queue: impl Into<String>) -> Self {
        self.server_queue = Some(queue.into());
        self
    }

    /// Set an explicit reply queue name.
    pub fn with_reply_queue_name(mut self, name: impl Into<String>) -> Self {
        self.reply_queue_name = Some(name.into());
        self
    }

    /// Set the per-call reply timeout.
    ///
    /// # Example
    ///
    /// ```
    /// use mq_rpc::RpcConfig;
    /// use std::time::Duration;
    ///
    /// let config = RpcConfig::with_broker("amqp://localhost:5672/%2f", "client")
    ///     .with_server_queue("rpc-calc")
    ///     .with_request_timeout(Duration::from_secs(10));
    /// assert_eq!(config.request_timeout, Duration::from_secs(10));
    /// ```
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// The reply queue a client built from this config listens on.
    pub(crate) fn resolve_reply_queue(&self) -> String {
        // ---
        self.reply_queue_name.clone().unwrap_or_else(|| {
            format!("rpc-reply-{}-{}", self.transport_id, uuid::Uuid::new_v4().simple())
        })
    }
}
