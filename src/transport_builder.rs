//! Transport builder for creating transport instances.
//!
//! Provides a fluent builder API for constructing transports with clear separation
//! between required and optional configuration.

use crate::{Result, RpcConfig, RpcError, TransportConfig, TransportMode, TransportPtr};

/// Builder for creating transport instances.
///
/// Provides both explicit queue configuration and mode-based sugar methods.
///
/// # Examples
///
/// ## Client mode with sugar method
/// ```no_run
/// use mq_rpc::TransportBuilder;
///
/// # async fn example() -> mq_rpc::Result<()> {
/// let transport = TransportBuilder::new()
///     .uri("amqp://localhost:5672/%2f")
///     .node_id("calc-client")
///     .client_mode()  // reply_queue("rpc-reply-calc-client")
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
///
/// ## Server mode with explicit queue
/// ```no_run
/// use mq_rpc::TransportBuilder;
///
/// # async fn example() -> mq_rpc::Result<()> {
/// let transport = TransportBuilder::new()
///     .uri("amqp://localhost:5672/%2f")
///     .node_id("calc-server")
///     .request_queue("rpc-calc")
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct TransportBuilder {
    uri: Option<String>,
    node_id: Option<String>,
    request_queue: Option<String>,
    reply_queue: Option<String>,
    transport_type: Option<String>,

    // Track which sugar methods were called (conflicts detected at build())
    called_client_mode: bool,
    called_server_mode: bool,
    called_full_duplex: bool,
}

impl TransportBuilder {
    /// Create a new transport builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the transport URI (required).
    ///
    /// Examples:
    /// - `"amqp://localhost:5672/%2f"`
    /// - `"memory://"`
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Set the node ID (required).
    ///
    /// Used to generate default queue names when using mode sugar methods.
    pub fn node_id(mut self, id: impl Into<String>) -> Self {
        self.node_id = Some(id.into());
        self
    }

    /// Set explicit request queue name.
    ///
    /// Cannot be used together with mode sugar methods (`client_mode()`, etc).
    pub fn request_queue(mut self, queue: impl Into<String>) -> Self {
        self.request_queue = Some(queue.into());
        self
    }

    /// Set explicit reply queue name.
    ///
    /// Cannot be used together with mode sugar methods (`client_mode()`, etc).
    pub fn reply_queue(mut self, queue: impl Into<String>) -> Self {
        self.reply_queue = Some(queue.into());
        self
    }

    /// Configure for client mode (sugar method).
    ///
    /// Auto-generates: `reply_queue("rpc-reply-{node_id}")`
    pub fn client_mode(mut self) -> Self {
        self.called_client_mode = true;
        self
    }

    /// Configure for server mode (sugar method).
    ///
    /// Auto-generates: `request_queue("rpc-{node_id}")`
    pub fn server_mode(mut self) -> Self {
        self.called_server_mode = true;
        self
    }

    /// Configure for full-duplex mode (sugar method).
    ///
    /// Auto-generates both `request_queue("rpc-{node_id}")` and
    /// `reply_queue("rpc-reply-{node_id}")`.
    pub fn full_duplex(mut self) -> Self {
        self.called_full_duplex = true;
        self
    }

    /// Set explicit transport type: `"memory"` or `"lapin"`.
    ///
    /// If not specified, an `amqp://` or `amqps://` URI selects lapin and
    /// anything else selects memory.
    pub fn transport_type(mut self, flag: impl Into<String>) -> Self {
        self.transport_type = Some(flag.into());
        self
    }

    /// Build the transport (consumes self).
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Required fields missing (`uri`, `node_id`)
    /// - No mode specified (no queues set)
    /// - Multiple sugar methods called
    /// - Both sugar methods and explicit queues used
    /// - Transport creation fails
    pub async fn build(self) -> Result<TransportPtr> {
        // ---
        let config = self.into_config()?;
        let transport_type = config.transport_type;

        match transport_type.as_deref() {
            Some("lapin") => crate::create_lapin_transport(config.inner).await,
            Some("memory") => crate::create_memory_transport(config.inner).await,
            Some(other) => Err(RpcError::Transport(format!(
                "unrecognized transport_type: {other}, valid values: memory, lapin"
            ))),
            None if is_amqp_uri(&config.inner.uri) => {
                crate::create_lapin_transport(config.inner).await
            }
            None => crate::create_memory_transport(config.inner).await,
        }
    }

    fn into_config(mut self) -> Result<BuiltConfig> {
        // ---
        let uri = self
            .uri
            .take()
            .ok_or_else(|| RpcError::MissingConfig("uri".into()))?;
        let node_id = self
            .node_id
            .take()
            .ok_or_else(|| RpcError::MissingConfig("node_id".into()))?;

        let sugar_count = [
            self.called_client_mode,
            self.called_server_mode,
            self.called_full_duplex,
        ]
        .iter()
        .filter(|&&x| x)
        .count();

        if sugar_count > 1 {
            return Err(RpcError::ConfigConflict(
                "Cannot call multiple mode sugar methods (client_mode, server_mode, full_duplex)"
                    .into(),
            ));
        }

        let has_explicit_queues = self.request_queue.is_some() || self.reply_queue.is_some();
        if sugar_count > 0 && has_explicit_queues {
            return Err(RpcError::ConfigConflict(
                "Cannot use both mode sugar methods and explicit queue configuration".into(),
            ));
        }

        if self.called_client_mode || self.called_full_duplex {
            self.reply_queue = Some(format!("rpc-reply-{node_id}"));
        }
        if self.called_server_mode || self.called_full_duplex {
            self.request_queue = Some(format!("rpc-{node_id}"));
        }

        let mode = match (&self.request_queue, &self.reply_queue) {
            (Some(_), Some(_)) => TransportMode::FullDuplex,
            (Some(_), None) => TransportMode::Server,
            (None, Some(_)) => TransportMode::Client,
            (None, None) => {
                return Err(RpcError::MissingConfig(
                    "at least one queue (request or reply) or a mode method".into(),
                ))
            }
        };

        Ok(BuiltConfig {
            inner: TransportConfig {
                uri,
                node_id,
                mode,
                request_queue: self.request_queue,
                reply_queue: self.reply_queue,
            },
            transport_type: self.transport_type,
        })
    }
}

struct BuiltConfig {
    inner: TransportConfig,
    transport_type: Option<String>,
}

fn is_amqp_uri(uri: &str) -> bool {
    uri.starts_with("amqp://") || uri.starts_with("amqps://")
}

/// Build the client-mode transport described by an [`RpcConfig`].
pub(crate) async fn create_client_transport(config: &RpcConfig) -> Result<TransportPtr> {
    // ---
    TransportBuilder::new()
        .uri(config.transport_uri.as_deref().unwrap_or("memory://"))
        .node_id(config.transport_id.clone())
        .reply_queue(config.resolve_reply_queue())
        .build()
        .await
}
