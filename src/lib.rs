//! Synchronous request/response RPC over publish/subscribe messaging.
//!
//! A call publishes a request tagged with a fresh correlation id and the
//! caller's private reply queue, then waits until the matching reply
//! arrives, its timeout elapses, or the client is closed. Replies for many
//! concurrent calls share one reply queue and may arrive in any order; a
//! single delivery router hands each one to the call it belongs to.
//!
//! ```no_run
//! use mq_rpc::{RpcClient, RpcConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> mq_rpc::Result<()> {
//! let config = RpcConfig::with_broker("amqp://localhost:5672/%2f", "calc-client")
//!     .with_server_queue("rpc-calc")
//!     .with_request_timeout(Duration::from_secs(2));
//!
//! let client = RpcClient::connect(&config).await?;
//! let body = client.remote_call(0, &b"1 + 2"[..]).await?;
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

mod macros;

#[allow(unused_imports)]
pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

mod client;
mod domain;
mod protocol;
mod server;
mod transport;

mod client_builder;
mod rpc_config;
mod transport_builder;

mod correlation;
mod error;

// Re-export main types
pub use client::RpcClient;
pub use server::RpcServer;

pub use client_builder::RpcClientBuilder;
pub use rpc_config::{RpcConfig, DEFAULT_REQUEST_TIMEOUT};
pub use transport_builder::TransportBuilder;

pub(crate) use transport_builder::create_client_transport;

pub use correlation::CorrelationId;
pub use error::{Result, RpcError};

pub use protocol::{ReplyEnvelope, RequestEnvelope};

pub use transport::{
    //
    create_lapin_transport,
    create_memory_transport,
    create_memory_transport_with_hub,
    MemoryHub,
};

// --- public re-exports
pub use domain::{
    //
    Address,
    Envelope,
    Subscription,
    SubscriptionHandle,
    Transport,
    TransportBase,
    TransportConfig,
    TransportMode,
    TransportPtr,
    CONTENT_TYPE,
};
