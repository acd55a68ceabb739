//! AMQP protocol transports.
//!
//! Currently supports:
//! - lapin - AMQP 0-9-1 (RabbitMQ)
//!
//! Without the `transport_lapin` feature the factory still exists and
//! returns an error, so callers can select transports at runtime.

#[cfg(feature = "transport_lapin")]
mod lapin;

#[cfg(feature = "transport_lapin")]
pub use lapin::create_transport as create_lapin_transport;

#[cfg(not(feature = "transport_lapin"))]
pub async fn create_lapin_transport(
    _config: crate::TransportConfig,
) -> crate::Result<crate::TransportPtr> {
    // ---
    Err(crate::RpcError::Transport(
        "lapin transport not enabled; build with feature `transport_lapin`".into(),
    ))
}
