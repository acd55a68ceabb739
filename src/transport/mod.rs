//! Transport implementations.
//!
//! Concrete implementations of the domain-level `Transport` trait, exposed
//! only through constructor functions. Broker-backed transports sit behind
//! feature flags.
//!
//! Domain code must not depend on transport-specific types.

mod amqp;
mod memory;

pub use amqp::create_lapin_transport;
pub use memory::{create_memory_transport, create_memory_transport_with_hub, MemoryHub};
