//! Domain layer public interface.
//!
//! Abstractions that are independent of transport implementations,
//! protocols, or infrastructure concerns.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod transport;

// --- Transport domain re-exports ---

pub use transport::{
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

pub(crate) use transport::FAR_FUTURE;
