use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Unique correlation identifier used to match RPC requests and replies.
///
/// Generated from a random (v4) UUID for every outbound call, never from a
/// counter, so tokens stay unique across concurrent calls, client instances
/// and process restarts. The transport treats it as an opaque string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    /// Generate a new unique correlation ID.
    pub fn generate() -> Self {
        // ---
        Self(Arc::from(Uuid::new_v4().to_string()))
    }

    /// Borrow the correlation ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shared string form, as carried in [`Envelope::correlation_id`](crate::Envelope).
    pub fn as_shared(&self) -> Arc<str> {
        self.0.clone()
    }
}

impl From<Arc<str>> for CorrelationId {
    fn from(value: Arc<str>) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
