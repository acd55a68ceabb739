//! Request and reply envelopes exchanged between `RpcClient` and `RpcServer`.
//!
//! Both are JSON encoded. The transport layer never looks inside them.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{Result, RpcError};

/// Request payload: a numeric function identifier plus an opaque body.
///
/// The function identifier selects the remote procedure on the serving
/// node; the body is whatever that procedure expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub func_id: i32,
    #[serde(default)]
    pub body: Bytes,
}

impl RequestEnvelope {
    pub fn new(func_id: i32, body: impl Into<Bytes>) -> Self {
        Self {
            func_id,
            body: body.into(),
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        // ---
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Decode a request payload. Malformed input maps to [`RpcError::Decode`].
    pub fn decode(payload: &[u8]) -> Result<Self> {
        // ---
        serde_json::from_slice(payload).map_err(|e| RpcError::Decode(e.to_string()))
    }
}

/// Reply payload.
///
/// `error_text` is meaningful only when `is_success` is false; `body` only
/// when it is true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub is_success: bool,
    #[serde(default)]
    pub body: Bytes,
    #[serde(default)]
    pub error_text: String,
}

impl ReplyEnvelope {
    pub fn success(body: impl Into<Bytes>) -> Self {
        Self {
            is_success: true,
            body: body.into(),
            error_text: String::new(),
        }
    }

    pub fn failure(error_text: impl Into<String>) -> Self {
        Self {
            is_success: false,
            body: Bytes::new(),
            error_text: error_text.into(),
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        // ---
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Decode a reply payload. Malformed input maps to [`RpcError::Decode`].
    pub fn decode(payload: &[u8]) -> Result<Self> {
        // ---
        serde_json::from_slice(payload).map_err(|e| RpcError::Decode(e.to_string()))
    }

    /// Success body, or [`RpcError::Remote`] carrying the remote's text verbatim.
    pub fn into_result(self) -> Result<Bytes> {
        // ---
        if self.is_success {
            Ok(self.body)
        } else {
            Err(RpcError::Remote(self.error_text))
        }
    }
}
