//! Wire format of RPC request and reply payloads.
mod message;

pub use message::{ReplyEnvelope, RequestEnvelope};
