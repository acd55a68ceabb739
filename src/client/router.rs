// src/client/router.rs

//! Delivery router.
//!
//! One long-lived task per client. Drains the reply queue inbox and hands
//! each reply to the pending call named by its correlation id. Does O(1)
//! work per message, never publishes and never waits on a caller.
//!
//! Stops when the client signals shutdown or when the transport ends the
//! inbox. In the latter case it raises the shutdown signal itself so that
//! calls still waiting resolve with [`RpcError::Closed`](crate::RpcError)
//! instead of sitting out their full timeout.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::registry::CorrelationRegistry;
use crate::{log_debug, log_warn, Envelope, SubscriptionHandle};

pub(super) fn spawn(
    registry: Arc<CorrelationRegistry>,
    mut handle: SubscriptionHandle,
    closed: Arc<watch::Sender<bool>>,
    reply_queue: String,
) -> JoinHandle<()> {
    // ---
    let mut shutdown = closed.subscribe();

    tokio::spawn(async move {
        // ---
        log_debug!("delivery router started for {reply_queue}");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.wait_for(|closed| *closed) => {
                    log_debug!("delivery router shutting down for {reply_queue}");
                    break;
                }

                next = handle.inbox.recv() => match next {
                    Some(env) => route(&registry, env),
                    None => {
                        log_warn!("reply inbox closed by transport: {reply_queue}");
                        closed.send_replace(true);
                        break;
                    }
                },
            }
        }

        log_debug!("delivery router stopped for {reply_queue}");
    })
}

fn route(registry: &CorrelationRegistry, env: Envelope) {
    // ---
    let Some(correlation_id) = env.correlation_id else {
        log_warn!("reply without correlation_id on {}", env.address.as_str());
        return;
    };

    if !registry.resolve(&correlation_id, env.payload) {
        log_debug!("dropping reply with no waiting call (correlation_id: {correlation_id})");
    }
}
