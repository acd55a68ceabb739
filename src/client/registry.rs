// src/client/registry.rs

//! Correlation registry: correlation id → pending call.
//!
//! The only mutable state shared between the delivery router and the call
//! engine. Every access goes through one mutex and every critical section
//! is a single map operation; no I/O and no channel waits happen under the
//! lock.
//!
//! Ownership of an entry stays with the call that registered it, via
//! [`PendingGuard`]. The router only fires the entry's wake signal; the
//! guard removes the entry when the call stops waiting, whichever way it
//! stops (reply, timeout, close, publish failure, or the call future being
//! dropped).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::{log_error, CorrelationId, Result, RpcError};

/// Acquire a mutex guard, intentionally ignoring poisoning.
///
/// The map has no invariants spanning multiple entries, so the worst
/// outcome of continuing after a panic elsewhere is one unmatched reply.
pub(crate) fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// One in-flight request awaiting its reply.
struct PendingCall {
    /// Wake signal carrying the reply payload. `None` once fired.
    waker: Option<oneshot::Sender<Bytes>>,
}

#[derive(Default)]
pub(crate) struct CorrelationRegistry {
    calls: Mutex<HashMap<Arc<str>, PendingCall>>,
}

impl CorrelationRegistry {
    // ---
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Insert a pending call and return the receiver its owner waits on.
    ///
    /// A duplicate id means the uuid generator produced a collision, which
    /// is an invariant violation; the existing entry is left untouched.
    pub(crate) fn register(&self, id: &CorrelationId) -> Result<oneshot::Receiver<Bytes>> {
        // ---
        let (tx, rx) = oneshot::channel();

        let mut calls = lock_ignore_poison(&self.calls);
        if calls.contains_key(id.as_str()) {
            log_error!("correlation id registered twice: {id}");
            return Err(RpcError::DuplicateCorrelationId(id.to_string()));
        }
        calls.insert(id.as_shared(), PendingCall { waker: Some(tx) });

        Ok(rx)
    }

    /// Hand a reply payload to the call waiting on `id`.
    ///
    /// Returns `false` for unknown ids (late reply after timeout or close)
    /// and for ids whose signal already fired (duplicate delivery). The
    /// entry itself stays in place for its owner to remove.
    pub(crate) fn resolve(&self, id: &str, payload: Bytes) -> bool {
        // ---
        let waker = {
            let mut calls = lock_ignore_poison(&self.calls);
            calls.get_mut(id).and_then(|call| call.waker.take())
        };

        match waker {
            // A send error means the owner stopped waiting between the
            // lookup and now; its guard is about to remove the entry.
            Some(tx) => tx.send(payload).is_ok(),
            None => false,
        }
    }

    /// Delete the entry for `id`. Idempotent.
    pub(crate) fn remove(&self, id: &str) {
        // ---
        lock_ignore_poison(&self.calls).remove(id);
    }

    pub(crate) fn len(&self) -> usize {
        lock_ignore_poison(&self.calls).len()
    }
}

/// Owner handle for one registry entry. Dropping it removes the entry.
pub(crate) struct PendingGuard {
    registry: Arc<CorrelationRegistry>,
    id: CorrelationId,
}

impl PendingGuard {
    // ---
    pub(crate) fn register(
        registry: &Arc<CorrelationRegistry>,
        id: CorrelationId,
    ) -> Result<(Self, oneshot::Receiver<Bytes>)> {
        // ---
        let rx = registry.register(&id)?;
        let guard = Self {
            registry: Arc::clone(registry),
            id,
        };
        Ok((guard, rx))
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id.as_str());
    }
}
