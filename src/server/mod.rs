// src/server/mod.rs
//! RPC server: the serving side of the request/reply exchange.
//!
//! Subscribes to the transport's request queue, decodes each
//! [`RequestEnvelope`], dispatches on its function identifier and publishes
//! a [`ReplyEnvelope`] to the request's `reply_to` address under the same
//! correlation id. Every request runs in its own task.
mod handler;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::protocol::{ReplyEnvelope, RequestEnvelope};
use crate::{
    // ---
    log_debug,
    log_error,
    log_info,
    log_warn,
    Address,
    Envelope,
    Result,
    RpcError,
    Subscription,
    TransportPtr,
};

use handler::{failure_text, wrap_raw, wrap_typed, BoxedHandler};

fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

type HandlerRegistry = RwLock<HashMap<i32, BoxedHandler>>;

/// RPC server dispatching requests by numeric function identifier.
///
/// # Example
///
/// ```no_run
/// use mq_rpc::{RpcServer, TransportBuilder};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Deserialize)]
/// struct AddRequest { a: i32, b: i32 }
///
/// #[derive(Serialize)]
/// struct AddResponse { sum: i32 }
///
/// const FUNC_ADD: i32 = 0;
///
/// # async fn example() -> mq_rpc::Result<()> {
/// let transport = TransportBuilder::new()
///     .uri("amqp://localhost:5672/%2f")
///     .node_id("calc-server")
///     .request_queue("rpc-calc")
///     .build()
///     .await?;
///
/// let server = RpcServer::new(transport)?;
/// server.register_typed(FUNC_ADD, |req: AddRequest| async move {
///     Ok(AddResponse { sum: req.a + req.b })
/// });
/// server.spawn().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RpcServer {
    inner: Arc<Inner>,
}

struct Inner {
    // ---
    transport: TransportPtr,
    request_queue: String,
    handlers: HandlerRegistry,
    shutdown: watch::Sender<bool>,
    started: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RpcServer {
    // ---
    /// Create a server on a transport that owns a request queue.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::InvalidMode` for a client-only transport.
    pub fn new(transport: TransportPtr) -> Result<Self> {
        // ---
        if !transport.mode().can_serve() {
            return Err(RpcError::InvalidMode(
                "RpcServer requires a transport with a request queue".into(),
            ));
        }

        let request_queue = transport
            .request_queue()
            .ok_or_else(|| RpcError::MissingConfig("request queue".into()))?
            .to_string();

        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                request_queue,
                handlers: RwLock::new(HashMap::new()),
                shutdown,
                started: AtomicBool::new(false),
                task: Mutex::new(None),
            }),
        })
    }

    /// Register a handler working on raw request/reply bodies.
    ///
    /// Replaces any handler previously registered under `func_id`.
    pub fn register<F, Fut>(&self, func_id: i32, handler: F)
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        self.insert(func_id, wrap_raw(handler));
    }

    /// Register a handler with JSON-encoded typed request and reply.
    ///
    /// A request body that does not decode as `TReq` produces a failure
    /// reply carrying the decode error.
    pub fn register_typed<TReq, TResp, F, Fut>(&self, func_id: i32, handler: F)
    where
        TReq: DeserializeOwned + Send + 'static,
        TResp: Serialize + Send + 'static,
        F: Fn(TReq) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TResp>> + Send + 'static,
    {
        self.insert(func_id, wrap_typed(handler));
    }

    fn insert(&self, func_id: i32, handler: BoxedHandler) {
        // ---
        let mut handlers = match self.inner.handlers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        handlers.insert(func_id, handler);
    }

    /// Subscribe to the request queue and start the receive loop.
    ///
    /// # Errors
    ///
    /// `RpcError::InvalidMode` if already running or closed,
    /// `RpcError::Transport` if the subscription fails.
    pub async fn spawn(&self) -> Result<()> {
        // ---
        if *self.inner.shutdown.borrow() {
            return Err(RpcError::InvalidMode("server already closed".into()));
        }
        // Claim the server before subscribing so a losing spawn() never
        // leaves a subscriber behind.
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(RpcError::InvalidMode("server already started".into()));
        }

        let mut handle = match self
            .inner
            .transport
            .subscribe(Subscription::from(self.inner.request_queue.as_str()))
            .await
        {
            Ok(handle) => handle,
            Err(err) => {
                self.inner.started.store(false, Ordering::Release);
                return Err(err);
            }
        };

        let inner = Arc::clone(&self.inner);
        let mut shutdown = self.inner.shutdown.subscribe();

        let task = tokio::spawn(async move {
            // ---
            log_info!("server started on {}", inner.request_queue);

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.wait_for(|stop| *stop) => break,

                    next = handle.inbox.recv() => match next {
                        Some(env) => inner.dispatch(env),
                        None => {
                            log_debug!("request inbox closed: {}", inner.request_queue);
                            break;
                        }
                    },
                }
            }

            log_info!("server stopped on {}", inner.request_queue);
        });

        *lock_ignore_poison(&self.inner.task) = Some(task);

        Ok(())
    }

    /// Stop the receive loop, wait for it, then close the transport.
    ///
    /// Replies for requests already being handled may still be published
    /// before the transport closes. Idempotent.
    pub async fn close(&self) -> Result<()> {
        // ---
        let first = !self.inner.shutdown.send_replace(true);

        let task = lock_ignore_poison(&self.inner.task).take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                log_warn!("server loop ended abnormally: {err}");
            }
        }

        if first {
            self.inner.transport.close().await
        } else {
            Ok(())
        }
    }

    /// Queue this server consumes.
    pub fn request_queue(&self) -> &str {
        &self.inner.request_queue
    }
}

impl Inner {
    // ---
    fn dispatch(&self, env: Envelope) {
        // ---
        let Some(reply_to) = env.reply_to else {
            log_warn!("request on {} missing reply_to", self.request_queue);
            return;
        };
        let Some(correlation_id) = env.correlation_id else {
            log_warn!("request on {} missing correlation_id", self.request_queue);
            return;
        };

        let transport = self.transport.clone();

        let request = match RequestEnvelope::decode(&env.payload) {
            Ok(request) => request,
            Err(err) => {
                let reply = ReplyEnvelope::failure(failure_text(err));
                tokio::spawn(send_reply(transport, reply_to, correlation_id, reply));
                return;
            }
        };

        let handler = {
            let handlers = match self.handlers.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            handlers.get(&request.func_id).cloned()
        };

        let Some(handler) = handler else {
            log_warn!("no handler for function {}", request.func_id);
            let reply = ReplyEnvelope::failure(format!(
                "unknown function with code: {}",
                request.func_id
            ));
            tokio::spawn(send_reply(transport, reply_to, correlation_id, reply));
            return;
        };

        tokio::spawn(async move {
            let reply = match handler(request.body).await {
                Ok(body) => ReplyEnvelope::success(body),
                Err(err) => {
                    log_debug!("function {} failed: {err}", request.func_id);
                    ReplyEnvelope::failure(failure_text(err))
                }
            };
            send_reply(transport, reply_to, correlation_id, reply).await;
        });
    }
}

async fn send_reply(
    transport: TransportPtr,
    reply_to: Address,
    correlation_id: Arc<str>,
    reply: ReplyEnvelope,
) {
    // ---
    let payload = match reply.encode() {
        Ok(payload) => payload,
        Err(e) => {
            log_error!("failed to encode reply: {e}");
            return;
        }
    };

    let env = Envelope::response(reply_to, payload, correlation_id);
    if let Err(e) = transport.publish(env).await {
        log_error!("failed to publish reply: {e}");
    }
}
