use crate::{Result, RpcError};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub(super) type HandlerFuture = Pin<Box<dyn Future<Output = Result<Bytes>> + Send>>;

/// Type-erased async handler: request body in, reply body out.
///
/// Wrapped in Arc for cheap cloning into per-request tasks.
pub(super) type BoxedHandler = Arc<dyn Fn(Bytes) -> HandlerFuture + Send + Sync>;

/// Wrap a handler that works on raw bytes.
pub(super) fn wrap_raw<F, Fut>(handler: F) -> BoxedHandler
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes>> + Send + 'static,
{
    // ---
    Arc::new(move |body: Bytes| Box::pin(handler(body)) as HandlerFuture)
}

/// Wrap a typed handler; request and reply bodies are JSON.
pub(super) fn wrap_typed<F, Fut, TReq, TResp>(handler: F) -> BoxedHandler
where
    F: Fn(TReq) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TResp>> + Send + 'static,
    TReq: DeserializeOwned + Send + 'static,
    TResp: Serialize + Send + 'static,
{
    // ---
    Arc::new(move |body: Bytes| {
        let req: TReq = match serde_json::from_slice(&body) {
            Ok(req) => req,
            Err(e) => {
                let err = RpcError::Decode(e.to_string());
                return Box::pin(async move { Err(err) }) as HandlerFuture;
            }
        };

        let fut = handler(req);

        Box::pin(async move {
            let resp = fut.await?;
            Ok(Bytes::from(serde_json::to_vec(&resp)?))
        }) as HandlerFuture
    })
}

/// Text placed in a failure reply for a handler error.
///
/// `RpcError::Remote` carries application text and is passed through
/// verbatim; anything else uses its display form.
pub(super) fn failure_text(err: RpcError) -> String {
    // ---
    match err {
        RpcError::Remote(text) => text,
        other => other.to_string(),
    }
}
