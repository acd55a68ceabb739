//! Calc RPC over the in-memory transport.
//!
//! Server and client share one process and one hub; no broker required.
//!
//! Run with: cargo run --example calc_memory
mod common;

use std::time::Duration;

use common::{eval, Answer, CalcRequest, Op, CALC_QUEUE, FUNC_EVAL};
use mq_rpc::{RpcClient, RpcConfig, RpcError, RpcServer, TransportBuilder};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let server_transport = TransportBuilder::new()
        .uri("memory://")
        .node_id("calc-server")
        .request_queue(CALC_QUEUE)
        .build()
        .await?;

    let server = RpcServer::new(server_transport)?;
    server.register_typed(FUNC_EVAL, |req: CalcRequest| async move { eval(&req) });
    server.spawn().await?;

    let config = RpcConfig::memory("calc-client")
        .with_server_queue(CALC_QUEUE)
        .with_request_timeout(Duration::from_secs(2));
    let client = RpcClient::connect(&config).await?;

    let answer: Answer = client
        .request_to(CALC_QUEUE, FUNC_EVAL, &CalcRequest { lhs: 20.0, op: Op::Add, rhs: 3.0 })
        .await?;
    println!("20 + 3 = {}", answer.value);

    let divided = client
        .request_to::<_, Answer>(CALC_QUEUE, FUNC_EVAL, &CalcRequest { lhs: 1.0, op: Op::Div, rhs: 0.0 })
        .await;
    match divided {
        Err(RpcError::Remote(text)) => println!("1 / 0 failed remotely: {text}"),
        other => println!("1 / 0 unexpectedly returned {other:?}"),
    }

    client.close().await?;
    server.close().await?;
    Ok(())
}
