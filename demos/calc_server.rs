//! Calc RPC server over AMQP.
//!
//! Run with: cargo run --example calc_server --features transport_lapin
//!
//! Requires: RabbitMQ on localhost:5672 (override with BROKER_URI)
mod common;

use common::{eval, CalcRequest, CALC_QUEUE, FUNC_EVAL};
use mq_rpc::{RpcServer, TransportBuilder};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let broker_uri =
        std::env::var("BROKER_URI").unwrap_or_else(|_| "amqp://localhost:5672/%2f".to_string());

    let transport = TransportBuilder::new()
        .uri(&broker_uri)
        .node_id("calc-server")
        .request_queue(CALC_QUEUE)
        .build()
        .await?;

    let server = RpcServer::new(transport)?;
    server.register_typed(FUNC_EVAL, |req: CalcRequest| async move { eval(&req) });
    server.spawn().await?;

    println!("calc server listening on {CALC_QUEUE}, Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    server.close().await?;
    Ok(())
}
