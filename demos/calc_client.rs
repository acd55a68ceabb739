//! Calc RPC client over AMQP.
//!
//! Sends a few evaluations to the calc server and prints the answers.
//!
//! Run with: cargo run --example calc_client --features transport_lapin
//!
//! Requires: calc_server running and RabbitMQ on localhost:5672
mod common;

use std::time::Duration;

use common::{Answer, CalcRequest, Op, CALC_QUEUE, FUNC_EVAL};
use mq_rpc::{RpcClient, RpcConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let broker_uri =
        std::env::var("BROKER_URI").unwrap_or_else(|_| "amqp://localhost:5672/%2f".to_string());

    let config = RpcConfig::with_broker(broker_uri, "calc-client")
        .with_server_queue(CALC_QUEUE)
        .with_request_timeout(Duration::from_secs(2));

    let client = RpcClient::connect(&config).await?;

    for (lhs, op, rhs) in [(6.0, Op::Mul, 7.0), (10.0, Op::Sub, 4.5), (9.0, Op::Div, 0.0)] {
        let req = CalcRequest { lhs, op, rhs };
        match client.request_to::<_, Answer>(CALC_QUEUE, FUNC_EVAL, &req).await {
            Ok(answer) => println!("{lhs} {op:?} {rhs} = {}", answer.value),
            Err(err) if err.is_unknown_outcome() => println!("{lhs} {op:?} {rhs}: no answer ({err})"),
            Err(err) => println!("{lhs} {op:?} {rhs}: {err}"),
        }
    }

    client.close().await?;
    Ok(())
}
