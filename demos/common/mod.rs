//! Wire types shared by the calc demos.
//!
//! Client and server both depend on these; in a real deployment they would
//! live in their own crate.
#![allow(dead_code)]

use serde::{Deserialize, Serialize};

/// Function identifier for [`CalcRequest`] evaluation.
pub const FUNC_EVAL: i32 = 0;

/// Queue the calc server listens on.
pub const CALC_QUEUE: &str = "rpc-calc";

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CalcRequest {
    pub lhs: f64,
    pub op: Op,
    pub rhs: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Answer {
    pub value: f64,
}

/// Evaluate a request; division by zero is an application failure.
pub fn eval(req: &CalcRequest) -> mq_rpc::Result<Answer> {
    // ---
    let value = match req.op {
        Op::Add => req.lhs + req.rhs,
        Op::Sub => req.lhs - req.rhs,
        Op::Mul => req.lhs * req.rhs,
        Op::Div if req.rhs == 0.0 => {
            return Err(mq_rpc::RpcError::Remote("division by zero".into()));
        }
        Op::Div => req.lhs / req.rhs,
    };
    Ok(Answer { value })
}
