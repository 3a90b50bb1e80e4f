//! The closed op set a recorded program may contain.

use crate::{GraphError, kernels};
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

/// A single tensor operation.
///
/// Weights are not stored in the op; they arrive as inputs (usually program constants),
/// which keeps ops small enough to serialize as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    /// Inputs: `x (N,C,H,W)`, `weight (O,C,kh,kw)`, `bias (O)`.
    Conv2d { stride: usize, padding: usize },
    Relu,
    /// `(N,C,H,W) -> (N,C,1,1)`.
    GlobalAvgPool,
    Flatten { start_dim: usize },
    /// Inputs: `x (B,in)`, `weight (out,in)`, `bias (out)`.
    Linear,
    /// Target shape; one `-1` entry is inferred at run time.
    Reshape { shape: Vec<i64> },
    Slice { axis: usize, start: usize, end: usize },
    Squeeze { axis: usize },
}

impl Op {
    pub fn name(&self) -> &'static str {
        match self {
            Op::Conv2d { .. } => "conv2d",
            Op::Relu => "relu",
            Op::GlobalAvgPool => "global_avg_pool",
            Op::Flatten { .. } => "flatten",
            Op::Linear => "linear",
            Op::Reshape { .. } => "reshape",
            Op::Slice { .. } => "slice",
            Op::Squeeze { .. } => "squeeze",
        }
    }

    /// Number of tensor inputs the op consumes.
    pub fn arity(&self) -> usize {
        match self {
            Op::Conv2d { .. } | Op::Linear => 3,
            _ => 1,
        }
    }

    pub fn evaluate(&self, inputs: &[&ArrayD<f32>]) -> Result<ArrayD<f32>, GraphError> {
        if inputs.len() != self.arity() {
            return Err(GraphError::Arity {
                op: self.name(),
                expected: self.arity(),
                actual: inputs.len(),
            });
        }

        match self {
            Op::Conv2d { stride, padding } => {
                kernels::conv2d(inputs[0], inputs[1], inputs[2], *stride, *padding)
            }
            Op::Relu => Ok(kernels::relu(inputs[0])),
            Op::GlobalAvgPool => kernels::global_avg_pool(inputs[0]),
            Op::Flatten { start_dim } => kernels::flatten(inputs[0], *start_dim),
            Op::Linear => kernels::linear(inputs[0], inputs[1], inputs[2]),
            Op::Reshape { shape } => kernels::reshape(inputs[0], shape),
            Op::Slice { axis, start, end } => kernels::slice(inputs[0], *axis, *start, *end),
            Op::Squeeze { axis } => kernels::squeeze(inputs[0], *axis),
        }
    }
}
