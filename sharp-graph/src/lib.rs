//! Sharp Graph Crate
//!
//! Recorded tensor programs. A model's forward pass runs through a [`Tracer`]; in recording
//! mode the tracer captures every op into a [`Program`], which can then be validated,
//! executed, quantized and handed to a serializer.
//!
//! ## Modules
//!
//! - [`kernels`]: CPU implementations of every op
//! - [`program`]: program builder, validation and execution
//! - [`quantize`]: int8 weight-only quantization of program constants

pub mod kernels;
mod op;
pub mod program;
pub mod quantize;
mod tracer;

pub use op::Op;
pub use program::{Binding, Constant, ConstantData, GraphBuilder, Node, Program, ValueId};
pub use quantize::{QuantizationConfig, QuantizationSummary, QuantizedTensor, quantize_weights};
pub use tracer::{Tracer, Var};

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("{op}: expected {expected} inputs, got {actual}")]
    Arity {
        op: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{op}: expected a rank-{expected} tensor, got shape {actual:?}")]
    Rank {
        op: &'static str,
        expected: usize,
        actual: Vec<usize>,
    },
    #[error("{op}: {reason}")]
    Shape { op: &'static str, reason: String },
    #[error("value {0} is used but never defined")]
    UndefinedValue(ValueId),
    #[error("value {0} is defined more than once")]
    DuplicateValue(ValueId),
    #[error("Circular dependency detected in program")]
    CircularDependency,
    #[error("program declares no outputs")]
    NoOutputs,
    #[error("missing feed for graph input '{0}'")]
    MissingInput(String),
    #[error("tracer is not recording")]
    NotRecording,
    #[error("quantized constant '{name}' is malformed: {reason}")]
    Quantization { name: String, reason: String },
    #[error("tensor construction failed")]
    Tensor(#[from] ndarray::ShapeError),
}
