use crate::Op;
use crate::quantize::QuantizedTensor;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Identifier of a value (graph input, constant or node output) inside a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// A named graph input or output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub name: String,
    pub value: ValueId,
}

/// One recorded op application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(flatten)]
    pub op: Op,
    pub inputs: Vec<ValueId>,
    pub output: ValueId,
}

/// Storage of a constant tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantData {
    Float32(Arc<ArrayD<f32>>),
    Int8(QuantizedTensor),
}

impl ConstantData {
    pub fn shape(&self) -> &[usize] {
        match self {
            ConstantData::Float32(t) => t.shape(),
            ConstantData::Int8(q) => q.shape(),
        }
    }

    pub fn element_count(&self) -> usize {
        self.shape().iter().product()
    }

    /// Bytes the constant occupies once serialized.
    pub fn byte_size(&self) -> usize {
        match self {
            ConstantData::Float32(t) => t.len() * std::mem::size_of::<f32>(),
            ConstantData::Int8(q) => q.byte_size(),
        }
    }

    /// The constant as `f32`, dequantizing if needed.
    pub fn to_f32(&self) -> Cow<'_, ArrayD<f32>> {
        match self {
            ConstantData::Float32(t) => Cow::Borrowed(t.as_ref()),
            ConstantData::Int8(q) => Cow::Owned(q.dequantize()),
        }
    }
}

/// A named constant, typically a model weight captured during tracing.
#[derive(Debug, Clone, PartialEq)]
pub struct Constant {
    pub name: String,
    pub data: ConstantData,
}
