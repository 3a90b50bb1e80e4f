use crate::layers::ShapeMismatch;
use sharp_data::LayoutError;
use sharp_graph::GraphError;
use std::path::PathBuf;

/// Errors raised while reading or writing a checkpoint file.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("IO error")]
    Io(#[from] std::io::Error),
    #[error("invalid safetensors data")]
    Format(#[from] safetensors::SafeTensorError),
    #[error("tensor '{name}' could not be decoded")]
    Tensor {
        name: String,
        source: ndarray::ShapeError,
    },
    #[error("architecture metadata is malformed")]
    Metadata(#[from] serde_json::Error),
}

/// Errors raised by the model loader.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("checkpoint not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to deserialize checkpoint")]
    Checkpoint(#[from] CheckpointError),
    #[error("invalid architecture: {0}")]
    Architecture(String),
    #[error(
        "no checkpoint weight could be bound ({} missing, {} unexpected, {} shape mismatches)",
        .missing.len(),
        .unexpected.len(),
        .mismatched.len()
    )]
    NothingBound {
        missing: Vec<String>,
        unexpected: Vec<String>,
        mismatched: Vec<ShapeMismatch>,
    },
}

/// Errors raised while running the inference wrapper.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("image must have shape (1, 3, H, W) with H, W > 0, got {0:?}")]
    ImageShape(Vec<usize>),
    #[error("forward pass failed")]
    Graph(#[from] GraphError),
    #[error("model output violates the Gaussian record layout")]
    Layout(#[from] LayoutError),
    #[error("forward pass produced no '{0}' output")]
    MissingOutput(&'static str),
}
