//! Sharp Model Crate
//!
//! The SHARP network, its checkpoint format and the inference wrapper that the converter
//! traces.
//!
//! ## Modules
//!
//! - [`architecture`]: network definition and its shape hyperparameters
//! - [`checkpoint`]: safetensors checkpoints, including wrapped weight mappings
//! - [`layers`]: parameterized layers and the [`Module`] trait
//! - [`loader`]: strict-then-relaxed weight binding
//! - [`wrapper`]: `image -> five named Gaussian buffers`

pub mod architecture;
pub mod checkpoint;
mod error;
pub mod layers;
pub mod loader;
pub mod wrapper;

pub use architecture::{ArchitectureConfig, MAX_PARAMETERS, SharpNet};
pub use checkpoint::{Checkpoint, WeightSource};
pub use error::{CheckpointError, InferenceError, LoadError};
pub use layers::{Module, Parameter, ShapeMismatch};
pub use loader::{BindMode, BindReport, LoadedModel, load_into, load_model, load_model_with};
pub use wrapper::{IMAGE_INPUT, InferenceWrapper, check_image_shape};
