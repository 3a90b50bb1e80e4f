//! Sharp Convert Crate
//!
//! Turns a loaded SHARP model into a deployable artifact and checks the artifact against
//! the model.
//!
//! ## Modules
//!
//! - [`artifact`]: the on-disk program container, its schema and its executor
//! - [`config`]: conversion and validation settings
//! - [`convert`]: trace, attach schema and metadata, quantize, serialize
//! - [`input`]: representative input images
//! - [`pipeline`]: load -> convert -> validate
//! - [`validate`]: per-output divergence report

pub mod artifact;
pub mod config;
pub mod convert;
pub mod input;
pub mod pipeline;
pub mod validate;

pub use artifact::{Artifact, ArtifactError, Dim, Manifest, Schema, TensorSpec};
pub use config::{
    ArtifactMetadata, ComputeUnits, ConversionConfig, DeploymentTarget, InputSource,
    ValidationConfig,
};
pub use convert::{ConversionError, convert};
pub use input::InputError;
pub use pipeline::{PipelineError, PipelineOptions, PipelineOutcome, ValidationOutcome, run};
pub use validate::{OutputComparison, ValidationError, ValidationReport, validate};
