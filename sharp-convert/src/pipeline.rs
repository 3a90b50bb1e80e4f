//! Load, convert and optionally validate, in that order.

use crate::artifact::Artifact;
use crate::config::{ConversionConfig, ValidationConfig};
use crate::convert::{ConversionError, convert};
use crate::validate::{ValidationReport, validate};
use sharp_model::{ArchitectureConfig, BindReport, InferenceWrapper, LoadError, load_model_with};
use std::path::{Path, PathBuf};
use tracing::{error, info, instrument, warn};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to load model")]
    Load(#[from] LoadError),
    #[error("conversion failed")]
    Convert(#[from] ConversionError),
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub conversion: ConversionConfig,
    /// `None` skips validation.
    pub validation: Option<ValidationConfig>,
    /// Overrides the architecture recorded in the checkpoint.
    pub architecture: Option<ArchitectureConfig>,
}

/// How the validation step ended. Validation never fails the pipeline.
#[derive(Debug, Clone)]
pub enum ValidationOutcome {
    Skipped,
    Completed(ValidationReport),
    /// Validation could not run; the message carries the cause.
    Errored(String),
}

impl ValidationOutcome {
    /// `true` unless validation ran and found a divergence or could not run.
    pub fn is_acceptable(&self) -> bool {
        match self {
            ValidationOutcome::Skipped => true,
            ValidationOutcome::Completed(report) => report.passed,
            ValidationOutcome::Errored(_) => false,
        }
    }
}

#[derive(Debug)]
pub struct PipelineOutcome {
    pub output: PathBuf,
    pub artifact: Artifact,
    pub bind_report: BindReport,
    pub validation: ValidationOutcome,
    /// Forward passes the wrapper ran across conversion and validation.
    pub forward_passes: usize,
}

/// Convert the checkpoint at `input` into an artifact at `output`.
#[instrument(skip_all, fields(input = %input.display()))]
pub fn run(input: &Path, output: &Path, options: &PipelineOptions) -> Result<PipelineOutcome, PipelineError> {
    info!("Loading checkpoint");
    let loaded = load_model_with(input, options.architecture)?;
    let bind_report = loaded.report;
    let wrapper = InferenceWrapper::new(loaded.model);

    let artifact = convert(&wrapper, output, &options.conversion)?;
    info!("Artifact summary:\n{}", artifact);

    let validation = match &options.validation {
        None => {
            info!("Skipping validation");
            ValidationOutcome::Skipped
        }
        Some(config) => match validate(&artifact, &wrapper, config) {
            Ok(report) => {
                if report.passed {
                    info!("Validation passed:\n{}", report);
                } else {
                    warn!("Validation failed, the artifact was kept:\n{}", report);
                }
                ValidationOutcome::Completed(report)
            }
            Err(e) => {
                error!("Validation could not run: {}", e);
                ValidationOutcome::Errored(error_chain(&e))
            }
        },
    };

    Ok(PipelineOutcome {
        output: output.to_path_buf(),
        artifact,
        bind_report,
        validation,
        forward_passes: wrapper.forward_passes(),
    })
}

/// Render an error and its sources as `outer: inner: innermost`.
pub fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
