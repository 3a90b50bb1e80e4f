//! Conversion run configured with a builder.

use sharp_convert::pipeline::error_chain;
use sharp_convert::{
    ConversionConfig, PipelineError, PipelineOptions, PipelineOutcome, ValidationConfig,
    ValidationOutcome, run,
};
use sharp_model::{BindMode, BindReport};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("input checkpoint not found: {}", .0.display())]
    MissingInput(PathBuf),
    #[error("no output path configured")]
    MissingOutput,
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Logging configuration.
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Install the global subscriber. `RUST_LOG` wins over the configured level.
    pub fn init(&self) {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&self.level)),
            )
            .with_target(false)
            .init();
    }
}

/// Builder for a single checkpoint conversion.
pub struct AppBuilder {
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    conversion: ConversionConfig,
    validation: Option<ValidationConfig>,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            input: None,
            output: None,
            conversion: ConversionConfig::default(),
            validation: Some(ValidationConfig::default()),
        }
    }

    pub fn with_input(mut self, path: impl Into<PathBuf>) -> Self {
        self.input = Some(path.into());
        self
    }

    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    pub fn with_conversion(mut self, config: ConversionConfig) -> Self {
        self.conversion = config;
        self
    }

    /// `None` skips validation.
    pub fn with_validation(mut self, config: Option<ValidationConfig>) -> Self {
        self.validation = config;
        self
    }

    /// Convert the checkpoint. A failed validation is logged and does not make this fail.
    pub fn run(self) -> Result<PipelineOutcome, AppError> {
        let input = self.input.unwrap_or_default();
        if !input.is_file() {
            return Err(AppError::MissingInput(input));
        }
        let output = self.output.ok_or(AppError::MissingOutput)?;

        info!("Input:  {}", input.display());
        info!("Output: {}", output.display());

        let options = PipelineOptions {
            conversion: self.conversion,
            validation: self.validation,
            architecture: None,
        };
        let outcome = run(&input, &output, &options)?;
        report(&outcome, &output);
        Ok(outcome)
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn report(outcome: &PipelineOutcome, output: &Path) {
    if outcome.bind_report.mode == BindMode::Relaxed {
        warn!(
            "Weights were bound leniently ({} of {} tensors used)",
            outcome.bind_report.bound.len(),
            checkpoint_tensor_count(&outcome.bind_report)
        );
    }
    match &outcome.validation {
        ValidationOutcome::Skipped => {}
        ValidationOutcome::Completed(report) if report.passed => {}
        ValidationOutcome::Completed(report) => {
            let names: Vec<&str> = report.failures().map(|o| o.name.as_str()).collect();
            warn!("Outputs above tolerance: {}", names.join(", "));
        }
        ValidationOutcome::Errored(message) => error!("Validation error: {}", message),
    }
    info!("Artifact written to {}", output.display());
}

/// Tensors the checkpoint offered, whether or not they were bound.
fn checkpoint_tensor_count(report: &BindReport) -> usize {
    report.bound.len() + report.unexpected.len() + report.mismatched.len()
}

/// Print `error` with its causes to stderr.
pub fn print_error(error: &AppError) {
    eprintln!("Error: {}", error_chain(error));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_count_includes_mismatched_shapes() {
        use sharp_model::{ArchitectureConfig, SharpNet, load_model};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drifted.safetensors");
        let config = ArchitectureConfig {
            hidden_channels: 4,
            num_gaussians: 8,
            ..Default::default()
        };
        let mut checkpoint = SharpNet::new(config).to_checkpoint().unwrap();
        checkpoint.insert("4.bias", ndarray::ArrayD::zeros(ndarray::IxDyn(&[5])));
        checkpoint.insert("aux.weight", ndarray::ArrayD::zeros(ndarray::IxDyn(&[3])));
        checkpoint.write(&path).unwrap();

        let report = load_model(&path).unwrap().report;
        assert_eq!(report.mode, BindMode::Relaxed);
        assert_eq!(report.mismatched.len(), 1);
        assert_eq!(report.unexpected.len(), 1);
        assert_eq!(checkpoint_tensor_count(&report), report.bound.len() + 2);
    }

    #[test]
    fn test_missing_input_is_rejected_before_loading() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.safetensors");
        let err = AppBuilder::new()
            .with_input(dir.path().join("missing.pt"))
            .with_output(&output)
            .run()
            .unwrap_err();
        assert!(matches!(err, AppError::MissingInput(_)));
        assert!(!output.exists());
    }

    #[test]
    fn test_unset_input_is_missing() {
        let err = AppBuilder::new().with_output("out.safetensors").run().unwrap_err();
        assert!(matches!(err, AppError::MissingInput(_)));
    }

    #[test]
    fn test_corrupt_checkpoint_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("bad.safetensors");
        std::fs::write(&input, b"not a checkpoint").unwrap();
        let err = AppBuilder::new()
            .with_input(&input)
            .with_output(dir.path().join("out.safetensors"))
            .run()
            .unwrap_err();
        assert!(matches!(err, AppError::Pipeline(PipelineError::Load(_))));
        assert!(error_chain(&err).starts_with("failed to load model"));
    }
}
