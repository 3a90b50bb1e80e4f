//! Numerical comparison of a converted artifact against the model it came from.

use crate::artifact::{Artifact, ArtifactError};
use crate::config::ValidationConfig;
use crate::input::random_image;
use ndarray::ArrayD;
use sharp_model::{InferenceError, InferenceWrapper, Module};
use std::fmt;
use tracing::{info, instrument, warn};

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("artifact declares no fixed image size")]
    UnknownInputSize,
    #[error("reference forward pass failed")]
    Reference(#[source] InferenceError),
    #[error("artifact prediction failed")]
    Candidate(#[source] ArtifactError),
    #[error("artifact produced no output '{0}'")]
    MissingOutput(String),
    #[error("output '{name}' has shape {candidate:?} in the artifact but {reference:?} in the model")]
    ShapeMismatch {
        name: String,
        reference: Vec<usize>,
        candidate: Vec<usize>,
    },
}

/// Divergence of one output.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputComparison {
    pub name: String,
    pub max_abs_diff: f32,
    pub mean_abs_diff: f32,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub tolerance: f32,
    pub outputs: Vec<OutputComparison>,
    pub passed: bool,
}

impl ValidationReport {
    pub fn failures(&self) -> impl Iterator<Item = &OutputComparison> {
        self.outputs.iter().filter(|o| !o.passed)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for o in &self.outputs {
            writeln!(
                f,
                "  {:<10} max {:.3e}  mean {:.3e}  {}",
                o.name,
                o.max_abs_diff,
                o.mean_abs_diff,
                if o.passed { "ok" } else { "FAIL" }
            )?;
        }
        write!(
            f,
            "  {} (tolerance {:e})",
            if self.passed { "PASSED" } else { "FAILED" },
            self.tolerance
        )
    }
}

/// Max and mean absolute difference. A NaN anywhere makes the max NaN.
fn abs_diff_stats(reference: &ArrayD<f32>, candidate: &ArrayD<f32>) -> (f32, f32) {
    let mut max = 0.0f32;
    let mut sum = 0.0f64;
    for (a, b) in reference.iter().zip(candidate.iter()) {
        let d = (a - b).abs();
        if d.is_nan() || d > max {
            max = if max.is_nan() { max } else { d };
        }
        sum += d as f64;
    }
    let mean = if reference.is_empty() {
        0.0
    } else {
        (sum / reference.len() as f64) as f32
    };
    (max, mean)
}

/// Run one fresh input through the wrapper and the artifact and compare every output.
///
/// The input resolution is taken from the artifact's schema. An output passes when its max
/// absolute difference is below the tolerance. Nothing is written.
#[instrument(skip_all, fields(tolerance = config.tolerance))]
pub fn validate<M: Module>(
    artifact: &Artifact,
    wrapper: &InferenceWrapper<M>,
    config: &ValidationConfig,
) -> Result<ValidationReport, ValidationError> {
    let (height, width) = artifact
        .schema()
        .input_size()
        .ok_or(ValidationError::UnknownInputSize)?;
    let input = random_image(height, width, config.seed);

    let reference = wrapper.predict(&input).map_err(ValidationError::Reference)?;
    let candidate = artifact.predict(&input).map_err(ValidationError::Candidate)?;

    let mut outputs = Vec::with_capacity(5);
    for (field, expected) in reference.iter() {
        let name = field.output_name();
        let actual = candidate
            .get(name)
            .ok_or_else(|| ValidationError::MissingOutput(name.to_string()))?;
        if actual.shape() != expected.shape() {
            return Err(ValidationError::ShapeMismatch {
                name: name.to_string(),
                reference: expected.shape().to_vec(),
                candidate: actual.shape().to_vec(),
            });
        }

        let (max_abs_diff, mean_abs_diff) = abs_diff_stats(expected, actual);
        let passed = max_abs_diff < config.tolerance;
        if !passed {
            warn!(
                "{}: max diff {:e} exceeds tolerance {:e}",
                name, max_abs_diff, config.tolerance
            );
        }
        outputs.push(OutputComparison {
            name: name.to_string(),
            max_abs_diff,
            mean_abs_diff,
            passed,
        });
    }

    let passed = outputs.iter().all(|o| o.passed);
    info!("Validation {}", if passed { "passed" } else { "failed" });
    Ok(ValidationReport {
        tolerance: config.tolerance,
        outputs,
        passed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    fn tensor(values: &[f32]) -> ArrayD<f32> {
        ArrayD::from_shape_vec(IxDyn(&[values.len(), 1]), values.to_vec()).unwrap()
    }

    #[test]
    fn test_diff_stats() {
        let (max, mean) = abs_diff_stats(&tensor(&[1.0, 2.0, 3.0, 4.0]), &tensor(&[1.0, 2.5, 2.0, 4.0]));
        assert_eq!(max, 1.0);
        assert_eq!(mean, 0.375);
        assert_eq!(abs_diff_stats(&tensor(&[]), &tensor(&[])), (0.0, 0.0));
    }

    #[test]
    fn test_nan_poisons_max() {
        let (max, _) = abs_diff_stats(&tensor(&[f32::NAN, 1.0, 5.0]), &tensor(&[0.0, 0.0, 0.0]));
        assert!(max.is_nan());
        // NaN never passes a tolerance check
        assert!(!(max < 1e-3));
    }

    #[test]
    fn test_report_display() {
        let report = ValidationReport {
            tolerance: 1e-3,
            outputs: vec![
                OutputComparison {
                    name: "positions".into(),
                    max_abs_diff: 0.0,
                    mean_abs_diff: 0.0,
                    passed: true,
                },
                OutputComparison {
                    name: "colors".into(),
                    max_abs_diff: 0.5,
                    mean_abs_diff: 0.1,
                    passed: false,
                },
            ],
            passed: false,
        };
        let text = report.to_string();
        assert!(text.contains("positions"));
        assert!(text.contains("FAIL"));
        assert!(text.ends_with("FAILED (tolerance 1e-3)"));
        assert_eq!(report.failures().count(), 1);
    }
}
