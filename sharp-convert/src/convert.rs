//! Model to artifact conversion.

use crate::artifact::{Artifact, ArtifactError, Manifest, Schema};
use crate::config::ConversionConfig;
use crate::input::InputError;
use sharp_graph::quantize_weights;
use sharp_model::{InferenceError, InferenceWrapper, Module};
use std::path::Path;
use tracing::{info, instrument};

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("failed to build the tracing input")]
    Input(#[from] InputError),
    #[error("tracing the model failed")]
    Trace(#[source] InferenceError),
    #[error("traced outputs break the artifact schema: {0}")]
    Schema(String),
    #[error("failed to serialize the artifact")]
    Serialize(#[source] ArtifactError),
}

/// Trace `wrapper` once at the configured resolution and write the resulting artifact to
/// `output`.
///
/// Quantization, when enabled, runs on the traced program, so the recorded ops are those of
/// the full precision model.
#[instrument(skip_all, fields(output = %output.display(), width = config.width, height = config.height))]
pub fn convert<M: Module>(
    wrapper: &InferenceWrapper<M>,
    output: &Path,
    config: &ConversionConfig,
) -> Result<Artifact, ConversionError> {
    let example = config.input.build(config.height, config.width)?;

    info!("Tracing model at {}x{}", config.width, config.height);
    let (mut program, traced) = wrapper.trace(&example).map_err(ConversionError::Trace)?;
    info!(
        "Traced {} ops over {} constants ({} parameters)",
        program.nodes().len(),
        program.constants().len(),
        program.parameter_count()
    );

    let schema = Schema::gaussian(config.height, config.width);
    for (field, tensor) in traced.iter() {
        let name = field.output_name();
        let accepted = schema.output(name).is_some_and(|spec| spec.accepts(tensor.shape()));
        if !accepted {
            return Err(ConversionError::Schema(format!(
                "output '{}' has shape {:?}, expected (N, {})",
                name,
                tensor.shape(),
                field.width()
            )));
        }
    }

    let quantization = config
        .quantization
        .as_ref()
        .map(|q| quantize_weights(&mut program, q));

    let manifest = Manifest::new(
        schema,
        config.metadata.clone(),
        config.deployment.clone(),
        config.compute_units,
    );
    let mut artifact = Artifact::new(program, manifest)
        .map_err(|e| ConversionError::Schema(e.to_string()))?;
    if let Some(summary) = quantization {
        artifact.set_quantization(summary);
    }

    artifact.save(output).map_err(ConversionError::Serialize)?;
    info!("Conversion complete: {}", output.display());
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputSource;
    use ndarray::{ArrayD, IxDyn};
    use sharp_graph::{ConstantData, GraphError, Tracer, Var};
    use sharp_model::{ArchitectureConfig, Parameter, SharpNet};

    fn wrapper() -> InferenceWrapper {
        InferenceWrapper::new(SharpNet::new(ArchitectureConfig {
            hidden_channels: 8,
            num_gaussians: 300,
            ..Default::default()
        }))
    }

    fn config() -> ConversionConfig {
        ConversionConfig::new()
            .with_resolution(12, 10)
            .with_input(InputSource::Random { seed: Some(5) })
    }

    #[test]
    fn test_convert_writes_declared_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/sharp.safetensors");
        let artifact = convert(&wrapper(), &path, &config()).unwrap();

        assert!(path.is_file());
        assert_eq!(artifact.schema().input_size(), Some((10, 12)));
        assert!(artifact.manifest().quantization.is_none());
        let names: Vec<&str> = artifact.schema().outputs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["positions", "colors", "opacities", "scales", "rotations"]);
    }

    #[test]
    fn test_quantization_only_touches_weights() {
        let dir = tempfile::tempdir().unwrap();
        let wrapper = wrapper();
        let plain = convert(&wrapper, &dir.path().join("plain.safetensors"), &config()).unwrap();
        let quantized = convert(
            &wrapper,
            &dir.path().join("int8.safetensors"),
            &config().with_quantization(true),
        )
        .unwrap();

        assert_eq!(quantized.program().nodes(), plain.program().nodes());
        let summary = quantized.manifest().quantization.unwrap();
        // the head weight (4200 x 8) is the only tensor above the size threshold
        assert_eq!(summary.quantized, 1);
        assert!(summary.bytes_after < summary.bytes_before);
        let int8 = quantized
            .program()
            .constants()
            .values()
            .filter(|c| matches!(c.data, ConstantData::Int8(_)))
            .count();
        assert_eq!(int8, 1);
    }

    #[test]
    fn test_bad_sample_image_is_a_conversion_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config().with_input(InputSource::Image(dir.path().join("missing.png")));
        let err = convert(&wrapper(), &dir.path().join("a.safetensors"), &config).unwrap_err();
        assert!(matches!(err, ConversionError::Input(_)));
        assert!(!dir.path().join("a.safetensors").exists());
    }

    /// Emits records one column wider than the Gaussian layout.
    struct Wide;

    impl Module for Wide {
        fn forward(&self, tracer: &mut Tracer, _input: &Var) -> Result<Var, GraphError> {
            Ok(tracer.input("raw", ArrayD::zeros(IxDyn(&[1, 2, 15]))))
        }

        fn parameters(&self) -> Vec<&Parameter> {
            Vec::new()
        }

        fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
            Vec::new()
        }
    }

    #[test]
    fn test_trace_failure_keeps_its_cause() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("wide.safetensors");
        let err = convert(&InferenceWrapper::new(Wide), &output, &config()).unwrap_err();

        assert!(matches!(err, ConversionError::Trace(InferenceError::Layout(_))));
        assert!(std::error::Error::source(&err).is_some());
        assert!(!output.exists());
    }
}
