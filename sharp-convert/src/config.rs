//! Conversion and validation settings.

use serde::{Deserialize, Serialize};
use sharp_graph::QuantizationConfig;
use std::fmt;
use std::path::PathBuf;

/// Hardware the deployment runtime may schedule the program on. Advisory only.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
pub enum ComputeUnits {
    #[default]
    #[serde(rename = "ALL")]
    #[value(name = "ALL")]
    All,
    #[serde(rename = "CPU_AND_NE")]
    #[value(name = "CPU_AND_NE")]
    CpuAndNe,
    #[serde(rename = "CPU_ONLY")]
    #[value(name = "CPU_ONLY")]
    CpuOnly,
}

impl ComputeUnits {
    pub fn as_str(self) -> &'static str {
        match self {
            ComputeUnits::All => "ALL",
            ComputeUnits::CpuAndNe => "CPU_AND_NE",
            ComputeUnits::CpuOnly => "CPU_ONLY",
        }
    }
}

impl fmt::Display for ComputeUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and how the artifact is meant to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTarget {
    pub minimum_os: String,
    pub format: String,
}

impl Default for DeploymentTarget {
    fn default() -> Self {
        Self {
            minimum_os: "macOS13".to_string(),
            format: "mlprogram".to_string(),
        }
    }
}

/// Descriptive metadata embedded in every artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub author: String,
    pub license: String,
    pub description: String,
    pub version: String,
}

impl Default for ArtifactMetadata {
    fn default() -> Self {
        Self {
            author: "sharp".to_string(),
            license: "MIT".to_string(),
            description: "SHARP: Single-image 3D Gaussian Splatting".to_string(),
            version: "1.0.0".to_string(),
        }
    }
}

/// Source of the representative image used for tracing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// Uniform noise in [0, 1). Without a seed every run draws a fresh sample.
    Random { seed: Option<u64> },
    /// An image file, resized to the conversion resolution.
    Image(PathBuf),
}

impl Default for InputSource {
    fn default() -> Self {
        InputSource::Random { seed: None }
    }
}

/// Everything [`convert`](crate::convert) needs besides the model and the destination.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionConfig {
    pub width: usize,
    pub height: usize,
    pub compute_units: ComputeUnits,
    /// `Some` enables int8 weight-only quantization after tracing.
    pub quantization: Option<QuantizationConfig>,
    pub deployment: DeploymentTarget,
    pub metadata: ArtifactMetadata,
    pub input: InputSource,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            compute_units: ComputeUnits::default(),
            quantization: None,
            deployment: DeploymentTarget::default(),
            metadata: ArtifactMetadata::default(),
            input: InputSource::default(),
        }
    }
}

impl ConversionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolution(mut self, width: usize, height: usize) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_compute_units(mut self, units: ComputeUnits) -> Self {
        self.compute_units = units;
        self
    }

    /// Enable or disable quantization with the default settings.
    pub fn with_quantization(mut self, enabled: bool) -> Self {
        self.quantization = enabled.then(QuantizationConfig::default);
        self
    }

    pub fn with_quantization_config(mut self, config: QuantizationConfig) -> Self {
        self.quantization = Some(config);
        self
    }

    pub fn with_deployment(mut self, deployment: DeploymentTarget) -> Self {
        self.deployment = deployment;
        self
    }

    pub fn with_metadata(mut self, metadata: ArtifactMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_input(mut self, input: InputSource) -> Self {
        self.input = input;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationConfig {
    /// Largest absolute difference an output may show and still pass.
    pub tolerance: f32,
    /// Seed for the validation input. `None` draws a fresh one.
    pub seed: Option<u64>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-3,
            seed: None,
        }
    }
}

impl ValidationConfig {
    pub fn with_tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::ValueEnum;

    #[test]
    fn test_compute_units_names() {
        for units in ComputeUnits::value_variants() {
            let parsed = ComputeUnits::from_str(units.as_str(), false).unwrap();
            assert_eq!(parsed, *units);
            let json = serde_json::to_string(units).unwrap();
            assert_eq!(json, format!("\"{}\"", units));
        }
        assert!(ComputeUnits::from_str("GPU", false).is_err());
    }

    #[test]
    fn test_defaults() {
        let config = ConversionConfig::default();
        assert_eq!((config.width, config.height), (512, 512));
        assert_eq!(config.compute_units, ComputeUnits::All);
        assert!(config.quantization.is_none());
        assert_eq!(config.deployment.minimum_os, "macOS13");
        assert_eq!(config.deployment.format, "mlprogram");
        assert_eq!(config.metadata.license, "MIT");
        assert_eq!(ValidationConfig::default().tolerance, 1e-3);
    }

    #[test]
    fn test_builder() {
        let config = ConversionConfig::new()
            .with_resolution(1024, 768)
            .with_compute_units(ComputeUnits::CpuOnly)
            .with_quantization(true);
        assert_eq!((config.width, config.height), (1024, 768));
        assert_eq!(config.quantization, Some(QuantizationConfig::default()));
        assert!(config.with_quantization(false).quantization.is_none());
    }
}
