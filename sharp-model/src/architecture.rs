//! The SHARP network.
//!
//! Image in, one 14-wide Gaussian record per primitive out:
//! conv -> relu -> global average pool -> flatten -> linear -> reshape to `(1, N, 14)`.
//! Parameter names follow the layer positions of the exported training graph
//! (`0.*` for the convolution, `4.*` for the head), so checkpoints written by the training
//! code bind without renaming.

use crate::checkpoint::{ARCHITECTURE_KEY, Checkpoint};
use crate::error::{CheckpointError, LoadError};
use crate::layers::{Conv2d, Linear, Module, Parameter};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use sharp_data::PARAMS_PER_GAUSSIAN;
use sharp_graph::{GraphError, Op, Tracer, Var};

/// Upper bound on the parameter count a checkpoint's architecture may request.
pub const MAX_PARAMETERS: usize = 1 << 28;

/// Shape hyperparameters of [`SharpNet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchitectureConfig {
    pub in_channels: usize,
    pub hidden_channels: usize,
    pub kernel_size: usize,
    /// Number of Gaussians predicted per image.
    pub num_gaussians: usize,
    /// Seed for parameter initialization.
    pub seed: u64,
}

impl Default for ArchitectureConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            hidden_channels: 64,
            kernel_size: 3,
            num_gaussians: 1000,
            seed: 0,
        }
    }
}

impl ArchitectureConfig {
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.in_channels != 3 {
            return Err(LoadError::Architecture(format!(
                "expected 3 input channels, got {}",
                self.in_channels
            )));
        }
        if self.hidden_channels == 0 || self.num_gaussians == 0 {
            return Err(LoadError::Architecture(
                "hidden_channels and num_gaussians must be positive".to_string(),
            ));
        }
        if self.kernel_size % 2 == 0 {
            return Err(LoadError::Architecture(format!(
                "kernel_size must be odd, got {}",
                self.kernel_size
            )));
        }
        let count = self.checked_parameter_count().ok_or_else(|| {
            LoadError::Architecture("parameter count overflows".to_string())
        })?;
        if count > MAX_PARAMETERS {
            return Err(LoadError::Architecture(format!(
                "{count} parameters exceeds the limit of {MAX_PARAMETERS}"
            )));
        }
        Ok(())
    }

    /// Width of the flat head output, `N * 14`.
    pub fn head_width(&self) -> usize {
        self.num_gaussians.saturating_mul(PARAMS_PER_GAUSSIAN)
    }

    fn checked_parameter_count(&self) -> Option<usize> {
        let head_width = self.num_gaussians.checked_mul(PARAMS_PER_GAUSSIAN)?;
        let conv = self
            .kernel_size
            .checked_mul(self.kernel_size)?
            .checked_mul(self.in_channels)?
            .checked_add(1)?
            .checked_mul(self.hidden_channels)?;
        let head = self.hidden_channels.checked_add(1)?.checked_mul(head_width)?;
        conv.checked_add(head)
    }
}

#[derive(Debug, Clone)]
pub struct SharpNet {
    config: ArchitectureConfig,
    encoder: Conv2d,
    head: Linear,
    training: bool,
}

impl SharpNet {
    /// Build a freshly initialized network. New networks start in training mode.
    pub fn new(config: ArchitectureConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let encoder = Conv2d::new(
            "0",
            config.in_channels,
            config.hidden_channels,
            config.kernel_size,
            1,
            config.kernel_size / 2,
            &mut rng,
        );
        let head = Linear::new("4", config.hidden_channels, config.head_width(), &mut rng);
        Self {
            config,
            encoder,
            head,
            training: true,
        }
    }

    pub fn config(&self) -> &ArchitectureConfig {
        &self.config
    }

    /// Switch to inference mode.
    pub fn eval(mut self) -> Self {
        self.set_training(false);
        self
    }

    /// Export the weights and architecture as a checkpoint.
    pub fn to_checkpoint(&self) -> Result<Checkpoint, CheckpointError> {
        let mut checkpoint = Checkpoint::new();
        for param in self.parameters() {
            checkpoint.insert(param.name(), param.value().as_ref().clone());
        }
        checkpoint.set_metadata(ARCHITECTURE_KEY, serde_json::to_string(&self.config)?);
        Ok(checkpoint)
    }
}

impl Module for SharpNet {
    fn forward(&self, tracer: &mut Tracer, input: &Var) -> Result<Var, GraphError> {
        let x = self.encoder.forward(tracer, input)?;
        let x = tracer.apply(Op::Relu, &[&x])?;
        let x = tracer.apply(Op::GlobalAvgPool, &[&x])?;
        let x = tracer.apply(Op::Flatten { start_dim: 1 }, &[&x])?;
        let x = self.head.forward(tracer, &x)?;
        // N stays symbolic so the recorded program does not bake in the head width
        tracer.apply(
            Op::Reshape {
                shape: vec![1, -1, PARAMS_PER_GAUSSIAN as i64],
            },
            &[&x],
        )
    }

    fn parameters(&self) -> Vec<&Parameter> {
        let mut params = self.encoder.parameters();
        params.extend(self.head.parameters());
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        let mut params = self.encoder.parameters_mut();
        params.extend(self.head.parameters_mut());
        params
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}
