//! Loading a network from a checkpoint.
//!
//! Weights are bound strictly first: every parameter present with the right shape and no
//! leftover tensors. If that fails the loader falls back once to relaxed binding, which
//! assigns whatever matches, leaves the rest at their initialized values and logs what was
//! skipped. Loading fails only when the file cannot be decoded or nothing binds at all.

use crate::architecture::{ArchitectureConfig, SharpNet};
use crate::checkpoint::{Checkpoint, WeightSource};
use crate::error::LoadError;
use crate::layers::{Module, ShapeMismatch};
use ndarray::ArrayD;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMode {
    Strict,
    Relaxed,
}

/// Outcome of binding checkpoint weights onto a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindReport {
    pub source: WeightSource,
    pub mode: BindMode,
    pub bound: Vec<String>,
    /// Model parameters the checkpoint does not provide.
    pub missing: Vec<String>,
    /// Checkpoint tensors the model has no parameter for.
    pub unexpected: Vec<String>,
    pub mismatched: Vec<ShapeMismatch>,
}

impl BindReport {
    /// Whether the checkpoint and the model agree exactly.
    pub fn is_exact(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty() && self.mismatched.is_empty()
    }
}

/// A model ready for inference plus how its weights were bound.
#[derive(Debug, Clone)]
pub struct LoadedModel<M = SharpNet> {
    pub model: M,
    pub report: BindReport,
}

/// Bind `weights` onto `model`, strictly if possible and relaxed otherwise.
pub fn bind_weights<M: Module>(
    model: &mut M,
    source: WeightSource,
    weights: &BTreeMap<&str, &ArrayD<f32>>,
) -> Result<BindReport, LoadError> {
    let mut missing = Vec::new();
    let mut mismatched = Vec::new();
    let mut names = HashSet::new();
    for param in model.parameters() {
        names.insert(param.name().to_string());
        match weights.get(param.name()) {
            None => missing.push(param.name().to_string()),
            Some(tensor) if tensor.shape() != param.shape() => mismatched.push(ShapeMismatch {
                name: param.name().to_string(),
                expected: param.shape().to_vec(),
                actual: tensor.shape().to_vec(),
            }),
            Some(_) => {}
        }
    }
    let unexpected: Vec<String> = weights
        .keys()
        .filter(|name| !names.contains(**name))
        .map(|name| name.to_string())
        .collect();

    let mut report = BindReport {
        source,
        mode: BindMode::Strict,
        bound: Vec::new(),
        missing,
        unexpected,
        mismatched,
    };

    if !report.is_exact() {
        report.mode = BindMode::Relaxed;
        if report.missing.len() + report.mismatched.len() == names.len() {
            return Err(LoadError::NothingBound {
                missing: report.missing,
                unexpected: report.unexpected,
                mismatched: report.mismatched,
            });
        }
    }

    for param in model.parameters_mut() {
        let Some(tensor) = weights.get(param.name()) else {
            continue;
        };
        // mismatches were collected above and are left at their initial values
        if param.assign((*tensor).clone()).is_ok() {
            report.bound.push(param.name().to_string());
        }
    }

    if report.mode == BindMode::Relaxed {
        warn!(
            "Strict weight binding failed, loaded {} of {} parameters (missing: {:?}, unexpected: {:?}, mismatched: [{}])",
            report.bound.len(),
            names.len(),
            report.missing,
            report.unexpected,
            report
                .mismatched
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ")
        );
    }
    Ok(report)
}

/// Bind a decoded checkpoint onto an externally constructed model and switch it to
/// inference mode.
pub fn load_into<M: Module>(checkpoint: &Checkpoint, mut model: M) -> Result<LoadedModel<M>, LoadError> {
    let (source, weights) = checkpoint.weights();
    info!("Found {} weight tensors ({})", weights.len(), source);
    let report = bind_weights(&mut model, source, &weights)?;
    model.set_training(false);
    Ok(LoadedModel { model, report })
}

/// Load a [`SharpNet`] from a checkpoint file.
///
/// The architecture comes from the checkpoint metadata when present and from
/// [`ArchitectureConfig::default`] otherwise.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_model(path: &Path) -> Result<LoadedModel, LoadError> {
    load_model_with(path, None)
}

/// Like [`load_model`], with an explicit architecture taking precedence over the metadata.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_model_with(
    path: &Path,
    architecture: Option<ArchitectureConfig>,
) -> Result<LoadedModel, LoadError> {
    if !path.is_file() {
        return Err(LoadError::NotFound(path.to_path_buf()));
    }
    let checkpoint = Checkpoint::read(path)?;

    let config = match (architecture, checkpoint.architecture()?) {
        (Some(config), _) => config,
        (None, Some(config)) => {
            info!("Using architecture from checkpoint metadata: {:?}", config);
            config
        }
        (None, None) => ArchitectureConfig::default(),
    };
    config.validate()?;

    let loaded = load_into(&checkpoint, SharpNet::new(config))?;
    info!(
        "Loaded {} parameters ({:?} binding)",
        loaded.model.parameter_count(),
        loaded.report.mode
    );
    Ok(loaded)
}
