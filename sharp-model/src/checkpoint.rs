//! Checkpoint files.
//!
//! Checkpoints are safetensors files. Training exports often wrap the weight mapping in an
//! outer container; in a flat safetensors file the container shows up as a key prefix, so
//! `model.0.weight` and `state_dict.0.weight` both carry the parameter `0.weight`. The
//! wrappers are tried in [`WRAPPER_KEYS`] order and the first one that holds any tensor wins.
//! A checkpoint without either prefix is read as a top-level mapping.

use crate::architecture::ArchitectureConfig;
use crate::error::CheckpointError;
use ndarray::{ArrayD, IxDyn};
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

/// Container keys searched for nested weights, in priority order.
pub const WRAPPER_KEYS: [&str; 2] = ["model", "state_dict"];

/// Metadata entry holding the JSON-encoded [`ArchitectureConfig`].
pub const ARCHITECTURE_KEY: &str = "sharp.architecture";

/// Where the weight mapping was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightSource {
    Nested(&'static str),
    TopLevel,
}

impl fmt::Display for WeightSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightSource::Nested(key) => write!(f, "nested under '{key}'"),
            WeightSource::TopLevel => write!(f, "top level"),
        }
    }
}

/// Float tensors and string metadata of one checkpoint file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Checkpoint {
    tensors: BTreeMap<String, ArrayD<f32>>,
    metadata: HashMap<String, String>,
}

impl Checkpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: ArrayD<f32>) -> &mut Self {
        self.tensors.insert(name.into(), tensor);
        self
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Move every tensor under `key.`, as a training export that wraps its weights would.
    pub fn nested_under(self, key: &str) -> Self {
        let tensors = self
            .tensors
            .into_iter()
            .map(|(name, tensor)| (format!("{key}.{name}"), tensor))
            .collect();
        Self {
            tensors,
            metadata: self.metadata,
        }
    }

    pub fn tensors(&self) -> &BTreeMap<String, ArrayD<f32>> {
        &self.tensors
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Architecture recorded alongside the weights, if any.
    pub fn architecture(&self) -> Result<Option<ArchitectureConfig>, CheckpointError> {
        self.metadata
            .get(ARCHITECTURE_KEY)
            .map(|json| serde_json::from_str(json))
            .transpose()
            .map_err(CheckpointError::from)
    }

    /// Resolve the weight mapping, stripping any wrapper prefix.
    pub fn weights(&self) -> (WeightSource, BTreeMap<&str, &ArrayD<f32>>) {
        for key in WRAPPER_KEYS {
            let prefix = format!("{key}.");
            let nested: BTreeMap<&str, &ArrayD<f32>> = self
                .tensors
                .iter()
                .filter_map(|(name, tensor)| name.strip_prefix(prefix.as_str()).map(|n| (n, tensor)))
                .collect();
            if !nested.is_empty() {
                let outside = self.tensors.len() - nested.len();
                if outside > 0 {
                    warn!(
                        "Ignoring {} tensors outside the '{}' container",
                        outside, key
                    );
                }
                return (WeightSource::Nested(key), nested);
            }
        }
        let top = self
            .tensors
            .iter()
            .map(|(name, tensor)| (name.as_str(), tensor))
            .collect();
        (WeightSource::TopLevel, top)
    }

    /// Decode safetensors bytes. Integer and boolean tensors are skipped.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CheckpointError> {
        let (_, header) = SafeTensors::read_metadata(bytes)?;
        let metadata = header.metadata().clone().unwrap_or_default();
        let file = SafeTensors::deserialize(bytes)?;

        let mut tensors = BTreeMap::new();
        for (name, view) in file.tensors() {
            match decode_tensor(&name, &view)? {
                Some(tensor) => {
                    tensors.insert(name, tensor);
                }
                None => debug!("Skipping non-float tensor '{}' ({:?})", name, view.dtype()),
            }
        }
        Ok(Self { tensors, metadata })
    }

    pub fn read(path: &Path) -> Result<Self, CheckpointError> {
        let bytes = std::fs::read(path)?;
        let checkpoint = Self::from_bytes(&bytes)?;
        debug!(
            "Read {} tensors from {} ({} bytes)",
            checkpoint.tensors.len(),
            path.display(),
            bytes.len()
        );
        Ok(checkpoint)
    }

    /// Encode as safetensors with every tensor stored in f32.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CheckpointError> {
        let flat: Vec<(&str, Vec<usize>, Vec<f32>)> = self
            .tensors
            .iter()
            .map(|(name, t)| (name.as_str(), t.shape().to_vec(), t.iter().copied().collect()))
            .collect();

        let mut views = Vec::with_capacity(flat.len());
        for (name, shape, values) in &flat {
            let view = TensorView::new(Dtype::F32, shape.clone(), bytemuck::cast_slice(values))?;
            views.push((*name, view));
        }

        let metadata = (!self.metadata.is_empty()).then(|| self.metadata.clone());
        Ok(safetensors::serialize(views, &metadata)?)
    }

    pub fn write(&self, path: &Path) -> Result<(), CheckpointError> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }
}

fn decode_tensor(name: &str, view: &TensorView<'_>) -> Result<Option<ArrayD<f32>>, CheckpointError> {
    let data = view.data();
    let values: Vec<f32> = match view.dtype() {
        Dtype::F32 => data
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        Dtype::F64 => data
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32)
            .collect(),
        Dtype::F16 => data
            .chunks_exact(2)
            .map(|c| half::f16::from_le_bytes([c[0], c[1]]).to_f32())
            .collect(),
        Dtype::BF16 => data
            .chunks_exact(2)
            .map(|c| half::bf16::from_le_bytes([c[0], c[1]]).to_f32())
            .collect(),
        _ => return Ok(None),
    };
    ArrayD::from_shape_vec(IxDyn(view.shape()), values)
        .map(Some)
        .map_err(|source| CheckpointError::Tensor {
            name: name.to_string(),
            source,
        })
}
