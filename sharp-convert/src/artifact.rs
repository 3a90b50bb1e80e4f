//! Converted artifacts.
//!
//! An artifact is a single safetensors file. Program constants are stored as tensors under
//! `weights/<name>`; quantized constants store their int8 codes there and their per-channel
//! scales under `scales/<name>`. Everything else (schema, metadata, deployment target and
//! the recorded ops) is a JSON manifest in the header metadata under [`MANIFEST_KEY`].

use crate::config::{ArtifactMetadata, ComputeUnits, DeploymentTarget};
use ndarray::{ArrayD, IxDyn};
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use serde::{Deserialize, Serialize};
use sharp_data::{GaussianBuffers, GaussianCloud, GaussianField, LAYOUT_VERSION, LayoutError};
use sharp_graph::{
    Binding, Constant, ConstantData, GraphError, Node, Program, QuantizationSummary,
    QuantizedTensor, ValueId,
};
use sharp_model::IMAGE_INPUT;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Version of the on-disk container layout.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Header metadata key holding the JSON manifest.
pub const MANIFEST_KEY: &str = "sharp.manifest";

/// Symbolic name of the primitive-count dimension.
pub const PRIMITIVE_DIM: &str = "N";

/// Port description of the image input at a concrete resolution.
pub fn image_description(height: usize, width: usize) -> String {
    format!("Input RGB image normalized to [0, 1] range. Shape: (1, 3, {height}, {width})")
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("IO error")]
    Io(#[from] std::io::Error),
    #[error("invalid artifact container")]
    Format(#[from] safetensors::SafeTensorError),
    #[error("artifact manifest is malformed")]
    Manifest(#[from] serde_json::Error),
    #[error("artifact has no '{}' manifest", MANIFEST_KEY)]
    MissingManifest,
    #[error("unsupported artifact format version {0} (expected {expected})", expected = ARTIFACT_FORMAT_VERSION)]
    UnsupportedVersion(u32),
    #[error("artifact is corrupt: {0}")]
    Corrupt(String),
    #[error("program does not match its schema: {0}")]
    SchemaMismatch(String),
    #[error("input '{name}' expects shape {expected}, got {actual:?}")]
    InputShape {
        name: String,
        expected: String,
        actual: Vec<usize>,
    },
    #[error("output '{name}' has shape {actual:?}, schema declares {expected}")]
    OutputShape {
        name: String,
        expected: String,
        actual: Vec<usize>,
    },
    #[error("program produced no output '{0}'")]
    MissingOutput(String),
    #[error("program execution failed")]
    Graph(#[from] GraphError),
    #[error("outputs violate the Gaussian record layout")]
    Layout(#[from] LayoutError),
    #[error("failed to move artifact into place at {}", .path.display())]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One dimension of a port shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dim {
    Fixed(usize),
    /// Resolved at run time.
    Dynamic(String),
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Fixed(n) => write!(f, "{n}"),
            Dim::Dynamic(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Float32,
}

/// Declared name, shape and type of one program port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub name: String,
    pub shape: Vec<Dim>,
    pub dtype: DataType,
    pub description: String,
}

impl TensorSpec {
    /// Whether a concrete shape satisfies this spec.
    pub fn accepts(&self, shape: &[usize]) -> bool {
        shape.len() == self.shape.len()
            && self.shape.iter().zip(shape).all(|(dim, &n)| match dim {
                Dim::Fixed(expected) => *expected == n,
                Dim::Dynamic(_) => true,
            })
    }

    pub fn shape_string(&self) -> String {
        let dims: Vec<String> = self.shape.iter().map(ToString::to_string).collect();
        format!("({})", dims.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
}

impl Schema {
    /// The Gaussian prediction schema at a fixed input resolution.
    pub fn gaussian(height: usize, width: usize) -> Self {
        let image = TensorSpec {
            name: IMAGE_INPUT.to_string(),
            shape: [1, 3, height, width].into_iter().map(Dim::Fixed).collect(),
            dtype: DataType::Float32,
            description: image_description(height, width),
        };
        let outputs = GaussianField::ALL
            .into_iter()
            .map(|field| TensorSpec {
                name: field.output_name().to_string(),
                shape: vec![
                    Dim::Dynamic(PRIMITIVE_DIM.to_string()),
                    Dim::Fixed(field.width()),
                ],
                dtype: DataType::Float32,
                description: field.description().to_string(),
            })
            .collect();
        Self {
            inputs: vec![image],
            outputs,
        }
    }

    pub fn input(&self, name: &str) -> Option<&TensorSpec> {
        self.inputs.iter().find(|spec| spec.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&TensorSpec> {
        self.outputs.iter().find(|spec| spec.name == name)
    }

    /// `(height, width)` of the image input, if it is fixed.
    pub fn input_size(&self) -> Option<(usize, usize)> {
        match self.input(IMAGE_INPUT)?.shape.as_slice() {
            [_, _, Dim::Fixed(h), Dim::Fixed(w)] => Some((*h, *w)),
            _ => None,
        }
    }
}

/// Everything about an artifact except its program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub layout_version: u32,
    pub metadata: ArtifactMetadata,
    pub deployment: DeploymentTarget,
    pub compute_units: ComputeUnits,
    pub schema: Schema,
    /// Present when weights were quantized.
    #[serde(default)]
    pub quantization: Option<QuantizationSummary>,
}

impl Manifest {
    pub fn new(
        schema: Schema,
        metadata: ArtifactMetadata,
        deployment: DeploymentTarget,
        compute_units: ComputeUnits,
    ) -> Self {
        Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            layout_version: LAYOUT_VERSION,
            metadata,
            deployment,
            compute_units,
            schema,
            quantization: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Encoding {
    Float32,
    Int8,
}

#[derive(Debug, Serialize, Deserialize)]
struct ConstantEntry {
    id: ValueId,
    name: String,
    shape: Vec<usize>,
    encoding: Encoding,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProgramManifest {
    inputs: Vec<Binding>,
    outputs: Vec<Binding>,
    constants: Vec<ConstantEntry>,
    nodes: Vec<Node>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredManifest {
    manifest: Manifest,
    program: ProgramManifest,
}

fn weights_key(name: &str) -> String {
    format!("weights/{name}")
}

fn scales_key(name: &str) -> String {
    format!("scales/{name}")
}

fn typed_tensor<'a>(
    file: &SafeTensors<'a>,
    key: &str,
    dtype: Dtype,
) -> Result<TensorView<'a>, ArtifactError> {
    let view = file
        .tensor(key)
        .map_err(|_| ArtifactError::Corrupt(format!("missing tensor '{key}'")))?;
    if view.dtype() != dtype {
        return Err(ArtifactError::Corrupt(format!(
            "tensor '{key}' is {:?}, expected {:?}",
            view.dtype(),
            dtype
        )));
    }
    Ok(view)
}

fn read_f32(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// A converted program together with its manifest.
#[derive(Debug, Clone)]
pub struct Artifact {
    manifest: Manifest,
    program: Program,
}

impl Artifact {
    /// Pair a program with its manifest, checking that port names and order agree.
    pub fn new(program: Program, manifest: Manifest) -> Result<Self, ArtifactError> {
        let check = |kind: &str, bound: &[Binding], declared: &[TensorSpec]| {
            let bound: Vec<&str> = bound.iter().map(|b| b.name.as_str()).collect();
            let declared: Vec<&str> = declared.iter().map(|s| s.name.as_str()).collect();
            if bound == declared {
                Ok(())
            } else {
                Err(ArtifactError::SchemaMismatch(format!(
                    "program {kind} {bound:?}, schema {kind} {declared:?}"
                )))
            }
        };
        check("inputs", program.inputs(), &manifest.schema.inputs)?;
        check("outputs", program.outputs(), &manifest.schema.outputs)?;
        Ok(Self { manifest, program })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn schema(&self) -> &Schema {
        &self.manifest.schema
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub(crate) fn set_quantization(&mut self, summary: QuantizationSummary) {
        self.manifest.quantization = Some(summary);
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ArtifactError> {
        let mut entries = Vec::with_capacity(self.program.constants().len());
        let mut tensors: Vec<(String, Dtype, Vec<usize>, Vec<u8>)> = Vec::new();
        for (id, constant) in self.program.constants() {
            let shape = constant.data.shape().to_vec();
            let encoding = match &constant.data {
                ConstantData::Float32(tensor) => {
                    let values: Vec<f32> = tensor.iter().copied().collect();
                    tensors.push((
                        weights_key(&constant.name),
                        Dtype::F32,
                        shape.clone(),
                        bytemuck::cast_slice(&values).to_vec(),
                    ));
                    Encoding::Float32
                }
                ConstantData::Int8(q) => {
                    tensors.push((
                        weights_key(&constant.name),
                        Dtype::I8,
                        shape.clone(),
                        bytemuck::cast_slice(q.values()).to_vec(),
                    ));
                    tensors.push((
                        scales_key(&constant.name),
                        Dtype::F32,
                        vec![q.scales().len()],
                        bytemuck::cast_slice(q.scales()).to_vec(),
                    ));
                    Encoding::Int8
                }
            };
            entries.push(ConstantEntry {
                id: *id,
                name: constant.name.clone(),
                shape,
                encoding,
            });
        }

        let stored = StoredManifest {
            manifest: self.manifest.clone(),
            program: ProgramManifest {
                inputs: self.program.inputs().to_vec(),
                outputs: self.program.outputs().to_vec(),
                constants: entries,
                nodes: self.program.nodes().to_vec(),
            },
        };
        let header = HashMap::from([(MANIFEST_KEY.to_string(), serde_json::to_string(&stored)?)]);

        let mut views = Vec::with_capacity(tensors.len());
        for (key, dtype, shape, bytes) in &tensors {
            views.push((key.as_str(), TensorView::new(*dtype, shape.clone(), bytes)?));
        }
        Ok(safetensors::serialize(views, &Some(header))?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ArtifactError> {
        let (_, header) = SafeTensors::read_metadata(bytes)?;
        let json = header
            .metadata()
            .as_ref()
            .and_then(|m| m.get(MANIFEST_KEY))
            .ok_or(ArtifactError::MissingManifest)?;
        let stored: StoredManifest = serde_json::from_str(json)?;
        if stored.manifest.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(ArtifactError::UnsupportedVersion(
                stored.manifest.format_version,
            ));
        }

        let file = SafeTensors::deserialize(bytes)?;
        let mut constants = BTreeMap::new();
        for entry in stored.program.constants {
            let view = match entry.encoding {
                Encoding::Float32 => typed_tensor(&file, &weights_key(&entry.name), Dtype::F32)?,
                Encoding::Int8 => typed_tensor(&file, &weights_key(&entry.name), Dtype::I8)?,
            };
            if view.shape() != entry.shape.as_slice() {
                return Err(ArtifactError::Corrupt(format!(
                    "tensor '{}' has shape {:?}, manifest says {:?}",
                    entry.name,
                    view.shape(),
                    entry.shape
                )));
            }

            let data = match entry.encoding {
                Encoding::Float32 => {
                    let array = ArrayD::from_shape_vec(IxDyn(&entry.shape), read_f32(view.data()))
                        .map_err(|e| ArtifactError::Corrupt(format!("{}: {e}", entry.name)))?;
                    ConstantData::Float32(Arc::new(array))
                }
                Encoding::Int8 => {
                    let codes = view.data().iter().map(|&b| b as i8).collect();
                    let scales = read_f32(typed_tensor(&file, &scales_key(&entry.name), Dtype::F32)?.data());
                    ConstantData::Int8(QuantizedTensor::from_parts(
                        &entry.name,
                        entry.shape.clone(),
                        codes,
                        scales,
                    )?)
                }
            };
            constants.insert(
                entry.id,
                Constant {
                    name: entry.name,
                    data,
                },
            );
        }

        let program = Program::from_parts(
            stored.program.inputs,
            stored.program.outputs,
            constants,
            stored.program.nodes,
        )?;
        Self::new(program, stored.manifest)
    }

    /// Write the artifact, creating missing parent directories.
    ///
    /// The bytes go to a temporary file next to `path` that is renamed into place, so the
    /// destination never holds a partial artifact.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn save(&self, path: &Path) -> Result<(), ArtifactError> {
        let bytes = self.to_bytes()?;
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;

        let mut staging = tempfile::NamedTempFile::new_in(parent)?;
        staging.write_all(&bytes)?;
        staging.as_file().sync_all()?;
        staging
            .persist(path)
            .map_err(|e| ArtifactError::Persist {
                path: path.to_path_buf(),
                source: e.error,
            })?;
        info!("Wrote artifact ({} bytes)", bytes.len());
        Ok(())
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let bytes = std::fs::read(path)?;
        let artifact = Self::from_bytes(&bytes)?;
        debug!(
            "Loaded artifact: {} nodes, {} constants",
            artifact.program.nodes().len(),
            artifact.program.constants().len()
        );
        Ok(artifact)
    }

    /// Run the program on `image`, checking input and output shapes against the schema.
    pub fn predict(&self, image: &ArrayD<f32>) -> Result<HashMap<String, ArrayD<f32>>, ArtifactError> {
        let spec = self
            .schema()
            .input(IMAGE_INPUT)
            .ok_or_else(|| ArtifactError::SchemaMismatch(format!("no '{IMAGE_INPUT}' input")))?;
        if !spec.accepts(image.shape()) {
            return Err(ArtifactError::InputShape {
                name: spec.name.clone(),
                expected: spec.shape_string(),
                actual: image.shape().to_vec(),
            });
        }

        let feeds = HashMap::from([(spec.name.clone(), image.clone())]);
        let outputs = self.program.run(&feeds)?;
        for spec in &self.schema().outputs {
            let tensor = outputs
                .get(&spec.name)
                .ok_or_else(|| ArtifactError::MissingOutput(spec.name.clone()))?;
            if !spec.accepts(tensor.shape()) {
                return Err(ArtifactError::OutputShape {
                    name: spec.name.clone(),
                    expected: spec.shape_string(),
                    actual: tensor.shape().to_vec(),
                });
            }
        }
        Ok(outputs)
    }

    /// Like [`Artifact::predict`], grouped into the five Gaussian buffers.
    pub fn predict_buffers(&self, image: &ArrayD<f32>) -> Result<GaussianBuffers, ArtifactError> {
        let mut outputs = self.predict(image)?;
        let buffers = GaussianBuffers::try_from_fn(|field| {
            outputs
                .remove(field.output_name())
                .ok_or_else(|| ArtifactError::MissingOutput(field.output_name().to_string()))
        })?;
        buffers.validate()?;
        Ok(buffers)
    }

    /// Predict and decode into renderable Gaussians, dropping those below `min_opacity` and
    /// keeping at most `max_gaussians` of the most opaque (0 keeps all).
    pub fn predict_cloud(
        &self,
        image: &ArrayD<f32>,
        min_opacity: f32,
        max_gaussians: usize,
    ) -> Result<GaussianCloud, ArtifactError> {
        let buffers = self.predict_buffers(image)?;
        let cloud = GaussianCloud::from_buffers(&buffers)?;
        Ok(cloud.filtered(min_opacity, max_gaussians))
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.manifest;
        writeln!(f, "{}", m.metadata.description)?;
        writeln!(
            f,
            "  version {}, author {}, license {}",
            m.metadata.version, m.metadata.author, m.metadata.license
        )?;
        writeln!(
            f,
            "  format {} (container v{}, layout v{}), minimum OS {}, compute units {}",
            m.deployment.format,
            m.format_version,
            m.layout_version,
            m.deployment.minimum_os,
            m.compute_units
        )?;
        let quantized = self
            .program
            .constants()
            .values()
            .filter(|c| matches!(c.data, ConstantData::Int8(_)))
            .count();
        writeln!(
            f,
            "  {} ops, {} parameters, {} weight bytes ({} of {} constants int8)",
            self.program.nodes().len(),
            self.program.parameter_count(),
            self.program.weight_bytes(),
            quantized,
            self.program.constants().len()
        )?;
        writeln!(f, "  inputs:")?;
        for spec in &m.schema.inputs {
            writeln!(f, "    {}: {}", spec.name, spec.shape_string())?;
        }
        write!(f, "  outputs:")?;
        for spec in &m.schema.outputs {
            write!(f, "\n    {}: {}  {}", spec.name, spec.shape_string(), spec.description)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharp_graph::{GraphBuilder, Op, QuantizationConfig, quantize_weights};

    /// A tiny program with the Gaussian port layout: `image -> linear -> reshape -> split`.
    fn artifact(height: usize, width: usize) -> Artifact {
        let features = 3 * height * width;
        let mut b = GraphBuilder::new();
        let image = b.add_input(IMAGE_INPUT);
        let flat = b.add_node(Op::Flatten { start_dim: 1 }, vec![image]);
        let weight = ArrayD::from_shape_fn(IxDyn(&[28, features]), |i| {
            ((i[0] * 31 + i[1] * 17) % 13) as f32 / 13.0 - 0.5
        });
        let w = b.add_constant("head.weight", Arc::new(weight));
        let bias = b.add_constant("head.bias", Arc::new(ArrayD::zeros(IxDyn(&[28]))));
        let y = b.add_node(Op::Linear, vec![flat, w, bias]);
        let raw = b.add_node(Op::Reshape { shape: vec![1, -1, 14] }, vec![y]);
        for field in GaussianField::ALL {
            let r = field.range();
            let part = b.add_node(
                Op::Slice {
                    axis: 2,
                    start: r.start,
                    end: r.end,
                },
                vec![raw],
            );
            let out = b.add_node(Op::Squeeze { axis: 0 }, vec![part]);
            b.mark_output(field.output_name(), out);
        }
        let manifest = Manifest::new(
            Schema::gaussian(height, width),
            ArtifactMetadata::default(),
            DeploymentTarget::default(),
            ComputeUnits::CpuOnly,
        );
        Artifact::new(b.build().unwrap(), manifest).unwrap()
    }

    fn image(height: usize, width: usize) -> ArrayD<f32> {
        ArrayD::from_shape_fn(IxDyn(&[1, 3, height, width]), |i| {
            (i[1] + i[2] + i[3]) as f32 * 0.1
        })
    }

    #[test]
    fn test_schema_ports() {
        let schema = Schema::gaussian(768, 1024);
        assert_eq!(schema.input_size(), Some((768, 1024)));
        assert!(schema.inputs[0].accepts(&[1, 3, 768, 1024]));
        assert!(!schema.inputs[0].accepts(&[1, 3, 1024, 768]));
        assert_eq!(
            schema.inputs[0].description,
            "Input RGB image normalized to [0, 1] range. Shape: (1, 3, 768, 1024)"
        );

        let rotations = schema.output("rotations").unwrap();
        assert_eq!(rotations.shape_string(), "(N, 4)");
        assert!(rotations.accepts(&[1000, 4]));
        assert!(!rotations.accepts(&[1, 1000, 4]));
    }

    #[test]
    fn test_dims_serialize_as_numbers_or_names() {
        let json = serde_json::to_string(&Schema::gaussian(2, 3).outputs[0].shape).unwrap();
        assert_eq!(json, r#"["N",3]"#);
    }

    #[test]
    fn test_bytes_round_trip_predicts_identically() {
        let original = artifact(2, 3);
        let restored = Artifact::from_bytes(&original.to_bytes().unwrap()).unwrap();
        assert_eq!(restored.manifest(), original.manifest());

        let input = image(2, 3);
        assert_eq!(
            restored.predict(&input).unwrap(),
            original.predict(&input).unwrap()
        );
    }

    #[test]
    fn test_quantized_constants_survive_round_trip() {
        let original = artifact(4, 4);
        let mut program = original.program().clone();
        let summary = quantize_weights(&mut program, &QuantizationConfig { min_elements: 16 });
        assert_eq!(summary.quantized, 1);
        let mut quantized = Artifact::new(program, original.manifest().clone()).unwrap();
        quantized.set_quantization(summary);

        let restored = Artifact::from_bytes(&quantized.to_bytes().unwrap()).unwrap();
        assert_eq!(restored.manifest().quantization, Some(summary));
        assert_eq!(
            restored.program().constants(),
            quantized.program().constants()
        );
        let out = restored.predict(&image(4, 4)).unwrap();
        assert_eq!(out["scales"].shape(), &[2, 3]);
    }

    #[test]
    fn test_predict_rejects_wrong_resolution() {
        let err = artifact(2, 3).predict(&image(3, 2)).unwrap_err();
        assert!(matches!(err, ArtifactError::InputShape { .. }));
    }

    #[test]
    fn test_predict_buffers_and_cloud() {
        let artifact = artifact(2, 2);
        let buffers = artifact.predict_buffers(&image(2, 2)).unwrap();
        assert_eq!(buffers.primitive_count(), 2);
        let cloud = artifact.predict_cloud(&image(2, 2), f32::NEG_INFINITY, 1).unwrap();
        assert_eq!(cloud.len(), 1);
    }

    #[test]
    fn test_new_rejects_mismatched_ports() {
        let good = artifact(2, 2);
        let mut manifest = good.manifest().clone();
        manifest.schema.outputs.swap(0, 1);
        assert!(matches!(
            Artifact::new(good.program().clone(), manifest),
            Err(ArtifactError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_save_creates_parents_and_load_restores() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/sharp.safetensors");
        let original = artifact(2, 2);
        original.save(&path).unwrap();
        assert!(path.is_file());

        let loaded = Artifact::load(&path).unwrap();
        assert_eq!(loaded.manifest(), original.manifest());
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_rejects_foreign_and_future_files() {
        let plain = safetensors::serialize(
            [("w", TensorView::new(Dtype::F32, vec![1], &[0u8; 4]).unwrap())],
            &None,
        )
        .unwrap();
        assert!(matches!(
            Artifact::from_bytes(&plain),
            Err(ArtifactError::MissingManifest)
        ));

        let original = artifact(2, 2);
        let mut manifest = original.manifest().clone();
        manifest.format_version = 99;
        let future = Artifact::new(original.program().clone(), manifest).unwrap();
        let err = Artifact::from_bytes(&future.to_bytes().unwrap()).unwrap_err();
        assert!(matches!(err, ArtifactError::UnsupportedVersion(99)));
        assert_eq!(
            err.to_string(),
            format!("unsupported artifact format version 99 (expected {ARTIFACT_FORMAT_VERSION})")
        );
    }

    #[test]
    fn test_summary_lists_ports() {
        let summary = artifact(2, 2).to_string();
        assert!(summary.starts_with("SHARP: Single-image 3D Gaussian Splatting"));
        assert!(summary.contains("compute units CPU_ONLY"));
        assert!(summary.contains("image: (1, 3, 2, 2)"));
        assert!(summary.contains("opacities: (N, 1)  Opacity values [0, 1] (N, 1)"));
    }
}
