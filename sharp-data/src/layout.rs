//! Raw model output layout.
//!
//! A SHARP model emits one 14-wide record per Gaussian primitive. The record is split by
//! position, never by tensor name, so the offsets below are an interface shared by the
//! converter, the validator and every runtime that reads converted artifacts. Changing a
//! width or the field order requires bumping [`LAYOUT_VERSION`].

use ndarray::{ArrayD, ArrayViewD, Axis, Slice};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use thiserror::Error;

/// Version of the per-primitive record layout.
pub const LAYOUT_VERSION: u32 = 1;

/// Number of raw scalars the model emits per Gaussian.
pub const PARAMS_PER_GAUSSIAN: usize = 14;

const _: () = assert!(
    GaussianField::Rotation.offset() + GaussianField::Rotation.width() == PARAMS_PER_GAUSSIAN
);

/// Errors raised when a tensor does not follow the record layout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("expected a rank-{expected} tensor, got shape {actual:?}")]
    Rank { expected: usize, actual: Vec<usize> },

    #[error("expected batch size 1, got {0}")]
    BatchSize(usize),

    #[error("raw output width {actual} does not match layout v{version} width {expected}")]
    Width {
        actual: usize,
        expected: usize,
        version: u32,
    },

    #[error("buffer '{name}' has shape {actual:?}, expected trailing width {expected}")]
    FieldShape {
        name: &'static str,
        actual: Vec<usize>,
        expected: usize,
    },

    #[error("buffers disagree on primitive count: {0:?}")]
    PrimitiveCount(Vec<usize>),
}

/// One semantic field of the per-primitive record, in layout order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GaussianField {
    /// World-space center (x, y, z).
    Position,
    /// Linear RGB color in [0, 1].
    Color,
    /// Alpha in [0, 1].
    Opacity,
    /// Per-axis covariance scale, positive.
    Scale,
    /// Orientation quaternion stored as (w, x, y, z).
    Rotation,
}

impl GaussianField {
    /// All fields in record order.
    pub const ALL: [GaussianField; 5] = [
        GaussianField::Position,
        GaussianField::Color,
        GaussianField::Opacity,
        GaussianField::Scale,
        GaussianField::Rotation,
    ];

    pub const fn width(self) -> usize {
        match self {
            GaussianField::Position => 3,
            GaussianField::Color => 3,
            GaussianField::Opacity => 1,
            GaussianField::Scale => 3,
            GaussianField::Rotation => 4,
        }
    }

    pub const fn offset(self) -> usize {
        match self {
            GaussianField::Position => 0,
            GaussianField::Color => 3,
            GaussianField::Opacity => 6,
            GaussianField::Scale => 7,
            GaussianField::Rotation => 10,
        }
    }

    /// Offset range of this field inside the raw record.
    pub fn range(self) -> Range<usize> {
        self.offset()..self.offset() + self.width()
    }

    /// Name of the artifact output port carrying this field.
    pub const fn output_name(self) -> &'static str {
        match self {
            GaussianField::Position => "positions",
            GaussianField::Color => "colors",
            GaussianField::Opacity => "opacities",
            GaussianField::Scale => "scales",
            GaussianField::Rotation => "rotations",
        }
    }

    pub fn from_output_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.output_name() == name)
    }

    /// Human-readable port description embedded in converted artifacts.
    pub const fn description(self) -> &'static str {
        match self {
            GaussianField::Position => "3D positions of Gaussians in world space (N, 3)",
            GaussianField::Color => "RGB colors of Gaussians [0, 1] (N, 3)",
            GaussianField::Opacity => "Opacity values [0, 1] (N, 1)",
            GaussianField::Scale => "Scale factors for Gaussian covariance (N, 3)",
            GaussianField::Rotation => "Rotation quaternions (w, x, y, z) (N, 4)",
        }
    }
}

/// The five named parameter buffers of a Gaussian prediction.
///
/// Buffers produced by [`decompose`] keep the batch axis, `(1, N, width)`. Buffers produced
/// by the inference wrapper and by converted artifacts drop it, `(N, width)`. Either way the
/// trailing axis is the field width and the one before it is the primitive index.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianBuffers {
    pub positions: ArrayD<f32>,
    pub colors: ArrayD<f32>,
    pub opacities: ArrayD<f32>,
    pub scales: ArrayD<f32>,
    pub rotations: ArrayD<f32>,
}

impl GaussianBuffers {
    /// Build the buffers field by field, in record order.
    pub fn from_fn(mut f: impl FnMut(GaussianField) -> ArrayD<f32>) -> Self {
        Self {
            positions: f(GaussianField::Position),
            colors: f(GaussianField::Color),
            opacities: f(GaussianField::Opacity),
            scales: f(GaussianField::Scale),
            rotations: f(GaussianField::Rotation),
        }
    }

    /// Fallible variant of [`GaussianBuffers::from_fn`]; stops at the first error.
    pub fn try_from_fn<E>(
        mut f: impl FnMut(GaussianField) -> Result<ArrayD<f32>, E>,
    ) -> Result<Self, E> {
        Ok(Self {
            positions: f(GaussianField::Position)?,
            colors: f(GaussianField::Color)?,
            opacities: f(GaussianField::Opacity)?,
            scales: f(GaussianField::Scale)?,
            rotations: f(GaussianField::Rotation)?,
        })
    }

    pub fn get(&self, field: GaussianField) -> &ArrayD<f32> {
        match field {
            GaussianField::Position => &self.positions,
            GaussianField::Color => &self.colors,
            GaussianField::Opacity => &self.opacities,
            GaussianField::Scale => &self.scales,
            GaussianField::Rotation => &self.rotations,
        }
    }

    /// Iterate buffers in record order.
    pub fn iter(&self) -> impl Iterator<Item = (GaussianField, &ArrayD<f32>)> + '_ {
        GaussianField::ALL.into_iter().map(move |f| (f, self.get(f)))
    }

    /// Check every buffer's trailing width and that all agree on the primitive count.
    pub fn validate(&self) -> Result<(), LayoutError> {
        let mut counts = Vec::with_capacity(GaussianField::ALL.len());
        for (field, buffer) in self.iter() {
            let shape = buffer.shape();
            if shape.len() < 2 || shape[shape.len() - 1] != field.width() {
                return Err(LayoutError::FieldShape {
                    name: field.output_name(),
                    actual: shape.to_vec(),
                    expected: field.width(),
                });
            }
            counts.push(shape[..shape.len() - 1].iter().product::<usize>());
        }
        if counts.windows(2).any(|w| w[0] != w[1]) {
            return Err(LayoutError::PrimitiveCount(counts));
        }
        Ok(())
    }

    /// Number of primitives described by the buffers.
    pub fn primitive_count(&self) -> usize {
        let shape = self.positions.shape();
        shape[..shape.len().saturating_sub(1)].iter().product()
    }

    /// Concatenate the buffers back into the raw record tensor.
    pub fn to_raw(&self) -> Result<ArrayD<f32>, LayoutError> {
        self.validate()?;
        let axis = Axis(self.positions.ndim() - 1);
        let views: Vec<ArrayViewD<'_, f32>> = self.iter().map(|(_, b)| b.view()).collect();
        ndarray::concatenate(axis, &views).map_err(|_| {
            LayoutError::PrimitiveCount(self.iter().map(|(_, b)| b.len()).collect())
        })
    }
}

/// Check that `shape` is a raw `(1, N, 14)` model output.
pub fn check_raw_shape(shape: &[usize]) -> Result<(), LayoutError> {
    if shape.len() != 3 {
        return Err(LayoutError::Rank {
            expected: 3,
            actual: shape.to_vec(),
        });
    }
    if shape[0] != 1 {
        return Err(LayoutError::BatchSize(shape[0]));
    }
    if shape[2] != PARAMS_PER_GAUSSIAN {
        return Err(LayoutError::Width {
            actual: shape[2],
            expected: PARAMS_PER_GAUSSIAN,
            version: LAYOUT_VERSION,
        });
    }
    Ok(())
}

/// Split a raw `(1, N, 14)` model output into its five named buffers.
pub fn decompose(raw: &ArrayD<f32>) -> Result<GaussianBuffers, LayoutError> {
    check_raw_shape(raw.shape())?;
    Ok(GaussianBuffers::from_fn(|field| {
        raw.slice_axis(Axis(2), Slice::from(field.range()))
            .to_owned()
    }))
}
