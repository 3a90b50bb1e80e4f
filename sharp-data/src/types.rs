//! CPU-side Gaussian primitives decoded from model outputs.
//!
//! These are what a runtime hands to a splat renderer once a converted artifact has
//! produced its five parameter buffers.

use crate::layout::{GaussianBuffers, GaussianField, LayoutError};
use glam::{Quat, Vec3};
use tracing::debug;

/// A 3D Gaussian splat (CPU representation).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gaussian {
    /// Center position in world space.
    pub position: Vec3,
    /// Orientation, normalized.
    pub rotation: Quat,
    /// Per-axis scale (x, y, z).
    pub scale: Vec3,
    /// RGB color (linear, 0-1 range).
    pub color: Vec3,
    /// Opacity (0-1).
    pub opacity: f32,
}

impl Gaussian {
    /// Decode one raw record of the layout (position, color, opacity, scale, rotation).
    ///
    /// The rotation is stored as (w, x, y, z). A zero-length quaternion decodes to identity.
    pub fn from_record(
        position: &[f32],
        color: &[f32],
        opacity: f32,
        scale: &[f32],
        rotation: &[f32],
    ) -> Self {
        let q = Quat::from_xyzw(rotation[1], rotation[2], rotation[3], rotation[0]);
        let rotation = if q.length_squared() > f32::EPSILON {
            q.normalize()
        } else {
            Quat::IDENTITY
        };

        Self {
            position: Vec3::from_slice(position),
            rotation,
            scale: Vec3::from_slice(scale),
            color: Vec3::from_slice(color),
            opacity,
        }
    }

    /// Check if this Gaussian is visible (opacity above threshold).
    pub fn is_visible(&self, threshold: f32) -> bool {
        self.opacity > threshold
    }

    /// Largest axis extent, used for culling.
    pub fn radius(&self) -> f32 {
        self.scale.abs().max_element()
    }
}

impl Default for Gaussian {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::splat(0.01),
            color: Vec3::splat(0.8),
            opacity: 1.0,
        }
    }
}

/// A decoded set of Gaussians.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GaussianCloud {
    gaussians: Vec<Gaussian>,
}

impl GaussianCloud {
    pub fn new(gaussians: Vec<Gaussian>) -> Self {
        Self { gaussians }
    }

    /// Decode named parameter buffers into per-primitive records.
    pub fn from_buffers(buffers: &GaussianBuffers) -> Result<Self, LayoutError> {
        buffers.validate()?;

        let standard: Vec<_> = GaussianField::ALL
            .iter()
            .map(|&f| buffers.get(f).as_standard_layout())
            .collect();
        let slices: Vec<&[f32]> = standard
            .iter()
            .zip(GaussianField::ALL)
            .map(|(arr, field)| {
                arr.as_slice().ok_or_else(|| LayoutError::FieldShape {
                    name: field.output_name(),
                    actual: arr.shape().to_vec(),
                    expected: field.width(),
                })
            })
            .collect::<Result<_, _>>()?;

        let count = buffers.primitive_count();
        let mut gaussians = Vec::with_capacity(count);
        for i in 0..count {
            let record = |field: GaussianField| {
                let w = field.width();
                &slices[field_index(field)][i * w..(i + 1) * w]
            };
            gaussians.push(Gaussian::from_record(
                record(GaussianField::Position),
                record(GaussianField::Color),
                record(GaussianField::Opacity)[0],
                record(GaussianField::Scale),
                record(GaussianField::Rotation),
            ));
        }

        debug!("Decoded {} Gaussians", gaussians.len());
        Ok(Self { gaussians })
    }

    /// Keep Gaussians above `min_opacity`, then cap the count at `max_gaussians`
    /// (0 = no limit), preferring the most opaque.
    pub fn filtered(&self, min_opacity: f32, max_gaussians: usize) -> Self {
        let mut kept: Vec<Gaussian> = self
            .gaussians
            .iter()
            .copied()
            .filter(|g| g.is_visible(min_opacity))
            .collect();

        if max_gaussians > 0 && kept.len() > max_gaussians {
            kept.sort_by(|a, b| b.opacity.total_cmp(&a.opacity));
            kept.truncate(max_gaussians);
        }

        debug!(
            "Filtered {} -> {} Gaussians (min_opacity={}, max={})",
            self.gaussians.len(),
            kept.len(),
            min_opacity,
            max_gaussians
        );
        Self { gaussians: kept }
    }

    pub fn gaussians(&self) -> &[Gaussian] {
        &self.gaussians
    }

    pub fn len(&self) -> usize {
        self.gaussians.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gaussians.is_empty()
    }
}

fn field_index(field: GaussianField) -> usize {
    match field {
        GaussianField::Position => 0,
        GaussianField::Color => 1,
        GaussianField::Opacity => 2,
        GaussianField::Scale => 3,
        GaussianField::Rotation => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{PARAMS_PER_GAUSSIAN, decompose};
    use ndarray::{ArrayD, IxDyn};

    fn raw_with_opacities(opacities: &[f32]) -> ArrayD<f32> {
        let n = opacities.len();
        let mut raw = ArrayD::<f32>::zeros(IxDyn(&[1, n, PARAMS_PER_GAUSSIAN]));
        for (i, &alpha) in opacities.iter().enumerate() {
            raw[[0, i, 0]] = i as f32;
            raw[[0, i, 3]] = 0.25;
            raw[[0, i, 6]] = alpha;
            raw[[0, i, 7]] = 0.1;
            raw[[0, i, 10]] = 2.0; // unnormalized identity
        }
        raw
    }

    #[test]
    fn test_from_record_reorders_quaternion() {
        let g = Gaussian::from_record(
            &[1.0, 2.0, 3.0],
            &[0.5, 0.5, 0.5],
            0.7,
            &[0.1, 0.2, 0.3],
            &[0.0, 0.0, 0.0, 1.0],
        );
        assert_eq!(g.position, Vec3::new(1.0, 2.0, 3.0));
        assert!((g.rotation.z - 1.0).abs() < 1e-6);
        assert!(g.rotation.w.abs() < 1e-6);
        assert!((g.radius() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_zero_quaternion_decodes_to_identity() {
        let g = Gaussian::from_record(&[0.0; 3], &[0.0; 3], 1.0, &[1.0; 3], &[0.0; 4]);
        assert_eq!(g.rotation, Quat::IDENTITY);
    }

    #[test]
    fn test_cloud_from_buffers() {
        let buffers = decompose(&raw_with_opacities(&[0.5, 0.9])).unwrap();
        let cloud = GaussianCloud::from_buffers(&buffers).unwrap();
        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud.gaussians()[1].position.x, 1.0);
        assert_eq!(cloud.gaussians()[1].opacity, 0.9);
        assert!((cloud.gaussians()[0].rotation.w - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_filtered_drops_transparent_and_caps() {
        let buffers = decompose(&raw_with_opacities(&[0.005, 0.4, 0.9, 0.6])).unwrap();
        let cloud = GaussianCloud::from_buffers(&buffers).unwrap();

        let visible = cloud.filtered(0.01, 0);
        assert_eq!(visible.len(), 3);

        let capped = cloud.filtered(0.01, 2);
        let opacities: Vec<f32> = capped.gaussians().iter().map(|g| g.opacity).collect();
        assert_eq!(opacities, vec![0.9, 0.6]);
    }
}
