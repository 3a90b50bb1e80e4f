//! Representative images for tracing and validation.

use crate::config::InputSource;
use image::imageops::FilterType;
use ndarray::{Array4, ArrayD};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("failed to read sample image {}", .path.display())]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("image size must be positive, got {width}x{height}")]
    EmptySize { width: usize, height: usize },
}

/// A `(1, 3, H, W)` tensor of uniform noise in [0, 1).
pub fn random_image(height: usize, width: usize, seed: Option<u64>) -> ArrayD<f32> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    Array4::from_shape_simple_fn((1, 3, height, width), || rng.r#gen::<f32>()).into_dyn()
}

/// Read an image file as a `(1, 3, H, W)` tensor scaled to [0, 1].
pub fn load_image(path: &Path, height: usize, width: usize) -> Result<ArrayD<f32>, InputError> {
    let to_error = |source| InputError::Image {
        path: path.to_path_buf(),
        source,
    };
    let img = image::open(path).map_err(to_error)?;
    debug!(
        "Loaded sample image {} ({}x{})",
        path.display(),
        img.width(),
        img.height()
    );
    let rgb = img
        .resize_exact(width as u32, height as u32, FilterType::Triangle)
        .to_rgb8();

    let mut tensor = Array4::<f32>::zeros((1, 3, height, width));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
    }
    Ok(tensor.into_dyn())
}

impl InputSource {
    /// Produce the `(1, 3, height, width)` input this source describes.
    pub fn build(&self, height: usize, width: usize) -> Result<ArrayD<f32>, InputError> {
        if height == 0 || width == 0 {
            return Err(InputError::EmptySize { width, height });
        }
        match self {
            InputSource::Random { seed } => Ok(random_image(height, width, *seed)),
            InputSource::Image(path) => load_image(path, height, width),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_random_image_shape_and_range() {
        let img = random_image(4, 6, Some(1));
        assert_eq!(img.shape(), &[1, 3, 4, 6]);
        assert!(img.iter().all(|v| (0.0..1.0).contains(v)));
        assert_eq!(img, random_image(4, 6, Some(1)));
        assert_ne!(img, random_image(4, 6, Some(2)));
    }

    #[test]
    fn test_load_image_is_chw_in_unit_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.png");
        RgbImage::from_pixel(8, 4, Rgb([255, 0, 51])).save(&path).unwrap();

        let tensor = InputSource::Image(path).build(2, 4).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 2, 4]);
        assert!((tensor[[0, 0, 1, 3]] - 1.0).abs() < 0.01);
        assert_eq!(tensor[[0, 1, 0, 0]], 0.0);
        assert!((tensor[[0, 2, 0, 2]] - 0.2).abs() < 0.01);
    }

    #[test]
    fn test_missing_image_and_empty_size() {
        let missing = InputSource::Image(PathBuf::from("/definitely/not/here.png"));
        assert!(matches!(missing.build(4, 4), Err(InputError::Image { .. })));
        assert!(matches!(
            InputSource::default().build(0, 4),
            Err(InputError::EmptySize { .. })
        ));
    }
}
