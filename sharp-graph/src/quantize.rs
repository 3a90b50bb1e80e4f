//! Weight-only int8 quantization of program constants.
//!
//! Quantization runs on a finished [`Program`], after tracing, so the recorded ops are
//! untouched and only the stored weights lose precision. Each weight is quantized
//! symmetrically with one scale per slice along its first axis (per output channel).

use crate::GraphError;
use crate::program::{ConstantData, Program};
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Largest magnitude of a symmetric int8 code.
const QMAX: f32 = 127.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizationConfig {
    /// Constants with fewer elements than this stay in f32.
    pub min_elements: usize,
}

impl Default for QuantizationConfig {
    fn default() -> Self {
        Self { min_elements: 2048 }
    }
}

/// A per-channel symmetric int8 tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedTensor {
    shape: Vec<usize>,
    values: Vec<i8>,
    scales: Vec<f32>,
}

impl QuantizedTensor {
    pub fn quantize(tensor: &ArrayD<f32>) -> Self {
        let shape = tensor.shape().to_vec();
        let channels = shape.first().copied().unwrap_or(1).max(1);
        let data: Vec<f32> = tensor.iter().copied().collect();
        let per_channel = if data.is_empty() { 0 } else { data.len() / channels };

        let mut values = Vec::with_capacity(data.len());
        let mut scales = Vec::with_capacity(channels);
        for chunk in data.chunks(per_channel.max(1)) {
            let max_abs = chunk.iter().fold(0.0f32, |m, v| m.max(v.abs()));
            let scale = if max_abs > 0.0 { max_abs / QMAX } else { 1.0 };
            scales.push(scale);
            values.extend(
                chunk
                    .iter()
                    .map(|v| (v / scale).round().clamp(-QMAX, QMAX) as i8),
            );
        }
        scales.resize(channels, 1.0);

        Self {
            shape,
            values,
            scales,
        }
    }

    /// Rebuild from stored parts, checking that they agree.
    pub fn from_parts(
        name: &str,
        shape: Vec<usize>,
        values: Vec<i8>,
        scales: Vec<f32>,
    ) -> Result<Self, GraphError> {
        let expected: usize = shape.iter().product();
        let channels = shape.first().copied().unwrap_or(1).max(1);
        if values.len() != expected {
            return Err(GraphError::Quantization {
                name: name.to_string(),
                reason: format!("{} codes for shape {:?}", values.len(), shape),
            });
        }
        if scales.len() != channels {
            return Err(GraphError::Quantization {
                name: name.to_string(),
                reason: format!("{} scales for {} channels", scales.len(), channels),
            });
        }
        if scales.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(GraphError::Quantization {
                name: name.to_string(),
                reason: "scales must be finite and positive".to_string(),
            });
        }
        Ok(Self {
            shape,
            values,
            scales,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn values(&self) -> &[i8] {
        &self.values
    }

    pub fn scales(&self) -> &[f32] {
        &self.scales
    }

    pub fn byte_size(&self) -> usize {
        self.values.len() + self.scales.len() * std::mem::size_of::<f32>()
    }

    pub fn dequantize(&self) -> ArrayD<f32> {
        let per_channel = (self.values.len() / self.scales.len().max(1)).max(1);
        let data: Vec<f32> = self
            .values
            .iter()
            .enumerate()
            .map(|(i, &q)| q as f32 * self.scales[(i / per_channel).min(self.scales.len() - 1)])
            .collect();
        ArrayD::from_shape_vec(IxDyn(&self.shape), data)
            .unwrap_or_else(|_| ArrayD::zeros(IxDyn(&self.shape)))
    }
}

/// What [`quantize_weights`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizationSummary {
    pub quantized: usize,
    pub skipped: usize,
    pub bytes_before: usize,
    pub bytes_after: usize,
}

/// Replace eligible f32 weights of `program` with int8 codes.
///
/// Eligible constants have rank >= 2, at least `min_elements` entries, and only finite
/// values. Biases and other vectors stay in f32.
pub fn quantize_weights(program: &mut Program, config: &QuantizationConfig) -> QuantizationSummary {
    let mut summary = QuantizationSummary {
        bytes_before: program.weight_bytes(),
        ..Default::default()
    };

    for constant in program.constants_mut().values_mut() {
        let ConstantData::Float32(tensor) = &constant.data else {
            continue;
        };
        let eligible = tensor.ndim() >= 2
            && tensor.len() >= config.min_elements
            && tensor.iter().all(|v| v.is_finite());
        if !eligible {
            summary.skipped += 1;
            continue;
        }

        let q = QuantizedTensor::quantize(tensor);
        debug!(
            "Quantized '{}' {:?}: {} -> {} bytes",
            constant.name,
            q.shape(),
            constant.data.byte_size(),
            q.byte_size()
        );
        constant.data = ConstantData::Int8(q);
        summary.quantized += 1;
    }

    summary.bytes_after = program.weight_bytes();
    info!(
        "Weight quantization: {} tensors to int8, {} kept in f32, {} -> {} bytes",
        summary.quantized, summary.skipped, summary.bytes_before, summary.bytes_after
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Op;
    use crate::program::GraphBuilder;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn ramp(shape: &[usize]) -> ArrayD<f32> {
        let n: usize = shape.iter().product();
        ArrayD::from_shape_vec(
            IxDyn(shape),
            (0..n).map(|i| (i as f32 - n as f32 / 2.0) * 0.013).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_round_trip_error_is_bounded_by_half_step() {
        let t = ramp(&[4, 16]);
        let q = QuantizedTensor::quantize(&t);
        assert_eq!(q.scales().len(), 4);

        let back = q.dequantize();
        assert_eq!(back.shape(), t.shape());
        for (row, (a, b)) in t
            .iter()
            .zip(back.iter())
            .enumerate()
            .map(|(i, p)| (i / 16, p))
        {
            assert!((a - b).abs() <= q.scales()[row] * 0.5 + f32::EPSILON);
        }
    }

    #[test]
    fn test_zero_channel_keeps_unit_scale() {
        let t = ArrayD::<f32>::zeros(IxDyn(&[2, 3]));
        let q = QuantizedTensor::quantize(&t);
        assert_eq!(q.scales(), &[1.0, 1.0]);
        assert!(q.dequantize().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_from_parts_validates_lengths() {
        assert!(QuantizedTensor::from_parts("w", vec![2, 2], vec![0; 3], vec![1.0, 1.0]).is_err());
        assert!(QuantizedTensor::from_parts("w", vec![2, 2], vec![0; 4], vec![1.0]).is_err());
        assert!(QuantizedTensor::from_parts("w", vec![2, 2], vec![0; 4], vec![1.0, 0.0]).is_err());
        assert!(QuantizedTensor::from_parts("w", vec![2, 2], vec![0; 4], vec![1.0, 2.0]).is_ok());
    }

    #[test]
    fn test_quantize_weights_skips_biases_and_small_tensors() {
        let mut b = GraphBuilder::new();
        let x = b.add_input("x");
        let w = b.add_constant("w", Arc::new(ramp(&[8, 4])));
        let bias = b.add_constant("b", Arc::new(ArrayD::zeros(IxDyn(&[8]))));
        let y = b.add_node(Op::Linear, vec![x, w, bias]);
        b.mark_output("y", y);
        let mut program = b.build().unwrap();

        let summary = quantize_weights(&mut program, &QuantizationConfig { min_elements: 16 });
        assert_eq!(summary.quantized, 1);
        assert_eq!(summary.skipped, 1);
        assert!(summary.bytes_after < summary.bytes_before);

        let input = ArrayD::from_elem(IxDyn(&[1, 4]), 1.0);
        let out = program
            .run(&HashMap::from([("x".to_string(), input)]))
            .unwrap();
        assert_eq!(out["y"].shape(), &[1, 8]);
        assert!(out["y"].iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_non_finite_weights_stay_f32() {
        let mut t = ramp(&[4, 4]);
        t[IxDyn(&[0, 0])] = f32::NAN;
        let mut b = GraphBuilder::new();
        let x = b.add_input("x");
        let w = b.add_constant("w", Arc::new(t));
        let bias = b.add_constant("b", Arc::new(ArrayD::zeros(IxDyn(&[4]))));
        let y = b.add_node(Op::Linear, vec![x, w, bias]);
        b.mark_output("y", y);
        let mut program = b.build().unwrap();

        let summary = quantize_weights(&mut program, &QuantizationConfig { min_elements: 0 });
        assert_eq!(summary.quantized, 0);
    }
}
