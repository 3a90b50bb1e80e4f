//! Parameterized layers and the [`Module`] trait.

use ndarray::{ArrayD, IxDyn};
use rand::Rng;
use sharp_graph::{GraphError, Op, Tracer, Var};
use std::fmt;
use std::sync::Arc;

/// A named weight tensor owned by a layer.
#[derive(Debug, Clone)]
pub struct Parameter {
    name: String,
    value: Arc<ArrayD<f32>>,
}

/// A checkpoint tensor whose shape disagrees with the parameter it names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeMismatch {
    pub name: String,
    pub expected: Vec<usize>,
    pub actual: Vec<usize>,
}

impl fmt::Display for ShapeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: expected {:?}, got {:?}",
            self.name, self.expected, self.actual
        )
    }
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: ArrayD<f32>) -> Self {
        Self {
            name: name.into(),
            value: Arc::new(value),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[usize] {
        self.value.shape()
    }

    pub fn value(&self) -> &Arc<ArrayD<f32>> {
        &self.value
    }

    /// Replace the stored tensor. The shape is fixed at construction.
    pub fn assign(&mut self, value: ArrayD<f32>) -> Result<(), ShapeMismatch> {
        if value.shape() != self.shape() {
            return Err(ShapeMismatch {
                name: self.name.clone(),
                expected: self.shape().to_vec(),
                actual: value.shape().to_vec(),
            });
        }
        self.value = Arc::new(value);
        Ok(())
    }

    /// Register this parameter with the tracer as a named constant.
    pub fn var(&self, tracer: &mut Tracer) -> Var {
        tracer.constant(&self.name, &self.value)
    }
}

/// A network component whose forward pass runs through a [`Tracer`].
pub trait Module {
    fn forward(&self, tracer: &mut Tracer, input: &Var) -> Result<Var, GraphError>;

    /// Parameters in a stable order.
    fn parameters(&self) -> Vec<&Parameter>;

    fn parameters_mut(&mut self) -> Vec<&mut Parameter>;

    /// Switch between training and inference behavior. Stateless layers ignore this.
    fn set_training(&mut self, _training: bool) {}

    fn is_training(&self) -> bool {
        false
    }

    fn parameter_count(&self) -> usize {
        self.parameters().iter().map(|p| p.value.len()).sum()
    }
}

/// Uniform `(-1/sqrt(fan_in), 1/sqrt(fan_in))` initialization.
fn init_uniform(shape: &[usize], fan_in: usize, rng: &mut impl Rng) -> ArrayD<f32> {
    let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
    ArrayD::from_shape_simple_fn(IxDyn(shape), || rng.gen_range(-bound..bound))
}

/// 2D convolution with a square kernel.
#[derive(Debug, Clone)]
pub struct Conv2d {
    weight: Parameter,
    bias: Parameter,
    stride: usize,
    padding: usize,
}

impl Conv2d {
    pub fn new(
        prefix: &str,
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
        rng: &mut impl Rng,
    ) -> Self {
        let fan_in = in_channels * kernel_size * kernel_size;
        let weight = init_uniform(
            &[out_channels, in_channels, kernel_size, kernel_size],
            fan_in,
            rng,
        );
        let bias = init_uniform(&[out_channels], fan_in, rng);
        Self {
            weight: Parameter::new(format!("{prefix}.weight"), weight),
            bias: Parameter::new(format!("{prefix}.bias"), bias),
            stride,
            padding,
        }
    }

    pub fn out_channels(&self) -> usize {
        self.weight.shape()[0]
    }
}

impl Module for Conv2d {
    fn forward(&self, tracer: &mut Tracer, input: &Var) -> Result<Var, GraphError> {
        let weight = self.weight.var(tracer);
        let bias = self.bias.var(tracer);
        tracer.apply(
            Op::Conv2d {
                stride: self.stride,
                padding: self.padding,
            },
            &[input, &weight, &bias],
        )
    }

    fn parameters(&self) -> Vec<&Parameter> {
        vec![&self.weight, &self.bias]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.weight, &mut self.bias]
    }
}

/// Fully connected layer, `y = x W^T + b`.
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Parameter,
    bias: Parameter,
}

impl Linear {
    pub fn new(prefix: &str, in_features: usize, out_features: usize, rng: &mut impl Rng) -> Self {
        let weight = init_uniform(&[out_features, in_features], in_features, rng);
        let bias = init_uniform(&[out_features], in_features, rng);
        Self {
            weight: Parameter::new(format!("{prefix}.weight"), weight),
            bias: Parameter::new(format!("{prefix}.bias"), bias),
        }
    }

    pub fn out_features(&self) -> usize {
        self.weight.shape()[0]
    }
}

impl Module for Linear {
    fn forward(&self, tracer: &mut Tracer, input: &Var) -> Result<Var, GraphError> {
        let weight = self.weight.var(tracer);
        let bias = self.bias.var(tracer);
        tracer.apply(Op::Linear, &[input, &weight, &bias])
    }

    fn parameters(&self) -> Vec<&Parameter> {
        vec![&self.weight, &self.bias]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.weight, &mut self.bias]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_assign_keeps_shape_fixed() {
        let mut p = Parameter::new("w", ArrayD::zeros(IxDyn(&[2, 3])));
        let err = p.assign(ArrayD::zeros(IxDyn(&[3, 2]))).unwrap_err();
        assert_eq!(err.expected, vec![2, 3]);
        assert_eq!(err.actual, vec![3, 2]);

        p.assign(ArrayD::from_elem(IxDyn(&[2, 3]), 1.5)).unwrap();
        assert!(p.value().iter().all(|&v| v == 1.5));
    }

    #[test]
    fn test_init_is_seeded_and_bounded() {
        let a = Linear::new("fc", 16, 4, &mut StdRng::seed_from_u64(7));
        let b = Linear::new("fc", 16, 4, &mut StdRng::seed_from_u64(7));
        assert_eq!(a.weight.value(), b.weight.value());
        assert!(a.weight.value().iter().all(|v| v.abs() <= 0.25));
        assert_eq!(a.parameters()[0].name(), "fc.weight");
        assert_eq!(a.parameter_count(), 16 * 4 + 4);
    }

    #[test]
    fn test_conv_forward_shape() {
        let conv = Conv2d::new("c", 3, 5, 3, 1, 1, &mut StdRng::seed_from_u64(0));
        let mut tracer = Tracer::eager();
        let x = tracer.input("x", ArrayD::zeros(IxDyn(&[1, 3, 6, 4])));
        let y = conv.forward(&mut tracer, &x).unwrap();
        assert_eq!(y.shape(), &[1, 5, 6, 4]);
        assert_eq!(conv.out_channels(), 5);
    }
}
