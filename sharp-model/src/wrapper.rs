//! Inference wrapper.
//!
//! Presents a loaded network as `image -> (positions, colors, opacities, scales, rotations)`.
//! The raw `(1, N, 14)` record is split at the fixed layout offsets and the batch axis is
//! dropped, so each output is `(N, width)`.

use crate::architecture::SharpNet;
use crate::error::InferenceError;
use crate::layers::Module;
use ndarray::ArrayD;
use sharp_data::{GaussianBuffers, GaussianField, check_raw_shape};
use sharp_graph::{Op, Program, Tracer, Var};
use std::cell::Cell;
use std::collections::HashMap;
use tracing::debug;

/// Name of the single program input.
pub const IMAGE_INPUT: &str = "image";

/// Check that `shape` is `(1, 3, H, W)` with non-empty spatial dims.
pub fn check_image_shape(shape: &[usize]) -> Result<(), InferenceError> {
    match shape {
        [1, 3, h, w] if *h > 0 && *w > 0 => Ok(()),
        _ => Err(InferenceError::ImageShape(shape.to_vec())),
    }
}

#[derive(Debug)]
pub struct InferenceWrapper<M = SharpNet> {
    model: M,
    forward_passes: Cell<usize>,
}

impl<M: Module> InferenceWrapper<M> {
    /// Wrap `model`, switching it to inference mode.
    pub fn new(mut model: M) -> Self {
        model.set_training(false);
        Self {
            model,
            forward_passes: Cell::new(0),
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_inner(self) -> M {
        self.model
    }

    /// Number of forward passes run so far, eager or recorded.
    pub fn forward_passes(&self) -> usize {
        self.forward_passes.get()
    }

    /// Run one forward pass through `tracer`. Outputs come back in record order.
    pub fn forward(
        &self,
        tracer: &mut Tracer,
        image: ArrayD<f32>,
    ) -> Result<Vec<(GaussianField, Var)>, InferenceError> {
        check_image_shape(image.shape())?;
        self.forward_passes.set(self.forward_passes.get() + 1);

        let image = tracer.input(IMAGE_INPUT, image);
        let raw = self.model.forward(tracer, &image)?;
        check_raw_shape(raw.shape())?;

        let mut outputs = Vec::with_capacity(GaussianField::ALL.len());
        for field in GaussianField::ALL {
            let range = field.range();
            let part = tracer.apply(
                Op::Slice {
                    axis: 2,
                    start: range.start,
                    end: range.end,
                },
                &[&raw],
            )?;
            let part = tracer.apply(Op::Squeeze { axis: 0 }, &[&part])?;
            outputs.push((field, part));
        }
        debug!(
            "Forward pass {}: {} Gaussians",
            self.forward_passes.get(),
            raw.shape()[1]
        );
        Ok(outputs)
    }

    /// Eager prediction.
    pub fn predict(&self, image: &ArrayD<f32>) -> Result<GaussianBuffers, InferenceError> {
        let mut tracer = Tracer::eager();
        let outputs = self.forward(&mut tracer, image.clone())?;
        collect_buffers(outputs)
    }

    /// Record one forward pass over `example` into a program with outputs named after the
    /// Gaussian fields. Also returns the outputs computed during the pass.
    pub fn trace(&self, example: &ArrayD<f32>) -> Result<(Program, GaussianBuffers), InferenceError> {
        let mut tracer = Tracer::recording();
        let outputs = self.forward(&mut tracer, example.clone())?;
        let named: Vec<(&str, &Var)> = outputs
            .iter()
            .map(|(field, var)| (field.output_name(), var))
            .collect();
        let program = tracer.finish(&named)?;
        Ok((program, collect_buffers(outputs)?))
    }
}

fn collect_buffers(outputs: Vec<(GaussianField, Var)>) -> Result<GaussianBuffers, InferenceError> {
    let mut by_field: HashMap<GaussianField, ArrayD<f32>> = outputs
        .into_iter()
        .map(|(field, var)| (field, var.into_value()))
        .collect();
    GaussianBuffers::try_from_fn(|field| {
        by_field
            .remove(&field)
            .ok_or(InferenceError::MissingOutput(field.output_name()))
    })
}
