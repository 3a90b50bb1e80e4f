//! Sharp Data Crate
//!
//! The Gaussian parameter layout shared by every stage of the SHARP conversion pipeline,
//! plus CPU-side primitive types decoded from model outputs.
//! This crate knows nothing about models or artifacts.

pub mod layout;
pub mod types;

pub use layout::{
    GaussianBuffers, GaussianField, LAYOUT_VERSION, LayoutError, PARAMS_PER_GAUSSIAN, check_raw_shape,
    decompose,
};
pub use types::{Gaussian, GaussianCloud};
