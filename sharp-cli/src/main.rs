//! SHARP Converter
//!
//! Converts a SHARP checkpoint into a deployable tensor-program artifact and checks the
//! artifact against the original model.

mod app;

use app::{AppBuilder, LoggingConfig, print_error};
use clap::Parser;
use sharp_convert::{ComputeUnits, ConversionConfig, InputSource, ValidationConfig};
use std::path::PathBuf;

/// Convert a SHARP checkpoint into a tensor-program artifact
#[derive(Parser, Debug)]
#[command(name = "sharp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the checkpoint (safetensors)
    #[arg(short, long)]
    input: PathBuf,

    /// Destination artifact path
    #[arg(short, long)]
    output: PathBuf,

    /// Input image width
    #[arg(long, default_value_t = 512)]
    width: usize,

    /// Input image height
    #[arg(long, default_value_t = 512)]
    height: usize,

    /// Compute units the artifact may run on
    #[arg(long, value_enum, default_value_t = ComputeUnits::All)]
    compute_units: ComputeUnits,

    /// Quantize weights to int8 after tracing
    #[arg(long)]
    quantize: bool,

    /// Skip comparing the artifact against the model
    #[arg(long)]
    skip_validation: bool,

    /// Largest absolute difference accepted by validation
    #[arg(long, default_value_t = 1e-3)]
    tolerance: f32,

    /// Trace with this image instead of random noise
    #[arg(long)]
    sample_image: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn conversion(&self) -> ConversionConfig {
        let input = match &self.sample_image {
            Some(path) => InputSource::Image(path.clone()),
            None => InputSource::default(),
        };
        ConversionConfig::new()
            .with_resolution(self.width, self.height)
            .with_compute_units(self.compute_units)
            .with_quantization(self.quantize)
            .with_input(input)
    }

    fn validation(&self) -> Option<ValidationConfig> {
        (!self.skip_validation).then(|| ValidationConfig::default().with_tolerance(self.tolerance))
    }
}

fn main() {
    let args = Args::parse();

    LoggingConfig {
        level: args.log_level.clone(),
    }
    .init();

    let result = AppBuilder::new()
        .with_input(&args.input)
        .with_output(&args.output)
        .with_conversion(args.conversion())
        .with_validation(args.validation())
        .run();

    if let Err(e) = result {
        print_error(&e);
        std::process::exit(1);
    }
}
