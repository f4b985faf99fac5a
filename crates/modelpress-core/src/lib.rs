//! Modelpress Core - Convert trained model files into a compact on-device format.
//!
//! A conversion reads a SafeTensors checkpoint, re-encodes its weights with
//! post-training quantization and writes a single self-contained GGUF file
//! that an on-device runtime can load. The destination is replaced atomically:
//! it either holds the complete converted model or is left untouched.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::path::Path;
//!
//! fn main() -> modelpress_core::Result<()> {
//!     let report = modelpress_core::convert(
//!         Path::new("assets/ml_models/orange_classifier_cnn_improved.safetensors"),
//!         Path::new("assets/ml_models/orange_model.gguf"),
//!     )?;
//!     println!("Converted model size: {} bytes", report.dest_bytes);
//!     Ok(())
//! }
//! ```

pub mod atomic;
pub mod config;
pub mod converter;
pub mod error;
pub mod format;
pub mod gguf;
pub mod hashing;
pub mod loader;
pub mod model;
pub mod optimizer;
pub mod quantize;
pub mod types;

// Re-export commonly used types
pub use config::{FormatConfig, PathsConfig, QuantizationConfig};
pub use converter::{ModelConverter, ModelConverterBuilder};
pub use error::{ErrorKind, IoResultExt, PressError, Result};
pub use format::{detect_format, identify_file, FileFormat};
pub use gguf::{
    GgmlType, GgufFileType, GgufHeader, GgufReader, GgufWriter, MetadataValue, TensorEntry,
    TensorInfo,
};
pub use loader::{parse_safetensors, ModelLoader, SafetensorsLoader};
pub use model::{ModelHandle, SourceDType, SourceTensor};
pub use optimizer::{
    GgufOptimizer, ModelOptimizer, OptimizationMode, OptimizedModel, TensorPlan,
};
pub use types::{
    format_megabytes, sidecar_path, ConversionPhase, ConversionReport, ConversionSidecar,
};

use std::path::Path;

/// Convert `source` into `dest` with the default loader and Q8_0 optimization.
///
/// Shorthand for `ModelConverter::new().convert(source, dest)`.
pub fn convert(source: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<ConversionReport> {
    ModelConverter::new().convert(source.as_ref(), dest.as_ref())
}
