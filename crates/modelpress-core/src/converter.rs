//! The conversion pipeline: validate, load, optimize, verify, write, report.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::atomic::{atomic_write_bytes, atomic_write_json};
use crate::config::PathsConfig;
use crate::error::{IoResultExt, PressError, Result};
use crate::format::FileFormat;
use crate::gguf::GgufReader;
use crate::hashing::{sha256_bytes, sha256_file};
use crate::loader::{ModelLoader, SafetensorsLoader};
use crate::model::ModelHandle;
use crate::optimizer::{GgufOptimizer, ModelOptimizer, OptimizationMode, OptimizedModel};
use crate::types::{
    format_megabytes, sidecar_path, ConversionPhase, ConversionReport, ConversionSidecar,
};

/// Converts one source model file into one optimized GGUF file.
///
/// # Example
///
/// ```rust,ignore
/// use modelpress_core::{ModelConverter, OptimizationMode};
/// use std::path::Path;
///
/// let converter = ModelConverter::builder()
///     .mode(OptimizationMode::Default)
///     .verify(true)
///     .build();
/// let report = converter.convert(
///     Path::new("model.safetensors"),
///     Path::new("model.gguf"),
/// )?;
/// println!("{} -> {} bytes", report.source_bytes, report.dest_bytes);
/// ```
pub struct ModelConverter {
    loader: Box<dyn ModelLoader>,
    optimizer: Box<dyn ModelOptimizer>,
    verify: bool,
    write_sidecar: bool,
}

impl Default for ModelConverter {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ModelConverter {
    /// Converter with the SafeTensors loader and default Q8_0 optimization.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> ModelConverterBuilder {
        ModelConverterBuilder::new()
    }

    pub fn mode(&self) -> OptimizationMode {
        self.optimizer.mode()
    }

    /// Convert `source` into `dest`, replacing `dest` if it exists.
    ///
    /// # Preconditions
    /// - `source` is an existing model file readable by the configured loader.
    /// - The parent directory of `dest` exists.
    ///
    /// # Postconditions
    /// - On success `dest` holds the complete converted model.
    /// - On failure `dest` is untouched.
    pub fn convert(&self, source: &Path, dest: &Path) -> Result<ConversionReport> {
        self.enter(ConversionPhase::Validating);
        validate_paths(source, dest)?;

        self.enter(ConversionPhase::Loading);
        info!("Loading model from {}", source.display());
        let model = self.loader.load(source)?;
        let source_bytes = std::fs::metadata(source).with_path(source)?.len();
        info!(
            "Loaded '{}' with {} tensors ({} parameters)",
            model.name,
            model.tensors.len(),
            model.parameter_count()
        );

        self.enter(ConversionPhase::Optimizing);
        info!(
            "Converting model with {} optimization via {}",
            self.optimizer.mode(),
            self.optimizer.name()
        );
        let optimized = self.optimizer.optimize(&model)?;

        if self.verify {
            self.enter(ConversionPhase::Verifying);
            verify_output(&model, &optimized)?;
            info!("Verified {} tensors in converted output", optimized.tensors.len());
        }

        self.enter(ConversionPhase::Writing);
        atomic_write_bytes(dest, &optimized.bytes)?;
        let dest_bytes = std::fs::metadata(dest).with_path(dest)?.len();

        let report = ConversionReport {
            source_path: source.to_path_buf(),
            dest_path: dest.to_path_buf(),
            source_format: FileFormat::Safetensors.to_string(),
            target_format: FileFormat::Gguf.to_string(),
            mode: optimized.mode,
            source_bytes,
            dest_bytes,
            tensors_total: optimized.tensors.len(),
            tensors_reduced: optimized.reduced_count(),
            parameter_count: model.parameter_count(),
            source_sha256: sha256_file(source)?,
            output_sha256: sha256_bytes(&optimized.bytes),
            verified: self.verify,
        };

        if self.write_sidecar {
            let path = sidecar_path(dest);
            let sidecar = ConversionSidecar {
                report: report.clone(),
                tensors: optimized.tensors.clone(),
                conversion_tool: PathsConfig::TOOL_NAME.to_string(),
                conversion_version: env!("CARGO_PKG_VERSION").to_string(),
                conversion_date: chrono::Utc::now().to_rfc3339(),
            };
            atomic_write_json(&path, &sidecar)?;
            debug!("Wrote sidecar metadata: {}", path.display());
        }

        self.enter(ConversionPhase::Completed);
        info!("Converted model saved to {}", dest.display());
        debug!("Original model size: {}", format_megabytes(report.source_bytes));
        debug!("Converted model size: {}", format_megabytes(report.dest_bytes));
        info!(
            "{} of {} tensors stored at reduced precision, size ratio {:.3}",
            report.tensors_reduced,
            report.tensors_total,
            report.size_ratio()
        );
        if report.dest_bytes > report.source_bytes {
            warn!(
                "Converted model is larger than the source ({} > {} bytes)",
                report.dest_bytes, report.source_bytes
            );
        }

        Ok(report)
    }

    fn enter(&self, phase: ConversionPhase) {
        debug!("Conversion phase: {}", phase);
    }
}

/// Reject argument combinations that can never succeed, before anything is read or written.
fn validate_paths(source: &Path, dest: &Path) -> Result<()> {
    if !source.exists() {
        return Err(PressError::NotFound(source.to_path_buf()));
    }

    if dest.is_dir() {
        return Err(PressError::Validation {
            field: "dest".to_string(),
            message: format!("{} is a directory", dest.display()),
        });
    }

    if dest.exists() {
        let same = match (source.canonicalize(), dest.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        if same {
            return Err(PressError::Validation {
                field: "dest".to_string(),
                message: format!("{} would overwrite the source model", dest.display()),
            });
        }
    }

    Ok(())
}

/// Parse the produced bytes and check they describe the loaded model.
fn verify_output(model: &ModelHandle, optimized: &OptimizedModel) -> Result<()> {
    let fail = |message: String| PressError::conversion(format!("verification failed: {message}"));

    let reader = GgufReader::new(&optimized.bytes).map_err(|e| fail(e.to_string()))?;
    let stored = reader.tensors();
    if stored.len() != model.tensors.len() {
        return Err(fail(format!(
            "output holds {} tensors, model has {}",
            stored.len(),
            model.tensors.len()
        )));
    }

    for (plan, info) in optimized.tensors.iter().zip(stored) {
        if plan.name != info.name || plan.shape != info.shape || plan.target != info.dtype {
            return Err(fail(format!(
                "tensor '{}' {:?} {} was stored as '{}' {:?} {}",
                plan.name, plan.shape, plan.target, info.name, info.shape, info.dtype
            )));
        }
        if model.tensor(&info.name).is_none() {
            return Err(fail(format!("unexpected tensor '{}'", info.name)));
        }
    }

    Ok(())
}

/// Builder for configuring a [`ModelConverter`].
pub struct ModelConverterBuilder {
    loader: Option<Box<dyn ModelLoader>>,
    optimizer: Option<Box<dyn ModelOptimizer>>,
    mode: OptimizationMode,
    verify: bool,
    write_sidecar: bool,
}

impl Default for ModelConverterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelConverterBuilder {
    pub fn new() -> Self {
        Self {
            loader: None,
            optimizer: None,
            mode: OptimizationMode::Default,
            verify: false,
            write_sidecar: false,
        }
    }

    /// Optimization mode for the built-in GGUF optimizer.
    ///
    /// Ignored when a custom optimizer is supplied.
    ///
    /// Default: [`OptimizationMode::Default`]
    pub fn mode(mut self, mode: OptimizationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Parse the output back before writing it.
    ///
    /// Default: `false`
    pub fn verify(mut self, enable: bool) -> Self {
        self.verify = enable;
        self
    }

    /// Write `<dest>.meta.json` with conversion provenance.
    ///
    /// Default: `false`
    pub fn with_sidecar(mut self, enable: bool) -> Self {
        self.write_sidecar = enable;
        self
    }

    /// Replace the SafeTensors loader.
    pub fn with_loader(mut self, loader: impl ModelLoader + 'static) -> Self {
        self.loader = Some(Box::new(loader));
        self
    }

    /// Replace the GGUF optimizer.
    pub fn with_optimizer(mut self, optimizer: impl ModelOptimizer + 'static) -> Self {
        self.optimizer = Some(Box::new(optimizer));
        self
    }

    pub fn build(self) -> ModelConverter {
        ModelConverter {
            loader: self
                .loader
                .unwrap_or_else(|| Box::new(SafetensorsLoader::new())),
            optimizer: self
                .optimizer
                .unwrap_or_else(|| Box::new(GgufOptimizer::new(self.mode))),
            verify: self.verify,
            write_sidecar: self.write_sidecar,
        }
    }
}
