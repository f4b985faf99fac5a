//! Model loading from SafeTensors checkpoints.
//!
//! [`ModelLoader`] is the narrow capability the converter needs from an input
//! format: turn a path into a [`ModelHandle`]. [`SafetensorsLoader`] is the
//! implementation shipped with this crate.

use std::path::Path;

use safetensors::{Dtype, SafeTensors};
use tracing::debug;

use crate::error::{IoResultExt, PressError, Result};
use crate::format::{detect_format, FileFormat};
use crate::model::{ModelHandle, SourceDType, SourceTensor};

/// Loads a serialized model into memory.
pub trait ModelLoader {
    /// Human-readable loader name.
    fn name(&self) -> &str;

    /// Load the model at `path`.
    ///
    /// Fails with [`PressError::NotFound`] when the file does not exist and
    /// [`PressError::InvalidFormat`] when it cannot be parsed.
    fn load(&self, path: &Path) -> Result<ModelHandle>;
}

/// Reads `.safetensors` checkpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetensorsLoader;

impl SafetensorsLoader {
    pub fn new() -> Self {
        Self
    }
}

impl ModelLoader for SafetensorsLoader {
    fn name(&self) -> &str {
        "safetensors"
    }

    fn load(&self, path: &Path) -> Result<ModelHandle> {
        if !path.exists() {
            return Err(PressError::NotFound(path.to_path_buf()));
        }
        if path.is_dir() {
            return Err(PressError::invalid_format(
                "safetensors",
                path,
                format!("{} is a directory, expected a model file", path.display()),
            ));
        }

        let bytes = std::fs::read(path).with_path(path)?;
        debug!("Read {} bytes from {}", bytes.len(), path.display());

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_string());

        // Parse first; sniffing only words the error for files of another format.
        parse_safetensors(&bytes, &name).map_err(|e| match e {
            PressError::InvalidFormat { format, message, .. } => {
                let extension = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(str::to_ascii_lowercase)
                    .unwrap_or_default();
                let detected = detect_format(&bytes[..bytes.len().min(64)], &extension);
                let message = match detected {
                    FileFormat::Safetensors | FileFormat::Unknown => {
                        format!("{}: {}", path.display(), message)
                    }
                    other => format!(
                        "{} looks like a {} file, expected a SafeTensors checkpoint",
                        path.display(),
                        other
                    ),
                };
                PressError::InvalidFormat {
                    format,
                    message,
                    path: Some(path.to_path_buf()),
                }
            }
            other => other,
        })
    }
}

/// Parse an in-memory SafeTensors buffer into a [`ModelHandle`].
pub fn parse_safetensors(bytes: &[u8], name: &str) -> Result<ModelHandle> {
    let invalid = |message: String| PressError::InvalidFormat {
        format: "safetensors".to_string(),
        message,
        path: None,
    };

    let (_, header) =
        SafeTensors::read_metadata(bytes).map_err(|e| invalid(format!("bad header: {e:?}")))?;
    let tensors =
        SafeTensors::deserialize(bytes).map_err(|e| invalid(format!("bad tensor data: {e:?}")))?;

    let mut model = ModelHandle::new(name);
    if let Some(metadata) = header.metadata() {
        model.metadata = metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
    }

    for (tensor_name, view) in tensors.tensors() {
        let dtype = map_dtype(view.dtype()).ok_or_else(|| PressError::UnsupportedTensor {
            name: tensor_name.clone(),
            reason: format!("dtype {:?} has no GGUF encoding", view.dtype()),
        })?;
        model.push_tensor(SourceTensor::new(
            tensor_name,
            dtype,
            view.shape().to_vec(),
            view.data().to_vec(),
        ));
    }

    debug!(
        "Parsed '{}': {} tensors, {} parameters, {} metadata entries",
        model.name,
        model.tensors.len(),
        model.parameter_count(),
        model.metadata.len()
    );
    Ok(model)
}

fn map_dtype(dtype: Dtype) -> Option<SourceDType> {
    match dtype {
        Dtype::F64 => Some(SourceDType::F64),
        Dtype::F32 => Some(SourceDType::F32),
        Dtype::F16 => Some(SourceDType::F16),
        Dtype::BF16 => Some(SourceDType::BF16),
        Dtype::I64 => Some(SourceDType::I64),
        Dtype::I32 => Some(SourceDType::I32),
        Dtype::I16 => Some(SourceDType::I16),
        Dtype::I8 => Some(SourceDType::I8),
        _ => None,
    }
}
