//! Size optimization: choose an encoding per tensor and serialize to GGUF.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{FormatConfig, PathsConfig, QuantizationConfig};
use crate::error::{PressError, Result};
use crate::gguf::{GgmlType, GgufFileType, GgufWriter, MetadataValue, TensorEntry};
use crate::model::{ModelHandle, SourceDType, SourceTensor};
use crate::quantize::{encode_f16, encode_f32, ensure_finite, quantize_q8_0};

/// How aggressively weights are re-encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationMode {
    /// Post-training 8-bit weight quantization (Q8_0), no calibration data.
    #[default]
    Default,
    /// Store every float tensor as half precision.
    Float16,
    /// Store every float tensor as f32.
    None,
}

impl OptimizationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationMode::Default => "default",
            OptimizationMode::Float16 => "float16",
            OptimizationMode::None => "none",
        }
    }
}

impl std::fmt::Display for OptimizationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizationMode {
    type Err = PressError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "default" | "q8_0" | "int8" => Ok(OptimizationMode::Default),
            "float16" | "f16" => Ok(OptimizationMode::Float16),
            "none" | "f32" => Ok(OptimizationMode::None),
            other => Err(PressError::Validation {
                field: "mode".to_string(),
                message: format!("unknown optimization mode '{other}'"),
            }),
        }
    }
}

/// Encoding decision for one tensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TensorPlan {
    pub name: String,
    pub shape: Vec<usize>,
    pub source_dtype: SourceDType,
    pub target: GgmlType,
    pub source_bytes: usize,
    pub target_bytes: usize,
}

impl TensorPlan {
    /// Whether the tensor was stored at reduced precision.
    pub fn is_reduced(&self) -> bool {
        match self.target {
            GgmlType::Q8_0 => true,
            GgmlType::F16 => self.source_dtype != SourceDType::F16,
            _ => false,
        }
    }
}

/// Result of an optimization pass.
#[derive(Debug, Clone)]
pub struct OptimizedModel {
    pub mode: OptimizationMode,
    /// Serialized GGUF file.
    pub bytes: Vec<u8>,
    /// Per-tensor decisions in file order.
    pub tensors: Vec<TensorPlan>,
}

impl OptimizedModel {
    pub fn reduced_count(&self) -> usize {
        self.tensors.iter().filter(|t| t.is_reduced()).count()
    }
}

/// Turns a loaded model into serialized, size-optimized bytes.
pub trait ModelOptimizer {
    fn name(&self) -> &str;

    fn mode(&self) -> OptimizationMode;

    fn optimize(&self, model: &ModelHandle) -> Result<OptimizedModel>;
}

/// Emits GGUF using the encoding chosen by an [`OptimizationMode`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GgufOptimizer {
    mode: OptimizationMode,
}

impl GgufOptimizer {
    pub fn new(mode: OptimizationMode) -> Self {
        Self { mode }
    }

    /// Pick the stored encoding for a tensor.
    pub fn plan_target(&self, tensor: &SourceTensor) -> GgmlType {
        match tensor.dtype {
            SourceDType::I8 => return GgmlType::I8,
            SourceDType::I16 => return GgmlType::I16,
            SourceDType::I32 => return GgmlType::I32,
            SourceDType::I64 => return GgmlType::I64,
            _ => {}
        }

        match self.mode {
            OptimizationMode::None => GgmlType::F32,
            OptimizationMode::Float16 => GgmlType::F16,
            OptimizationMode::Default => {
                if tensor.shape.len() >= 2
                    && tensor.element_count() >= QuantizationConfig::MIN_QUANTIZE_ELEMENTS
                    && tensor.innermost_dim() % QuantizationConfig::QK8_0 == 0
                {
                    GgmlType::Q8_0
                } else {
                    GgmlType::F32
                }
            }
        }
    }

    fn encode(&self, tensor: &SourceTensor, target: GgmlType) -> Result<Vec<u8>> {
        if !tensor.dtype.is_float() {
            return Ok(tensor.data.clone());
        }

        let values = tensor.to_f32()?;
        match target {
            GgmlType::Q8_0 => {
                ensure_finite(&tensor.name, &values)?;
                quantize_q8_0(&values).map_err(|e| match e {
                    PressError::ConversionFailed { message } => PressError::UnsupportedTensor {
                        name: tensor.name.clone(),
                        reason: message,
                    },
                    other => other,
                })
            }
            GgmlType::F16 => Ok(encode_f16(&values)),
            GgmlType::F32 => Ok(encode_f32(&values)),
            other => Err(PressError::UnsupportedTensor {
                name: tensor.name.clone(),
                reason: format!("cannot store float data as {other}"),
            }),
        }
    }

    fn file_type(&self, plans: &[TensorPlan]) -> GgufFileType {
        match self.mode {
            OptimizationMode::None => GgufFileType::AllF32,
            OptimizationMode::Float16 => GgufFileType::MostlyF16,
            OptimizationMode::Default => {
                if plans.iter().any(|p| p.target == GgmlType::Q8_0) {
                    GgufFileType::MostlyQ8_0
                } else {
                    GgufFileType::AllF32
                }
            }
        }
    }
}

impl ModelOptimizer for GgufOptimizer {
    fn name(&self) -> &str {
        "gguf"
    }

    fn mode(&self) -> OptimizationMode {
        self.mode
    }

    fn optimize(&self, model: &ModelHandle) -> Result<OptimizedModel> {
        if model.tensors.is_empty() {
            return Err(PressError::conversion(format!(
                "model '{}' contains no tensors",
                model.name
            )));
        }

        let mut writer = GgufWriter::new();
        let mut plans = Vec::with_capacity(model.tensors.len());

        for tensor in &model.tensors {
            let target = self.plan_target(tensor);
            let data = self.encode(tensor, target)?;
            let shape = if tensor.shape.is_empty() {
                vec![1]
            } else {
                tensor.shape.clone()
            };
            debug!(
                "{}: {} {:?} -> {} ({} -> {} bytes)",
                tensor.name,
                tensor.dtype.as_str(),
                shape,
                target,
                tensor.data.len(),
                data.len()
            );

            plans.push(TensorPlan {
                name: tensor.name.clone(),
                shape: shape.clone(),
                source_dtype: tensor.dtype,
                target,
                source_bytes: tensor.data.len(),
                target_bytes: data.len(),
            });
            writer.add_tensor(TensorEntry::new(tensor.name.clone(), shape, target, data))?;
        }

        let architecture = model
            .architecture()
            .unwrap_or(FormatConfig::DEFAULT_ARCHITECTURE);
        writer.add_metadata("general.architecture", architecture.into())?;
        writer.add_metadata("general.name", model.name.as_str().into())?;
        writer.add_metadata(
            "general.file_type",
            MetadataValue::U32(self.file_type(&plans).id()),
        )?;
        writer.add_metadata(
            "general.quantization_version",
            MetadataValue::U32(FormatConfig::QUANTIZATION_VERSION),
        )?;
        writer.add_metadata(
            "general.alignment",
            MetadataValue::U32(FormatConfig::GGUF_ALIGNMENT as u32),
        )?;
        writer.add_metadata("general.quantized_by", PathsConfig::TOOL_NAME.into())?;
        writer.add_metadata("modelpress.optimization", self.mode.as_str().into())?;
        for (key, value) in &model.metadata {
            writer.add_metadata(format!("source.{key}"), value.as_str().into())?;
        }

        let bytes = writer.to_bytes()?;
        Ok(OptimizedModel {
            mode: self.mode,
            bytes,
            tensors: plans,
        })
    }
}
