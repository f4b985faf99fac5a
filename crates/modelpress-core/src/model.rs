//! In-memory model representation shared by loaders and optimizers.

use std::collections::BTreeMap;

use half::{bf16, f16};
use serde::{Deserialize, Serialize};

use crate::error::{PressError, Result};

/// Element type of a source tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceDType {
    F64,
    F32,
    F16,
    BF16,
    I64,
    I32,
    I16,
    I8,
}

impl SourceDType {
    /// Size of a single element in bytes.
    pub fn element_size(&self) -> usize {
        match self {
            SourceDType::F64 | SourceDType::I64 => 8,
            SourceDType::F32 | SourceDType::I32 => 4,
            SourceDType::F16 | SourceDType::BF16 | SourceDType::I16 => 2,
            SourceDType::I8 => 1,
        }
    }

    /// Whether values of this type are weights that can be re-encoded.
    pub fn is_float(&self) -> bool {
        matches!(
            self,
            SourceDType::F64 | SourceDType::F32 | SourceDType::F16 | SourceDType::BF16
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceDType::F64 => "F64",
            SourceDType::F32 => "F32",
            SourceDType::F16 => "F16",
            SourceDType::BF16 => "BF16",
            SourceDType::I64 => "I64",
            SourceDType::I32 => "I32",
            SourceDType::I16 => "I16",
            SourceDType::I8 => "I8",
        }
    }
}

/// One named tensor of a loaded model. `data` is little-endian and row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTensor {
    pub name: String,
    pub dtype: SourceDType,
    pub shape: Vec<usize>,
    pub data: Vec<u8>,
}

impl SourceTensor {
    pub fn new(name: impl Into<String>, dtype: SourceDType, shape: Vec<usize>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            dtype,
            shape,
            data,
        }
    }

    /// Build an F32 tensor from values.
    pub fn from_f32(name: impl Into<String>, shape: Vec<usize>, values: &[f32]) -> Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(name, SourceDType::F32, shape, data)
    }

    /// Number of elements described by the shape.
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Size of the innermost (fastest-varying) dimension.
    pub fn innermost_dim(&self) -> usize {
        self.shape.last().copied().unwrap_or(1)
    }

    /// Decode floating-point data into f32 values.
    pub fn to_f32(&self) -> Result<Vec<f32>> {
        let expected = self.element_count() * self.dtype.element_size();
        if self.data.len() != expected {
            return Err(PressError::conversion(format!(
                "tensor '{}' holds {} bytes, shape {:?} of {} needs {}",
                self.name,
                self.data.len(),
                self.shape,
                self.dtype.as_str(),
                expected
            )));
        }

        let values = match self.dtype {
            SourceDType::F32 => self
                .data
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
            SourceDType::F16 => self
                .data
                .chunks_exact(2)
                .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect(),
            SourceDType::BF16 => self
                .data
                .chunks_exact(2)
                .map(|c| bf16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect(),
            SourceDType::F64 => self
                .data
                .chunks_exact(8)
                .map(|c| {
                    let mut b = [0u8; 8];
                    b.copy_from_slice(c);
                    f64::from_le_bytes(b) as f32
                })
                .collect(),
            other => {
                return Err(PressError::UnsupportedTensor {
                    name: self.name.clone(),
                    reason: format!("{} is not a floating-point type", other.as_str()),
                })
            }
        };
        Ok(values)
    }
}

/// A model loaded into memory, ready to be optimized.
#[derive(Debug, Clone, Default)]
pub struct ModelHandle {
    /// Model name, usually the source file stem.
    pub name: String,
    /// Free-form string metadata carried by the source file.
    pub metadata: BTreeMap<String, String>,
    /// Tensors sorted by name.
    pub tensors: Vec<SourceTensor>,
}

impl ModelHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Insert a tensor, keeping the list sorted by name.
    pub fn push_tensor(&mut self, tensor: SourceTensor) {
        let idx = self
            .tensors
            .partition_point(|t| t.name.as_str() < tensor.name.as_str());
        self.tensors.insert(idx, tensor);
    }

    pub fn tensor(&self, name: &str) -> Option<&SourceTensor> {
        self.tensors.iter().find(|t| t.name == name)
    }

    /// Total number of weight elements across all tensors.
    pub fn parameter_count(&self) -> usize {
        self.tensors.iter().map(SourceTensor::element_count).sum()
    }

    /// Architecture name from the metadata, if recorded.
    pub fn architecture(&self) -> Option<&str> {
        self.metadata.get("architecture").map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_decode() {
        let t = SourceTensor::from_f32("w", vec![2, 2], &[1.0, -2.0, 0.5, 4.0]);
        assert_eq!(t.element_count(), 4);
        assert_eq!(t.to_f32().unwrap(), vec![1.0, -2.0, 0.5, 4.0]);
    }

    #[test]
    fn test_half_decode() {
        let data: Vec<u8> = [1.5f32, -0.25]
            .iter()
            .flat_map(|v| f16::from_f32(*v).to_le_bytes())
            .collect();
        let t = SourceTensor::new("h", SourceDType::F16, vec![2], data);
        assert_eq!(t.to_f32().unwrap(), vec![1.5, -0.25]);

        let data: Vec<u8> = [3.0f32, -8.0]
            .iter()
            .flat_map(|v| bf16::from_f32(*v).to_le_bytes())
            .collect();
        let t = SourceTensor::new("b", SourceDType::BF16, vec![2], data);
        assert_eq!(t.to_f32().unwrap(), vec![3.0, -8.0]);
    }

    #[test]
    fn test_f64_decode_narrows() {
        let data: Vec<u8> = [0.25f64, -3.5, 1e-3]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let t = SourceTensor::new("d", SourceDType::F64, vec![3], data);
        assert_eq!(t.to_f32().unwrap(), vec![0.25, -3.5, 1e-3f64 as f32]);

        let short = SourceTensor::new("d", SourceDType::F64, vec![2], vec![0u8; 12]);
        assert!(short.to_f32().is_err());
    }

    #[test]
    fn test_decode_rejects_short_buffer() {
        let t = SourceTensor::new("w", SourceDType::F32, vec![4], vec![0u8; 8]);
        assert!(matches!(t.to_f32(), Err(PressError::ConversionFailed { .. })));
    }

    #[test]
    fn test_decode_rejects_integer_tensor() {
        let t = SourceTensor::new("step", SourceDType::I64, vec![1], vec![0u8; 8]);
        assert!(matches!(t.to_f32(), Err(PressError::UnsupportedTensor { .. })));
    }

    #[test]
    fn test_push_tensor_keeps_order() {
        let mut model = ModelHandle::new("m");
        model.push_tensor(SourceTensor::from_f32("dense_2/kernel", vec![1], &[0.0]));
        model.push_tensor(SourceTensor::from_f32("dense_1/kernel", vec![1], &[0.0]));
        model.push_tensor(SourceTensor::from_f32("dense_1/bias", vec![1], &[0.0]));
        let names: Vec<_> = model.tensors.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["dense_1/bias", "dense_1/kernel", "dense_2/kernel"]);
        assert_eq!(model.parameter_count(), 3);
    }
}
