//! GGUF v3 serialization.
//!
//! Layout: header, metadata key/value pairs, tensor infos, padding to the
//! alignment, then tensor data with every tensor starting on an aligned offset.
//! Dimensions are stored innermost first, so a row-major `[rows, cols]` tensor
//! is written as `[cols, rows]`.

use super::types::{value_type, GgmlType, MetadataValue};
use crate::config::FormatConfig;
use crate::error::{PressError, Result};

const ALIGNMENT_KEY: &str = "general.alignment";

/// A tensor ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorEntry {
    pub name: String,
    /// Row-major shape, outermost dimension first.
    pub shape: Vec<usize>,
    pub dtype: GgmlType,
    pub data: Vec<u8>,
}

impl TensorEntry {
    pub fn new(name: String, shape: Vec<usize>, dtype: GgmlType, data: Vec<u8>) -> Self {
        Self {
            name,
            shape,
            dtype,
            data,
        }
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Accumulates metadata and tensors, then emits a GGUF byte buffer.
#[derive(Debug)]
pub struct GgufWriter {
    metadata: Vec<(String, MetadataValue)>,
    tensors: Vec<TensorEntry>,
    alignment: u64,
}

impl Default for GgufWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl GgufWriter {
    pub fn new() -> Self {
        Self {
            metadata: Vec::new(),
            tensors: Vec::new(),
            alignment: FormatConfig::GGUF_ALIGNMENT,
        }
    }

    /// Set a metadata key, replacing any earlier value for the same key.
    ///
    /// Setting `general.alignment` also changes the data alignment.
    pub fn add_metadata(&mut self, key: impl Into<String>, value: MetadataValue) -> Result<()> {
        let key = key.into();
        if key == ALIGNMENT_KEY {
            let alignment = value
                .as_u32()
                .filter(|a| *a > 0 && a.is_power_of_two())
                .ok_or_else(|| PressError::Validation {
                    field: ALIGNMENT_KEY.to_string(),
                    message: format!("must be a power-of-two u32, got {value}"),
                })?;
            self.alignment = u64::from(alignment);
        }
        if let MetadataValue::Array(items) = &value {
            ensure_homogeneous(&key, items)?;
        }

        match self.metadata.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.metadata.push((key, value)),
        }
        Ok(())
    }

    /// Queue a tensor. Names must be unique and data must match the shape.
    pub fn add_tensor(&mut self, entry: TensorEntry) -> Result<()> {
        if self.tensors.iter().any(|t| t.name == entry.name) {
            return Err(PressError::conversion(format!(
                "duplicate tensor name '{}'",
                entry.name
            )));
        }

        let expected = entry
            .dtype
            .byte_size(entry.element_count())
            .ok_or_else(|| PressError::UnsupportedTensor {
                name: entry.name.clone(),
                reason: format!(
                    "{} elements do not fill whole {} blocks",
                    entry.element_count(),
                    entry.dtype
                ),
            })?;
        if entry.data.len() != expected {
            return Err(PressError::conversion(format!(
                "tensor '{}' has {} bytes of {} data, expected {}",
                entry.name,
                entry.data.len(),
                entry.dtype,
                expected
            )));
        }

        self.tensors.push(entry);
        Ok(())
    }

    /// Serialize everything queued so far.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let data_len: usize = self
            .tensors
            .iter()
            .map(|t| align_to(t.data.len() as u64, self.alignment) as usize)
            .sum();
        let mut out = Vec::with_capacity(4096 + data_len);

        out.extend_from_slice(FormatConfig::GGUF_MAGIC);
        out.extend_from_slice(&FormatConfig::GGUF_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.tensors.len() as u64).to_le_bytes());
        out.extend_from_slice(&(self.metadata.len() as u64).to_le_bytes());

        for (key, value) in &self.metadata {
            write_string(&mut out, key);
            out.extend_from_slice(&value.type_id().to_le_bytes());
            write_value(&mut out, value);
        }

        let mut offset = 0u64;
        for tensor in &self.tensors {
            write_string(&mut out, &tensor.name);
            let dims: Vec<u64> = if tensor.shape.is_empty() {
                vec![1]
            } else {
                tensor.shape.iter().rev().map(|&d| d as u64).collect()
            };
            out.extend_from_slice(&(dims.len() as u32).to_le_bytes());
            for dim in dims {
                out.extend_from_slice(&dim.to_le_bytes());
            }
            out.extend_from_slice(&tensor.dtype.id().to_le_bytes());
            out.extend_from_slice(&offset.to_le_bytes());
            offset += align_to(tensor.data.len() as u64, self.alignment);
        }

        pad_to_alignment(&mut out, self.alignment);

        for tensor in &self.tensors {
            out.extend_from_slice(&tensor.data);
            pad_to_alignment(&mut out, self.alignment);
        }

        Ok(out)
    }
}

fn ensure_homogeneous(key: &str, items: &[MetadataValue]) -> Result<()> {
    if let Some(first) = items.first() {
        let ty = first.type_id();
        if items.iter().any(|v| v.type_id() != ty) {
            return Err(PressError::Validation {
                field: key.to_string(),
                message: "array values must share one type".to_string(),
            });
        }
        for item in items {
            if let MetadataValue::Array(inner) = item {
                ensure_homogeneous(key, inner)?;
            }
        }
    }
    Ok(())
}

pub(crate) fn align_to(n: u64, alignment: u64) -> u64 {
    n.div_ceil(alignment) * alignment
}

fn pad_to_alignment(out: &mut Vec<u8>, alignment: u64) {
    let target = align_to(out.len() as u64, alignment) as usize;
    out.resize(target, 0);
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u64).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn write_value(out: &mut Vec<u8>, value: &MetadataValue) {
    match value {
        MetadataValue::U8(v) => out.push(*v),
        MetadataValue::I8(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::U16(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::I16(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::U32(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::I32(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::F32(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::Bool(v) => out.push(u8::from(*v)),
        MetadataValue::String(s) => write_string(out, s),
        MetadataValue::Array(items) => {
            let elem_type = items.first().map_or(value_type::U8, MetadataValue::type_id);
            out.extend_from_slice(&elem_type.to_le_bytes());
            out.extend_from_slice(&(items.len() as u64).to_le_bytes());
            for item in items {
                write_value(out, item);
            }
        }
        MetadataValue::U64(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::I64(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::F64(v) => out.extend_from_slice(&v.to_le_bytes()),
    }
}
