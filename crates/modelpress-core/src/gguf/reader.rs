//! GGUF parsing over an in-memory buffer.

use serde::Serialize;

use super::types::{value_type, GgmlType, MetadataValue};
use super::writer::align_to;
use crate::config::FormatConfig;
use crate::error::{PressError, Result};
use crate::quantize::dequantize_q8_0;

/// Description of one tensor stored in a GGUF file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TensorInfo {
    pub name: String,
    /// Row-major shape, outermost dimension first.
    pub shape: Vec<usize>,
    pub dtype: GgmlType,
    /// Offset relative to the start of the data section.
    pub offset: u64,
    pub size: usize,
}

impl TensorInfo {
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Everything in a GGUF file except the tensor bytes.
#[derive(Debug, Clone, Serialize)]
pub struct GgufHeader {
    pub version: u32,
    pub alignment: u64,
    pub metadata: Vec<(String, MetadataValue)>,
    pub tensors: Vec<TensorInfo>,
    /// Absolute offset of the data section.
    pub data_offset: usize,
}

/// Parsed view over a GGUF buffer.
pub struct GgufReader<'a> {
    bytes: &'a [u8],
    header: GgufHeader,
}

impl<'a> GgufReader<'a> {
    /// Parse the header and tensor table, validating every tensor's data range.
    pub fn new(bytes: &'a [u8]) -> Result<Self> {
        let mut cur = Cursor::new(bytes);

        let magic = cur.take(4)?;
        if magic != FormatConfig::GGUF_MAGIC {
            return Err(invalid(format!("bad magic {magic:02x?}")));
        }
        let version = cur.u32()?;
        if !(2..=FormatConfig::GGUF_VERSION).contains(&version) {
            return Err(invalid(format!("unsupported version {version}")));
        }
        let tensor_count = cur.u64()?;
        let kv_count = cur.u64()?;

        let mut metadata = Vec::new();
        for _ in 0..kv_count {
            let key = cur.string()?;
            let ty = cur.u32()?;
            let value = cur.value(ty, 0)?;
            metadata.push((key, value));
        }

        let alignment = metadata
            .iter()
            .find(|(k, _)| k == "general.alignment")
            .and_then(|(_, v)| v.as_u32())
            .map(u64::from)
            .unwrap_or(FormatConfig::GGUF_ALIGNMENT);
        if alignment == 0 || !alignment.is_power_of_two() {
            return Err(invalid(format!("bad alignment {alignment}")));
        }

        let mut tensors = Vec::new();
        for _ in 0..tensor_count {
            let name = cur.string()?;
            let n_dims = cur.u32()?;
            if n_dims > FormatConfig::MAX_DIMS {
                return Err(invalid(format!("tensor '{name}' has {n_dims} dimensions")));
            }
            let mut dims = Vec::with_capacity(n_dims as usize);
            for _ in 0..n_dims {
                dims.push(usize::try_from(cur.u64()?).map_err(|_| invalid("dimension overflow"))?);
            }
            dims.reverse();

            let type_id = cur.u32()?;
            let dtype = GgmlType::from_id(type_id).ok_or_else(|| {
                invalid(format!("tensor '{name}' has unsupported type {type_id}"))
            })?;
            let offset = cur.u64()?;

            let elements = dims
                .iter()
                .try_fold(1usize, |acc, &d| acc.checked_mul(d))
                .ok_or_else(|| invalid(format!("tensor '{name}' shape overflows")))?;
            let size = dtype.byte_size(elements).ok_or_else(|| {
                invalid(format!("tensor '{name}' does not fill whole {dtype} blocks"))
            })?;

            tensors.push(TensorInfo {
                name,
                shape: dims,
                dtype,
                offset,
                size,
            });
        }

        let data_offset = align_to(cur.pos as u64, alignment) as usize;
        for tensor in &tensors {
            if tensor.offset % alignment != 0 {
                return Err(invalid(format!("tensor '{}' is not aligned", tensor.name)));
            }
            let end = (data_offset as u64)
                .checked_add(tensor.offset)
                .and_then(|s| s.checked_add(tensor.size as u64));
            if end.map_or(true, |e| e > bytes.len() as u64) {
                return Err(invalid(format!(
                    "tensor '{}' data runs past the end of the file",
                    tensor.name
                )));
            }
        }

        Ok(Self {
            bytes,
            header: GgufHeader {
                version,
                alignment,
                metadata,
                tensors,
                data_offset,
            },
        })
    }

    pub fn header(&self) -> &GgufHeader {
        &self.header
    }

    pub fn tensors(&self) -> &[TensorInfo] {
        &self.header.tensors
    }

    pub fn metadata(&self, key: &str) -> Option<&MetadataValue> {
        self.header
            .metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn get_string_metadata(&self, key: &str) -> Option<String> {
        self.metadata(key).and_then(|v| v.as_str()).map(str::to_string)
    }

    pub fn get_u32_metadata(&self, key: &str) -> Option<u32> {
        self.metadata(key).and_then(MetadataValue::as_u32)
    }

    pub fn tensor_info(&self, name: &str) -> Option<&TensorInfo> {
        self.header.tensors.iter().find(|t| t.name == name)
    }

    /// Raw encoded bytes of a tensor.
    pub fn tensor_data(&self, name: &str) -> Option<&'a [u8]> {
        let info = self.tensor_info(name)?;
        let start = self.header.data_offset + info.offset as usize;
        Some(&self.bytes[start..start + info.size])
    }

    /// Decode a floating-point tensor to f32 values.
    pub fn tensor_f32(&self, name: &str) -> Result<Vec<f32>> {
        let info = self
            .tensor_info(name)
            .ok_or_else(|| invalid(format!("no tensor named '{name}'")))?;
        let data = self
            .tensor_data(name)
            .ok_or_else(|| invalid(format!("no tensor named '{name}'")))?;

        match info.dtype {
            GgmlType::F32 => Ok(data
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()),
            GgmlType::F16 => Ok(data
                .chunks_exact(2)
                .map(|c| half::f16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect()),
            GgmlType::Q8_0 => dequantize_q8_0(data),
            other => Err(PressError::UnsupportedTensor {
                name: name.to_string(),
                reason: format!("{other} data is not floating point"),
            }),
        }
    }
}

fn invalid(message: impl Into<String>) -> PressError {
    PressError::InvalidFormat {
        format: "gguf".to_string(),
        message: message.into(),
        path: None,
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| invalid(format!("unexpected end of data at offset {}", self.pos)))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u64()?;
        if len > FormatConfig::MAX_STRING_LEN {
            return Err(invalid(format!("string of {len} bytes is too long")));
        }
        let raw = self.take(len as usize)?;
        String::from_utf8(raw.to_vec()).map_err(|_| invalid("invalid UTF-8 in string"))
    }

    fn value(&mut self, ty: u32, depth: usize) -> Result<MetadataValue> {
        // Prevent stack overflow on deeply nested or malformed files
        if depth > 10 {
            return Err(invalid("array nesting too deep"));
        }

        let value = match ty {
            value_type::U8 => MetadataValue::U8(self.array::<1>()?[0]),
            value_type::I8 => MetadataValue::I8(i8::from_le_bytes(self.array()?)),
            value_type::U16 => MetadataValue::U16(u16::from_le_bytes(self.array()?)),
            value_type::I16 => MetadataValue::I16(i16::from_le_bytes(self.array()?)),
            value_type::U32 => MetadataValue::U32(self.u32()?),
            value_type::I32 => MetadataValue::I32(i32::from_le_bytes(self.array()?)),
            value_type::F32 => MetadataValue::F32(f32::from_le_bytes(self.array()?)),
            value_type::BOOL => match self.array::<1>()?[0] {
                0 => MetadataValue::Bool(false),
                1 => MetadataValue::Bool(true),
                other => return Err(invalid(format!("bad bool byte {other}"))),
            },
            value_type::STRING => MetadataValue::String(self.string()?),
            value_type::ARRAY => {
                let elem_type = self.u32()?;
                let len = self.u64()?;
                // Every element takes at least one byte.
                if len > (self.bytes.len() - self.pos) as u64 {
                    return Err(invalid(format!("array of {len} items exceeds the file")));
                }
                let mut items = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    items.push(self.value(elem_type, depth + 1)?);
                }
                MetadataValue::Array(items)
            }
            value_type::U64 => MetadataValue::U64(self.u64()?),
            value_type::I64 => MetadataValue::I64(i64::from_le_bytes(self.array()?)),
            value_type::F64 => MetadataValue::F64(f64::from_le_bytes(self.array()?)),
            other => return Err(invalid(format!("unknown metadata type {other}"))),
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gguf::writer::{GgufWriter, TensorEntry};
    use crate::quantize::{encode_f32, quantize_q8_0};

    fn sample() -> Vec<u8> {
        let mut writer = GgufWriter::new();
        writer.add_metadata("general.architecture", "generic".into()).unwrap();
        writer.add_metadata("general.file_type", MetadataValue::U32(7)).unwrap();
        writer.add_metadata("flag", MetadataValue::Bool(true)).unwrap();
        writer
            .add_metadata(
                "labels",
                MetadataValue::Array(vec!["orange".into(), "not_orange".into()]),
            )
            .unwrap();
        writer.add_metadata("scale", MetadataValue::F64(0.5)).unwrap();

        let values: Vec<f32> = (0..64).map(|i| i as f32 / 64.0).collect();
        writer
            .add_tensor(TensorEntry::new(
                "dense/kernel".into(),
                vec![2, 32],
                GgmlType::Q8_0,
                quantize_q8_0(&values).unwrap(),
            ))
            .unwrap();
        writer
            .add_tensor(TensorEntry::new(
                "dense/bias".into(),
                vec![3],
                GgmlType::F32,
                encode_f32(&[1.0, 2.0, 3.0]),
            ))
            .unwrap();
        writer.to_bytes().unwrap()
    }

    #[test]
    fn test_parse_written_file() {
        let bytes = sample();
        let reader = GgufReader::new(&bytes).unwrap();
        let header = reader.header();
        assert_eq!(header.version, 3);
        assert_eq!(header.alignment, 32);
        assert_eq!(header.metadata.len(), 5);
        assert_eq!(
            reader.get_string_metadata("general.architecture"),
            Some("generic".to_string())
        );
        assert_eq!(reader.get_u32_metadata("general.file_type"), Some(7));
        assert_eq!(reader.metadata("flag"), Some(&MetadataValue::Bool(true)));
        assert_eq!(
            reader.metadata("labels"),
            Some(&MetadataValue::Array(vec![
                "orange".into(),
                "not_orange".into()
            ]))
        );

        let kernel = reader.tensor_info("dense/kernel").unwrap();
        assert_eq!(kernel.shape, vec![2, 32]);
        assert_eq!(kernel.dtype, GgmlType::Q8_0);
        assert_eq!(kernel.size, 68);
        assert_eq!(reader.tensor_f32("dense/bias").unwrap(), vec![1.0, 2.0, 3.0]);

        let restored = reader.tensor_f32("dense/kernel").unwrap();
        assert_eq!(restored.len(), 64);
        assert!((restored[63] - 63.0 / 64.0).abs() < 0.01);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = sample();
        bytes[0] = b'X';
        assert!(matches!(
            GgufReader::new(&bytes),
            Err(PressError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_truncated_data() {
        let bytes = sample();
        let result = GgufReader::new(&bytes[..bytes.len() - 40]);
        assert!(result.is_err());
        let result = GgufReader::new(&bytes[..20]);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_tensor_lookup() {
        let bytes = sample();
        let reader = GgufReader::new(&bytes).unwrap();
        assert!(reader.tensor_data("missing").is_none());
        assert!(reader.tensor_f32("missing").is_err());
    }
}
