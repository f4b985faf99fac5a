//! Shared GGUF type tags and metadata values.

use serde::Serialize;

use crate::config::QuantizationConfig;

/// Tensor element encodings understood by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GgmlType {
    F32,
    F16,
    Q8_0,
    I8,
    I16,
    I32,
    I64,
    F64,
}

impl GgmlType {
    /// Numeric type id stored in tensor infos.
    pub fn id(&self) -> u32 {
        match self {
            GgmlType::F32 => 0,
            GgmlType::F16 => 1,
            GgmlType::Q8_0 => 8,
            GgmlType::I8 => 24,
            GgmlType::I16 => 25,
            GgmlType::I32 => 26,
            GgmlType::I64 => 27,
            GgmlType::F64 => 28,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(GgmlType::F32),
            1 => Some(GgmlType::F16),
            8 => Some(GgmlType::Q8_0),
            24 => Some(GgmlType::I8),
            25 => Some(GgmlType::I16),
            26 => Some(GgmlType::I32),
            27 => Some(GgmlType::I64),
            28 => Some(GgmlType::F64),
            _ => None,
        }
    }

    /// Number of elements encoded together as one block.
    pub fn block_size(&self) -> usize {
        match self {
            GgmlType::Q8_0 => QuantizationConfig::QK8_0,
            _ => 1,
        }
    }

    /// Bytes per block.
    pub fn type_size(&self) -> usize {
        match self {
            GgmlType::F64 | GgmlType::I64 => 8,
            GgmlType::F32 | GgmlType::I32 => 4,
            GgmlType::F16 | GgmlType::I16 => 2,
            GgmlType::I8 => 1,
            GgmlType::Q8_0 => QuantizationConfig::Q8_0_BLOCK_BYTES,
        }
    }

    /// Encoded size of `elements` values, or `None` if they do not fill whole blocks.
    pub fn byte_size(&self, elements: usize) -> Option<usize> {
        if elements % self.block_size() != 0 {
            return None;
        }
        Some(elements / self.block_size() * self.type_size())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GgmlType::F32 => "F32",
            GgmlType::F16 => "F16",
            GgmlType::Q8_0 => "Q8_0",
            GgmlType::I8 => "I8",
            GgmlType::I16 => "I16",
            GgmlType::I32 => "I32",
            GgmlType::I64 => "I64",
            GgmlType::F64 => "F64",
        }
    }
}

impl std::fmt::Display for GgmlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values of the `general.file_type` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GgufFileType {
    AllF32,
    MostlyF16,
    MostlyQ8_0,
}

impl GgufFileType {
    pub fn id(&self) -> u32 {
        match self {
            GgufFileType::AllF32 => 0,
            GgufFileType::MostlyF16 => 1,
            GgufFileType::MostlyQ8_0 => 7,
        }
    }
}

/// Metadata value type tags.
pub(crate) mod value_type {
    pub const U8: u32 = 0;
    pub const I8: u32 = 1;
    pub const U16: u32 = 2;
    pub const I16: u32 = 3;
    pub const U32: u32 = 4;
    pub const I32: u32 = 5;
    pub const F32: u32 = 6;
    pub const BOOL: u32 = 7;
    pub const STRING: u32 = 8;
    pub const ARRAY: u32 = 9;
    pub const U64: u32 = 10;
    pub const I64: u32 = 11;
    pub const F64: u32 = 12;
}

/// A metadata value. Arrays must be homogeneous.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    F32(f32),
    Bool(bool),
    String(String),
    Array(Vec<MetadataValue>),
    U64(u64),
    I64(i64),
    F64(f64),
}

impl MetadataValue {
    pub fn type_id(&self) -> u32 {
        match self {
            MetadataValue::U8(_) => value_type::U8,
            MetadataValue::I8(_) => value_type::I8,
            MetadataValue::U16(_) => value_type::U16,
            MetadataValue::I16(_) => value_type::I16,
            MetadataValue::U32(_) => value_type::U32,
            MetadataValue::I32(_) => value_type::I32,
            MetadataValue::F32(_) => value_type::F32,
            MetadataValue::Bool(_) => value_type::BOOL,
            MetadataValue::String(_) => value_type::STRING,
            MetadataValue::Array(_) => value_type::ARRAY,
            MetadataValue::U64(_) => value_type::U64,
            MetadataValue::I64(_) => value_type::I64,
            MetadataValue::F64(_) => value_type::F64,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            MetadataValue::U32(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::String(value)
    }
}

impl From<u32> for MetadataValue {
    fn from(value: u32) -> Self {
        MetadataValue::U32(value)
    }
}

impl std::fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataValue::U8(v) => write!(f, "{v}"),
            MetadataValue::I8(v) => write!(f, "{v}"),
            MetadataValue::U16(v) => write!(f, "{v}"),
            MetadataValue::I16(v) => write!(f, "{v}"),
            MetadataValue::U32(v) => write!(f, "{v}"),
            MetadataValue::I32(v) => write!(f, "{v}"),
            MetadataValue::F32(v) => write!(f, "{v}"),
            MetadataValue::Bool(v) => write!(f, "{v}"),
            MetadataValue::String(v) => write!(f, "{v:?}"),
            MetadataValue::Array(items) => write!(f, "[{} items]", items.len()),
            MetadataValue::U64(v) => write!(f, "{v}"),
            MetadataValue::I64(v) => write!(f, "{v}"),
            MetadataValue::F64(v) => write!(f, "{v}"),
        }
    }
}
