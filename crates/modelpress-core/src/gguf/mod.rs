//! GGUF container encoding and decoding.
//!
//! The writer produces GGUF v3 files; the reader parses them back for
//! verification and inspection. Only the tensor encodings this crate emits
//! are decoded to f32 by the reader, but every metadata value type is parsed.

pub mod reader;
pub mod types;
pub mod writer;

pub use reader::{GgufHeader, GgufReader, TensorInfo};
pub use types::{GgmlType, GgufFileType, MetadataValue};
pub use writer::{GgufWriter, TensorEntry};
