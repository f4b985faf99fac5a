//! Model file format detection from file contents.
//!
//! Looks at the leading bytes of a file to tell SafeTensors checkpoints apart
//! from GGUF files and pickled PyTorch checkpoints, falling back to the file
//! extension when the magic bytes are inconclusive.

use crate::error::{IoResultExt, Result};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;

/// Number of leading bytes inspected when sniffing a file.
pub const SNIFF_LEN: u64 = 64;

/// Signatures matched against the start of a file, checked in order.
const SIGNATURES: &[(&[u8], FileFormat)] = &[
    (b"GGUF", FileFormat::Gguf),
    (&[0x89, b'H', b'D', b'F', 0x0D, 0x0A, 0x1A, 0x0A], FileFormat::Hdf5),
    // zip-packaged torch.save output
    (b"PK\x03\x04", FileFormat::Pickle),
    (&[0x80, 0x02], FileFormat::Pickle),
    (&[0x80, 0x03], FileFormat::Pickle),
    (&[0x80, 0x04], FileFormat::Pickle),
    (&[0x80, 0x05], FileFormat::Pickle),
];

/// Upper bound on a plausible SafeTensors JSON header.
const MAX_SAFETENSORS_HEADER: u64 = 100 * 1024 * 1024;

/// Detected model file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    /// SafeTensors checkpoint (conversion input)
    Safetensors,
    /// GGUF container (conversion output)
    Gguf,
    /// Keras HDF5 checkpoint
    Hdf5,
    /// PyTorch pickle or zip checkpoint
    Pickle,
    Unknown,
}

impl FileFormat {
    /// Return the canonical lowercase string for this file format.
    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Safetensors => "safetensors",
            FileFormat::Gguf => "gguf",
            FileFormat::Hdf5 => "hdf5",
            FileFormat::Pickle => "pickle",
            FileFormat::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identify the format of a file on disk from its first bytes and extension.
pub fn identify_file(path: impl AsRef<Path>) -> Result<FileFormat> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).with_path(path)?;

    let mut header = Vec::with_capacity(SNIFF_LEN as usize);
    file.take(SNIFF_LEN)
        .read_to_end(&mut header)
        .with_path(path)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    Ok(detect_format(&header, &extension))
}

/// Detect the format from leading bytes, then from the lowercase extension.
///
/// The SafeTensors check runs first: its leading u64 header length can begin
/// with the same bytes as a pickle protocol marker (e.g. a 640-byte header).
pub fn detect_format(header: &[u8], extension: &str) -> FileFormat {
    if looks_like_safetensors(header) {
        return FileFormat::Safetensors;
    }
    if let Some((_, format)) = SIGNATURES.iter().find(|(sig, _)| header.starts_with(sig)) {
        return *format;
    }

    match extension {
        "safetensors" => FileFormat::Safetensors,
        "gguf" => FileFormat::Gguf,
        "h5" | "hdf5" | "keras" => FileFormat::Hdf5,
        "pt" | "pth" | "ckpt" | "bin" => FileFormat::Pickle,
        _ => FileFormat::Unknown,
    }
}

/// A SafeTensors file opens with a u64 LE header length and then a JSON object.
fn looks_like_safetensors(header: &[u8]) -> bool {
    let Some((len, rest)) = header.split_first_chunk::<8>() else {
        return false;
    };
    let len = u64::from_le_bytes(*len);
    len >= 2 && len <= MAX_SAFETENSORS_HEADER && rest.first() == Some(&b'{')
}
