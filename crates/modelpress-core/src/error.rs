//! Error types for modelpress.
//!
//! Every failure of a conversion run maps onto one of four kinds: the source is
//! missing, the source is not a readable model, the conversion itself failed, or
//! the filesystem refused a read or write. Argument validation has its own kind.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the modelpress library.
#[derive(Debug, Error)]
pub enum PressError {
    #[error("Model file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Invalid {format} data: {message}")]
    InvalidFormat {
        format: String,
        message: String,
        path: Option<PathBuf>,
    },

    #[error("Conversion failed: {message}")]
    ConversionFailed { message: String },

    #[error("Unsupported tensor '{name}': {reason}")]
    UnsupportedTensor { name: String, reason: String },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },
}

/// Result type alias for modelpress operations.
pub type Result<T> = std::result::Result<T, PressError>;

/// Coarse classification of a [`PressError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidFormat,
    Conversion,
    Io,
    Validation,
}

impl From<std::io::Error> for PressError {
    fn from(err: std::io::Error) -> Self {
        PressError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for PressError {
    fn from(err: serde_json::Error) -> Self {
        PressError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl PressError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        PressError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create an invalid-format error for a file on disk.
    pub fn invalid_format(
        format: impl Into<String>,
        path: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        PressError::InvalidFormat {
            format: format.into(),
            message: message.into(),
            path: Some(path.into()),
        }
    }

    /// Create a conversion error.
    pub fn conversion(message: impl Into<String>) -> Self {
        PressError::ConversionFailed {
            message: message.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PressError::NotFound(_) => ErrorKind::NotFound,
            PressError::InvalidFormat { .. } => ErrorKind::InvalidFormat,
            PressError::ConversionFailed { .. } | PressError::UnsupportedTensor { .. } => {
                ErrorKind::Conversion
            }
            PressError::Io { .. } | PressError::Json { .. } => ErrorKind::Io,
            PressError::Validation { .. } => ErrorKind::Validation,
        }
    }

    /// Convert to a process exit code.
    ///
    /// - 1: source model not found
    /// - 2: invalid arguments
    /// - 3: source is not a valid model file
    /// - 4: conversion failed
    /// - 5: filesystem error
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::NotFound => 1,
            ErrorKind::Validation => 2,
            ErrorKind::InvalidFormat => 3,
            ErrorKind::Conversion => 4,
            ErrorKind::Io => 5,
        }
    }
}

/// Attach a path to IO errors.
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| PressError::io_with_path(e, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PressError::NotFound(PathBuf::from("nope.safetensors"));
        assert_eq!(err.to_string(), "Model file not found: nope.safetensors");

        let err = PressError::UnsupportedTensor {
            name: "mask".into(),
            reason: "dtype BOOL has no GGUF encoding".into(),
        };
        assert_eq!(
            err.to_string(),
            "Unsupported tensor 'mask': dtype BOOL has no GGUF encoding"
        );
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(PressError::conversion("boom").kind(), ErrorKind::Conversion);
        assert_eq!(
            PressError::invalid_format("safetensors", "a.bin", "bad header").kind(),
            ErrorKind::InvalidFormat
        );
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(PressError::io_with_path(io, "/out").kind(), ErrorKind::Io);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(PressError::NotFound(PathBuf::from("x")).exit_code(), 1);
        assert_eq!(
            PressError::Validation {
                field: "dest".into(),
                message: "same as source".into()
            }
            .exit_code(),
            2
        );
        assert_eq!(PressError::conversion("boom").exit_code(), 4);
    }

    #[test]
    fn test_with_path() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        match result.with_path("/tmp/model.gguf") {
            Err(PressError::Io { path, .. }) => {
                assert_eq!(path, Some(PathBuf::from("/tmp/model.gguf")))
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
