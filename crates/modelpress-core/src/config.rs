//! Centralized configuration for modelpress.
//!
//! Format constants, quantization thresholds and default paths.

/// GGUF container constants.
pub struct FormatConfig;

impl FormatConfig {
    pub const GGUF_MAGIC: &'static [u8; 4] = b"GGUF";
    pub const GGUF_VERSION: u32 = 3;
    pub const GGUF_ALIGNMENT: u64 = 32;
    pub const QUANTIZATION_VERSION: u32 = 2;
    pub const DEFAULT_ARCHITECTURE: &'static str = "generic";
    /// Upper bound on a single GGUF string when reading.
    pub const MAX_STRING_LEN: u64 = 64 * 1024 * 1024;
    /// Upper bound on tensor rank when reading.
    pub const MAX_DIMS: u32 = 8;
}

/// Weight quantization parameters.
pub struct QuantizationConfig;

impl QuantizationConfig {
    /// Values per Q8_0 block.
    pub const QK8_0: usize = 32;
    /// Bytes per Q8_0 block: one f16 scale followed by 32 signed bytes.
    pub const Q8_0_BLOCK_BYTES: usize = 2 + Self::QK8_0;
    /// Tensors with fewer elements than this stay in float.
    pub const MIN_QUANTIZE_ELEMENTS: usize = 1024;
}

/// Default file locations used when the CLI is run without arguments.
pub struct PathsConfig;

impl PathsConfig {
    pub const DEFAULT_SOURCE_PATH: &'static str =
        "assets/ml_models/orange_classifier_cnn_improved.safetensors";
    pub const DEFAULT_OUTPUT_PATH: &'static str = "assets/ml_models/orange_model.gguf";
    pub const SIDECAR_SUFFIX: &'static str = ".meta.json";
    pub const TOOL_NAME: &'static str = "modelpress";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_q8_0_block_layout() {
        assert_eq!(QuantizationConfig::Q8_0_BLOCK_BYTES, 34);
        assert_eq!(
            QuantizationConfig::MIN_QUANTIZE_ELEMENTS % QuantizationConfig::QK8_0,
            0
        );
    }

    #[test]
    fn test_alignment_is_power_of_two() {
        assert!(FormatConfig::GGUF_ALIGNMENT.is_power_of_two());
    }
}
