//! Weight encoding kernels: Q8_0 block quantization and half-precision packing.
//!
//! Q8_0 stores each run of 32 values as an f16 scale `d` followed by 32 signed
//! bytes `q`, reconstructing `x ≈ d * q`. The scale is chosen so the largest
//! magnitude in the block maps to ±127.

use half::f16;

use crate::config::QuantizationConfig;
use crate::error::{PressError, Result};

const QK: usize = QuantizationConfig::QK8_0;
const BLOCK_BYTES: usize = QuantizationConfig::Q8_0_BLOCK_BYTES;

/// Quantize `values` to Q8_0 blocks.
///
/// `values.len()` must be a multiple of 32, and every block's scale must fit in
/// f16 (largest magnitude at most 65504 * 127).
pub fn quantize_q8_0(values: &[f32]) -> Result<Vec<u8>> {
    if values.len() % QK != 0 {
        return Err(PressError::conversion(format!(
            "Q8_0 needs a multiple of {QK} values, got {}",
            values.len()
        )));
    }

    let mut out = Vec::with_capacity(values.len() / QK * BLOCK_BYTES);
    for (idx, block) in values.chunks_exact(QK).enumerate() {
        let amax = block.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
        let d = amax / 127.0;
        let scale = f16::from_f32(d);
        if !scale.is_finite() {
            return Err(PressError::conversion(format!(
                "block {idx} has magnitude {amax}, too large for an f16 Q8_0 scale"
            )));
        }
        let id = if d != 0.0 { 1.0 / d } else { 0.0 };

        out.extend_from_slice(&scale.to_le_bytes());
        for &v in block {
            let q = (v * id).round().clamp(-127.0, 127.0) as i8;
            out.push(q as u8);
        }
    }
    Ok(out)
}

/// Reconstruct f32 values from Q8_0 blocks.
pub fn dequantize_q8_0(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % BLOCK_BYTES != 0 {
        return Err(PressError::conversion(format!(
            "Q8_0 data must be a multiple of {BLOCK_BYTES} bytes, got {}",
            bytes.len()
        )));
    }

    let mut out = Vec::with_capacity(bytes.len() / BLOCK_BYTES * QK);
    for block in bytes.chunks_exact(BLOCK_BYTES) {
        let d = f16::from_le_bytes([block[0], block[1]]).to_f32();
        out.extend(block[2..].iter().map(|&q| d * f32::from(q as i8)));
    }
    Ok(out)
}

/// Pack f32 values as little-endian f16.
pub fn encode_f16(values: &[f32]) -> Vec<u8> {
    values
        .iter()
        .flat_map(|&v| f16::from_f32(v).to_le_bytes())
        .collect()
}

/// Pack f32 values as little-endian f32.
pub fn encode_f32(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Fail if any value is NaN or infinite.
pub fn ensure_finite(name: &str, values: &[f32]) -> Result<()> {
    if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
        return Err(PressError::conversion(format!(
            "tensor '{name}' has a non-finite value ({}) at index {idx}",
            values[idx]
        )));
    }
    Ok(())
}
