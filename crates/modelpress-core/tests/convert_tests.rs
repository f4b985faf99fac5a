//! Integration tests for the public conversion entry points.
//!
//! These tests write real SafeTensors checkpoints to a temp directory,
//! convert them, and read the produced GGUF files back.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use modelpress_core::{
    convert, ErrorKind, GgmlType, GgufReader, ModelConverter, OptimizationMode,
};
use safetensors::tensor::TensorView;
use safetensors::Dtype;
use tempfile::TempDir;

fn weights(n: u64, seed: u64) -> Vec<u8> {
    (0..n)
        .map(|i| (((i + seed) * 2654435761) % 1000) as f32 / 1000.0 - 0.5)
        .flat_map(|v| v.to_le_bytes())
        .collect()
}

/// Write a small two-layer dense classifier checkpoint.
fn write_classifier(path: &Path) {
    let k1 = weights(128 * 64, 1);
    let b1 = weights(64, 2);
    let k2 = weights(64 * 32, 3);
    let b2 = weights(32, 4);
    let tensors = vec![
        ("dense_1/kernel", TensorView::new(Dtype::F32, vec![128, 64], &k1).unwrap()),
        ("dense_1/bias", TensorView::new(Dtype::F32, vec![64], &b1).unwrap()),
        ("dense_2/kernel", TensorView::new(Dtype::F32, vec![64, 32], &k2).unwrap()),
        ("dense_2/bias", TensorView::new(Dtype::F32, vec![32], &b2).unwrap()),
    ];
    let metadata = HashMap::from([("architecture".to_string(), "sequential".to_string())]);
    let bytes = safetensors::serialize(tensors, &Some(metadata)).unwrap();
    std::fs::write(path, bytes).unwrap();
}

fn setup() -> (TempDir, PathBuf, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let source = temp_dir.path().join("orange_classifier.safetensors");
    let dest = temp_dir.path().join("orange_model.gguf");
    write_classifier(&source);
    (temp_dir, source, dest)
}

#[test]
fn test_convert_produces_smaller_loadable_model() {
    let (_temp_dir, source, dest) = setup();

    let report = convert(&source, &dest).unwrap();
    assert!(dest.exists());
    assert!(report.dest_bytes < report.source_bytes);
    assert_eq!(report.tensors_total, 4);
    assert_eq!(report.tensors_reduced, 2);
    assert_eq!(report.mode, OptimizationMode::Default);

    let bytes = std::fs::read(&dest).unwrap();
    let reader = GgufReader::new(&bytes).unwrap();
    assert_eq!(
        reader.get_string_metadata("general.architecture"),
        Some("sequential".to_string())
    );
    assert_eq!(
        reader.get_string_metadata("general.name"),
        Some("orange_classifier".to_string())
    );
    let kernel = reader.tensor_info("dense_1/kernel").unwrap();
    assert_eq!(kernel.dtype, GgmlType::Q8_0);
    assert_eq!(kernel.shape, vec![128, 64]);
    assert_eq!(reader.tensor_info("dense_1/bias").unwrap().dtype, GgmlType::F32);

    let restored = reader.tensor_f32("dense_1/kernel").unwrap();
    assert_eq!(restored.len(), 128 * 64);
}

#[test]
fn test_quantized_weights_stay_close() {
    let (_temp_dir, source, dest) = setup();
    convert(&source, &dest).unwrap();

    let original: Vec<f32> = weights(64 * 32, 3)
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let bytes = std::fs::read(&dest).unwrap();
    let restored = GgufReader::new(&bytes)
        .unwrap()
        .tensor_f32("dense_2/kernel")
        .unwrap();

    // Weights lie in [-0.5, 0.5), so each block's step is at most 0.5 / 127.
    for (a, b) in original.iter().zip(&restored) {
        assert!((a - b).abs() <= 0.5 / 127.0 + 1e-3, "{a} vs {b}");
    }
}

#[test]
fn test_missing_source_creates_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let source = temp_dir.path().join("nope.safetensors");
    let dest = temp_dir.path().join("out.gguf");

    let err = convert(&source, &dest).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.exit_code(), 1);
    assert!(err.to_string().contains("nope.safetensors"));
    assert!(!dest.exists());
}

#[test]
fn test_repeat_conversion_is_byte_identical() {
    let (temp_dir, source, dest) = setup();
    let second = temp_dir.path().join("second.gguf");

    let a = convert(&source, &dest).unwrap();
    let b = convert(&source, &second).unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), std::fs::read(&second).unwrap());
    assert_eq!(a.output_sha256, b.output_sha256);

    // Converting again over an existing destination replaces it with the same bytes.
    let c = convert(&source, &dest).unwrap();
    assert_eq!(a.output_sha256, c.output_sha256);
}

#[test]
fn test_invalid_source_leaves_existing_dest_untouched() {
    let (_temp_dir, source, dest) = setup();
    std::fs::write(&dest, b"previous model").unwrap();

    let bytes = std::fs::read(&source).unwrap();
    std::fs::write(&source, &bytes[..bytes.len() / 2]).unwrap();

    let err = convert(&source, &dest).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidFormat);
    assert_eq!(std::fs::read(&dest).unwrap(), b"previous model");
}

#[test]
fn test_missing_dest_directory_fails_without_creating_it() {
    let (temp_dir, source, _dest) = setup();
    let dest = temp_dir.path().join("missing").join("out.gguf");

    let err = convert(&source, &dest).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(!temp_dir.path().join("missing").exists());
}

#[test]
fn test_modes_order_output_sizes() {
    let (temp_dir, source, _dest) = setup();

    let mut sizes = Vec::new();
    for mode in [OptimizationMode::Default, OptimizationMode::Float16, OptimizationMode::None] {
        let dest = temp_dir.path().join(format!("{mode}.gguf"));
        let report = ModelConverter::builder()
            .mode(mode)
            .verify(true)
            .build()
            .convert(&source, &dest)
            .unwrap();
        assert!(report.verified);
        sizes.push(report.dest_bytes);
    }
    assert!(sizes[0] < sizes[1]);
    assert!(sizes[1] < sizes[2]);
}

#[test]
fn test_sidecar_records_provenance() {
    let (_temp_dir, source, dest) = setup();

    let report = ModelConverter::builder()
        .with_sidecar(true)
        .build()
        .convert(&source, &dest)
        .unwrap();

    let sidecar_path = modelpress_core::sidecar_path(&dest);
    let sidecar: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&sidecar_path).unwrap()).unwrap();
    assert_eq!(sidecar["source_sha256"], report.source_sha256);
    assert_eq!(sidecar["output_sha256"], report.output_sha256);
    assert_eq!(sidecar["tensors"][0]["name"], "dense_1/bias");
    assert_eq!(sidecar["tensors"][1]["target"], "Q8_0");
}

#[test]
fn test_convert_bf16_and_f64_checkpoint() {
    let temp_dir = TempDir::new().unwrap();
    let source = temp_dir.path().join("mixed.safetensors");
    let dest = temp_dir.path().join("mixed.gguf");

    let kernel_values: Vec<f32> = (0..64 * 32).map(|i| (i % 64) as f32 / 64.0 - 0.5).collect();
    let kernel: Vec<u8> = kernel_values
        .iter()
        .flat_map(|&v| half::bf16::from_f32(v).to_le_bytes())
        .collect();
    let bias: Vec<u8> = (0..32).flat_map(|i| (i as f64 * 0.125).to_le_bytes()).collect();
    let tensors = vec![
        ("dense/kernel", TensorView::new(Dtype::BF16, vec![64, 32], &kernel).unwrap()),
        ("dense/bias", TensorView::new(Dtype::F64, vec![32], &bias).unwrap()),
    ];
    std::fs::write(&source, safetensors::serialize(tensors, &None).unwrap()).unwrap();

    let report = ModelConverter::builder()
        .verify(true)
        .build()
        .convert(&source, &dest)
        .unwrap();
    assert_eq!(report.tensors_total, 2);
    assert_eq!(report.tensors_reduced, 1);

    let bytes = std::fs::read(&dest).unwrap();
    let reader = GgufReader::new(&bytes).unwrap();
    assert_eq!(reader.tensor_info("dense/kernel").unwrap().dtype, GgmlType::Q8_0);
    assert_eq!(reader.tensor_info("dense/bias").unwrap().dtype, GgmlType::F32);

    let restored_bias = reader.tensor_f32("dense/bias").unwrap();
    assert_eq!(restored_bias[8], 1.0);
    assert_eq!(restored_bias[31], 3.875);

    // bf16 values here are exact, so only the Q8_0 step applies.
    let restored_kernel = reader.tensor_f32("dense/kernel").unwrap();
    for (a, b) in kernel_values.iter().zip(&restored_kernel) {
        assert!((a - b).abs() <= 0.5 / 127.0 + 1e-3, "{a} vs {b}");
    }
}

#[test]
fn test_convert_checkpoint_with_640_byte_header() {
    let temp_dir = TempDir::new().unwrap();
    let source = temp_dir.path().join("padded.safetensors");
    let dest = temp_dir.path().join("padded.gguf");

    let kernel = weights(64 * 32, 5);
    let found = (0..700).any(|pad| {
        let tensors = vec![(
            "dense/kernel",
            TensorView::new(Dtype::F32, vec![64, 32], &kernel).unwrap(),
        )];
        let metadata = HashMap::from([("notes".to_string(), "x".repeat(pad))]);
        let bytes = safetensors::serialize(tensors, &Some(metadata)).unwrap();
        std::fs::write(&source, &bytes).unwrap();
        u64::from_le_bytes(bytes[..8].try_into().unwrap()) == 640
    });
    assert!(found);

    let report = convert(&source, &dest).unwrap();
    assert_eq!(report.tensors_total, 1);
    assert_eq!(report.tensors_reduced, 1);
    let bytes = std::fs::read(&dest).unwrap();
    let reader = GgufReader::new(&bytes).unwrap();
    assert_eq!(reader.tensor_info("dense/kernel").unwrap().shape, vec![64, 32]);
}
