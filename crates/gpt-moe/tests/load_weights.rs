//! Integration tests for loading a model directory (config.json + safetensors).

use candle_core::{Device, Tensor};
use gpt_moe::{GptMoe, MoeError, create_model};

fn flat(t: &Tensor) -> Vec<f32> {
    t.flatten_all().unwrap().to_vec1().unwrap()
}

fn assert_close(a: &[f32], b: &[f32]) {
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b) {
        assert!((x - y).abs() < 1e-6, "{x} vs {y}");
    }
}

#[test]
fn test_model_dir_roundtrip_matches_fresh_model() {
    let device = Device::Cpu;
    let dir = tempfile::tempdir().unwrap();

    let model = create_model(3, 8, 4, &device).unwrap();
    model.config().to_json_file(dir.path().join("config.json")).unwrap();
    model
        .varmap()
        .expect("fresh model owns its parameters")
        .save(dir.path().join("model.safetensors"))
        .unwrap();

    let loaded = GptMoe::from_model_dir(dir.path(), &device).unwrap();
    assert_eq!(loaded.config(), model.config());
    assert!(loaded.varmap().is_none());

    let x = Tensor::randn(0f32, 1f32, (4, 2, 8), &device).unwrap();
    assert_close(&flat(&model.forward(&x).unwrap()), &flat(&loaded.forward(&x).unwrap()));
}

#[test]
fn test_missing_config() {
    let dir = tempfile::tempdir().unwrap();
    let err = GptMoe::from_model_dir(dir.path(), &Device::Cpu).unwrap_err();
    assert!(matches!(err, MoeError::Model(_)), "unexpected error: {err}");
}

#[test]
fn test_invalid_config_in_model_dir() {
    let dir = tempfile::tempdir().unwrap();
    let config = serde_json::json!({"num_experts": 2, "hidden_size": 10, "num_classes": 3});
    std::fs::write(dir.path().join("config.json"), config.to_string()).unwrap();
    // Конфиг проверяется до чтения весов.
    std::fs::write(dir.path().join("model.safetensors"), b"").unwrap();

    let err = GptMoe::from_model_dir(dir.path(), &Device::Cpu).unwrap_err();
    assert!(err.is_config(), "unexpected error: {err}");
}

#[test]
fn test_missing_weights_in_model_dir() {
    let dir = tempfile::tempdir().unwrap();
    let model = create_model(2, 8, 3, &Device::Cpu).unwrap();
    model.config().to_json_file(dir.path().join("config.json")).unwrap();

    let err = GptMoe::from_model_dir(dir.path(), &Device::Cpu).unwrap_err();
    assert!(matches!(err, MoeError::Model(_)), "unexpected error: {err}");
    assert!(err.to_string().contains("model.safetensors"), "{err}");
}

#[test]
fn test_from_safetensors_explicit_path() {
    let device = Device::Cpu;
    let dir = tempfile::tempdir().unwrap();
    let weights = dir.path().join("checkpoint-final.safetensors");

    let model = create_model(2, 8, 3, &device).unwrap();
    let varmap = model.varmap().expect("fresh model owns its parameters");
    varmap.save(&weights).unwrap();

    let config = model.config().clone();
    let loaded = GptMoe::from_safetensors(config, &[&weights], &device).unwrap();
    let x = Tensor::randn(0f32, 1f32, (3, 1, 8), &device).unwrap();
    assert_close(&flat(&model.forward(&x).unwrap()), &flat(&loaded.forward(&x).unwrap()));
}
