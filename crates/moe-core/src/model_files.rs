//! Раскладка директории модели: `config.json` + `model.safetensors`.
//!
//! Модель целиком помещается в один файл весов, шардирование не нужно.

use std::path::{Path, PathBuf};

use crate::{MoeError, MoeResult};

/// Имя файла конфигурации в директории модели.
pub const CONFIG_FILE: &str = "config.json";

/// Имя файла весов в директории модели.
pub const WEIGHTS_FILE: &str = "model.safetensors";

/// Пути к файлам модели в директории.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub weights: PathBuf,
}

impl ModelFiles {
    /// Найти `config.json` и `model.safetensors`; ошибка перечисляет всё, чего нет.
    pub fn locate(model_dir: impl AsRef<Path>) -> MoeResult<Self> {
        let model_dir = model_dir.as_ref();
        match (find_config(model_dir), find_weights(model_dir)) {
            (Some(config), Some(weights)) => Ok(Self { config, weights }),
            (config, weights) => {
                let missing: Vec<&str> = [
                    config.is_none().then_some(CONFIG_FILE),
                    weights.is_none().then_some(WEIGHTS_FILE),
                ]
                .into_iter()
                .flatten()
                .collect();
                Err(MoeError::Model(format!(
                    "{} not found in {}",
                    missing.join(", "),
                    model_dir.display()
                )))
            }
        }
    }
}

/// Путь к `config.json`, если он есть в директории модели.
pub fn find_config(model_dir: impl AsRef<Path>) -> Option<PathBuf> {
    existing_file(model_dir.as_ref().join(CONFIG_FILE))
}

/// Путь к `model.safetensors`, если он есть в директории модели.
pub fn find_weights(model_dir: impl AsRef<Path>) -> Option<PathBuf> {
    existing_file(model_dir.as_ref().join(WEIGHTS_FILE))
}

fn existing_file(p: PathBuf) -> Option<PathBuf> {
    p.is_file().then_some(p)
}
