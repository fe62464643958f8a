//! # moe-core
//!
//! Базовые типы, конфигурация и определения ошибок для GPT-MoE.
//!
//! - Конфигурация модели [`MoeConfig`] и архитектурные константы
//! - Унифицированная обработка ошибок через [`MoeError`]
//! - Поиск файлов модели на диске ([`model_files`])

pub mod config;
pub mod debug;
pub mod error;
pub mod model_files;

pub use config::{
    DEFAULT_LAYER_NORM_EPS, FFN_MULTIPLIER, MoeConfig, NUM_ATTENTION_HEADS, NUM_ENCODER_LAYERS,
};
pub use error::{MoeError, MoeResult};
