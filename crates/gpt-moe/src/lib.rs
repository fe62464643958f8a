//! # gpt-moe
//!
//! GPT-style encoder stack feeding a dense mixture-of-experts layer.
//!
//! ```ignore
//! use candle_core::{Device, Tensor};
//!
//! let device = Device::Cpu;
//! let model = gpt_moe::create_model(4, 64, 10, &device)?;
//! let x = Tensor::randn(0f32, 1f32, (16, 2, 64), &device)?; // [seq_len, batch, hidden]
//! let logits = model.forward(&x)?; // [16, 2, 10]
//! ```

pub mod model;
pub mod moe;

pub use model::{GptMoe, MoeOutput, create_model, forward};
pub use moe::MixtureOfExperts;

pub use moe_core::{MoeConfig, MoeError, MoeResult};
