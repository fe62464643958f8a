//! # gpt-encoder
//!
//! GPT-style transformer encoder for the GPT-MoE model:
//! - Unmasked multi-head self-attention (4 heads, packed Q/K/V projection)
//! - ReLU feed-forward network (H -> 4H -> H)
//! - Residual connections with post-norm LayerNorm
//!
//! Tensors are sequence-first: `[seq_len, batch, hidden_size]`.

pub mod config;
pub mod layers;
pub mod model;

pub use config::EncoderConfig;
pub use layers::{EncoderBlock, FeedForward, LayerNorm, SelfAttention};
pub use model::GptEncoder;
