//! Configuration for the GPT encoder stack.

use moe_core::{FFN_MULTIPLIER, MoeConfig, NUM_ATTENTION_HEADS, NUM_ENCODER_LAYERS};

/// Configuration for the encoder stack.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    /// Model dimension (hidden size).
    pub hidden_size: usize,

    /// Number of encoder blocks.
    pub num_layers: usize,

    /// Number of attention heads.
    pub num_attention_heads: usize,

    /// Feed-forward network intermediate dimension.
    pub intermediate_size: usize,

    /// Layer normalization epsilon.
    pub layer_norm_eps: f64,
}

impl EncoderConfig {
    /// Encoder geometry used by GPT-MoE for a given hidden size:
    /// 12 blocks, 4 heads, FFN width `4 * hidden_size`.
    pub fn for_hidden_size(hidden_size: usize) -> Self {
        Self {
            hidden_size,
            num_layers: NUM_ENCODER_LAYERS,
            num_attention_heads: NUM_ATTENTION_HEADS,
            intermediate_size: FFN_MULTIPLIER * hidden_size,
            layer_norm_eps: moe_core::DEFAULT_LAYER_NORM_EPS,
        }
    }

    /// Head dimension.
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }
}

impl From<&MoeConfig> for EncoderConfig {
    fn from(config: &MoeConfig) -> Self {
        Self {
            layer_norm_eps: config.layer_norm_eps,
            ..Self::for_hidden_size(config.hidden_size)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry() {
        let config = EncoderConfig::for_hidden_size(64);
        assert_eq!(config.num_layers, 12);
        assert_eq!(config.num_attention_heads, 4);
        assert_eq!(config.intermediate_size, 256);
        assert_eq!(config.head_dim(), 16);
    }

    #[test]
    fn test_from_moe_config_keeps_eps() {
        let mut moe = MoeConfig::new(2, 8, 3);
        moe.layer_norm_eps = 1e-6;
        let config = EncoderConfig::from(&moe);
        assert_eq!(config.hidden_size, 8);
        assert_eq!(config.layer_norm_eps, 1e-6);
    }
}
