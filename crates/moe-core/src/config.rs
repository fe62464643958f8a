//! Конфигурация модели GPT-MoE.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{MoeError, MoeResult};

/// Number of stacked encoder blocks. Fixed by the architecture.
pub const NUM_ENCODER_LAYERS: usize = 12;

/// Number of self-attention heads in every encoder block.
pub const NUM_ATTENTION_HEADS: usize = 4;

/// Feed-forward expansion factor (`hidden_size -> FFN_MULTIPLIER * hidden_size`).
pub const FFN_MULTIPLIER: usize = 4;

/// Default LayerNorm epsilon.
pub const DEFAULT_LAYER_NORM_EPS: f64 = 1e-5;

fn default_layer_norm_eps() -> f64 {
    DEFAULT_LAYER_NORM_EPS
}

/// Construction parameters of the GPT-MoE model.
///
/// Depth, head count and FFN width are derived from the constants above;
/// only the three outer dimensions are free.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoeConfig {
    /// Number of expert projections in the MoE layer.
    pub num_experts: usize,

    /// Model dimension (hidden size). Must be divisible by [`NUM_ATTENTION_HEADS`].
    pub hidden_size: usize,

    /// Output dimension of the classification head.
    pub num_classes: usize,

    /// LayerNorm epsilon.
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
}

impl MoeConfig {
    /// Конфигурация с eps по умолчанию. Валидация выполняется отдельно.
    pub fn new(num_experts: usize, hidden_size: usize, num_classes: usize) -> Self {
        Self {
            num_experts,
            hidden_size,
            num_classes,
            layer_norm_eps: DEFAULT_LAYER_NORM_EPS,
        }
    }

    /// Check every construction invariant.
    ///
    /// Rejects zero dimensions, a hidden size that does not split across
    /// the attention heads, and a non-positive epsilon.
    pub fn validate(&self) -> MoeResult<()> {
        if self.num_experts == 0 {
            return Err(MoeError::Config(
                "num_experts must be positive: the gated sum over zero experts is undefined".into(),
            ));
        }
        if self.hidden_size == 0 {
            return Err(MoeError::Config("hidden_size must be positive".into()));
        }
        if self.num_classes == 0 {
            return Err(MoeError::Config("num_classes must be positive".into()));
        }
        if self.hidden_size % NUM_ATTENTION_HEADS != 0 {
            return Err(MoeError::Config(format!(
                "hidden_size {} is not divisible by the number of attention heads ({})",
                self.hidden_size, NUM_ATTENTION_HEADS
            )));
        }
        if !(self.layer_norm_eps.is_finite() && self.layer_norm_eps > 0.0) {
            return Err(MoeError::Config(format!(
                "layer_norm_eps must be a positive finite number, got {}",
                self.layer_norm_eps
            )));
        }
        Ok(())
    }

    /// Head dimension.
    pub fn head_dim(&self) -> usize {
        self.hidden_size / NUM_ATTENTION_HEADS
    }

    /// Width of the feed-forward hidden layer.
    pub fn intermediate_size(&self) -> usize {
        self.hidden_size * FFN_MULTIPLIER
    }

    /// Total number of learned scalars.
    pub fn num_parameters(&self) -> usize {
        let h = self.hidden_size;
        let ff = self.intermediate_size();
        let n = self.num_experts;
        let c = self.num_classes;

        let attention = 3 * h * h + 3 * h + h * h + h;
        let norms = 2 * 2 * h;
        let feed_forward = h * ff + ff + ff * h + h;
        let encoder = NUM_ENCODER_LAYERS * (attention + norms + feed_forward);

        let experts = n * (h * h + h);
        let gate = h * n + n;
        let output = h * c + c;

        encoder + experts + gate + output
    }

    /// Load configuration from a JSON file.
    ///
    /// Формат: `{"num_experts": 4, "hidden_size": 64, "num_classes": 10}`,
    /// `layer_norm_eps` необязателен. Результат сразу валидируется.
    pub fn from_json_file(path: impl AsRef<Path>) -> MoeResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration as pretty-printed JSON.
    pub fn to_json_file(&self, path: impl AsRef<Path>) -> MoeResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }
}
