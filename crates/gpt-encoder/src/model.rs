//! GPT encoder stack.

use candle_core::{DType, Result, Tensor};
use candle_nn::VarBuilder;
use tracing::debug;

use crate::config::EncoderConfig;
use crate::layers::EncoderBlock;

/// Stack of post-norm encoder blocks applied in sequence.
///
/// Input and output are `[seq_len, batch, hidden_size]`.
#[derive(Debug, Clone)]
pub struct GptEncoder {
    layers: Vec<EncoderBlock>,
}

impl GptEncoder {
    /// Create the encoder; block `i` reads its parameters from `vb.pp(i)`.
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let mut layers = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            layers.push(EncoderBlock::new(config, vb.pp(i))?);
        }
        Ok(Self { layers })
    }

    /// Forward pass through every block.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let debug = moe_core::debug::enabled();

        let mut hidden_states = x.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            hidden_states = layer.forward(&hidden_states)?;

            if debug {
                let h = hidden_states.to_dtype(DType::F32)?;
                let mean = h.mean_all()?.to_scalar::<f32>()?;
                let absmax = h.abs()?.max_all()?.to_scalar::<f32>()?;
                debug!(layer = i, mean, absmax, "encoder block output");
            }
        }
        Ok(hidden_states)
    }

    /// Number of encoder blocks.
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}
