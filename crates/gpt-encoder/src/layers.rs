//! Neural network layers for the GPT encoder.
//!
//! Parameter names follow the PyTorch `GPTEncoder` state dict:
//! - `self_attention.in_proj_weight` / `in_proj_bias` (packed Q/K/V) and `self_attention.out_proj`
//! - `layer_norm1`, `layer_norm2` with weight and bias
//! - `feed_forward.0` (H -> 4H), ReLU, `feed_forward.2` (4H -> H)
//! - Post-norm architecture

use candle_core::{D, DType, Result, Tensor};
use candle_nn::{Init, Linear, Module, VarBuilder, linear};

use crate::config::EncoderConfig;

/// Checks that `x` is `(seq_len, batch, hidden_size)`; returns `(seq_len, batch)`.
fn expect_seq_batch_hidden(x: &Tensor, hidden_size: usize, op: &str) -> Result<(usize, usize)> {
    if x.rank() != 3 {
        candle_core::bail!(
            "{op}: expected input of shape (seq_len, batch, {hidden_size}), got {:?}",
            x.dims()
        );
    }
    let (seq_len, batch_size, hidden) = x.dims3()?;
    if hidden != hidden_size {
        candle_core::bail!(
            "{op}: last axis is {hidden}, expected hidden_size {hidden_size} (input shape {:?})",
            x.dims()
        );
    }
    Ok((seq_len, batch_size))
}

/// LayerNorm layer with learnable weight and bias.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl LayerNorm {
    /// Create a new LayerNorm layer. Fresh parameters start at scale 1, shift 0.
    pub fn new(hidden_size: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints((hidden_size,), "weight", Init::Const(1.0))?;
        let bias = vb.get_with_hints((hidden_size,), "bias", Init::Const(0.0))?;
        Ok(Self { weight, bias, eps })
    }

    /// Apply LayerNorm over the last axis.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        // Статистики считаем в float32, затем каст обратно.
        let input_dtype = x.dtype();
        let x_f32 = x.to_dtype(DType::F32)?;

        let mean = x_f32.mean_keepdim(D::Minus1)?;
        let x_centered = x_f32.broadcast_sub(&mean)?;
        let variance = x_centered.sqr()?.mean_keepdim(D::Minus1)?;
        let x_normed = x_centered.broadcast_div(&(variance + self.eps)?.sqrt()?)?;
        let x_normed = x_normed.to_dtype(input_dtype)?;

        let w = if self.weight.dtype() != input_dtype {
            self.weight.to_dtype(input_dtype)?
        } else {
            self.weight.clone()
        };
        let b = if self.bias.dtype() != input_dtype {
            self.bias.to_dtype(input_dtype)?
        } else {
            self.bias.clone()
        };
        x_normed.broadcast_mul(&w)?.broadcast_add(&b)
    }
}

/// Multi-head self-attention, unmasked.
///
/// Query, key and value are all the layer input. Projections come from the
/// packed `in_proj_weight [3H, H]` / `in_proj_bias [3H]`, rows ordered Q, K, V.
#[derive(Debug, Clone)]
pub struct SelfAttention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
    num_heads: usize,
    head_dim: usize,
    hidden_size: usize,
}

impl SelfAttention {
    /// Create a new attention layer.
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let hidden_size = config.hidden_size;
        let num_heads = config.num_attention_heads;
        if num_heads == 0 || hidden_size % num_heads != 0 {
            candle_core::bail!(
                "hidden_size {hidden_size} is not divisible by num_attention_heads {num_heads}"
            );
        }
        let head_dim = config.head_dim();

        // xavier_uniform для packed-проекции, как в nn.MultiheadAttention.
        let bound = (6.0 / (hidden_size + 3 * hidden_size) as f64).sqrt();
        let in_proj_weight = vb.get_with_hints(
            (3 * hidden_size, hidden_size),
            "in_proj_weight",
            Init::Uniform {
                lo: -bound,
                up: bound,
            },
        )?;
        let in_proj_bias =
            vb.get_with_hints((3 * hidden_size,), "in_proj_bias", Init::Const(0.0))?;

        let split = |idx: usize| -> Result<Linear> {
            let w = in_proj_weight.narrow(0, idx * hidden_size, hidden_size)?;
            let b = in_proj_bias.narrow(0, idx * hidden_size, hidden_size)?;
            Ok(Linear::new(w, Some(b)))
        };
        let q_proj = split(0)?;
        let k_proj = split(1)?;
        let v_proj = split(2)?;
        let out_proj = linear(hidden_size, hidden_size, vb.pp("out_proj"))?;

        Ok(Self {
            q_proj,
            k_proj,
            v_proj,
            out_proj,
            num_heads,
            head_dim,
            hidden_size,
        })
    }

    /// Forward pass: `[seq_len, batch, hidden]` -> `[seq_len, batch, hidden]`.
    pub fn forward(&self, hidden_states: &Tensor) -> Result<Tensor> {
        let (seq_len, batch_size) =
            expect_seq_batch_hidden(hidden_states, self.hidden_size, "self_attention")?;

        // Sequence-first -> batch-first для батчевого matmul.
        let x = hidden_states.transpose(0, 1)?.contiguous()?;

        let q = self.q_proj.forward(&x)?;
        let k = self.k_proj.forward(&x)?;
        let v = self.v_proj.forward(&x)?;

        // Reshape to [batch, num_heads, seq_len, head_dim]
        let q = q
            .reshape((batch_size, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let k = k
            .reshape((batch_size, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let v = v
            .reshape((batch_size, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;

        // Scaled dot-product attention
        let scale = (self.head_dim as f64).sqrt();
        let attn_weights = (q.matmul(&k.transpose(2, 3)?)? / scale)?;

        let attn_f32 = attn_weights.to_dtype(DType::F32)?;
        let attn_weights =
            candle_nn::ops::softmax_last_dim(&attn_f32)?.to_dtype(attn_weights.dtype())?;

        let attn_output = attn_weights.matmul(&v)?;

        // Back to [batch, seq_len, hidden_size]
        let attn_output = attn_output.transpose(1, 2)?.contiguous()?.reshape((
            batch_size,
            seq_len,
            self.num_heads * self.head_dim,
        ))?;

        self.out_proj
            .forward(&attn_output)?
            .transpose(0, 1)?
            .contiguous()
    }
}

/// Position-wise feed-forward network.
///
/// Structure: `feed_forward.0` -> ReLU -> `feed_forward.2`
#[derive(Debug, Clone)]
pub struct FeedForward {
    fc1: Linear,
    fc2: Linear,
}

impl FeedForward {
    /// Create a new FFN layer.
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let hidden_size = config.hidden_size;
        let intermediate_size = config.intermediate_size;

        // Индексы 0 и 2: nn.Sequential(Linear, ReLU, Linear).
        let fc1 = linear(hidden_size, intermediate_size, vb.pp("0"))?;
        let fc2 = linear(intermediate_size, hidden_size, vb.pp("2"))?;

        Ok(Self { fc1, fc2 })
    }

    /// Forward pass with ReLU activation.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let hidden = self.fc1.forward(x)?;
        let hidden = hidden.relu()?;
        self.fc2.forward(&hidden)
    }
}

/// Transformer encoder block.
///
/// Post-norm:
/// - `layer_norm1(x + self_attention(x))`
/// - `layer_norm2(h + feed_forward(h))`
#[derive(Debug, Clone)]
pub struct EncoderBlock {
    self_attention: SelfAttention,
    feed_forward: FeedForward,
    layer_norm1: LayerNorm,
    layer_norm2: LayerNorm,
    hidden_size: usize,
}

impl EncoderBlock {
    /// Create a new encoder block.
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let self_attention = SelfAttention::new(config, vb.pp("self_attention"))?;
        let layer_norm1 =
            LayerNorm::new(config.hidden_size, config.layer_norm_eps, vb.pp("layer_norm1"))?;
        let feed_forward = FeedForward::new(config, vb.pp("feed_forward"))?;
        let layer_norm2 =
            LayerNorm::new(config.hidden_size, config.layer_norm_eps, vb.pp("layer_norm2"))?;

        Ok(Self {
            self_attention,
            feed_forward,
            layer_norm1,
            layer_norm2,
            hidden_size: config.hidden_size,
        })
    }

    /// Forward pass: `[seq_len, batch, hidden]` -> same shape.
    pub fn forward(&self, hidden_states: &Tensor) -> Result<Tensor> {
        expect_seq_batch_hidden(hidden_states, self.hidden_size, "encoder_block")?;

        // Self-attention block
        let attended = self.self_attention.forward(hidden_states)?;
        let hidden_states = self.layer_norm1.forward(&(attended + hidden_states)?)?;

        // FFN block
        let ff_output = self.feed_forward.forward(&hidden_states)?;
        self.layer_norm2.forward(&(ff_output + &hidden_states)?)
    }
}
