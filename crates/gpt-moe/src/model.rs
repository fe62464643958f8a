//! GPT-MoE model: encoder stack -> dense mixture of experts -> classifier head.

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::{Linear, Module, VarBuilder, VarMap, linear};
use tracing::{debug, info};

use gpt_encoder::{EncoderConfig, GptEncoder};
use moe_core::model_files::ModelFiles;
use moe_core::{MoeConfig, MoeError, MoeResult};

use crate::moe::MixtureOfExperts;

/// Result of a forward pass that also exposes the routing decision.
#[derive(Debug, Clone)]
pub struct MoeOutput {
    /// Class logits, `[seq_len, batch, num_classes]`.
    pub logits: Tensor,

    /// Gate probabilities, `[seq_len, batch, num_experts]`, always F32.
    pub gate_probs: Tensor,
}

impl MoeOutput {
    /// Mean gate probability of each expert over all positions.
    ///
    /// Сумма по экспертам равна 1 (с точностью до float).
    pub fn expert_load(&self) -> MoeResult<Vec<f32>> {
        let num_experts = self.gate_probs.dim(2)?;
        let load = self
            .gate_probs
            .to_dtype(DType::F32)?
            .reshape(((), num_experts))?
            .mean(0)?
            .to_vec1::<f32>()?;
        Ok(load)
    }
}

/// GPT encoder stack followed by a softmax-gated mixture of experts.
///
/// Structure (PyTorch parameter names):
/// 1. `encoder_layers.{0..12}` — post-norm encoder blocks
/// 2. `expert_layers.{0..N}` — N linear experts (H -> H), evaluated densely
/// 3. `gate_layer` — H -> N, softmax over experts
/// 4. `output_layer` — H -> num_classes
///
/// Stateless between calls: the output depends only on the input and the parameters.
#[derive(Clone)]
pub struct GptMoe {
    config: MoeConfig,
    encoder: GptEncoder,
    moe: MixtureOfExperts,
    output_layer: Linear,
    device: Device,
    dtype: DType,
    varmap: Option<VarMap>,
}

impl std::fmt::Debug for GptMoe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GptMoe")
            .field("config", &self.config)
            .field("encoder", &self.encoder)
            .field("moe", &self.moe)
            .field("output_layer", &self.output_layer)
            .field("device", &self.device)
            .field("dtype", &self.dtype)
            .finish_non_exhaustive()
    }
}

impl GptMoe {
    /// Build the model from a VarBuilder rooted at the model's parameter namespace.
    pub fn new(config: MoeConfig, vb: VarBuilder) -> MoeResult<Self> {
        config.validate()?;

        let encoder = GptEncoder::new(&EncoderConfig::from(&config), vb.pp("encoder_layers"))?;
        let moe = MixtureOfExperts::new(config.hidden_size, config.num_experts, vb.clone())?;
        let output_layer = linear(config.hidden_size, config.num_classes, vb.pp("output_layer"))?;

        Ok(Self {
            device: vb.device().clone(),
            dtype: vb.dtype(),
            config,
            encoder,
            moe,
            output_layer,
            varmap: None,
        })
    }

    /// Build a model with freshly initialized parameters.
    ///
    /// Parameters live in a [`VarMap`] owned by the model, see [`GptMoe::varmap`].
    pub fn create(config: MoeConfig, device: &Device) -> MoeResult<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let mut model = Self::new(config, vb)?;

        info!(
            num_experts = model.config.num_experts,
            hidden_size = model.config.hidden_size,
            num_classes = model.config.num_classes,
            num_parameters = model.config.num_parameters(),
            "GptMoe: created with fresh parameters"
        );

        model.varmap = Some(varmap);
        Ok(model)
    }

    /// Load the model from explicit safetensors files (обычно один `model.safetensors`).
    pub fn from_safetensors<P: AsRef<Path>>(
        config: MoeConfig,
        paths: &[P],
        device: &Device,
    ) -> MoeResult<Self> {
        config.validate()?;

        // F32 на CPU, BF16 на GPU.
        let dtype = if device.is_metal() || device.is_cuda() {
            DType::BF16
        } else {
            DType::F32
        };

        info!(files = paths.len(), ?dtype, "GptMoe: loading safetensors weights");
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(paths, dtype, device)? };
        Self::new(config, vb)
    }

    /// Load `config.json` and the safetensors weights from a model directory.
    pub fn from_model_dir(model_dir: impl AsRef<Path>, device: &Device) -> MoeResult<Self> {
        let model_dir = model_dir.as_ref();
        info!("GptMoe: loading model from {:?}", model_dir);

        let files = ModelFiles::locate(model_dir)?;
        let config = MoeConfig::from_json_file(&files.config)?;
        Self::from_safetensors(config, &[files.weights], device)
    }

    fn check_input(&self, x: &Tensor) -> MoeResult<()> {
        let dims = x.dims();
        let [seq_len, batch_size, hidden] = dims else {
            return Err(MoeError::Shape(format!(
                "input must have rank 3 (seq_len, batch, {}), got shape {:?}",
                self.config.hidden_size, dims
            )));
        };
        if *seq_len == 0 || *batch_size == 0 {
            return Err(MoeError::Shape(format!(
                "input must have at least one position and one batch entry, got shape {:?}",
                dims
            )));
        }
        if *hidden != self.config.hidden_size {
            return Err(MoeError::Shape(format!(
                "input last axis is {}, model hidden_size is {}",
                hidden, self.config.hidden_size
            )));
        }
        Ok(())
    }

    /// Run the encoder stack only: `[T, B, H]` -> `[T, B, H]`.
    pub fn encode(&self, x: &Tensor) -> MoeResult<Tensor> {
        self.check_input(x)?;

        let x = x.to_device(&self.device)?;
        let x = if x.dtype() != self.dtype {
            x.to_dtype(self.dtype)?
        } else {
            x
        };
        Ok(self.encoder.forward(&x)?)
    }

    /// Forward pass returning logits and gate probabilities.
    pub fn forward_with_gates(&self, x: &Tensor) -> MoeResult<MoeOutput> {
        let encoded = self.encode(x)?;
        let (combined, gate_probs) = self.moe.forward_with_gates(&encoded)?;
        let logits = self.output_layer.forward(&combined)?;

        debug!(input = ?x.dims(), output = ?logits.dims(), "GptMoe forward");
        Ok(MoeOutput { logits, gate_probs })
    }

    /// Forward pass: `[seq_len, batch, hidden_size]` -> `[seq_len, batch, num_classes]`.
    pub fn forward(&self, x: &Tensor) -> MoeResult<Tensor> {
        Ok(self.forward_with_gates(x)?.logits)
    }

    /// Get the configuration.
    pub fn config(&self) -> &MoeConfig {
        &self.config
    }

    /// Device holding the parameters.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Parameter dtype.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Trainable parameters, when the model was built by [`GptMoe::create`].
    pub fn varmap(&self) -> Option<&VarMap> {
        self.varmap.as_ref()
    }
}

/// Build a GPT-MoE model with fresh parameters.
///
/// Fails with [`MoeError::Config`] when a dimension is zero or `hidden_size`
/// is not a multiple of the attention head count.
pub fn create_model(
    num_experts: usize,
    hidden_size: usize,
    num_classes: usize,
    device: &Device,
) -> MoeResult<GptMoe> {
    GptMoe::create(MoeConfig::new(num_experts, hidden_size, num_classes), device)
}

/// Run a forward pass; see [`GptMoe::forward`].
pub fn forward(model: &GptMoe, input: &Tensor) -> MoeResult<Tensor> {
    model.forward(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_model_keeps_varmap() {
        let model = create_model(2, 8, 3, &Device::Cpu).unwrap();
        let varmap = model.varmap().expect("fresh model owns its parameters");

        let total: usize = varmap.all_vars().iter().map(|v| v.elem_count()).sum();
        assert_eq!(total, model.config().num_parameters());
    }

    #[test]
    fn test_rank_and_empty_axes_rejected() {
        let model = create_model(2, 8, 3, &Device::Cpu).unwrap();

        let x = Tensor::zeros((4, 8), DType::F32, &Device::Cpu).unwrap();
        assert!(model.forward(&x).unwrap_err().is_shape());

        let x = Tensor::zeros((0, 2, 8), DType::F32, &Device::Cpu).unwrap();
        assert!(model.forward(&x).unwrap_err().is_shape());
    }

    #[test]
    fn test_expert_load_sums_to_one() {
        let model = create_model(3, 8, 3, &Device::Cpu).unwrap();
        let x = Tensor::randn(0f32, 1f32, (5, 2, 8), &Device::Cpu).unwrap();

        let load = model.forward_with_gates(&x).unwrap().expert_load().unwrap();
        assert_eq!(load.len(), 3);
        assert!((load.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }
}
