//! Dense mixture-of-experts combination.
//!
//! Every expert is evaluated on every position; a softmax gate over the
//! expert axis weights their outputs. There is no top-k selection.

use candle_core::{DType, Tensor};
use candle_nn::{Linear, Module, VarBuilder, linear};
use tracing::debug;

use moe_core::{MoeError, MoeResult};

/// Bank of expert projections plus the gate that mixes them.
///
/// Parameters: `expert_layers.{i}` (H -> H) and `gate_layer` (H -> N).
#[derive(Debug, Clone)]
pub struct MixtureOfExperts {
    experts: Vec<Linear>,
    gate: Linear,
    hidden_size: usize,
}

impl MixtureOfExperts {
    /// Create the MoE stage. `vb` is the model root.
    pub fn new(hidden_size: usize, num_experts: usize, vb: VarBuilder) -> MoeResult<Self> {
        if num_experts == 0 {
            return Err(MoeError::Config(
                "num_experts must be positive: the gated sum over zero experts is undefined".into(),
            ));
        }

        let vb_experts = vb.pp("expert_layers");
        let experts = (0..num_experts)
            .map(|i| linear(hidden_size, hidden_size, vb_experts.pp(i)))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let gate = linear(hidden_size, num_experts, vb.pp("gate_layer"))?;

        Ok(Self {
            experts,
            gate,
            hidden_size,
        })
    }

    fn check_input(&self, encoded: &Tensor) -> MoeResult<()> {
        match encoded.dims() {
            [_, _, h] if *h == self.hidden_size => Ok(()),
            dims => Err(MoeError::Shape(format!(
                "MoE input must be (seq_len, batch, {}), got {:?}",
                self.hidden_size, dims
            ))),
        }
    }

    /// Gate probabilities `[seq_len, batch, num_experts]`; each position sums to 1.
    ///
    /// Always F32, whatever the parameter dtype: в F16/BF16 сумма уходит от 1.
    pub fn gate_probs(&self, encoded: &Tensor) -> MoeResult<Tensor> {
        self.check_input(encoded)?;
        let scores = self.gate.forward(encoded)?.to_dtype(DType::F32)?;
        Ok(candle_nn::ops::softmax_last_dim(&scores)?)
    }

    /// Each expert's projection of `encoded`, in expert order.
    pub fn expert_outputs(&self, encoded: &Tensor) -> MoeResult<Vec<Tensor>> {
        self.check_input(encoded)?;
        let outputs = self
            .experts
            .iter()
            .map(|expert| expert.forward(encoded))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(outputs)
    }

    /// Gate-weighted sum of expert outputs together with the gate probabilities.
    ///
    /// Returns `([seq_len, batch, hidden], [seq_len, batch, num_experts])`; the
    /// combination keeps the parameter dtype, the gate probabilities stay F32.
    pub fn forward_with_gates(&self, encoded: &Tensor) -> MoeResult<(Tensor, Tensor)> {
        let expert_outputs = self.expert_outputs(encoded)?;
        let gate_probs = self.gate_probs(encoded)?;

        let mut combined = encoded.zeros_like()?;
        for (i, expert_output) in expert_outputs.iter().enumerate() {
            // [T, B, 1] broadcast across the hidden axis, in the expert dtype.
            let weight = gate_probs.narrow(2, i, 1)?.to_dtype(expert_output.dtype())?;
            combined = (combined + expert_output.broadcast_mul(&weight)?)?;
        }

        debug!(
            num_experts = self.experts.len(),
            shape = ?combined.dims(),
            "MoE combination"
        );
        Ok((combined, gate_probs))
    }

    /// Gate-weighted sum of expert outputs, `[seq_len, batch, hidden]`.
    pub fn forward(&self, encoded: &Tensor) -> MoeResult<Tensor> {
        Ok(self.forward_with_gates(encoded)?.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;
    use std::collections::HashMap;

    fn tensors_for(
        expert_scales: &[f32],
        gate_bias: &[f32],
        hidden_size: usize,
    ) -> HashMap<String, Tensor> {
        let device = Device::Cpu;
        let n = expert_scales.len();
        let mut tensors = HashMap::new();
        for (i, scale) in expert_scales.iter().enumerate() {
            let w = (Tensor::eye(hidden_size, DType::F32, &device).unwrap() * *scale as f64)
                .unwrap();
            tensors.insert(format!("expert_layers.{i}.weight"), w);
            tensors.insert(
                format!("expert_layers.{i}.bias"),
                Tensor::zeros(hidden_size, DType::F32, &device).unwrap(),
            );
        }
        tensors.insert(
            "gate_layer.weight".to_string(),
            Tensor::zeros((n, hidden_size), DType::F32, &device).unwrap(),
        );
        tensors.insert(
            "gate_layer.bias".to_string(),
            Tensor::new(gate_bias, &device).unwrap(),
        );
        tensors
    }

    #[test]
    fn test_zero_experts_rejected() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let err = MixtureOfExperts::new(8, 0, vb).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_gated_sum_uses_softmax_weights() {
        // Expert 0 doubles, expert 1 negates; gate logits [ln 3, 0] -> probs [0.75, 0.25].
        let tensors = tensors_for(&[2.0, -1.0], &[3f32.ln(), 0.0], 4);
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &Device::Cpu);
        let moe = MixtureOfExperts::new(4, 2, vb).unwrap();

        let x = Tensor::new(&[[[1f32, -2., 3., 4.]]], &Device::Cpu).unwrap();
        let (combined, probs) = moe.forward_with_gates(&x).unwrap();

        let probs: Vec<f32> = probs.flatten_all().unwrap().to_vec1().unwrap();
        assert!((probs[0] - 0.75).abs() < 1e-6);
        assert!((probs[1] - 0.25).abs() < 1e-6);

        // 0.75 * 2x + 0.25 * (-x) = 1.25x
        let combined: Vec<f32> = combined.flatten_all().unwrap().to_vec1().unwrap();
        for (got, x) in combined.iter().zip([1f32, -2., 3., 4.]) {
            assert!((got - 1.25 * x).abs() < 1e-5, "{got} vs {}", 1.25 * x);
        }
    }

    #[test]
    fn test_expert_outputs_are_dense() {
        let tensors = tensors_for(&[1.0, 2.0, 3.0], &[0.0, 0.0, 0.0], 4);
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &Device::Cpu);
        let moe = MixtureOfExperts::new(4, 3, vb).unwrap();

        let x = Tensor::ones((2, 3, 4), DType::F32, &Device::Cpu).unwrap();
        let outputs = moe.expert_outputs(&x).unwrap();
        assert_eq!(outputs.len(), 3);
        for (i, out) in outputs.iter().enumerate() {
            assert_eq!(out.dims(), &[2, 3, 4]);
            let v: Vec<f32> = out.flatten_all().unwrap().to_vec1().unwrap();
            assert!(v.iter().all(|&x| x == (i + 1) as f32));
        }
    }

    #[test]
    fn test_shape_mismatch() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let moe = MixtureOfExperts::new(8, 2, vb).unwrap();

        let x = Tensor::zeros((2, 3, 4), DType::F32, &Device::Cpu).unwrap();
        assert!(moe.forward(&x).unwrap_err().is_shape());
        assert!(moe.gate_probs(&x).unwrap_err().is_shape());
    }
}
