use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::Linear;
use log::info;

use crate::features::FeatureBatch;
use crate::types::ModelInfoResponse;

/// Unified inference abstraction, injected into handlers through `AppState`.
pub trait InferenceEngine: Send + Sync {
    /// Inputs expected per row.
    fn input_width(&self) -> usize;

    fn describe(&self) -> ModelInfoResponse;

    /// One prediction row per input row. Blocking; `AppState` calls it
    /// from a blocking worker thread.
    fn forward(&self, batch: &FeatureBatch) -> Result<Vec<Vec<f32>>>;
}

/// Dense feed-forward regressor loaded from a safetensors artifact.
///
/// Tensors are named `layers.<i>.weight` (`[out, in]`) and
/// `layers.<i>.bias` (`[out]`). Hidden layers go through ReLU, the last
/// one is linear.
pub struct RegressionModel {
    path: PathBuf,
    device: Device,
    layers: Vec<Linear>,
    input_width: usize,
    output_width: usize,
}

#[derive(Default)]
struct LayerParts {
    weight: Option<Tensor>,
    bias: Option<Tensor>,
}

impl RegressionModel {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let device = Device::Cpu;
        let start = Instant::now();

        let tensors = candle_core::safetensors::load(path, &device)
            .with_context(|| format!("failed to read model artifact `{}`", path.display()))?;

        // 1) group tensors by layer index
        let mut parts: BTreeMap<usize, LayerParts> = BTreeMap::new();
        for (name, tensor) in tensors {
            let (index, kind) = parse_tensor_name(&name)
                .ok_or_else(|| anyhow!("unexpected tensor `{name}` in model artifact"))?;
            let tensor = tensor.to_dtype(DType::F32)?;
            let slot = parts.entry(index).or_default();
            match kind {
                "weight" => slot.weight = Some(tensor),
                _ => slot.bias = Some(tensor),
            }
        }

        if parts.is_empty() {
            bail!("model artifact `{}` contains no layers", path.display());
        }

        // 2) check the layer chain and build the linear layers
        let mut layers = Vec::with_capacity(parts.len());
        let mut prev_out: Option<usize> = None;
        for (expected, (index, slot)) in parts.into_iter().enumerate() {
            if index != expected {
                bail!("layer {expected} is missing from the model artifact");
            }
            let weight = slot
                .weight
                .ok_or_else(|| anyhow!("layer {index} has no weight"))?;
            let bias = slot
                .bias
                .ok_or_else(|| anyhow!("layer {index} has no bias"))?;

            let (out_dim, in_dim) = weight
                .dims2()
                .with_context(|| format!("layer {index} weight must be 2-D"))?;
            let bias_len = bias
                .dims1()
                .with_context(|| format!("layer {index} bias must be 1-D"))?;
            if bias_len != out_dim {
                bail!("layer {index} bias has {bias_len} values, weight has {out_dim} outputs");
            }
            if let Some(prev) = prev_out {
                if prev != in_dim {
                    bail!("layer {index} expects {in_dim} inputs, previous layer produces {prev}");
                }
            }

            prev_out = Some(out_dim);
            layers.push(Linear::new(weight, Some(bias)));
        }

        let input_width = layers[0].weight().dims2()?.1;
        let output_width = prev_out.unwrap_or_default();

        info!(
            "loaded model `{}`: {} layers, {} inputs -> {} outputs in {:.2}s",
            path.display(),
            layers.len(),
            input_width,
            output_width,
            start.elapsed().as_secs_f32(),
        );

        Ok(Self {
            path: path.to_path_buf(),
            device,
            layers,
            input_width,
            output_width,
        })
    }

    pub fn output_width(&self) -> usize {
        self.output_width
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }
}

fn parse_tensor_name(name: &str) -> Option<(usize, &str)> {
    let rest = name.strip_prefix("layers.")?;
    let (index, kind) = rest.split_once('.')?;
    let index = index.parse().ok()?;
    matches!(kind, "weight" | "bias").then_some((index, kind))
}

impl InferenceEngine for RegressionModel {
    fn input_width(&self) -> usize {
        self.input_width
    }

    fn describe(&self) -> ModelInfoResponse {
        ModelInfoResponse {
            path: self.path.display().to_string(),
            input_width: self.input_width,
            output_width: self.output_width(),
            layers: self.depth(),
        }
    }

    fn forward(&self, batch: &FeatureBatch) -> Result<Vec<Vec<f32>>> {
        let mut x = batch.to_tensor(&self.device)?;
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(&x)?;
            if i < last {
                x = x.relu()?;
            }
        }
        Ok(x.to_vec2::<f32>()?)
    }
}
