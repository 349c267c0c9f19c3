use candle_core::{Result, Tensor};
use candle_nn::{Activation, Linear, Module, VarBuilder, linear};

/// A plain linear stack with an activation between layers and none after the
/// last. Built from concrete layers rather than `candle_nn::Sequential` so it
/// stays `Debug` and `Sync`.
#[derive(Debug, Clone)]
pub struct FeedForwardStack {
    layers: Vec<Linear>,
    activation: Activation,
}

impl Module for FeedForwardStack {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut xs = xs.clone();
        let last = self.layers.len().saturating_sub(1);
        for (idx, layer) in self.layers.iter().enumerate() {
            xs = layer.forward(&xs)?;
            if idx != last {
                xs = self.activation.forward(&xs)?;
            }
        }
        Ok(xs)
    }
}

pub fn build_stack(
    input_dim: usize,
    layers: &[usize],
    vb: &VarBuilder,
    prefix: &str,
) -> Result<FeedForwardStack> {
    let mut last_dim = input_dim;
    let mut built = Vec::with_capacity(layers.len());
    for (layer_idx, layer_size) in layers.iter().enumerate() {
        let layer_pp = format!("{prefix}{layer_idx}");
        built.push(linear(last_dim, *layer_size, vb.pp(layer_pp))?);
        last_dim = *layer_size;
    }
    Ok(FeedForwardStack {
        layers: built,
        activation: Activation::Relu,
    })
}
