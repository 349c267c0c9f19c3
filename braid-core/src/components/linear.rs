use super::Component;
use crate::context::ExecutionContext;
use crate::error::{ConfigurationError, GraphError};
use candle_nn::{Activation, Linear, Module, VarBuilder, linear};

/// A linear projection over the last dim of its source, with an optional
/// nonlinearity. Omitted `output_size` keeps the input size.
#[derive(Debug)]
pub struct LinearComponent {
    name: String,
    source: String,
    layer: Linear,
    activation: Option<Activation>,
    out_shape: Vec<usize>,
}

impl LinearComponent {
    pub fn build(
        name: &str,
        source: &str,
        source_shape: Vec<usize>,
        output_size: Option<usize>,
        activation: Option<Activation>,
        vb: &VarBuilder,
    ) -> Result<Self, GraphError> {
        let Some(&input_size) = source_shape.last() else {
            return Err(ConfigurationError::Invalid {
                layer: name.to_string(),
                reason: format!("source `{source}` has no feature dim"),
            }
            .into());
        };
        let output_size = output_size.unwrap_or(input_size);
        let layer = linear(input_size, output_size, vb.pp(name))?;
        let mut out_shape = source_shape;
        let feature_dim = out_shape.len() - 1;
        out_shape[feature_dim] = output_size;
        Ok(Self {
            name: name.to_string(),
            source: source.to_string(),
            layer,
            activation,
            out_shape,
        })
    }
}

impl Component for LinearComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn out_shape(&self) -> &[usize] {
        &self.out_shape
    }

    fn forward(&self, ctx: &mut ExecutionContext) -> Result<(), GraphError> {
        let x = ctx.require(&self.source)?.clone();
        let mut x = self.layer.forward(&x)?;
        if let Some(activation) = self.activation {
            x = activation.forward(&x)?;
        }
        ctx.insert(self.name.clone(), x);
        Ok(())
    }
}

/// A standalone nonlinearity, shape preserving.
#[derive(Debug)]
pub struct ActivationComponent {
    name: String,
    source: String,
    activation: Activation,
    out_shape: Vec<usize>,
}

impl ActivationComponent {
    pub fn build(
        name: &str,
        source: &str,
        source_shape: Vec<usize>,
        activation: Activation,
    ) -> Result<Self, GraphError> {
        Ok(Self {
            name: name.to_string(),
            source: source.to_string(),
            activation,
            out_shape: source_shape,
        })
    }
}

impl Component for ActivationComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn out_shape(&self) -> &[usize] {
        &self.out_shape
    }

    fn forward(&self, ctx: &mut ExecutionContext) -> Result<(), GraphError> {
        let x = ctx.require(&self.source)?.clone();
        let x = self.activation.forward(&x)?;
        ctx.insert(self.name.clone(), x);
        Ok(())
    }
}
