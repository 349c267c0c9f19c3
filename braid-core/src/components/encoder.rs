//! Named-feature observation encoding. Each feature of a group gets a learned
//! label embedding; the embedding and the feature value run through a shared
//! stack and the per-feature results are summed, so the group encoding is
//! invariant to feature count changes elsewhere in the config.

use super::Component;
use super::stack::{FeedForwardStack, build_stack};
use crate::config::EncoderGroupSpec;
use crate::context::ExecutionContext;
use crate::error::{ConfigurationError, GraphError};
use candle_core::{DType, Tensor};
use candle_nn::init::Init;
use candle_nn::{Module, VarBuilder};
use crate::normalizer::NormalizerSet;

/// Encodes one observation group of named scalar features into a fixed-size
/// vector.
#[derive(Debug)]
pub struct FeatureSetEncoder {
    obs_key: String,
    feature_names: Vec<String>,
    normalize: bool,
    labels: Tensor,
    net: FeedForwardStack,
    num_features: usize,
    input_dim: usize,
    label_dim: usize,
    output_dim: usize,
}

impl FeatureSetEncoder {
    pub fn build(
        layer: &str,
        spec: &EncoderGroupSpec,
        obs_shape: &[usize],
        vb: &VarBuilder,
    ) -> Result<Self, GraphError> {
        let Some(&num_features) = obs_shape.first() else {
            return Err(ConfigurationError::Invalid {
                layer: layer.to_string(),
                reason: format!("observation `{}` has no feature dim", spec.obs_key),
            }
            .into());
        };
        if spec.feature_names.len() != num_features {
            return Err(ConfigurationError::FeatureCountMismatch {
                layer: layer.to_string(),
                names: spec.feature_names.len(),
                features: num_features,
            }
            .into());
        }
        if spec.layers == 0 {
            return Err(ConfigurationError::Invalid {
                layer: layer.to_string(),
                reason: "encoder needs at least one layer".to_string(),
            }
            .into());
        }

        let input_dim: usize = obs_shape[1..].iter().product();
        let vb = vb.pp(&spec.obs_key);
        let labels = vb.get_with_hints(
            (num_features, spec.label_dim),
            "labels",
            Init::Randn {
                mean: 0.,
                stdev: 1.,
            },
        )?;
        let net = build_stack(
            spec.label_dim + input_dim,
            &vec![spec.output_dim; spec.layers],
            &vb,
            "embed",
        )?;
        Ok(Self {
            obs_key: spec.obs_key.clone(),
            feature_names: spec.feature_names.clone(),
            normalize: spec.normalize,
            labels,
            net,
            num_features,
            input_dim,
            label_dim: spec.label_dim,
            output_dim: spec.output_dim,
        })
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn encode(
        &self,
        obs: &Tensor,
        normalizers: Option<&mut NormalizerSet>,
    ) -> Result<Tensor, GraphError> {
        let batch = obs.dim(0)?;
        let obs = obs
            .to_dtype(DType::F32)?
            .reshape((batch, self.num_features, self.input_dim))?;
        let obs = match (self.normalize, normalizers) {
            (true, Some(normalizers)) => normalizers.observe(&self.obs_key, &obs)?,
            _ => obs,
        };
        let labels = self
            .labels
            .unsqueeze(0)?
            .expand((batch, self.num_features, self.label_dim))?
            .contiguous()?;
        let labeled = Tensor::cat(&[labels, obs], 2)?;
        let encoded = self.net.forward(&labeled)?;
        Ok(encoded.sum(1)?)
    }
}

/// Graph node tying together one encoder per observation group and a final
/// projection over their concatenation.
#[derive(Debug)]
pub struct EncoderComponent {
    name: String,
    encoders: Vec<FeatureSetEncoder>,
    merged: FeedForwardStack,
    out_shape: Vec<usize>,
}

impl EncoderComponent {
    pub fn build(
        name: &str,
        groups: &[EncoderGroupSpec],
        group_shapes: Vec<Vec<usize>>,
        output_dim: usize,
        layers: usize,
        vb: &VarBuilder,
    ) -> Result<Self, GraphError> {
        if groups.is_empty() {
            return Err(ConfigurationError::Invalid {
                layer: name.to_string(),
                reason: "encoder requires at least one observation group".to_string(),
            }
            .into());
        }
        if layers == 0 {
            return Err(ConfigurationError::Invalid {
                layer: name.to_string(),
                reason: "encoder needs at least one layer".to_string(),
            }
            .into());
        }
        let vb = vb.pp(name);
        let mut encoders = Vec::with_capacity(groups.len());
        for (spec, shape) in groups.iter().zip(group_shapes) {
            encoders.push(FeatureSetEncoder::build(name, spec, &shape, &vb)?);
        }
        let merged_input: usize = encoders.iter().map(|e| e.output_dim()).sum();
        let merged = build_stack(merged_input, &vec![output_dim; layers], &vb, "merged")?;
        Ok(Self {
            name: name.to_string(),
            encoders,
            merged,
            out_shape: vec![output_dim],
        })
    }
}

impl Component for EncoderComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn out_shape(&self) -> &[usize] {
        &self.out_shape
    }

    fn forward(&self, ctx: &mut ExecutionContext) -> Result<(), GraphError> {
        let mut encoded = Vec::with_capacity(self.encoders.len());
        for encoder in &self.encoders {
            let obs = ctx.require(&encoder.obs_key)?.clone();
            encoded.push(encoder.encode(&obs, ctx.normalizers_mut())?);
        }
        let merged = Tensor::cat(&encoded, 1)?;
        let merged = self.merged.forward(&merged)?;
        ctx.insert(self.name.clone(), merged);
        Ok(())
    }
}
