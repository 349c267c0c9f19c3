//! Assembles the standard recurrent actor-critic topology from an environment
//! description: per-group feature encoders feeding an LSTM core with linear
//! policy and value heads. Lower-level users write the layer list themselves.

use braid_core::config::{EncoderGroupSpec, GraphConfig, LayerKind, LayerSpec};
use braid_core::distributions::DistributionKind;
use braid_core::distributions::categorical_distribution::CategoricalDistribution;
use braid_core::distributions::diagonal_distribution::DiagGaussianDistribution;
use braid_core::error::GraphError;
use braid_core::graph::{ComponentGraph, ObsSpace};
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use std::collections::HashMap;

/// Observation key the recurrent core uses to recover batch and time dims.
pub const CORE_OBS: &str = "obs";
/// Observation key for per-cell grid features, flattened over batch and time.
pub const GRID_OBS: &str = "grid_obs";
/// Observation key for episode-global scalar features.
pub const GLOBAL_VARS: &str = "global_vars";

#[derive(Debug, Clone)]
pub enum Space {
    Discrete(usize),
    Continuous { size: usize },
}

impl Space {
    pub fn size(&self) -> usize {
        match self {
            Self::Discrete(size) => *size,
            Self::Continuous { size } => *size,
        }
    }
}

/// What the environment exposes: named feature groups and an action space.
#[derive(Debug, Clone)]
pub struct EnvDescription {
    pub obs_space: ObsSpace,
    pub grid_features: Vec<String>,
    pub global_features: Vec<String>,
    pub action_space: Space,
}

impl EnvDescription {
    pub fn new(
        grid_features: Vec<String>,
        global_features: Vec<String>,
        action_space: Space,
    ) -> Self {
        let mut obs_space = ObsSpace::new().with(CORE_OBS, vec![grid_features.len()]);
        if !grid_features.is_empty() {
            obs_space = obs_space.with(GRID_OBS, vec![grid_features.len()]);
        }
        if !global_features.is_empty() {
            obs_space = obs_space.with(GLOBAL_VARS, vec![global_features.len()]);
        }
        Self {
            obs_space,
            grid_features,
            global_features,
            action_space,
        }
    }

    pub fn action_size(&self) -> usize {
        self.action_space.size()
    }
}

pub struct PolicyGraphBuilder {
    pub label_dim: usize,
    pub encoder_dim: usize,
    pub encoder_layers: usize,
    pub core_dim: usize,
    pub normalize_features: bool,
}

impl Default for PolicyGraphBuilder {
    fn default() -> Self {
        Self {
            label_dim: 8,
            encoder_dim: 64,
            encoder_layers: 2,
            core_dim: 128,
            normalize_features: true,
        }
    }
}

impl PolicyGraphBuilder {
    fn encoder_groups(&self, env: &EnvDescription) -> Vec<EncoderGroupSpec> {
        let mut groups = vec![];
        for (key, names) in [
            (GRID_OBS, &env.grid_features),
            (GLOBAL_VARS, &env.global_features),
        ] {
            if names.is_empty() {
                continue;
            }
            groups.push(EncoderGroupSpec {
                obs_key: key.to_string(),
                feature_names: names.clone(),
                normalize: self.normalize_features,
                label_dim: self.label_dim,
                output_dim: self.encoder_dim,
                layers: self.encoder_layers,
            });
        }
        groups
    }

    pub fn graph_config(&self, env: &EnvDescription) -> GraphConfig {
        GraphConfig {
            layers: vec![
                LayerSpec {
                    name: "encoded_obs".to_string(),
                    kind: LayerKind::Encoder {
                        groups: self.encoder_groups(env),
                        output_dim: self.encoder_dim,
                        layers: self.encoder_layers,
                    },
                },
                LayerSpec::recurrent("core", "encoded_obs", CORE_OBS, self.core_dim),
                LayerSpec::linear("policy", "core", Some(env.action_size()), None),
                LayerSpec::linear("value", "core", Some(1), None),
            ],
            outputs: vec!["policy".to_string(), "value".to_string()],
        }
    }

    /// Build and set up the graph in one go.
    pub fn build(
        &self,
        env: &EnvDescription,
        vb: &VarBuilder,
    ) -> Result<ComponentGraph, GraphError> {
        let mut graph = ComponentGraph::new(self.graph_config(env), env.obs_space.clone())?;
        graph.setup(vb)?;
        Ok(graph)
    }

    /// A distribution matching the environment's action space, over the
    /// `policy` head.
    pub fn distribution(
        &self,
        env: &EnvDescription,
        vb: &VarBuilder,
        device: &Device,
    ) -> Result<DistributionKind, GraphError> {
        let kind = match env.action_space {
            Space::Discrete(size) => DistributionKind::Categorical(CategoricalDistribution::new(
                size,
                device.clone(),
            )),
            Space::Continuous { size } => DistributionKind::DiagGaussian(
                DiagGaussianDistribution::build(size, &vb.pp("policy_dist"))?,
            ),
        };
        Ok(kind)
    }
}

/// The two heads every builder-made graph declares, with the value column
/// squeezed away.
pub struct PolicyOutputs {
    pub policy: Tensor,
    pub value: Tensor,
}

impl PolicyOutputs {
    pub fn from_map(outputs: &HashMap<String, Tensor>) -> Result<Self, GraphError> {
        let policy = outputs
            .get("policy")
            .ok_or_else(|| braid_core::error::ShapeError::MissingInput("policy".to_string()))?
            .clone();
        let value = outputs
            .get("value")
            .ok_or_else(|| braid_core::error::ShapeError::MissingInput("value".to_string()))?
            .squeeze(1)?;
        Ok(Self { policy, value })
    }
}
