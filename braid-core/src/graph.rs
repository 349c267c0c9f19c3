//! The component graph: a name registry, a one-time shape resolution pass and
//! an iterative forward executor over the declaration-ordered node list.

use crate::components::encoder::EncoderComponent;
use crate::components::linear::{ActivationComponent, LinearComponent};
use crate::components::merge::MergeComponent;
use crate::components::recurrent::RecurrentComponent;
use crate::components::reshape::{CompressComponent, ExpandComponent};
use crate::components::{Component, ComponentKind};
use crate::config::{ExpandSize, GraphConfig, LayerKind, LayerSpec};
use crate::context::ExecutionContext;
use crate::error::{ConfigurationError, GraphError, ShapeError};
use candle_core::Tensor;
use candle_nn::VarBuilder;
use std::collections::{HashMap, HashSet};

/// Observation-space descriptor: named keys mapped to batchless tensor
/// shapes, supplied by the environment.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObsSpace {
    entries: Vec<(String, Vec<usize>)>,
}

impl ObsSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, shape: Vec<usize>) -> Self {
        self.entries.push((key.into(), shape));
        self
    }

    pub fn shape(&self, key: &str) -> Option<&[usize]> {
        self.entries
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, shape)| shape.as_slice())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.shape(key).is_some()
    }
}

/// A policy network assembled from a declarative layer list.
///
/// Construction validates the structure; `setup` resolves every node's output
/// shape (in declaration order, so references can only point backwards) and
/// allocates parameters. Setup is idempotent: once the graph is ready further
/// calls are no-ops. `forward` then runs the materialized plan against a
/// caller-owned context.
#[derive(Debug)]
pub struct ComponentGraph {
    config: GraphConfig,
    obs_space: ObsSpace,
    nodes: Vec<ComponentKind>,
    index: HashMap<String, usize>,
    ready: bool,
}

impl ComponentGraph {
    pub fn new(config: GraphConfig, obs_space: ObsSpace) -> Result<Self, GraphError> {
        let mut seen = HashSet::new();
        for spec in &config.layers {
            if !seen.insert(spec.name.as_str()) {
                return Err(ConfigurationError::DuplicateName(spec.name.clone()).into());
            }
            if obs_space.contains(&spec.name) {
                return Err(ConfigurationError::ShadowsObservation(spec.name.clone()).into());
            }
        }
        for output in &config.outputs {
            if !seen.contains(output.as_str()) {
                return Err(ConfigurationError::UnknownOutput(output.clone()).into());
            }
        }
        Ok(Self {
            config,
            obs_space,
            nodes: Vec::new(),
            index: HashMap::new(),
            ready: false,
        })
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn obs_space(&self) -> &ObsSpace {
        &self.obs_space
    }

    pub fn node(&self, name: &str) -> Option<&ComponentKind> {
        self.index.get(name).map(|idx| &self.nodes[*idx])
    }

    /// Resolved batchless output shape of a node, available once `setup` ran.
    pub fn out_shape(&self, name: &str) -> Option<&[usize]> {
        self.node(name).map(|node| node.out_shape())
    }

    fn source_shape(&self, layer: &str, source: &str) -> Result<Vec<usize>, GraphError> {
        if let Some(idx) = self.index.get(source) {
            return Ok(self.nodes[*idx].out_shape().to_vec());
        }
        if let Some(shape) = self.obs_space.shape(source) {
            return Ok(shape.to_vec());
        }
        Err(ConfigurationError::UnknownSource {
            layer: layer.to_string(),
            source_name: source.to_string(),
        }
        .into())
    }

    fn build_node(&self, spec: &LayerSpec, vb: &VarBuilder) -> Result<ComponentKind, GraphError> {
        let name = spec.name.as_str();
        let node = match &spec.kind {
            LayerKind::Linear {
                source,
                output_size,
                activation,
            } => ComponentKind::Linear(LinearComponent::build(
                name,
                source,
                self.source_shape(name, source)?,
                *output_size,
                *activation,
                vb,
            )?),
            LayerKind::Activation { source, activation } => {
                ComponentKind::Activation(ActivationComponent::build(
                    name,
                    source,
                    self.source_shape(name, source)?,
                    *activation,
                )?)
            }
            LayerKind::Merge { op, sources } => {
                let mut shapes = Vec::with_capacity(sources.len());
                for source in sources {
                    shapes.push(self.source_shape(name, &source.name)?);
                }
                ComponentKind::Merge(MergeComponent::build(name, *op, sources, shapes)?)
            }
            LayerKind::Expand {
                source,
                expand_dim,
                size,
            } => {
                let dims_source_shape = match size {
                    ExpandSize::FromSource { source, .. } => {
                        Some(self.source_shape(name, source)?)
                    }
                    ExpandSize::Fixed(_) => None,
                };
                ComponentKind::Expand(ExpandComponent::build(
                    name,
                    source,
                    self.source_shape(name, source)?,
                    *expand_dim,
                    size,
                    dims_source_shape,
                )?)
            }
            LayerKind::Compress {
                source,
                popped_dim,
                squeezed_dim,
            } => ComponentKind::Compress(CompressComponent::build(
                name,
                source,
                self.source_shape(name, source)?,
                *popped_dim,
                *squeezed_dim,
            )?),
            LayerKind::Recurrent {
                source,
                obs_source,
                hidden_size,
            } => ComponentKind::Recurrent(RecurrentComponent::build(
                name,
                source,
                self.source_shape(name, source)?,
                obs_source,
                self.source_shape(name, obs_source)?,
                *hidden_size,
                vb,
            )?),
            LayerKind::Encoder {
                groups,
                output_dim,
                layers,
            } => {
                let mut shapes = Vec::with_capacity(groups.len());
                for group in groups {
                    shapes.push(self.source_shape(name, &group.obs_key)?);
                }
                ComponentKind::Encoder(EncoderComponent::build(
                    name,
                    groups,
                    shapes,
                    *output_dim,
                    *layers,
                    vb,
                )?)
            }
        };
        Ok(node)
    }

    /// Resolve shapes and allocate parameters for every node, in declaration
    /// order. Deterministic for a given configuration, and a no-op once the
    /// graph is ready.
    pub fn setup(&mut self, vb: &VarBuilder) -> Result<(), GraphError> {
        if self.ready {
            return Ok(());
        }
        for idx in 0..self.config.layers.len() {
            let spec = self.config.layers[idx].clone();
            let node = self.build_node(&spec, vb)?;
            self.index.insert(spec.name.clone(), self.nodes.len());
            self.nodes.push(node);
        }
        self.ready = true;
        Ok(())
    }

    /// Run one forward pass: every node computed exactly once, in declaration
    /// order, reading and writing the shared context. Returns the declared
    /// outputs.
    pub fn forward(
        &self,
        ctx: &mut ExecutionContext,
    ) -> Result<HashMap<String, Tensor>, GraphError> {
        if !self.ready {
            return Err(ConfigurationError::NotReady.into());
        }
        for node in &self.nodes {
            node.forward(ctx)?;
        }
        let mut outputs = HashMap::with_capacity(self.config.outputs.len());
        for name in &self.config.outputs {
            let tensor = ctx
                .get(name)
                .ok_or_else(|| ShapeError::MissingInput(name.clone()))?;
            outputs.insert(name.clone(), tensor.clone());
        }
        Ok(outputs)
    }
}
