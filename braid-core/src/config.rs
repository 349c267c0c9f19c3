//! Declarative description of a component graph. An external loader (JSON,
//! YAML, anything serde speaks when the `serde` feature is on) produces these
//! records; the crate itself never touches files.

use candle_nn::Activation;

/// An ordered layer list plus the names whose tensors a forward pass returns.
/// Declaration order doubles as the topological order: a layer may only
/// reference layers declared before it, or observation keys.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GraphConfig {
    pub layers: Vec<LayerSpec>,
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LayerSpec {
    pub name: String,
    pub kind: LayerKind,
}

/// One variant per node kind, with the fields that kind requires. Optional
/// knobs default at setup time (a linear layer without `output_size` keeps its
/// input size).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LayerKind {
    Linear {
        source: String,
        output_size: Option<usize>,
        activation: Option<Activation>,
    },
    Activation {
        source: String,
        activation: Activation,
    },
    Merge {
        op: MergeOp,
        sources: Vec<SourceSpec>,
    },
    Expand {
        source: String,
        expand_dim: usize,
        size: ExpandSize,
    },
    Compress {
        source: String,
        popped_dim: usize,
        squeezed_dim: usize,
    },
    Recurrent {
        source: String,
        obs_source: String,
        hidden_size: usize,
    },
    Encoder {
        groups: Vec<EncoderGroupSpec>,
        output_dim: usize,
        layers: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MergeOp {
    Concat,
    Add,
    Subtract,
    Mean,
}

/// A merge input. `dim` is given in batched-tensor coordinates (dim 0 is the
/// batch) and defaults to 1; it must be explicit whenever `slice` is present.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SourceSpec {
    pub name: String,
    pub dim: Option<usize>,
    pub slice: Option<SliceSpec>,
}

impl SourceSpec {
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dim: None,
            slice: None,
        }
    }

    pub fn sliced(name: impl Into<String>, dim: usize, start: usize, end: usize) -> Self {
        Self {
            name: name.into(),
            dim: Some(dim),
            slice: Some(SliceSpec { start, end }),
        }
    }
}

/// Half-open range `[start, end)` narrowed along the source's declared dim.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SliceSpec {
    pub start: usize,
    pub end: usize,
}

/// Broadcast size of an expanded dim. `FromSource` reads the runtime size of
/// another tensor's dim at forward time, so a batch-dependent length (time
/// steps, typically) can size the broadcast.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExpandSize {
    Fixed(usize),
    FromSource { source: String, dim: usize },
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EncoderGroupSpec {
    pub obs_key: String,
    pub feature_names: Vec<String>,
    pub normalize: bool,
    pub label_dim: usize,
    pub output_dim: usize,
    pub layers: usize,
}

impl LayerSpec {
    pub fn linear(
        name: impl Into<String>,
        source: impl Into<String>,
        output_size: Option<usize>,
        activation: Option<Activation>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: LayerKind::Linear {
                source: source.into(),
                output_size,
                activation,
            },
        }
    }

    pub fn merge(name: impl Into<String>, op: MergeOp, sources: Vec<SourceSpec>) -> Self {
        Self {
            name: name.into(),
            kind: LayerKind::Merge { op, sources },
        }
    }

    pub fn recurrent(
        name: impl Into<String>,
        source: impl Into<String>,
        obs_source: impl Into<String>,
        hidden_size: usize,
    ) -> Self {
        Self {
            name: name.into(),
            kind: LayerKind::Recurrent {
                source: source.into(),
                obs_source: obs_source.into(),
                hidden_size,
            },
        }
    }
}
