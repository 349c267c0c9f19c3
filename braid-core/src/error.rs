use thiserror::Error;

/// Errors detected while assembling a graph or resolving its shapes. These are
/// unrecoverable for the given configuration: fix the layer list and rebuild.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("layer `{layer}` references `{source_name}` before it is declared")]
    UnknownSource { layer: String, source_name: String },

    #[error("duplicate layer name `{0}`")]
    DuplicateName(String),

    #[error("layer name `{0}` shadows an observation key")]
    ShadowsObservation(String),

    #[error("declared output `{0}` does not name a layer")]
    UnknownOutput(String),

    #[error("concat sources of `{layer}` must share one merge dim, got {dims:?}")]
    MergeDimMismatch { layer: String, dims: Vec<usize> },

    #[error("sources of `{layer}` must have matching shapes, got {shapes:?}")]
    MergeShapeMismatch { layer: String, shapes: Vec<Vec<usize>> },

    #[error("subtract requires exactly two sources, `{layer}` has {count}")]
    SubtractArity { layer: String, count: usize },

    #[error("slicing source `{source_name}` of `{layer}` requires an explicit dim, dim 0 is the batch")]
    SliceDimRequired { layer: String, source_name: String },

    #[error("slice [{start}, {end}) on source `{source_name}` of `{layer}` exceeds its size {size}")]
    SliceOutOfRange {
        layer: String,
        source_name: String,
        start: usize,
        end: usize,
        size: usize,
    },

    #[error("dim 0 is reserved for the batch (layer `{layer}`)")]
    BatchDimReserved { layer: String },

    #[error("`{layer}` declares {names} feature names but the observation carries {features}")]
    FeatureCountMismatch {
        layer: String,
        names: usize,
        features: usize,
    },

    #[error("graph has not been set up")]
    NotReady,

    #[error("layer `{layer}`: {reason}")]
    Invalid { layer: String, reason: String },
}

/// Errors detected during a forward pass: the caller supplied a malformed
/// batch. Never retried, a forward pass is all or nothing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShapeError {
    #[error("no tensor named `{0}` in the execution context")]
    MissingInput(String),

    #[error("batch size mismatch at `{node}`: source `{source_name}` has {got}, expected {expected}")]
    BatchMismatch {
        node: String,
        source_name: String,
        expected: usize,
        got: usize,
    },

    #[error("invalid input tensor shape {shape:?} for `{node}`, expected trailing dims {expected:?}")]
    ObservationMismatch {
        node: String,
        shape: Vec<usize>,
        expected: Vec<usize>,
    },

    #[error("invalid input tensor shape {shape:?} for `{node}`")]
    InvalidRank { node: String, shape: Vec<usize> },

    #[error("`{node}` expected flattened features of shape {expected:?}, got {got:?}")]
    FeatureMismatch {
        node: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("recurrent state batch {state_batch} does not match input batch {input_batch} at `{node}`")]
    StateBatchMismatch {
        node: String,
        state_batch: usize,
        input_batch: usize,
    },
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error(transparent)]
    Config(#[from] ConfigurationError),
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error(transparent)]
    Tensor(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, GraphError>;
