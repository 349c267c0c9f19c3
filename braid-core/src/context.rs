use crate::error::ShapeError;
use crate::normalizer::NormalizerSet;
use candle_core::Tensor;
use derive_more::{Deref, DerefMut};
use std::collections::HashMap;

/// Recurrent `(hidden, cell)` pair, each `[batch, hidden_size]`. Owned by the
/// caller and threaded through forward calls explicitly; the graph never
/// retains it. Returned states are gradient detached.
#[derive(Debug, Clone)]
pub struct RecurrentState {
    pub h: Tensor,
    pub c: Tensor,
}

/// Per-pass scratch space mapping names to already computed tensors, plus the
/// caller-owned collaborator state (recurrent state, observation normalizers).
/// One context serves exactly one in-flight forward call; concurrent callers
/// each build their own.
#[derive(Debug, Default, Deref, DerefMut)]
pub struct ExecutionContext {
    #[deref]
    #[deref_mut]
    values: HashMap<String, Tensor>,
    state: Option<RecurrentState>,
    normalizers: Option<NormalizerSet>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_observations(obs: impl IntoIterator<Item = (String, Tensor)>) -> Self {
        Self {
            values: obs.into_iter().collect(),
            state: None,
            normalizers: None,
        }
    }

    pub fn with_state(mut self, state: RecurrentState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_normalizers(mut self, normalizers: NormalizerSet) -> Self {
        self.normalizers = Some(normalizers);
        self
    }

    pub fn require(&self, name: &str) -> Result<&Tensor, ShapeError> {
        self.values
            .get(name)
            .ok_or_else(|| ShapeError::MissingInput(name.to_string()))
    }

    pub fn state(&self) -> Option<&RecurrentState> {
        self.state.as_ref()
    }

    pub fn take_state(&mut self) -> Option<RecurrentState> {
        self.state.take()
    }

    pub fn set_state(&mut self, state: RecurrentState) {
        self.state = Some(state);
    }

    pub fn normalizers_mut(&mut self) -> Option<&mut NormalizerSet> {
        self.normalizers.as_mut()
    }

    /// Hand the normalizer set back to the caller so its running statistics
    /// survive into the next pass.
    pub fn take_normalizers(&mut self) -> Option<NormalizerSet> {
        self.normalizers.take()
    }
}
