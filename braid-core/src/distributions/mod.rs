//! Action distributions over graph head outputs. The graph owns every learned
//! parameter of the heads; these types only turn a head tensor into actions,
//! log probabilities and entropy.

pub mod categorical_distribution;
pub mod diagonal_distribution;

use candle_core::{Result, Tensor};
use categorical_distribution::CategoricalDistribution;
use diagonal_distribution::DiagGaussianDistribution;
use enum_dispatch::enum_dispatch;

#[enum_dispatch]
pub trait Distribution {
    /// Sample one action from a flattened head tensor, returning the action
    /// and its log probability. The action is detached.
    fn get_action(&self, head: &Tensor) -> Result<(Tensor, Tensor)>;

    /// Log probabilities of a batch of actions under a batch of heads.
    fn log_probs(&self, heads: &Tensor, actions: &Tensor) -> Result<Tensor>;

    fn entropy(&self, heads: &Tensor) -> Result<Tensor>;
}

#[enum_dispatch(Distribution)]
pub enum DistributionKind {
    Categorical(CategoricalDistribution),
    DiagGaussian(DiagGaussianDistribution),
}
