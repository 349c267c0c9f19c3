use super::Distribution;
use candle_core::{Device, Error, Result, Tensor, bail};
use candle_nn::ops::{log_softmax, softmax};
use rand::distr::Distribution as RandDistribution;
use rand::distr::weighted::WeightedIndex;

/// Discrete actions sampled from a logits head. Actions travel as one-hot
/// vectors so log-prob lookups stay a masked sum.
#[derive(Debug, Clone)]
pub struct CategoricalDistribution {
    action_size: usize,
    device: Device,
}

impl CategoricalDistribution {
    pub fn new(action_size: usize, device: Device) -> Self {
        Self {
            action_size,
            device,
        }
    }
}

impl Distribution for CategoricalDistribution {
    fn get_action(&self, head: &Tensor) -> Result<(Tensor, Tensor)> {
        if head.rank() != 1 || head.dim(0)? != self.action_size {
            bail!(
                "expected flattened logits of size {}, got {:?}",
                self.action_size,
                head.shape()
            )
        }
        let action_probs: Vec<f32> = softmax(head, 0)?.to_vec1()?;
        let distribution = WeightedIndex::new(&action_probs).map_err(Error::wrap)?;
        let action = distribution.sample(&mut rand::rng());
        let logp = log_softmax(head, 0)?.narrow(0, action, 1)?.squeeze(0)?;
        let mut action_mask = vec![0.0f32; self.action_size];
        action_mask[action] = 1.;
        let action = Tensor::from_vec(action_mask, self.action_size, &self.device)?.detach();
        Ok((action, logp))
    }

    fn log_probs(&self, heads: &Tensor, actions: &Tensor) -> Result<Tensor> {
        let log_probs = log_softmax(heads, 1)?;
        actions.mul(&log_probs)?.sum(1)
    }

    fn entropy(&self, heads: &Tensor) -> Result<Tensor> {
        let log_probs = log_softmax(heads, 1)?;
        let probs = softmax(heads, 1)?;
        probs.mul(&log_probs)?.sum(1)?.neg()
    }
}
