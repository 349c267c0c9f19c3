use super::Distribution;
use candle_core::{Result, Tensor, bail};
use candle_nn::VarBuilder;
use std::f32;

/// Continuous actions drawn from independent Gaussians centered on the mean
/// head, with a learned state-independent log standard deviation.
#[derive(Debug, Clone)]
pub struct DiagGaussianDistribution {
    action_size: usize,
    log_std: Tensor,
}

impl DiagGaussianDistribution {
    pub fn build(action_size: usize, vb: &VarBuilder) -> Result<Self> {
        let log_std = vb.get(action_size, "log_std")?;
        Ok(Self {
            action_size,
            log_std,
        })
    }

    pub fn new(action_size: usize, log_std: Tensor) -> Self {
        Self {
            action_size,
            log_std,
        }
    }
}

impl Distribution for DiagGaussianDistribution {
    fn get_action(&self, head: &Tensor) -> Result<(Tensor, Tensor)> {
        if head.rank() != 1 || head.dim(0)? != self.action_size {
            bail!(
                "expected flattened mean of size {}, got {:?}",
                self.action_size,
                head.shape()
            )
        }
        let std = self.log_std.exp()?;
        let noise = Tensor::randn(0f32, 1., self.log_std.shape(), self.log_std.device())?;
        let action = head.add(&std.mul(&noise)?)?.detach();
        let logp = self
            .log_probs(&head.unsqueeze(0)?, &action.unsqueeze(0)?)?
            .squeeze(0)?;
        Ok((action, logp))
    }

    fn log_probs(&self, heads: &Tensor, actions: &Tensor) -> Result<Tensor> {
        let std = self.log_std.exp()?.broadcast_as(heads.shape())?;
        let var = std.sqr()?;
        let log_sqrt_2pi = f32::ln(f32::sqrt(2f32 * f32::consts::PI));
        let log_sqrt_2pi = Tensor::full(log_sqrt_2pi, heads.shape(), heads.device())?;
        let log_probs = ((((actions - heads)?.sqr()? / (2. * var)?)?.neg()?
            - &self.log_std.broadcast_as(heads.shape())?)?
            - log_sqrt_2pi)?;
        log_probs.sum(1)
    }

    fn entropy(&self, _heads: &Tensor) -> Result<Tensor> {
        let log_2pi_plus_1_div_2 = 0.5 * ((2. * f32::consts::PI).ln() + 1.);
        let offset = Tensor::full(
            log_2pi_plus_1_div_2,
            self.log_std.shape(),
            self.log_std.device(),
        )?;
        self.log_std.add(&offset)?.sum(0)
    }
}
