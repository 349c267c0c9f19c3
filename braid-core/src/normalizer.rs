//! Online observation normalization. The statistics live outside the graph:
//! the caller owns a [`NormalizerSet`] and lends it to the execution context
//! for the duration of a pass.

use candle_core::shape::Dim;
use candle_core::{DType, Device, Result, Shape, Tensor};
use std::collections::HashMap;

const EPS: f64 = 1e-8;

pub struct RunningMeanStd {
    pub mean: Tensor,
    pub var: Tensor,
    pub count: f32,
    pub device: Device,
}

fn biased_var<D: Dim>(t: &Tensor, dim: D) -> Result<Tensor> {
    let dim = dim.to_index(t.shape(), "var")?;
    let mean = t.mean_keepdim(dim)?;
    let squares = t.broadcast_sub(&mean)?.sqr()?;
    (squares.sum_keepdim(dim)? / t.dim(dim)? as f64)?.squeeze(dim)
}

impl RunningMeanStd {
    pub fn new<S: Into<Shape> + Clone>(shape: S, device: Device) -> Result<Self> {
        let mean = Tensor::zeros(shape.clone(), DType::F32, &device)?;
        let var = Tensor::ones(shape, DType::F32, &device)?;
        Ok(Self {
            mean,
            var,
            count: 0.,
            device,
        })
    }

    pub fn update(&mut self, arr: &Tensor) -> Result<()> {
        let batch_mean = arr.mean(0)?;
        let batch_var = biased_var(arr, 0)?;
        let batch_count = arr.dim(0)? as f32;
        self.update_from_moments(batch_mean, batch_var, batch_count)
    }

    // Welford's algorithm
    fn update_from_moments(
        &mut self,
        batch_mean: Tensor,
        batch_var: Tensor,
        batch_count: f32,
    ) -> Result<()> {
        let delta = batch_mean.sub(&self.mean)?;
        let tot_count = self.count + batch_count;
        self.mean = self.mean.add(
            &delta.broadcast_mul(&Tensor::full(batch_count / tot_count, (), &self.device)?)?,
        )?;
        let m_a = self
            .var
            .broadcast_mul(&Tensor::full(self.count, (), self.var.device())?)?;
        let m_b = batch_var.broadcast_mul(&Tensor::full(batch_count, (), self.var.device())?)?;
        let m_2 = m_a.add(&m_b)?.add(&delta.sqr()?.broadcast_mul(&Tensor::full(
            self.count * batch_count / tot_count,
            (),
            &self.device,
        )?)?)?;
        self.var = m_2.broadcast_mul(&Tensor::full(1. / tot_count, (), &self.device)?)?;
        self.count = tot_count;
        Ok(())
    }

    pub fn normalize(&self, t: &Tensor) -> Result<Tensor> {
        let std = (&self.var + EPS)?.sqrt()?;
        t.broadcast_sub(&self.mean)?.broadcast_div(&std)
    }
}

impl std::fmt::Debug for RunningMeanStd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningMeanStd")
            .field("count", &self.count)
            .field("shape", &self.mean.shape())
            .finish()
    }
}

/// Running statistics keyed by observation group. A tracker is created on the
/// first batch seen for a key, shaped like that batch without its leading
/// batch dim.
#[derive(Debug, Default)]
pub struct NormalizerSet {
    trackers: HashMap<String, RunningMeanStd>,
}

impl NormalizerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&RunningMeanStd> {
        self.trackers.get(key)
    }

    /// Update the running statistics for `key` with `obs` and return the
    /// normalized batch.
    pub fn observe(&mut self, key: &str, obs: &Tensor) -> Result<Tensor> {
        use std::collections::hash_map::Entry;
        let tracker = match self.trackers.entry(key.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let shape = obs.dims()[1..].to_vec();
                entry.insert(RunningMeanStd::new(shape, obs.device().clone())?)
            }
        };
        tracker.update(obs)?;
        tracker.normalize(obs)
    }
}

#[cfg(test)]
mod test {
    use super::{NormalizerSet, RunningMeanStd, biased_var};
    use candle_core::{Device, Result, Tensor};
    use rand::Rng;

    #[test]
    fn test_biased_var() -> Result<()> {
        let test_t = Tensor::from_slice(
            &[
                0.48883059f32,
                0.48259816,
                0.79328812,
                0.19103859,
                0.11694599,
                0.53854045,
            ],
            (2, 3),
            &Device::Cpu,
        )?;
        let var = biased_var(&test_t, 0)?;
        let reference_var =
            Tensor::from_slice(&[0.02217002f32, 0.03342538, 0.01622409], 3, &Device::Cpu)?;
        let var_diff = (&var - &reference_var)?.abs()?.max(0)?;
        assert!(var_diff.to_scalar::<f32>()? < 1e-5, "var diff");
        Ok(())
    }

    #[test]
    fn test_running_mean_std_running() -> Result<()> {
        let device = Device::Cpu;
        let mut rng = rand::rng();
        let shape = (10, 3);
        let mut rms = RunningMeanStd::new(shape.1, device.clone())?;
        let mut all_data = vec![];

        for _ in 0..100 {
            let data: Vec<f32> = (0..30).map(|_| rng.random_range(-1.0..1.0)).collect();
            let tensor = Tensor::from_slice(&data, shape, &device)?;
            rms.update(&tensor)?;
            all_data.extend(data);
        }

        let all_tensor = Tensor::from_slice(&all_data, (all_data.len() / 3, 3), &device)?;
        let reference_mean = all_tensor.mean(0)?;
        let reference_var = biased_var(&all_tensor, 0)?;

        let mean_diff = (&rms.mean - &reference_mean)?.abs()?.max(0)?;
        let var_diff = (&rms.var - &reference_var)?.abs()?.max(0)?;

        let eps = 1e-4;

        assert!(mean_diff.to_scalar::<f32>()? < eps, "mean mismatch");
        assert!(var_diff.to_scalar::<f32>()? < eps, "variance mismatch");

        Ok(())
    }

    #[test]
    fn observe_normalizes_towards_zero_mean() -> Result<()> {
        let device = Device::Cpu;
        let mut set = NormalizerSet::new();
        let batch = Tensor::from_slice(&[10.0f32, 12.0, 14.0, 16.0], (4, 1), &device)?;
        set.observe("obs", &batch)?;
        let normalized = set.observe("obs", &batch)?;
        let mean = normalized.mean(0)?.to_vec1::<f32>()?;
        assert!(mean[0].abs() < 1e-4);
        Ok(())
    }
}
