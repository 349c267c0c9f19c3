use super::Component;
use crate::context::{ExecutionContext, RecurrentState};
use crate::error::{ConfigurationError, GraphError, ShapeError};
use candle_nn::VarBuilder;
use candle_nn::rnn::{LSTM, LSTMConfig, LSTMState, RNN, lstm};

/// A single-layer LSTM over a flattened feature stream, with the shape
/// bookkeeping done for the caller. The feature source carries
/// `[batch * time, input_size]`; the observation source only tells the node
/// how to split that into `[batch]` or `[batch, time]`.
///
/// State is threaded through the execution context, never kept here, and is
/// detached before it is handed back so gradients stop at the call boundary.
#[derive(Debug)]
pub struct RecurrentComponent {
    name: String,
    source: String,
    obs_source: String,
    obs_shape: Vec<usize>,
    input_size: usize,
    hidden_size: usize,
    layer: LSTM,
    out_shape: Vec<usize>,
}

impl RecurrentComponent {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        name: &str,
        source: &str,
        source_shape: Vec<usize>,
        obs_source: &str,
        obs_shape: Vec<usize>,
        hidden_size: usize,
        vb: &VarBuilder,
    ) -> Result<Self, GraphError> {
        let &[input_size] = source_shape.as_slice() else {
            return Err(ConfigurationError::Invalid {
                layer: name.to_string(),
                reason: format!(
                    "recurrent input must be flattened to one feature dim, `{source}` has shape {source_shape:?}"
                ),
            }
            .into());
        };
        let layer = lstm(input_size, hidden_size, LSTMConfig::default(), vb.pp(name))?;
        Ok(Self {
            name: name.to_string(),
            source: source.to_string(),
            obs_source: obs_source.to_string(),
            obs_shape,
            input_size,
            hidden_size,
            layer,
            out_shape: vec![hidden_size],
        })
    }

    /// Parse the observation's leading dims as `[batch]` or `[batch, time]`.
    fn batch_and_time(&self, obs_dims: &[usize]) -> Result<(usize, usize), ShapeError> {
        let space_n = self.obs_shape.len();
        let obs_n = obs_dims.len();
        if obs_n < space_n || obs_dims[obs_n - space_n..] != self.obs_shape[..] {
            return Err(ShapeError::ObservationMismatch {
                node: self.name.clone(),
                shape: obs_dims.to_vec(),
                expected: self.obs_shape.clone(),
            });
        }
        match obs_n - space_n {
            1 => Ok((obs_dims[0], 1)),
            2 => Ok((obs_dims[0], obs_dims[1])),
            _ => Err(ShapeError::InvalidRank {
                node: self.name.clone(),
                shape: obs_dims.to_vec(),
            }),
        }
    }
}

impl Component for RecurrentComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn out_shape(&self) -> &[usize] {
        &self.out_shape
    }

    fn forward(&self, ctx: &mut ExecutionContext) -> Result<(), GraphError> {
        let obs = ctx.require(&self.obs_source)?.clone();
        let hidden = ctx.require(&self.source)?.clone();
        let (batch, time) = self.batch_and_time(obs.dims())?;

        if hidden.dims() != [batch * time, self.input_size].as_slice() {
            return Err(ShapeError::FeatureMismatch {
                node: self.name.clone(),
                expected: vec![batch * time, self.input_size],
                got: hidden.dims().to_vec(),
            }
            .into());
        }

        let init = match ctx.take_state() {
            Some(state) => {
                let state_batch = state.h.dim(0)?;
                if state_batch != batch || state.c.dim(0)? != batch {
                    return Err(ShapeError::StateBatchMismatch {
                        node: self.name.clone(),
                        state_batch,
                        input_batch: batch,
                    }
                    .into());
                }
                LSTMState {
                    h: state.h,
                    c: state.c,
                }
            }
            None => self.layer.zero_state(batch)?,
        };

        let sequence = hidden.reshape((batch, time, self.input_size))?;
        let states = self.layer.seq_init(&sequence, &init)?;
        let output = self.layer.states_to_tensor(&states)?;
        let output = output.reshape((batch * time, self.hidden_size))?;

        let Some(last) = states.last() else {
            return Err(ShapeError::InvalidRank {
                node: self.name.clone(),
                shape: obs.dims().to_vec(),
            }
            .into());
        };
        ctx.set_state(RecurrentState {
            h: last.h().detach(),
            c: last.c().detach(),
        });
        ctx.insert(self.name.clone(), output);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::RecurrentComponent;
    use crate::components::Component;
    use crate::context::{ExecutionContext, RecurrentState};
    use crate::error::{GraphError, ShapeError};
    use candle_core::{DType, Device, Tensor};
    use candle_nn::{VarBuilder, VarMap};

    fn component(varmap: &VarMap) -> Result<RecurrentComponent, GraphError> {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        RecurrentComponent::build("core", "features", vec![6], "obs", vec![4], 8, &vb)
    }

    #[test]
    fn single_step_and_sequence_shapes() -> Result<(), GraphError> {
        let varmap = VarMap::new();
        let node = component(&varmap)?;
        let device = Device::Cpu;

        let mut ctx = ExecutionContext::new();
        ctx.insert("obs".to_string(), Tensor::zeros((3, 4), DType::F32, &device)?);
        ctx.insert(
            "features".to_string(),
            Tensor::zeros((3, 6), DType::F32, &device)?,
        );
        node.forward(&mut ctx)?;
        assert_eq!(ctx.require("core")?.dims(), &[3, 8]);
        let state = ctx.take_state().unwrap();
        assert_eq!(state.h.dims(), &[3, 8]);
        assert_eq!(state.c.dims(), &[3, 8]);

        // [batch, time] sequences flatten to batch * time rows.
        let mut ctx = ExecutionContext::new().with_state(state);
        ctx.insert(
            "obs".to_string(),
            Tensor::zeros((3, 5, 4), DType::F32, &device)?,
        );
        ctx.insert(
            "features".to_string(),
            Tensor::zeros((15, 6), DType::F32, &device)?,
        );
        node.forward(&mut ctx)?;
        assert_eq!(ctx.require("core")?.dims(), &[15, 8]);
        Ok(())
    }

    #[test]
    fn trailing_dims_must_match_the_observation_shape() -> Result<(), GraphError> {
        let varmap = VarMap::new();
        let node = component(&varmap)?;
        let device = Device::Cpu;

        let mut ctx = ExecutionContext::new();
        ctx.insert("obs".to_string(), Tensor::zeros((3, 5), DType::F32, &device)?);
        ctx.insert(
            "features".to_string(),
            Tensor::zeros((3, 6), DType::F32, &device)?,
        );
        let err = node.forward(&mut ctx).unwrap_err();
        assert!(matches!(
            err,
            GraphError::Shape(ShapeError::ObservationMismatch { .. })
        ));

        let mut ctx = ExecutionContext::new();
        ctx.insert(
            "obs".to_string(),
            Tensor::zeros((3, 5, 2, 4), DType::F32, &device)?,
        );
        ctx.insert(
            "features".to_string(),
            Tensor::zeros((30, 6), DType::F32, &device)?,
        );
        let err = node.forward(&mut ctx).unwrap_err();
        assert!(matches!(
            err,
            GraphError::Shape(ShapeError::InvalidRank { .. })
        ));
        Ok(())
    }

    #[test]
    fn state_batch_must_match_input_batch() -> Result<(), GraphError> {
        let varmap = VarMap::new();
        let node = component(&varmap)?;
        let device = Device::Cpu;

        let state = RecurrentState {
            h: Tensor::zeros((2, 8), DType::F32, &device)?,
            c: Tensor::zeros((2, 8), DType::F32, &device)?,
        };
        let mut ctx = ExecutionContext::new().with_state(state);
        ctx.insert("obs".to_string(), Tensor::zeros((3, 4), DType::F32, &device)?);
        ctx.insert(
            "features".to_string(),
            Tensor::zeros((3, 6), DType::F32, &device)?,
        );
        let err = node.forward(&mut ctx).unwrap_err();
        assert!(matches!(
            err,
            GraphError::Shape(ShapeError::StateBatchMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn returned_state_is_detached() -> Result<(), GraphError> {
        let varmap = VarMap::new();
        let node = component(&varmap)?;
        let device = Device::Cpu;

        let mut ctx = ExecutionContext::new();
        ctx.insert(
            "obs".to_string(),
            Tensor::randn(0f32, 1., (3, 4), &device)?,
        );
        ctx.insert(
            "features".to_string(),
            Tensor::randn(0f32, 1., (3, 6), &device)?,
        );
        node.forward(&mut ctx)?;
        let state = ctx.take_state().unwrap();

        // Backprop through the returned state must not reach the weights.
        let loss = state.h.sum_all()?;
        let grads = loss.backward()?;
        for var in varmap.all_vars() {
            assert!(grads.get_id(var.id()).is_none());
        }
        Ok(())
    }
}
