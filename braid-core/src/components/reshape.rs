//! Shape surgery nodes. Dim indices are batched-tensor coordinates (dim 0 is
//! the batch); the static bookkeeping works on batchless shapes, so anything
//! involving dim 0 is deferred to forward time where the live batch is known.

use super::Component;
use crate::config::ExpandSize;
use crate::context::ExecutionContext;
use crate::error::{ConfigurationError, GraphError};
use candle_core::Tensor;

#[derive(Debug)]
enum ResolvedExpand {
    Fixed(usize),
    FromSource { source: String, dim: usize },
}

/// Inserts a dim at `expand_dim` and broadcasts it, either to a fixed size or
/// to the runtime size of another tensor's dim.
#[derive(Debug)]
pub struct ExpandComponent {
    name: String,
    source: String,
    expand_dim: usize,
    size: ResolvedExpand,
    out_shape: Vec<usize>,
}

impl ExpandComponent {
    pub fn build(
        name: &str,
        source: &str,
        source_shape: Vec<usize>,
        expand_dim: usize,
        size: &ExpandSize,
        dims_source_shape: Option<Vec<usize>>,
    ) -> Result<Self, GraphError> {
        if expand_dim == 0 {
            return Err(ConfigurationError::BatchDimReserved {
                layer: name.to_string(),
            }
            .into());
        }
        if expand_dim - 1 > source_shape.len() {
            return Err(ConfigurationError::Invalid {
                layer: name.to_string(),
                reason: format!(
                    "expand_dim {expand_dim} is out of range for source of shape {source_shape:?}"
                ),
            }
            .into());
        }

        let (size, static_size) = match size {
            ExpandSize::Fixed(value) => (ResolvedExpand::Fixed(*value), *value),
            ExpandSize::FromSource { source, dim } => {
                if *dim == 0 {
                    return Err(ConfigurationError::BatchDimReserved {
                        layer: name.to_string(),
                    }
                    .into());
                }
                let shape = dims_source_shape.unwrap_or_default();
                let Some(&static_size) = shape.get(dim - 1) else {
                    return Err(ConfigurationError::Invalid {
                        layer: name.to_string(),
                        reason: format!(
                            "dims source `{source}` of shape {shape:?} has no dim {dim}"
                        ),
                    }
                    .into());
                };
                (
                    ResolvedExpand::FromSource {
                        source: source.clone(),
                        dim: *dim,
                    },
                    static_size,
                )
            }
        };

        let mut out_shape = source_shape;
        out_shape.insert(expand_dim - 1, static_size);
        Ok(Self {
            name: name.to_string(),
            source: source.to_string(),
            expand_dim,
            size,
            out_shape,
        })
    }
}

impl Component for ExpandComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn out_shape(&self) -> &[usize] {
        &self.out_shape
    }

    fn forward(&self, ctx: &mut ExecutionContext) -> Result<(), GraphError> {
        let tensor = ctx.require(&self.source)?.clone();
        // The runtime size wins over whatever was recorded at setup.
        let value = match &self.size {
            ResolvedExpand::Fixed(value) => *value,
            ResolvedExpand::FromSource { source, dim } => ctx.require(source)?.dim(*dim)?,
        };
        let expanded = tensor.unsqueeze(self.expand_dim)?;
        let mut dims = expanded.dims().to_vec();
        dims[self.expand_dim] = value;
        let expanded = expanded.expand(dims)?;
        ctx.insert(self.name.clone(), expanded);
        Ok(())
    }
}

/// Folds `popped_dim` into `squeezed_dim`, multiplying their sizes.
#[derive(Debug)]
pub struct CompressComponent {
    name: String,
    source: String,
    popped_dim: usize,
    squeezed_dim: usize,
    out_shape: Vec<usize>,
}

impl CompressComponent {
    pub fn build(
        name: &str,
        source: &str,
        source_shape: Vec<usize>,
        popped_dim: usize,
        squeezed_dim: usize,
    ) -> Result<Self, GraphError> {
        if popped_dim == squeezed_dim {
            return Err(ConfigurationError::Invalid {
                layer: name.to_string(),
                reason: "popped_dim and squeezed_dim must differ".to_string(),
            }
            .into());
        }
        let rank = source_shape.len() + 1;
        if popped_dim >= rank || squeezed_dim >= rank {
            return Err(ConfigurationError::Invalid {
                layer: name.to_string(),
                reason: format!(
                    "dims ({popped_dim}, {squeezed_dim}) out of range for source of shape {source_shape:?}"
                ),
            }
            .into());
        }

        let mut out_shape = source_shape;
        if popped_dim == 0 {
            // The batch folds into the squeezed dim, which thereby becomes the
            // new batch dim; its size is only known at forward time.
            out_shape.remove(squeezed_dim - 1);
        } else if squeezed_dim == 0 {
            // The popped dim folds into the batch; same deferral.
            out_shape.remove(popped_dim - 1);
        } else {
            let compressed = out_shape[squeezed_dim - 1] * out_shape[popped_dim - 1];
            out_shape[squeezed_dim - 1] = compressed;
            out_shape.remove(popped_dim - 1);
        }
        Ok(Self {
            name: name.to_string(),
            source: source.to_string(),
            popped_dim,
            squeezed_dim,
            out_shape,
        })
    }
}

impl Component for CompressComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn out_shape(&self) -> &[usize] {
        &self.out_shape
    }

    fn forward(&self, ctx: &mut ExecutionContext) -> Result<(), GraphError> {
        let tensor = ctx.require(&self.source)?.clone();
        let mut dims = tensor.dims().to_vec();
        let compressed = dims[self.squeezed_dim] * dims[self.popped_dim];
        dims.remove(self.popped_dim);
        let squeezed = if self.popped_dim < self.squeezed_dim {
            self.squeezed_dim - 1
        } else {
            self.squeezed_dim
        };
        dims[squeezed] = compressed;
        let tensor = tensor.reshape(dims)?;
        ctx.insert(self.name.clone(), tensor);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::{CompressComponent, ExpandComponent};
    use crate::components::Component;
    use crate::config::ExpandSize;
    use crate::context::ExecutionContext;
    use crate::error::GraphError;
    use candle_core::{DType, Device, Tensor};

    #[test]
    fn expand_broadcasts_fixed_size() -> Result<(), GraphError> {
        let expand = ExpandComponent::build(
            "tiled",
            "a",
            vec![4],
            1,
            &ExpandSize::Fixed(3),
            None,
        )?;
        assert_eq!(expand.out_shape(), &[3, 4]);

        let device = Device::Cpu;
        let mut ctx = ExecutionContext::new();
        ctx.insert(
            "a".to_string(),
            Tensor::zeros((2, 4), DType::F32, &device)?,
        );
        expand.forward(&mut ctx)?;
        assert_eq!(ctx.require("tiled")?.dims(), &[2, 3, 4]);
        Ok(())
    }

    #[test]
    fn dynamic_expand_takes_runtime_size() -> Result<(), GraphError> {
        // Static size of dim 1 of `steps` is 5, but the live tensor has 7.
        let expand = ExpandComponent::build(
            "tiled",
            "a",
            vec![4],
            1,
            &ExpandSize::FromSource {
                source: "steps".to_string(),
                dim: 1,
            },
            Some(vec![5]),
        )?;
        assert_eq!(expand.out_shape(), &[5, 4]);

        let device = Device::Cpu;
        let mut ctx = ExecutionContext::new();
        ctx.insert("a".to_string(), Tensor::zeros((2, 4), DType::F32, &device)?);
        ctx.insert(
            "steps".to_string(),
            Tensor::zeros((2, 7), DType::F32, &device)?,
        );
        expand.forward(&mut ctx)?;
        assert_eq!(ctx.require("tiled")?.dims(), &[2, 7, 4]);
        Ok(())
    }

    #[test]
    fn compress_folds_two_dims() -> Result<(), GraphError> {
        let compress = CompressComponent::build("flat", "a", vec![3, 4], 2, 1)?;
        assert_eq!(compress.out_shape(), &[12]);

        let device = Device::Cpu;
        let mut ctx = ExecutionContext::new();
        ctx.insert(
            "a".to_string(),
            Tensor::zeros((2, 3, 4), DType::F32, &device)?,
        );
        compress.forward(&mut ctx)?;
        assert_eq!(ctx.require("flat")?.dims(), &[2, 12]);
        Ok(())
    }

    #[test]
    fn compress_through_batch_defers_to_forward() -> Result<(), GraphError> {
        // Folding the time dim into the batch: [B, T, F] -> [B*T, F]. The
        // static shape only drops the popped entry.
        let compress = CompressComponent::build("flat", "a", vec![3, 4], 1, 0)?;
        assert_eq!(compress.out_shape(), &[4]);

        let device = Device::Cpu;
        let mut ctx = ExecutionContext::new();
        ctx.insert(
            "a".to_string(),
            Tensor::zeros((2, 3, 4), DType::F32, &device)?,
        );
        compress.forward(&mut ctx)?;
        assert_eq!(ctx.require("flat")?.dims(), &[6, 4]);
        Ok(())
    }

    #[test]
    fn compress_popping_batch_adjusts_the_squeezed_index() -> Result<(), GraphError> {
        // [B, T, F] with the batch popped into dim 1: runtime [B*T, F].
        let compress = CompressComponent::build("flat", "a", vec![3, 4], 0, 1)?;
        assert_eq!(compress.out_shape(), &[4]);

        let device = Device::Cpu;
        let mut ctx = ExecutionContext::new();
        ctx.insert(
            "a".to_string(),
            Tensor::zeros((2, 3, 4), DType::F32, &device)?,
        );
        compress.forward(&mut ctx)?;
        assert_eq!(ctx.require("flat")?.dims(), &[6, 4]);
        Ok(())
    }
}
