use super::Component;
use crate::config::{MergeOp, SourceSpec};
use crate::context::ExecutionContext;
use crate::error::{ConfigurationError, GraphError, ShapeError};
use candle_core::Tensor;

/// One merge input after setup: where to read, and how to narrow before the
/// merge. `(dim, start, len)` in batched-tensor coordinates.
#[derive(Debug, Clone)]
struct ResolvedSource {
    name: String,
    narrow: Option<(usize, usize, usize)>,
}

/// Combines named sources into one tensor. Everything that can go wrong with
/// the configuration is rejected at build time; forward only checks what
/// depends on the live batch.
#[derive(Debug)]
pub struct MergeComponent {
    name: String,
    op: MergeOp,
    sources: Vec<ResolvedSource>,
    /// Merge axis per source, batched-tensor coordinates.
    dims: Vec<usize>,
    /// Post-slice size along the merge axis per source.
    processed_lengths: Vec<usize>,
    merge_dim: usize,
    out_shape: Vec<usize>,
}

impl MergeComponent {
    pub fn build(
        name: &str,
        op: MergeOp,
        specs: &[SourceSpec],
        source_shapes: Vec<Vec<usize>>,
    ) -> Result<Self, GraphError> {
        if specs.is_empty() {
            return Err(ConfigurationError::Invalid {
                layer: name.to_string(),
                reason: "merge requires at least one source".to_string(),
            }
            .into());
        }
        if op == MergeOp::Subtract && specs.len() != 2 {
            return Err(ConfigurationError::SubtractArity {
                layer: name.to_string(),
                count: specs.len(),
            }
            .into());
        }

        let mut sources = Vec::with_capacity(specs.len());
        let mut dims = Vec::with_capacity(specs.len());
        let mut processed_lengths = Vec::with_capacity(specs.len());
        let mut effective_shapes = Vec::with_capacity(specs.len());

        for (spec, shape) in specs.iter().zip(source_shapes) {
            let dim = match (spec.dim, &spec.slice) {
                (Some(0), _) => {
                    return Err(ConfigurationError::BatchDimReserved {
                        layer: name.to_string(),
                    }
                    .into());
                }
                (Some(dim), _) => dim,
                (None, Some(_)) => {
                    return Err(ConfigurationError::SliceDimRequired {
                        layer: name.to_string(),
                        source_name: spec.name.clone(),
                    }
                    .into());
                }
                (None, None) => 1,
            };
            if dim > shape.len() {
                return Err(ConfigurationError::Invalid {
                    layer: name.to_string(),
                    reason: format!(
                        "dim {dim} is out of range for source `{}` of shape {shape:?}",
                        spec.name
                    ),
                }
                .into());
            }

            let mut effective = shape;
            let narrow = match &spec.slice {
                Some(slice) => {
                    let size = effective[dim - 1];
                    if slice.start >= slice.end || slice.end > size {
                        return Err(ConfigurationError::SliceOutOfRange {
                            layer: name.to_string(),
                            source_name: spec.name.clone(),
                            start: slice.start,
                            end: slice.end,
                            size,
                        }
                        .into());
                    }
                    let len = slice.end - slice.start;
                    effective[dim - 1] = len;
                    Some((dim, slice.start, len))
                }
                None => None,
            };

            processed_lengths.push(effective[dim - 1]);
            dims.push(dim);
            effective_shapes.push(effective);
            sources.push(ResolvedSource {
                name: spec.name.clone(),
                narrow,
            });
        }

        let merge_dim = dims[0];
        let out_shape = match op {
            MergeOp::Concat => {
                if dims.iter().any(|d| *d != merge_dim) {
                    return Err(ConfigurationError::MergeDimMismatch {
                        layer: name.to_string(),
                        dims,
                    }
                    .into());
                }
                let off_axis = |shape: &[usize]| {
                    let mut shape = shape.to_vec();
                    shape.remove(merge_dim - 1);
                    shape
                };
                let first = off_axis(&effective_shapes[0]);
                if effective_shapes.iter().any(|s| off_axis(s) != first) {
                    return Err(ConfigurationError::MergeShapeMismatch {
                        layer: name.to_string(),
                        shapes: effective_shapes,
                    }
                    .into());
                }
                let mut out = effective_shapes[0].clone();
                out[merge_dim - 1] = processed_lengths.iter().sum();
                out
            }
            MergeOp::Add | MergeOp::Subtract | MergeOp::Mean => {
                let first = &effective_shapes[0];
                if effective_shapes.iter().any(|s| s != first) {
                    return Err(ConfigurationError::MergeShapeMismatch {
                        layer: name.to_string(),
                        shapes: effective_shapes,
                    }
                    .into());
                }
                first.clone()
            }
        };

        Ok(Self {
            name: name.to_string(),
            op,
            sources,
            dims,
            processed_lengths,
            merge_dim,
            out_shape,
        })
    }

    pub fn processed_lengths(&self) -> &[usize] {
        &self.processed_lengths
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }
}

impl Component for MergeComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn out_shape(&self) -> &[usize] {
        &self.out_shape
    }

    fn forward(&self, ctx: &mut ExecutionContext) -> Result<(), GraphError> {
        let mut outputs = Vec::with_capacity(self.sources.len());
        let mut batch = None;
        for source in &self.sources {
            let tensor = ctx.require(&source.name)?.clone();
            let source_batch = tensor.dim(0)?;
            match batch {
                None => batch = Some(source_batch),
                Some(expected) if expected != source_batch => {
                    return Err(ShapeError::BatchMismatch {
                        node: self.name.clone(),
                        source_name: source.name.clone(),
                        expected,
                        got: source_batch,
                    }
                    .into());
                }
                Some(_) => {}
            }
            let tensor = match source.narrow {
                Some((dim, start, len)) => tensor.narrow(dim, start, len)?,
                None => tensor,
            };
            outputs.push(tensor);
        }

        let merged = match self.op {
            MergeOp::Concat => Tensor::cat(&outputs, self.merge_dim)?,
            MergeOp::Add => {
                let mut merged = outputs[0].clone();
                for tensor in &outputs[1..] {
                    merged = merged.add(tensor)?;
                }
                merged
            }
            MergeOp::Subtract => outputs[0].sub(&outputs[1])?,
            MergeOp::Mean => {
                let mut merged = outputs[0].clone();
                for tensor in &outputs[1..] {
                    merged = merged.add(tensor)?;
                }
                (merged / outputs.len() as f64)?
            }
        };
        ctx.insert(self.name.clone(), merged);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::MergeComponent;
    use crate::components::Component;
    use crate::config::{MergeOp, SourceSpec};
    use crate::context::ExecutionContext;
    use crate::error::{ConfigurationError, GraphError};
    use candle_core::{Device, Tensor};

    fn two_plain_sources() -> Vec<SourceSpec> {
        vec![SourceSpec::plain("a"), SourceSpec::plain("b")]
    }

    #[test]
    fn concat_sums_merge_dim() -> Result<(), GraphError> {
        let merge = MergeComponent::build(
            "merged",
            MergeOp::Concat,
            &two_plain_sources(),
            vec![vec![4], vec![6]],
        )?;
        assert_eq!(merge.processed_lengths(), &[4, 6]);
        assert_eq!(merge.out_shape(), &[10]);

        let device = Device::Cpu;
        let mut ctx = ExecutionContext::new();
        ctx.insert("a".to_string(), Tensor::zeros((3, 4), candle_core::DType::F32, &device)?);
        ctx.insert("b".to_string(), Tensor::ones((3, 6), candle_core::DType::F32, &device)?);
        merge.forward(&mut ctx)?;
        assert_eq!(ctx.require("merged")?.dims(), &[3, 10]);
        Ok(())
    }

    #[test]
    fn concat_slice_narrows_before_merge() -> Result<(), GraphError> {
        let sources = vec![
            SourceSpec::sliced("a", 1, 1, 3),
            SourceSpec::sliced("b", 1, 0, 2),
        ];
        let merge =
            MergeComponent::build("merged", MergeOp::Concat, &sources, vec![vec![4], vec![6]])?;
        assert_eq!(merge.processed_lengths(), &[2, 2]);
        assert_eq!(merge.out_shape(), &[4]);

        let device = Device::Cpu;
        let mut ctx = ExecutionContext::new();
        let a = Tensor::from_slice(&[0.0f32, 1.0, 2.0, 3.0], (1, 4), &device)?;
        let b = Tensor::from_slice(&[10.0f32, 11.0, 12.0, 13.0, 14.0, 15.0], (1, 6), &device)?;
        ctx.insert("a".to_string(), a);
        ctx.insert("b".to_string(), b);
        merge.forward(&mut ctx)?;
        let merged = ctx.require("merged")?.to_vec2::<f32>()?;
        assert_eq!(merged, vec![vec![1.0, 2.0, 10.0, 11.0]]);
        Ok(())
    }

    #[test]
    fn slice_without_dim_is_rejected() {
        let sources = vec![SourceSpec {
            name: "a".to_string(),
            dim: None,
            slice: Some(crate::config::SliceSpec { start: 0, end: 2 }),
        }];
        let err = MergeComponent::build("merged", MergeOp::Concat, &sources, vec![vec![4]])
            .unwrap_err();
        assert!(matches!(
            err,
            GraphError::Config(ConfigurationError::SliceDimRequired { .. })
        ));
    }

    #[test]
    fn add_and_mean_preserve_shape() -> Result<(), GraphError> {
        let device = Device::Cpu;
        let a = Tensor::from_slice(&[1.0f32, 2.0, 3.0, 4.0], (2, 2), &device)?;
        let b = Tensor::from_slice(&[5.0f32, 6.0, 7.0, 8.0], (2, 2), &device)?;

        let add = MergeComponent::build(
            "added",
            MergeOp::Add,
            &two_plain_sources(),
            vec![vec![2], vec![2]],
        )?;
        assert_eq!(add.out_shape(), &[2]);
        let mut ctx = ExecutionContext::new();
        ctx.insert("a".to_string(), a.clone());
        ctx.insert("b".to_string(), b.clone());
        add.forward(&mut ctx)?;
        assert_eq!(
            ctx.require("added")?.to_vec2::<f32>()?,
            vec![vec![6.0, 8.0], vec![10.0, 12.0]]
        );

        let mean = MergeComponent::build(
            "averaged",
            MergeOp::Mean,
            &two_plain_sources(),
            vec![vec![2], vec![2]],
        )?;
        mean.forward(&mut ctx)?;
        let averaged = ctx.require("averaged")?.to_vec2::<f32>()?;
        for (row, expected) in averaged.iter().zip([[3.0f32, 4.0], [5.0, 6.0]]) {
            for (value, expected) in row.iter().zip(expected) {
                assert!((value - expected).abs() < 1e-6);
            }
        }
        Ok(())
    }

    #[test]
    fn add_shape_mismatch_fails_at_build() {
        let err = MergeComponent::build(
            "added",
            MergeOp::Add,
            &two_plain_sources(),
            vec![vec![2], vec![3]],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            GraphError::Config(ConfigurationError::MergeShapeMismatch { .. })
        ));
    }

    #[test]
    fn subtract_is_elementwise_and_binary() -> Result<(), GraphError> {
        let device = Device::Cpu;
        let sub = MergeComponent::build(
            "diff",
            MergeOp::Subtract,
            &two_plain_sources(),
            vec![vec![2], vec![2]],
        )?;
        let mut ctx = ExecutionContext::new();
        ctx.insert(
            "a".to_string(),
            Tensor::from_slice(&[5.0f32, 6.0, 7.0, 8.0], (2, 2), &device)?,
        );
        ctx.insert(
            "b".to_string(),
            Tensor::from_slice(&[1.0f32, 2.0, 3.0, 4.0], (2, 2), &device)?,
        );
        sub.forward(&mut ctx)?;
        assert_eq!(
            ctx.require("diff")?.to_vec2::<f32>()?,
            vec![vec![4.0, 4.0], vec![4.0, 4.0]]
        );

        for count in [1usize, 3] {
            let sources: Vec<_> = (0..count)
                .map(|i| SourceSpec::plain(format!("s{i}")))
                .collect();
            let shapes = vec![vec![2]; count];
            let err =
                MergeComponent::build("diff", MergeOp::Subtract, &sources, shapes).unwrap_err();
            assert!(matches!(
                err,
                GraphError::Config(ConfigurationError::SubtractArity { .. })
            ));
        }
        Ok(())
    }

    #[test]
    fn concat_dim_mismatch_fails_at_build() {
        let sources = vec![
            SourceSpec {
                name: "a".to_string(),
                dim: Some(1),
                slice: None,
            },
            SourceSpec {
                name: "b".to_string(),
                dim: Some(2),
                slice: None,
            },
        ];
        let err = MergeComponent::build(
            "merged",
            MergeOp::Concat,
            &sources,
            vec![vec![4, 5], vec![4, 5]],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            GraphError::Config(ConfigurationError::MergeDimMismatch { .. })
        ));
    }

    #[test]
    fn concat_off_axis_dims_must_agree() {
        // Merging along dim 1 while the sources disagree on dim 2.
        let sources = vec![
            SourceSpec {
                name: "a".to_string(),
                dim: Some(1),
                slice: None,
            },
            SourceSpec {
                name: "b".to_string(),
                dim: Some(1),
                slice: None,
            },
        ];
        let err = MergeComponent::build(
            "merged",
            MergeOp::Concat,
            &sources,
            vec![vec![4, 5], vec![4, 6]],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            GraphError::Config(ConfigurationError::MergeShapeMismatch { .. })
        ));
    }

    #[test]
    fn batch_mismatch_fails_at_forward() -> Result<(), GraphError> {
        let merge = MergeComponent::build(
            "merged",
            MergeOp::Concat,
            &two_plain_sources(),
            vec![vec![4], vec![6]],
        )?;
        let device = Device::Cpu;
        let mut ctx = ExecutionContext::new();
        ctx.insert("a".to_string(), Tensor::zeros((3, 4), candle_core::DType::F32, &device)?);
        ctx.insert("b".to_string(), Tensor::zeros((2, 6), candle_core::DType::F32, &device)?);
        let err = merge.forward(&mut ctx).unwrap_err();
        assert!(matches!(
            err,
            GraphError::Shape(crate::error::ShapeError::BatchMismatch { .. })
        ));
        Ok(())
    }
}
