pub mod encoder;
pub mod linear;
pub mod merge;
pub mod recurrent;
pub mod reshape;
pub mod stack;

use crate::context::ExecutionContext;
use crate::error::GraphError;
use encoder::EncoderComponent;
use enum_dispatch::enum_dispatch;
use linear::{ActivationComponent, LinearComponent};
use merge::MergeComponent;
use recurrent::RecurrentComponent;
use reshape::{CompressComponent, ExpandComponent};

/// One constructed graph node: owns its parameters and its resolved batchless
/// output shape, reads its sources from the execution context and writes its
/// own output there under its name.
#[enum_dispatch]
pub trait Component {
    fn name(&self) -> &str;

    /// Resolved output shape, batch dim excluded.
    fn out_shape(&self) -> &[usize];

    fn forward(&self, ctx: &mut ExecutionContext) -> Result<(), GraphError>;
}

#[enum_dispatch(Component)]
#[derive(Debug)]
pub enum ComponentKind {
    Linear(LinearComponent),
    Activation(ActivationComponent),
    Merge(MergeComponent),
    Expand(ExpandComponent),
    Compress(CompressComponent),
    Recurrent(RecurrentComponent),
    Encoder(EncoderComponent),
}
