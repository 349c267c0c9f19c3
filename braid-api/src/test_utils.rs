use crate::builders::policy::{CORE_OBS, EnvDescription, GLOBAL_VARS, GRID_OBS, Space};
use braid_core::context::ExecutionContext;
use candle_core::{Device, Result, Tensor};

/// A small discrete-action environment description with two feature groups.
pub fn demo_env() -> EnvDescription {
    EnvDescription::new(
        vec!["hp".to_string(), "ammo".to_string(), "shield".to_string()],
        vec!["round".to_string(), "score".to_string()],
        Space::Discrete(4),
    )
}

/// A single-step observation batch for [`demo_env`].
pub fn demo_batch(batch: usize, device: &Device) -> Result<ExecutionContext> {
    let grid = Tensor::randn(0f32, 1., (batch, 3), device)?;
    let globals = Tensor::randn(0f32, 1., (batch, 2), device)?;
    Ok(ExecutionContext::from_observations([
        (CORE_OBS.to_string(), grid.clone()),
        (GRID_OBS.to_string(), grid),
        (GLOBAL_VARS.to_string(), globals),
    ]))
}
