//! Runtime parameter retuning expressed as a goal.

use pliant_core::{Context, PliantError};
use pliant_robot::KinematicModel;
use serde_json::Value;

use crate::goal::{ConstraintSet, Goal};

/// Overwrite numeric parameters of already-built goals. Emits no rows of
/// its own; only existing numeric leaves may change, so the constraint
/// structure is untouched and no recompilation is triggered.
pub struct UpdateParameters {
    pub updates: Value,
}

impl UpdateParameters {
    pub fn new(updates: Value) -> Self {
        Self { updates }
    }
}

impl Goal for UpdateParameters {
    fn identity(&self) -> String {
        "UpdateParameters".to_string()
    }

    fn make_constraints(
        &self,
        ctx: &mut Context,
        _model: &dyn KinematicModel,
        _set: &mut ConstraintSet,
    ) -> Result<(), PliantError> {
        ctx.update_params(&self.updates)?;
        Ok(())
    }
}
