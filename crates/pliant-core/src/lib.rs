//! Shared data model for the pliant whole-body controller.
//!
//! Constraint row types, the priority-weight ladder, the injected keyed
//! context that replaces any process-wide state, configuration, and the
//! workspace error taxonomy.

pub mod config;
pub mod context;
pub mod error;
pub mod types;
pub mod weights;

pub use config::{CollisionConfig, ControlConfig, WeightCurve};
pub use context::{Context, StateKey};
pub use error::{ConfigError, ContextError, GoalError, ModelError, PliantError, QpError};
pub use types::{JointConstraint, SoftConstraint, DEFAULT_SLACK_LIMIT};
pub use weights::{
    WEIGHTS, WEIGHT_ABOVE_CA, WEIGHT_BELOW_CA, WEIGHT_COLLISION_AVOIDANCE, WEIGHT_MAX, WEIGHT_MIN,
};
