//! Motion goal builders.
//!
//! Each goal turns its parameters into named soft constraint rows over the
//! robot's joint symbols. Numeric parameters live in the context and stay
//! runtime-tunable; the rows themselves are built once per goal-set change.

pub mod align;
pub mod cartesian;
pub mod collision;
pub mod goal;
pub mod grasp;
pub mod joint;
pub mod params;
pub mod registry;
pub mod shaping;

pub use align::{AlignPlanes, BasePointingForward, GravityJoint, Pointing};
pub use cartesian::{
    CartesianOrientation, CartesianOrientationSlerp, CartesianPose, CartesianPosition,
};
pub use collision::{
    add_maximize_point_distance, ExternalCollisionAvoidance, SelfCollisionAvoidance,
};
pub use goal::{ConstraintSet, Goal};
pub use grasp::GraspBar;
pub use joint::{
    JointPositionContinuous, JointPositionList, JointPositionPrismatic, JointPositionRevolute,
};
pub use params::UpdateParameters;
pub use registry::GoalRegistry;
