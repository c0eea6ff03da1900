//! Kinematic-provider interface for the pliant controller.
//!
//! [`KinematicModel`] is the trait the constraint builders and controller
//! consume; [`SerialChainModel`] is a concrete serial-chain implementation
//! with symbolic forward kinematics.

pub mod chain;
pub mod model;

pub use chain::{JointSpec, SerialChainModel};
pub use model::{
    joint_position_expr, joint_position_symbols, joint_velocity_symbols, JointKind,
    JointPositions, KinematicModel,
};
