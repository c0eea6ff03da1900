//! Scalar symbolic expressions for whole-body control.
//!
//! Constraint goals are authored as expression graphs over joint state and
//! kinematic symbols, differentiated analytically to build the task jacobian,
//! then lowered to instruction tapes for fast per-tick evaluation.
//!
//! The algebra is deliberately scalar: vectors, frames and quaternions in
//! [`linalg`] are plain structs of scalar expressions, so every constraint
//! row stays a scalar by construction.

pub mod compile;
pub mod expr;
pub mod linalg;

pub use compile::CompiledMatrix;
pub use expr::{
    if_greater, if_greater_eq, if_greater_zero, if_less_eq, jacobian, save_division, Expr,
    Symbol, SymbolTable,
};
pub use linalg::{
    axis_angle_from_matrix, axis_angle_from_quaternion, distance_point_to_line_segment,
    quaternion_diff, quaternion_from_matrix, quaternion_slerp, rotation_from_axis_angle,
    rotation_from_quaternion, vector_slerp, ExprFrame, ExprMat3, ExprQuat, ExprVec3,
};
