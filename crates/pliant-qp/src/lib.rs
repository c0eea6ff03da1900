//! Whole-body QP control.
//!
//! [`assemble`] stacks the active soft and joint constraints into one
//! symbolic matrix and compiles it; [`solver`] drives Clarabel over the
//! filtered numeric problem; [`controller`] owns the per-tick loop that
//! binds fresh joint state and collision contacts, re-evaluates the
//! compiled matrix and emits a velocity command per controlled joint.

pub mod assemble;
pub mod controller;
pub mod diagnostics;
pub mod solver;

pub use assemble::{AssembledQp, FilterMap, FilteredQp, QpAssembler, StructuralFingerprint};
pub use controller::WholeBodyController;
pub use diagnostics::{QpDump, QpMatrices};
pub use solver::QpSolverAdapter;
