//! The kinematic-provider interface consumed by constraint builders.

use std::collections::BTreeMap;

use nalgebra::{Isometry3, Vector3};
use pliant_cas::{Expr, ExprFrame, Symbol};
use pliant_core::{Context, ModelError, StateKey};

/// Joint actuation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointKind {
    Revolute,
    /// Revolute without position limits (wraps around).
    Continuous,
    Prismatic,
    Fixed,
}

impl JointKind {
    pub fn is_actuated(self) -> bool {
        self != JointKind::Fixed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JointKind::Revolute => "revolute",
            JointKind::Continuous => "continuous",
            JointKind::Prismatic => "prismatic",
            JointKind::Fixed => "fixed",
        }
    }
}

/// Numeric joint positions keyed by joint name.
pub type JointPositions = BTreeMap<String, f64>;

/// Kinematics and topology queries the controller and builders need.
///
/// Symbolic transforms are expressed over joint position symbols interned in
/// the given [`Context`], so one compiled evaluator can substitute fresh
/// joint state every tick.
pub trait KinematicModel {
    fn name(&self) -> &str;

    /// Root link of the kinematic tree.
    fn root(&self) -> &str;

    /// Structural revision id. Changes whenever the joint or link set
    /// changes, invalidating compiled evaluators built against this model.
    fn revision(&self) -> u64;

    /// Actuated joint names, in a stable order.
    fn joint_names(&self) -> Vec<&str>;

    fn joint_kind(&self, joint: &str) -> Result<JointKind, ModelError>;

    /// Static velocity limit in rad/s or m/s.
    fn joint_velocity_limit(&self, joint: &str) -> Result<f64, ModelError>;

    /// Position limits; `None` for continuous joints.
    fn joint_position_limits(&self, joint: &str) -> Result<Option<(f64, f64)>, ModelError>;

    fn joint_axis(&self, joint: &str) -> Result<Vector3<f64>, ModelError>;

    fn parent_link(&self, joint: &str) -> Result<&str, ModelError>;

    fn child_link(&self, joint: &str) -> Result<&str, ModelError>;

    /// Links moved by actuated joints, in a stable order.
    fn controlled_links(&self) -> Vec<&str>;

    /// Unordered link pairs to monitor for self-collision.
    fn self_collision_pairs(&self) -> Vec<(&str, &str)>;

    /// Nearest actuated ancestor joint of `link`.
    fn controlling_joint(&self, link: &str) -> Result<&str, ModelError>;

    /// Symbolic transform from `root` to `tip` over joint position symbols.
    fn fk_expression(
        &self,
        ctx: &mut Context,
        root: &str,
        tip: &str,
    ) -> Result<ExprFrame, ModelError>;

    /// Numeric transform from `root` to `tip` at the given joint positions.
    fn fk_numeric(
        &self,
        positions: &JointPositions,
        root: &str,
        tip: &str,
    ) -> Result<Isometry3<f64>, ModelError>;
}

/// Position symbol of one joint.
pub fn joint_position_expr(ctx: &mut Context, joint: &str) -> Expr {
    ctx.expr(&StateKey::joint_position(joint))
}

/// Position symbols of all actuated joints, in model order.
pub fn joint_position_symbols(ctx: &mut Context, model: &dyn KinematicModel) -> Vec<Symbol> {
    model
        .joint_names()
        .iter()
        .map(|j| ctx.symbol(&StateKey::joint_position(j)))
        .collect()
}

/// Last-tick velocity symbols of all actuated joints, in model order.
pub fn joint_velocity_symbols(ctx: &mut Context, model: &dyn KinematicModel) -> Vec<Symbol> {
    model
        .joint_names()
        .iter()
        .map(|j| ctx.symbol(&StateKey::joint_velocity(j)))
        .collect()
}
