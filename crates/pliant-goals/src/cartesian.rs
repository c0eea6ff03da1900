//! Cartesian pose goals for a tip link relative to a root link.

use nalgebra::{Point3, UnitQuaternion};
use pliant_cas::{
    axis_angle_from_matrix, axis_angle_from_quaternion, quaternion_from_matrix, quaternion_slerp,
    quaternion_diff, rotation_from_axis_angle, rotation_from_quaternion, save_division, Expr,
    ExprQuat, ExprVec3,
};
use pliant_core::{Context, PliantError, SoftConstraint, WEIGHTS, WEIGHT_ABOVE_CA};
use pliant_robot::KinematicModel;
use serde_json::json;

use crate::goal::{ConstraintSet, Goal};
use crate::shaping::{limit_acceleration, limit_velocity, tapered_weight, translation_goal_curve};

/// Small fixed rotation composed into the expression side so that the
/// axis-angle extraction never sits exactly on the zero-angle singularity.
fn offset_rotation() -> pliant_cas::ExprMat3 {
    rotation_from_axis_angle(&ExprVec3::from_f64(0.0, 0.0, 1.0), &Expr::constant(1e-4))
}

/// Three rows pulling the tip position toward `r_p_g`, expressed in the
/// root frame. The displacement direction is preserved; only its magnitude
/// is shaped.
pub(crate) fn add_minimize_position_constraints(
    ctx: &mut Context,
    model: &dyn KinematicModel,
    set: &mut ConstraintSet,
    identity: &str,
    r_p_g: &ExprVec3,
    max_velocity: Expr,
    max_acceleration: Expr,
    root: &str,
    tip: &str,
) -> Result<(), PliantError> {
    let r_p_c = model.fk_expression(ctx, root, tip)?.position();

    let r_p_error = r_p_g.sub(&r_p_c);
    let trans_error = r_p_error.norm();

    let trans_scale = limit_acceleration(
        ctx,
        model,
        &r_p_c.norm(),
        trans_error.clone(),
        max_acceleration,
        max_velocity,
    );
    let weight = tapered_weight(&trans_error, &translation_goal_curve());

    let current = r_p_c.components();
    let error = r_p_error.components();
    for (suffix, (err, cur)) in ["/x", "/y", "/z"].into_iter().zip(error.into_iter().zip(current))
    {
        let step = save_division(err, trans_error.clone()) * trans_scale.clone();
        set.add(
            format!("{identity}{suffix}"),
            SoftConstraint::new(step.clone(), step, weight.clone(), cur),
        )?;
    }
    Ok(())
}

fn goal_point_exprs(ctx: &mut Context, identity: &str) -> Result<ExprVec3, PliantError> {
    Ok(ExprVec3::new(
        ctx.param_expr(identity, &["goal", "x"])?,
        ctx.param_expr(identity, &["goal", "y"])?,
        ctx.param_expr(identity, &["goal", "z"])?,
    ))
}

fn goal_quat_exprs(ctx: &mut Context, identity: &str) -> Result<ExprQuat, PliantError> {
    Ok(ExprQuat::new(
        ctx.param_expr(identity, &["goal", "qx"])?,
        ctx.param_expr(identity, &["goal", "qy"])?,
        ctx.param_expr(identity, &["goal", "qz"])?,
        ctx.param_expr(identity, &["goal", "qw"])?,
    ))
}

/// Move the tip link to a goal position in the root frame.
pub struct CartesianPosition {
    pub root: String,
    pub tip: String,
    pub goal: Point3<f64>,
    pub max_velocity: f64,
    pub max_acceleration: f64,
}

impl CartesianPosition {
    pub fn new(root: &str, tip: &str, goal: Point3<f64>) -> Self {
        Self {
            root: root.to_string(),
            tip: tip.to_string(),
            goal,
            max_velocity: 0.1,
            max_acceleration: 0.1,
        }
    }

    pub fn with_max_velocity(mut self, max_velocity: f64) -> Self {
        self.max_velocity = max_velocity;
        self
    }

    pub fn with_max_acceleration(mut self, max_acceleration: f64) -> Self {
        self.max_acceleration = max_acceleration;
        self
    }
}

impl Goal for CartesianPosition {
    fn identity(&self) -> String {
        format!("CartesianPosition/{}/{}", self.root, self.tip)
    }

    fn make_constraints(
        &self,
        ctx: &mut Context,
        model: &dyn KinematicModel,
        set: &mut ConstraintSet,
    ) -> Result<(), PliantError> {
        let identity = self.identity();
        ctx.set_goal_params(
            &identity,
            json!({
                "goal": { "x": self.goal.x, "y": self.goal.y, "z": self.goal.z },
                "max_velocity": self.max_velocity,
                "max_acceleration": self.max_acceleration,
            }),
        );
        let r_p_g = goal_point_exprs(ctx, &identity)?;
        let max_velocity = ctx.param_expr(&identity, &["max_velocity"])?;
        let max_acceleration = ctx.param_expr(&identity, &["max_acceleration"])?;
        add_minimize_position_constraints(
            ctx,
            model,
            set,
            &identity,
            &r_p_g,
            max_velocity,
            max_acceleration,
            &self.root,
            &self.tip,
        )
    }
}

/// Rotate the tip link to a goal orientation via the relative axis-angle.
pub struct CartesianOrientation {
    pub root: String,
    pub tip: String,
    pub goal: UnitQuaternion<f64>,
    pub max_velocity: f64,
    pub max_acceleration: f64,
}

impl CartesianOrientation {
    pub fn new(root: &str, tip: &str, goal: UnitQuaternion<f64>) -> Self {
        Self {
            root: root.to_string(),
            tip: tip.to_string(),
            goal,
            max_velocity: 0.5,
            max_acceleration: 0.5,
        }
    }

    pub fn with_max_velocity(mut self, max_velocity: f64) -> Self {
        self.max_velocity = max_velocity;
        self
    }

    pub fn with_max_acceleration(mut self, max_acceleration: f64) -> Self {
        self.max_acceleration = max_acceleration;
        self
    }
}

fn orientation_params(goal: &UnitQuaternion<f64>, max_velocity: f64, max_acceleration: f64) -> serde_json::Value {
    json!({
        "goal": { "qx": goal.i, "qy": goal.j, "qz": goal.k, "qw": goal.w },
        "max_velocity": max_velocity,
        "max_acceleration": max_acceleration,
    })
}

impl Goal for CartesianOrientation {
    fn identity(&self) -> String {
        format!("CartesianOrientation/{}/{}", self.root, self.tip)
    }

    fn make_constraints(
        &self,
        ctx: &mut Context,
        model: &dyn KinematicModel,
        set: &mut ConstraintSet,
    ) -> Result<(), PliantError> {
        let identity = self.identity();
        ctx.set_goal_params(
            &identity,
            orientation_params(&self.goal, self.max_velocity, self.max_acceleration),
        );
        let goal_rotation = rotation_from_quaternion(&goal_quat_exprs(ctx, &identity)?);
        let max_velocity = ctx.param_expr(&identity, &["max_velocity"])?;
        let max_acceleration = ctx.param_expr(&identity, &["max_acceleration"])?;

        let current_rotation = model.fk_expression(ctx, &self.root, &self.tip)?.rotation();
        let current_evaluated = ctx.fk_evaluated_frame(&self.root, &self.tip).rot;

        let relative = current_evaluated
            .transpose()
            .mul(&offset_rotation())
            .mul(&current_rotation);
        let (axis, current_angle) = axis_angle_from_matrix(&relative);
        let c_aa = axis.scale(&current_angle);

        let (goal_axis, goal_angle) =
            axis_angle_from_matrix(&current_rotation.transpose().mul(&goal_rotation));
        let capped_angle = limit_acceleration(
            ctx,
            model,
            &current_angle,
            goal_angle,
            max_acceleration,
            max_velocity,
        );
        let control = goal_axis.scale(&capped_angle);

        for (suffix, (ctrl, cur)) in ["/0", "/1", "/2"]
            .into_iter()
            .zip(control.components().into_iter().zip(c_aa.components()))
        {
            set.add(
                format!("{identity}{suffix}"),
                SoftConstraint::new(ctrl.clone(), ctrl, Expr::constant(WEIGHTS[5]), cur),
            )?;
        }
        Ok(())
    }
}

/// Rotate the tip link to a goal orientation along the quaternion
/// interpolation path, so large reorientations stay on the shortest arc.
pub struct CartesianOrientationSlerp {
    pub root: String,
    pub tip: String,
    pub goal: UnitQuaternion<f64>,
    pub max_velocity: f64,
    pub max_acceleration: f64,
}

impl CartesianOrientationSlerp {
    pub fn new(root: &str, tip: &str, goal: UnitQuaternion<f64>) -> Self {
        Self {
            root: root.to_string(),
            tip: tip.to_string(),
            goal,
            max_velocity: 0.5,
            max_acceleration: 0.5,
        }
    }

    pub fn with_max_velocity(mut self, max_velocity: f64) -> Self {
        self.max_velocity = max_velocity;
        self
    }

    pub fn with_max_acceleration(mut self, max_acceleration: f64) -> Self {
        self.max_acceleration = max_acceleration;
        self
    }
}

impl Goal for CartesianOrientationSlerp {
    fn identity(&self) -> String {
        format!("CartesianOrientationSlerp/{}/{}", self.root, self.tip)
    }

    fn make_constraints(
        &self,
        ctx: &mut Context,
        model: &dyn KinematicModel,
        set: &mut ConstraintSet,
    ) -> Result<(), PliantError> {
        let identity = self.identity();
        ctx.set_goal_params(
            &identity,
            orientation_params(&self.goal, self.max_velocity, self.max_acceleration),
        );
        let goal_quat = goal_quat_exprs(ctx, &identity)?;
        let goal_rotation = rotation_from_quaternion(&goal_quat);
        let max_velocity = ctx.param_expr(&identity, &["max_velocity"])?;

        let current_rotation = model.fk_expression(ctx, &self.root, &self.tip)?.rotation();
        let current_evaluated = ctx.fk_evaluated_frame(&self.root, &self.tip).rot;

        let relative = current_evaluated
            .transpose()
            .mul(&offset_rotation())
            .mul(&current_rotation);
        let (current_axis, current_angle) = axis_angle_from_matrix(&relative);
        let current_aa = current_axis.scale(&current_angle);

        let (_, error_angle) =
            axis_angle_from_matrix(&current_rotation.transpose().mul(&goal_rotation));
        let error_angle = error_angle.abs();
        let capped_fraction = save_division(
            limit_velocity(ctx, error_angle.clone(), max_velocity),
            error_angle,
        );

        let current_quat = quaternion_from_matrix(&current_rotation);
        let intermediate = quaternion_slerp(&current_quat, &goal_quat, &capped_fraction);
        let step = quaternion_diff(&current_quat, &intermediate);
        let (step_axis, step_angle) = axis_angle_from_quaternion(&step);
        let step_aa = step_axis.scale(&step_angle);

        for (suffix, (bound, cur)) in ["/0", "/1", "/2"]
            .into_iter()
            .zip(step_aa.components().into_iter().zip(current_aa.components()))
        {
            set.add(
                format!("{identity}{suffix}"),
                SoftConstraint::new(bound.clone(), bound, Expr::constant(WEIGHT_ABOVE_CA), cur),
            )?;
        }
        Ok(())
    }
}

/// Full pose goal: position rows plus slerp orientation rows.
pub struct CartesianPose {
    pub root: String,
    pub tip: String,
    pub goal_position: Point3<f64>,
    pub goal_orientation: UnitQuaternion<f64>,
    pub translation_max_velocity: f64,
    pub translation_max_acceleration: f64,
    pub rotation_max_velocity: f64,
    pub rotation_max_acceleration: f64,
}

impl CartesianPose {
    pub fn new(
        root: &str,
        tip: &str,
        goal_position: Point3<f64>,
        goal_orientation: UnitQuaternion<f64>,
    ) -> Self {
        Self {
            root: root.to_string(),
            tip: tip.to_string(),
            goal_position,
            goal_orientation,
            translation_max_velocity: 0.1,
            translation_max_acceleration: 0.1,
            rotation_max_velocity: 0.5,
            rotation_max_acceleration: 0.5,
        }
    }
}

impl Goal for CartesianPose {
    fn identity(&self) -> String {
        format!("CartesianPose/{}/{}", self.root, self.tip)
    }

    fn make_constraints(
        &self,
        ctx: &mut Context,
        model: &dyn KinematicModel,
        set: &mut ConstraintSet,
    ) -> Result<(), PliantError> {
        CartesianPosition::new(&self.root, &self.tip, self.goal_position)
            .with_max_velocity(self.translation_max_velocity)
            .with_max_acceleration(self.translation_max_acceleration)
            .make_constraints(ctx, model, set)?;
        CartesianOrientationSlerp::new(&self.root, &self.tip, self.goal_orientation)
            .with_max_velocity(self.rotation_max_velocity)
            .with_max_acceleration(self.rotation_max_acceleration)
            .make_constraints(ctx, model, set)
    }
}
