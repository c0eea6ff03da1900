//! Direction alignment goals: plane normals, pointing, base heading and
//! gravity-driven joints.

use nalgebra::{Point3, UnitVector3, Vector3};
use pliant_cas::{if_greater_eq, save_division, vector_slerp, Expr, ExprVec3};
use pliant_core::{Context, PliantError, SoftConstraint, WEIGHTS, WEIGHT_ABOVE_CA, WEIGHT_BELOW_CA};
use pliant_robot::{joint_position_expr, KinematicModel};
use serde_json::json;

use crate::goal::{ConstraintSet, Goal};
use crate::shaping::{expr_velocity, limit_velocity};

fn vec3_params(v: &Vector3<f64>) -> serde_json::Value {
    json!({ "x": v.x, "y": v.y, "z": v.z })
}

fn param_vec3(ctx: &mut Context, identity: &str, name: &str) -> Result<ExprVec3, PliantError> {
    Ok(ExprVec3::new(
        ctx.param_expr(identity, &[name, "x"])?,
        ctx.param_expr(identity, &[name, "y"])?,
        ctx.param_expr(identity, &[name, "z"])?,
    ))
}

/// Three rows rotating a tip-fixed direction onto a root-fixed one, stepping
/// along the interpolated arc between them.
pub(crate) fn add_minimize_vector_angle_constraints(
    ctx: &mut Context,
    model: &dyn KinematicModel,
    set: &mut ConstraintSet,
    identity: &str,
    max_velocity: Expr,
    root: &str,
    tip: &str,
    tip_normal: &ExprVec3,
    root_goal_normal: &ExprVec3,
) -> Result<(), PliantError> {
    let root_r_tip = model.fk_expression(ctx, root, tip)?.rotation();
    let root_v_tip_normal = root_r_tip.mul_vec(tip_normal);

    let angle = root_v_tip_normal.dot(root_goal_normal).acos();
    let fraction = save_division(limit_velocity(ctx, angle.clone(), max_velocity), angle);
    let intermediate = vector_slerp(&root_v_tip_normal, root_goal_normal, &fraction);
    let error = intermediate.sub(&root_v_tip_normal);

    for (suffix, (err, cur)) in ["/rot/x", "/rot/y", "/rot/z"]
        .into_iter()
        .zip(error.components().into_iter().zip(root_v_tip_normal.components()))
    {
        set.add(
            format!("{identity}{suffix}"),
            SoftConstraint::new(err.clone(), err, Expr::constant(WEIGHT_ABOVE_CA), cur),
        )?;
    }
    Ok(())
}

/// Rotate a plane normal fixed in the tip link onto a normal fixed in the
/// root link.
pub struct AlignPlanes {
    pub root: String,
    pub tip: String,
    /// Goal normal in the root frame.
    pub root_normal: UnitVector3<f64>,
    /// Controlled normal in the tip frame.
    pub tip_normal: UnitVector3<f64>,
    pub max_velocity: f64,
}

impl AlignPlanes {
    pub fn new(
        root: &str,
        tip: &str,
        root_normal: Vector3<f64>,
        tip_normal: Vector3<f64>,
    ) -> Self {
        Self {
            root: root.to_string(),
            tip: tip.to_string(),
            root_normal: UnitVector3::new_normalize(root_normal),
            tip_normal: UnitVector3::new_normalize(tip_normal),
            max_velocity: 0.5,
        }
    }

    pub fn with_max_velocity(mut self, max_velocity: f64) -> Self {
        self.max_velocity = max_velocity;
        self
    }
}

impl Goal for AlignPlanes {
    fn identity(&self) -> String {
        let n = &self.tip_normal;
        format!(
            "AlignPlanes/{}/{}_X:{}_Y:{}_Z:{}",
            self.root, self.tip, n.x, n.y, n.z
        )
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
                "root_normal": vec3_params(&self.root_normal),
                "tip_normal": vec3_params(&self.tip_normal),
                "max_velocity": self.max_velocity,
            }),
        );
        let root_normal = param_vec3(ctx, &identity, "root_normal")?;
        let tip_normal = param_vec3(ctx, &identity, "tip_normal")?;
        let max_velocity = ctx.param_expr(&identity, &["max_velocity"])?;
        add_minimize_vector_angle_constraints(
            ctx,
            model,
            set,
            &identity,
            max_velocity,
            &self.root,
            &self.tip,
            &tip_normal,
            &root_normal,
        )
    }
}

/// Point a tip-fixed axis at a goal point in the root frame.
pub struct Pointing {
    pub root: String,
    pub tip: String,
    pub goal_point: Point3<f64>,
    /// Axis in the tip frame; defaults to +z.
    pub pointing_axis: UnitVector3<f64>,
}

impl Pointing {
    pub fn new(root: &str, tip: &str, goal_point: Point3<f64>) -> Self {
        Self {
            root: root.to_string(),
            tip: tip.to_string(),
            goal_point,
            pointing_axis: Vector3::z_axis(),
        }
    }

    pub fn with_pointing_axis(mut self, axis: Vector3<f64>) -> Self {
        self.pointing_axis = UnitVector3::new_normalize(axis);
        self
    }
}

impl Goal for Pointing {
    fn identity(&self) -> String {
        format!("Pointing/{}/{}", self.root, self.tip)
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
                "goal_point": {
                    "x": self.goal_point.x,
                    "y": self.goal_point.y,
                    "z": self.goal_point.z,
                },
                "pointing_axis": vec3_params(&self.pointing_axis),
            }),
        );
        let goal_point = param_vec3(ctx, &identity, "goal_point")?;
        let pointing_axis = param_vec3(ctx, &identity, "pointing_axis")?;

        let root_t_tip = model.fk_expression(ctx, &self.root, &self.tip)?;
        let goal_axis = goal_point.sub(&root_t_tip.position()).normalized();
        let current_axis = root_t_tip.rotation().mul_vec(&pointing_axis);
        let diff = goal_axis.sub(&current_axis);

        for (suffix, (d, cur)) in ["/x", "/y", "/z"]
            .into_iter()
            .zip(diff.components().into_iter().zip(current_axis.components()))
        {
            set.add(
                format!("{identity}{suffix}"),
                SoftConstraint::new(d.clone(), d, Expr::constant(WEIGHT_BELOW_CA), cur),
            )?;
        }
        Ok(())
    }
}

/// Keep a mobile base's forward axis aligned with its direction of travel,
/// within a dead band, and only while actually moving.
pub struct BasePointingForward {
    /// Root of the odometry chain.
    pub odom: String,
    pub base_footprint: String,
    /// Link whose linear velocity defines "direction of travel"; defaults
    /// to the base footprint.
    pub velocity_tip: Option<String>,
    /// Forward axis in the base footprint frame.
    pub forward_axis: UnitVector3<f64>,
    /// Allowed heading error band, radians.
    pub range: f64,
    pub max_velocity: f64,
    /// Below this linear speed the constraint is inactive.
    pub linear_velocity_threshold: f64,
}

impl BasePointingForward {
    pub fn new(odom: &str, base_footprint: &str) -> Self {
        Self {
            odom: odom.to_string(),
            base_footprint: base_footprint.to_string(),
            velocity_tip: None,
            forward_axis: Vector3::x_axis(),
            range: std::f64::consts::FRAC_PI_8,
            max_velocity: std::f64::consts::FRAC_PI_8,
            linear_velocity_threshold: 0.02,
        }
    }

    pub fn with_forward_axis(mut self, axis: Vector3<f64>) -> Self {
        self.forward_axis = UnitVector3::new_normalize(axis);
        self
    }
}

impl Goal for BasePointingForward {
    fn identity(&self) -> String {
        let a = &self.forward_axis;
        format!(
            "BasePointingForward/{}/{}_X:{}_Y:{}_Z:{}",
            self.odom, self.base_footprint, a.x, a.y, a.z
        )
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
                "forward_axis": vec3_params(&self.forward_axis),
                "range": self.range,
                "max_velocity": self.max_velocity,
                "linear_velocity_threshold": self.linear_velocity_threshold,
            }),
        );
        let forward_axis = param_vec3(ctx, &identity, "forward_axis")?;
        let range = ctx.param_expr(&identity, &["range"])?;
        let max_velocity = ctx.param_expr(&identity, &["max_velocity"])?;
        let threshold = ctx.param_expr(&identity, &["linear_velocity_threshold"])?;

        let velocity_tip = self.velocity_tip.as_deref().unwrap_or(&self.base_footprint);
        let tip_position = model
            .fk_expression(ctx, &self.odom, velocity_tip)?
            .position();
        let travel = ExprVec3::new(
            expr_velocity(ctx, model, &tip_position.x),
            expr_velocity(ctx, model, &tip_position.y),
            expr_velocity(ctx, model, &tip_position.z),
        );
        let travel_direction = travel.normalized();
        let linear_velocity = travel.norm();

        let heading = model
            .fk_expression(ctx, &self.odom, &self.base_footprint)?
            .rotation()
            .mul_vec(&forward_axis);
        let error = travel_direction.dot(&heading).acos();

        let lower_active = limit_velocity(ctx, error.clone() + range.clone(), max_velocity.clone());
        let upper_active = limit_velocity(ctx, error.clone() - range, max_velocity);
        let lower = if_greater_eq(
            threshold.clone(),
            linear_velocity.clone(),
            Expr::zero(),
            lower_active,
        );
        let upper = if_greater_eq(threshold, linear_velocity, Expr::zero(), upper_active);

        set.add(
            format!("{identity}/error"),
            SoftConstraint::new(-lower, -upper, Expr::constant(WEIGHT_BELOW_CA), error),
        )?;
        Ok(())
    }
}

/// Let a joint swing so a body's center of mass falls toward gravity.
pub struct GravityJoint {
    pub joint: String,
    /// Link whose evaluated position stands in for the hanging mass.
    pub body: String,
}

impl GravityJoint {
    pub fn new(joint: &str, body: &str) -> Self {
        Self {
            joint: joint.to_string(),
            body: body.to_string(),
        }
    }
}

impl Goal for GravityJoint {
    fn identity(&self) -> String {
        format!("GravityJoint/{}", self.joint)
    }

    fn make_constraints(
        &self,
        ctx: &mut Context,
        model: &dyn KinematicModel,
        set: &mut ConstraintSet,
    ) -> Result<(), PliantError> {
        let identity = self.identity();
        let current_joint = joint_position_expr(ctx, &self.joint);
        let parent = model.parent_link(&self.joint)?.to_string();

        let parent_r_root = model
            .fk_expression(ctx, &parent, model.root())?
            .rotation();
        let com = ctx
            .fk_evaluated_frame(&parent, &self.body)
            .position()
            .normalized();

        let gravity = parent_r_root.mul_vec(&ExprVec3::from_f64(0.0, 0.0, -1.0));
        let axis = model.joint_axis(&self.joint)?;
        let axis = ExprVec3::from_f64(axis.x, axis.y, axis.z);

        // Project gravity into the joint's plane of motion.
        let along_axis = gravity.dot(&axis);
        let goal = gravity.sub(&axis.scale(&along_axis)).normalized();

        let swing = com.dot(&goal).acos();
        let direction = com.cross(&goal).dot(&axis).signum();
        let goal_vel = swing * direction;

        set.add(
            identity,
            SoftConstraint::new(
                goal_vel.clone(),
                goal_vel,
                Expr::constant(WEIGHTS[3]),
                current_joint,
            ),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Isometry3;
    use pliant_cas::Symbol;
    use pliant_core::StateKey;
    use pliant_robot::{JointSpec, SerialChainModel};

    fn eval(ctx: &Context, e: &Expr) -> f64 {
        let syms: Vec<Symbol> = e.free_symbols().into_iter().collect();
        let vals = ctx.gather(&syms).unwrap();
        let max = syms.iter().map(|s| s.index()).max().unwrap_or(0);
        let mut dense = vec![f64::NAN; max + 1];
        for (s, v) in syms.iter().zip(vals) {
            dense[s.index()] = v;
        }
        e.eval(&dense)
    }

    fn wrist_model() -> SerialChainModel {
        SerialChainModel::new(
            "wrist",
            "base",
            vec![JointSpec::revolute(
                "roll",
                "tool",
                Isometry3::identity(),
                Vector3::x(),
            )],
        )
    }

    #[test]
    fn align_planes_error_vanishes_when_aligned() {
        let model = wrist_model();
        let mut ctx = Context::with_sample_period(0.05);
        let mut set = ConstraintSet::new();
        AlignPlanes::new("base", "tool", Vector3::z(), Vector3::z())
            .make_constraints(&mut ctx, &model, &mut set)
            .unwrap();
        ctx.bind(&StateKey::joint_position("roll"), 0.0);
        assert_eq!(set.len(), 3);
        for (_, row) in set.iter() {
            assert_relative_eq!(eval(&ctx, &row.lower), 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn align_planes_steps_toward_goal_normal() {
        let model = wrist_model();
        let mut ctx = Context::with_sample_period(0.05);
        let mut set = ConstraintSet::new();
        AlignPlanes::new("base", "tool", Vector3::z(), Vector3::z())
            .make_constraints(&mut ctx, &model, &mut set)
            .unwrap();
        // Roll the tool a quarter turn: its z normal now points along -y.
        ctx.bind(&StateKey::joint_position("roll"), std::f64::consts::FRAC_PI_2);

        let rows: Vec<(&str, &SoftConstraint)> = set.iter().collect();
        // Suffixes sort as x, y, z.
        let err_y = eval(&ctx, &rows[1].1.lower);
        let err_z = eval(&ctx, &rows[2].1.lower);
        // Normal must move from +y (rotated -z... sign aside) toward +z.
        assert!(err_z > 0.0, "z error should push toward goal, got {err_z}");
        assert!(err_y.abs() > 0.0);
        // Step size on the arc is bounded by max velocity over a tick.
        let step = (err_y * err_y + err_z * err_z).sqrt();
        assert!(step <= 0.5 * 0.05 + 1e-6, "step too large: {step}");
    }

    #[test]
    fn pointing_rows_vanish_when_aimed() {
        let model = SerialChainModel::new(
            "head",
            "base",
            vec![JointSpec::revolute(
                "pan",
                "camera",
                Isometry3::translation(0.0, 0.0, 1.0),
                Vector3::z(),
            )],
        );
        let mut ctx = Context::with_sample_period(0.05);
        let mut set = ConstraintSet::new();
        // Camera z axis already points at a goal straight above it.
        Pointing::new("base", "camera", Point3::new(0.0, 0.0, 3.0))
            .make_constraints(&mut ctx, &model, &mut set)
            .unwrap();
        ctx.bind(&StateKey::joint_position("pan"), 0.0);
        for (_, row) in set.iter() {
            assert_relative_eq!(eval(&ctx, &row.lower), 0.0, epsilon = 1e-9);
            assert_eq!(row.weight.as_const(), Some(WEIGHT_BELOW_CA));
        }
    }

    #[test]
    fn base_pointing_forward_inactive_below_threshold() {
        let model = SerialChainModel::new(
            "base",
            "odom",
            vec![
                JointSpec::prismatic("x", "x_link", Isometry3::identity(), Vector3::x())
                    .with_velocity_limit(1.0),
                JointSpec::continuous("yaw", "base_footprint", Isometry3::identity(), Vector3::z()),
            ],
        );
        let mut ctx = Context::with_sample_period(0.05);
        let mut set = ConstraintSet::new();
        BasePointingForward::new("odom", "base_footprint")
            .make_constraints(&mut ctx, &model, &mut set)
            .unwrap();

        ctx.bind(&StateKey::joint_position("x"), 0.0);
        ctx.bind(&StateKey::joint_position("yaw"), 0.3);
        ctx.bind(&StateKey::joint_velocity("x"), 0.0);
        ctx.bind(&StateKey::joint_velocity("yaw"), 0.0);

        let (_, row) = set.iter().next().unwrap();
        // Not moving: both bounds collapse to zero, the row floats.
        assert_relative_eq!(eval(&ctx, &row.lower), 0.0, epsilon = 1e-12);
        assert_relative_eq!(eval(&ctx, &row.upper), 0.0, epsilon = 1e-12);

        // Moving with heading error inside the band: the row may drift
        // either way.
        ctx.bind(&StateKey::joint_velocity("x"), 0.5);
        assert!(eval(&ctx, &row.lower) < 0.0);
        assert!(eval(&ctx, &row.upper) > 0.0);

        // Heading error beyond the band: both bounds demand a reduction.
        ctx.bind(&StateKey::joint_position("yaw"), 1.0);
        assert!(eval(&ctx, &row.lower) < 0.0);
        assert!(eval(&ctx, &row.upper) < 0.0);
    }

    #[test]
    fn gravity_joint_swings_com_toward_gravity() {
        // Pendulum about y; link hangs along +x at zero position.
        let model = SerialChainModel::new(
            "pendulum",
            "root",
            vec![JointSpec::revolute(
                "swing",
                "bob",
                Isometry3::identity(),
                Vector3::y(),
            )],
        );
        let mut ctx = Context::with_sample_period(0.05);
        let mut set = ConstraintSet::new();
        GravityJoint::new("swing", "bob")
            .make_constraints(&mut ctx, &model, &mut set)
            .unwrap();

        ctx.bind(&StateKey::joint_position("swing"), 0.0);
        // Evaluated com sits along +x in the parent frame.
        ctx.set_fk_evaluated("root", "bob", &Isometry3::translation(1.0, 0.0, 0.0));

        let (_, row) = set.iter().next().unwrap();
        // Gravity is -z; swinging from +x to -z about +y is a positive
        // quarter turn.
        assert_relative_eq!(
            eval(&ctx, &row.lower),
            std::f64::consts::FRAC_PI_2,
            epsilon = 1e-9
        );
        assert_eq!(row.weight.as_const(), Some(WEIGHTS[3]));
    }
}
