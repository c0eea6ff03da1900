//! Bar grasping: align the gripper axis with a bar and slide the tip onto
//! the nearest point of the bar segment.

use nalgebra::{Point3, UnitVector3, Vector3};
use pliant_cas::distance_point_to_line_segment;
use pliant_core::{Context, PliantError};
use pliant_robot::KinematicModel;
use serde_json::json;

use crate::align::add_minimize_vector_angle_constraints;
use crate::cartesian::add_minimize_position_constraints;
use crate::goal::{ConstraintSet, Goal};

pub struct GraspBar {
    pub root: String,
    pub tip: String,
    /// Grasp axis in the tip frame.
    pub tip_grasp_axis: UnitVector3<f64>,
    /// Bar center in the root frame.
    pub bar_center: Point3<f64>,
    /// Bar direction in the root frame.
    pub bar_axis: UnitVector3<f64>,
    pub bar_length: f64,
    pub max_velocity: f64,
}

impl GraspBar {
    pub fn new(
        root: &str,
        tip: &str,
        tip_grasp_axis: Vector3<f64>,
        bar_center: Point3<f64>,
        bar_axis: Vector3<f64>,
        bar_length: f64,
    ) -> Self {
        Self {
            root: root.to_string(),
            tip: tip.to_string(),
            tip_grasp_axis: UnitVector3::new_normalize(tip_grasp_axis),
            bar_center,
            bar_axis: UnitVector3::new_normalize(bar_axis),
            bar_length,
            max_velocity: 0.1,
        }
    }

    pub fn with_max_velocity(mut self, max_velocity: f64) -> Self {
        self.max_velocity = max_velocity;
        self
    }
}

impl Goal for GraspBar {
    fn identity(&self) -> String {
        format!("GraspBar/{}/{}", self.root, self.tip)
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
                "tip_grasp_axis": {
                    "x": self.tip_grasp_axis.x,
                    "y": self.tip_grasp_axis.y,
                    "z": self.tip_grasp_axis.z,
                },
                "bar_center": {
                    "x": self.bar_center.x,
                    "y": self.bar_center.y,
                    "z": self.bar_center.z,
                },
                "bar_axis": {
                    "x": self.bar_axis.x,
                    "y": self.bar_axis.y,
                    "z": self.bar_axis.z,
                },
                "bar_length": self.bar_length,
                "max_velocity": self.max_velocity,
            }),
        );
        let param_vec3 = |ctx: &mut Context, name: &str| -> Result<pliant_cas::ExprVec3, PliantError> {
            Ok(pliant_cas::ExprVec3::new(
                ctx.param_expr(&identity, &[name, "x"])?,
                ctx.param_expr(&identity, &[name, "y"])?,
                ctx.param_expr(&identity, &[name, "z"])?,
            ))
        };
        let bar_axis = param_vec3(ctx, "bar_axis")?;
        let tip_grasp_axis = param_vec3(ctx, "tip_grasp_axis")?;
        let bar_center = param_vec3(ctx, "bar_center")?;
        let bar_length = ctx.param_expr(&identity, &["bar_length"])?;
        let max_velocity = ctx.param_expr(&identity, &["max_velocity"])?;

        add_minimize_vector_angle_constraints(
            ctx,
            model,
            set,
            &identity,
            max_velocity,
            &self.root,
            &self.tip,
            &tip_grasp_axis,
            &bar_axis,
        )?;

        let root_p_tip = model.fk_expression(ctx, &self.root, &self.tip)?.position();
        let half = bar_axis.scale(&(bar_length / 2.0));
        let line_start = bar_center.add(&half);
        let line_end = bar_center.sub(&half);
        let (_, nearest) = distance_point_to_line_segment(&root_p_tip, &line_start, &line_end);

        add_minimize_position_constraints(
            ctx,
            model,
            set,
            &identity,
            &nearest,
            pliant_cas::Expr::constant(0.1),
            pliant_cas::Expr::constant(0.1),
            &self.root,
            &self.tip,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Isometry3;
    use pliant_cas::{Expr, Symbol};
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

    #[test]
    fn grasp_bar_emits_angle_and_position_rows() {
        let model = SerialChainModel::new(
            "gripper",
            "base",
            vec![JointSpec::prismatic(
                "slide",
                "tool",
                Isometry3::identity(),
                Vector3::x(),
            )],
        );
        let mut ctx = Context::with_sample_period(0.05);
        let mut set = ConstraintSet::new();
        // Vertical bar half a meter along x; gripper z is the grasp axis.
        GraspBar::new(
            "base",
            "tool",
            Vector3::z(),
            Point3::new(0.5, 0.0, 0.0),
            Vector3::z(),
            0.4,
        )
        .make_constraints(&mut ctx, &model, &mut set)
        .unwrap();
        assert_eq!(set.len(), 6);

        ctx.bind(&StateKey::joint_position("slide"), 0.0);
        ctx.bind(&StateKey::joint_velocity("slide"), 0.0);

        // Axes already aligned: rotation rows are zero.
        for (name, row) in set.iter() {
            if name.contains("/rot/") {
                assert_relative_eq!(eval(&ctx, &row.lower), 0.0, epsilon = 1e-9);
            }
        }
        // Position rows pull the tip toward the nearest bar point (0.5, 0, 0).
        let x_row = set
            .iter()
            .find(|(name, _)| name.ends_with("/x") && !name.contains("/rot/"))
            .map(|(_, row)| row)
            .unwrap();
        assert!(eval(&ctx, &x_row.lower) > 0.0);
    }
}
