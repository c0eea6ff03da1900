//! Joint-space position goals.

use pliant_cas::Expr;
use pliant_core::{Context, GoalError, PliantError, SoftConstraint, WEIGHTS};
use pliant_robot::{joint_position_expr, JointKind, KinematicModel};
use serde_json::json;

use crate::goal::{ConstraintSet, Goal};
use crate::shaping::{
    angular_goal_curve, limit_acceleration, limit_velocity, shortest_angular_distance,
    tapered_weight, translation_goal_curve,
};

fn expect_kind(
    model: &dyn KinematicModel,
    goal: &str,
    joint: &str,
    expected: JointKind,
) -> Result<(), PliantError> {
    let actual = model.joint_kind(joint)?;
    if actual != expected {
        return Err(GoalError::WrongJointType {
            goal: goal.to_string(),
            joint: joint.to_string(),
            expected: expected.as_str().to_string(),
            actual: actual.as_str().to_string(),
        }
        .into());
    }
    Ok(())
}

/// Effective velocity bound: the requested one, never above the model's.
fn capped_velocity_limit(
    ctx: &mut Context,
    model: &dyn KinematicModel,
    identity: &str,
    joint: &str,
) -> Result<Expr, PliantError> {
    let requested = ctx.param_expr(identity, &["max_velocity"])?;
    let hard_limit = Expr::constant(model.joint_velocity_limit(joint)?);
    Ok(requested.min(&hard_limit))
}

/// Drive a continuous joint to a goal angle along the shortest arc.
pub struct JointPositionContinuous {
    pub joint: String,
    pub goal: f64,
    pub max_velocity: f64,
}

impl JointPositionContinuous {
    pub fn new(joint: &str, goal: f64) -> Self {
        Self {
            joint: joint.to_string(),
            goal,
            max_velocity: 1.0,
        }
    }

    pub fn with_max_velocity(mut self, max_velocity: f64) -> Self {
        self.max_velocity = max_velocity;
        self
    }
}

impl Goal for JointPositionContinuous {
    fn identity(&self) -> String {
        format!("JointPositionContinuous/{}", self.joint)
    }

    fn make_constraints(
        &self,
        ctx: &mut Context,
        model: &dyn KinematicModel,
        set: &mut ConstraintSet,
    ) -> Result<(), PliantError> {
        expect_kind(model, "JointPositionContinuous", &self.joint, JointKind::Continuous)?;
        let identity = self.identity();
        ctx.set_goal_params(
            &identity,
            json!({ "goal": self.goal, "max_velocity": self.max_velocity }),
        );

        let current = joint_position_expr(ctx, &self.joint);
        let goal = ctx.param_expr(&identity, &["goal"])?;
        let max_velocity = capped_velocity_limit(ctx, model, &identity, &self.joint)?;

        let error = shortest_angular_distance(current.clone(), goal);
        let capped = limit_velocity(ctx, error.clone(), max_velocity);
        let weight = tapered_weight(&error.abs(), &angular_goal_curve());

        set.add(
            identity,
            SoftConstraint::new(capped.clone(), capped, weight, current),
        )?;
        Ok(())
    }
}

/// Drive a revolute joint to a goal angle under an acceleration ramp.
pub struct JointPositionRevolute {
    pub joint: String,
    pub goal: f64,
    pub max_velocity: f64,
    pub max_acceleration: f64,
}

impl JointPositionRevolute {
    pub fn new(joint: &str, goal: f64) -> Self {
        Self {
            joint: joint.to_string(),
            goal,
            max_velocity: 1.0,
            max_acceleration: 1.0,
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

impl Goal for JointPositionRevolute {
    fn identity(&self) -> String {
        format!("JointPositionRevolute/{}", self.joint)
    }

    fn make_constraints(
        &self,
        ctx: &mut Context,
        model: &dyn KinematicModel,
        set: &mut ConstraintSet,
    ) -> Result<(), PliantError> {
        expect_kind(model, "JointPositionRevolute", &self.joint, JointKind::Revolute)?;
        let identity = self.identity();
        ctx.set_goal_params(
            &identity,
            json!({
                "goal": self.goal,
                "max_velocity": self.max_velocity,
                "max_acceleration": self.max_acceleration,
            }),
        );

        let current = joint_position_expr(ctx, &self.joint);
        let goal = ctx.param_expr(&identity, &["goal"])?;
        let max_velocity = capped_velocity_limit(ctx, model, &identity, &self.joint)?;
        let max_acceleration = ctx.param_expr(&identity, &["max_acceleration"])?;

        let error = goal - current.clone();
        let capped = limit_acceleration(ctx, model, &current, error, max_acceleration, max_velocity);

        set.add(
            identity,
            SoftConstraint::new(
                capped.clone(),
                capped,
                Expr::constant(WEIGHTS[5]),
                current,
            ),
        )?;
        Ok(())
    }
}

/// Drive a prismatic joint to a goal offset, weight tapering with error.
pub struct JointPositionPrismatic {
    pub joint: String,
    pub goal: f64,
    pub max_velocity: f64,
    pub max_acceleration: f64,
}

impl JointPositionPrismatic {
    pub fn new(joint: &str, goal: f64) -> Self {
        Self {
            joint: joint.to_string(),
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

impl Goal for JointPositionPrismatic {
    fn identity(&self) -> String {
        format!("JointPositionPrismatic/{}", self.joint)
    }

    fn make_constraints(
        &self,
        ctx: &mut Context,
        model: &dyn KinematicModel,
        set: &mut ConstraintSet,
    ) -> Result<(), PliantError> {
        expect_kind(model, "JointPositionPrismatic", &self.joint, JointKind::Prismatic)?;
        let identity = self.identity();
        ctx.set_goal_params(
            &identity,
            json!({
                "goal": self.goal,
                "max_velocity": self.max_velocity,
                "max_acceleration": self.max_acceleration,
            }),
        );

        let current = joint_position_expr(ctx, &self.joint);
        let goal = ctx.param_expr(&identity, &["goal"])?;
        let max_velocity = capped_velocity_limit(ctx, model, &identity, &self.joint)?;
        let max_acceleration = ctx.param_expr(&identity, &["max_acceleration"])?;

        let error = goal - current.clone();
        let weight = tapered_weight(&error.abs(), &translation_goal_curve());
        let capped = limit_acceleration(ctx, model, &current, error, max_acceleration, max_velocity);

        set.add(
            identity,
            SoftConstraint::new(capped.clone(), capped, weight, current),
        )?;
        Ok(())
    }
}

/// A batch of joint goals, dispatched per joint kind.
pub struct JointPositionList {
    pub goals: Vec<(String, f64)>,
    pub max_velocity: Option<f64>,
}

impl JointPositionList {
    pub fn new(goals: Vec<(String, f64)>) -> Self {
        Self {
            goals,
            max_velocity: None,
        }
    }

    pub fn with_max_velocity(mut self, max_velocity: f64) -> Self {
        self.max_velocity = Some(max_velocity);
        self
    }
}

impl Goal for JointPositionList {
    fn identity(&self) -> String {
        "JointPositionList".to_string()
    }

    fn make_constraints(
        &self,
        ctx: &mut Context,
        model: &dyn KinematicModel,
        set: &mut ConstraintSet,
    ) -> Result<(), PliantError> {
        for (joint, goal) in &self.goals {
            match model.joint_kind(joint)? {
                JointKind::Continuous => {
                    let mut sub = JointPositionContinuous::new(joint, *goal);
                    if let Some(v) = self.max_velocity {
                        sub = sub.with_max_velocity(v);
                    }
                    sub.make_constraints(ctx, model, set)?;
                }
                JointKind::Revolute => {
                    let mut sub = JointPositionRevolute::new(joint, *goal);
                    if let Some(v) = self.max_velocity {
                        sub = sub.with_max_velocity(v);
                    }
                    sub.make_constraints(ctx, model, set)?;
                }
                JointKind::Prismatic => {
                    let mut sub = JointPositionPrismatic::new(joint, *goal);
                    if let Some(v) = self.max_velocity {
                        sub = sub.with_max_velocity(v);
                    }
                    sub.make_constraints(ctx, model, set)?;
                }
                JointKind::Fixed => {
                    return Err(GoalError::WrongJointType {
                        goal: "JointPositionList".to_string(),
                        joint: joint.clone(),
                        expected: "actuated".to_string(),
                        actual: JointKind::Fixed.as_str().to_string(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }
}
