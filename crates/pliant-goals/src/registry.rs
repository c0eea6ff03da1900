//! Tag-based goal construction from JSON parameter blobs, for callers that
//! ship goals over a wire or config file rather than building them in code.

use std::collections::BTreeMap;

use nalgebra::{Point3, Quaternion, UnitQuaternion, Vector3};
use pliant_core::GoalError;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::align::{AlignPlanes, BasePointingForward, GravityJoint, Pointing};
use crate::cartesian::{
    CartesianOrientation, CartesianOrientationSlerp, CartesianPose, CartesianPosition,
};
use crate::goal::Goal;
use crate::grasp::GraspBar;
use crate::joint::{
    JointPositionContinuous, JointPositionList, JointPositionPrismatic, JointPositionRevolute,
};
use crate::params::UpdateParameters;

type Factory = Box<dyn Fn(&Value) -> Result<Box<dyn Goal>, GoalError> + Send + Sync>;

/// Builds goals from `(type tag, parameters)` pairs.
pub struct GoalRegistry {
    factories: BTreeMap<String, Factory>,
}

fn parse<T: DeserializeOwned>(tag: &str, params: &Value) -> Result<T, GoalError> {
    serde_json::from_value(params.clone()).map_err(|e| GoalError::MalformedParameters {
        identity: tag.to_string(),
        message: e.to_string(),
    })
}

#[derive(Deserialize)]
struct Vec3Params {
    x: f64,
    y: f64,
    z: f64,
}

impl Vec3Params {
    fn vector(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }

    fn point(&self) -> Point3<f64> {
        Point3::new(self.x, self.y, self.z)
    }
}

#[derive(Deserialize)]
struct QuatParams {
    x: f64,
    y: f64,
    z: f64,
    w: f64,
}

impl QuatParams {
    fn unit(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_quaternion(Quaternion::new(self.w, self.x, self.y, self.z))
    }
}

#[derive(Deserialize)]
struct JointGoalParams {
    joint: String,
    goal: f64,
    max_velocity: Option<f64>,
    max_acceleration: Option<f64>,
}

#[derive(Deserialize)]
struct JointListParams {
    goals: Vec<(String, f64)>,
    max_velocity: Option<f64>,
}

#[derive(Deserialize)]
struct PoseGoalParams {
    root: String,
    tip: String,
    position: Option<Vec3Params>,
    orientation: Option<QuatParams>,
    max_velocity: Option<f64>,
    max_acceleration: Option<f64>,
}

impl PoseGoalParams {
    fn position(&self, tag: &str) -> Result<Point3<f64>, GoalError> {
        self.position
            .as_ref()
            .map(Vec3Params::point)
            .ok_or_else(|| GoalError::MalformedParameters {
                identity: tag.to_string(),
                message: "missing 'position'".into(),
            })
    }

    fn orientation(&self, tag: &str) -> Result<UnitQuaternion<f64>, GoalError> {
        self.orientation
            .as_ref()
            .map(QuatParams::unit)
            .ok_or_else(|| GoalError::MalformedParameters {
                identity: tag.to_string(),
                message: "missing 'orientation'".into(),
            })
    }
}

#[derive(Deserialize)]
struct AlignPlanesParams {
    root: String,
    tip: String,
    root_normal: Vec3Params,
    tip_normal: Vec3Params,
    max_velocity: Option<f64>,
}

#[derive(Deserialize)]
struct PointingParams {
    root: String,
    tip: String,
    goal_point: Vec3Params,
    pointing_axis: Option<Vec3Params>,
}

#[derive(Deserialize)]
struct BasePointingForwardParams {
    odom: String,
    base_footprint: String,
    forward_axis: Option<Vec3Params>,
}

#[derive(Deserialize)]
struct GravityJointParams {
    joint: String,
    body: String,
}

#[derive(Deserialize)]
struct GraspBarParams {
    root: String,
    tip: String,
    tip_grasp_axis: Vec3Params,
    bar_center: Vec3Params,
    bar_axis: Vec3Params,
    bar_length: f64,
    max_velocity: Option<f64>,
}

impl Default for GoalRegistry {
    fn default() -> Self {
        Self::with_builtin_goals()
    }
}

impl GoalRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// A registry with every built-in goal type registered under its
    /// canonical tag.
    pub fn with_builtin_goals() -> Self {
        let mut registry = Self::empty();

        registry.register("JointPositionContinuous", |params| {
            let p: JointGoalParams = parse("JointPositionContinuous", params)?;
            let mut goal = JointPositionContinuous::new(&p.joint, p.goal);
            if let Some(v) = p.max_velocity {
                goal = goal.with_max_velocity(v);
            }
            Ok(Box::new(goal))
        });
        registry.register("JointPositionRevolute", |params| {
            let p: JointGoalParams = parse("JointPositionRevolute", params)?;
            let mut goal = JointPositionRevolute::new(&p.joint, p.goal);
            if let Some(v) = p.max_velocity {
                goal = goal.with_max_velocity(v);
            }
            if let Some(a) = p.max_acceleration {
                goal = goal.with_max_acceleration(a);
            }
            Ok(Box::new(goal))
        });
        registry.register("JointPositionPrismatic", |params| {
            let p: JointGoalParams = parse("JointPositionPrismatic", params)?;
            let mut goal = JointPositionPrismatic::new(&p.joint, p.goal);
            if let Some(v) = p.max_velocity {
                goal = goal.with_max_velocity(v);
            }
            if let Some(a) = p.max_acceleration {
                goal = goal.with_max_acceleration(a);
            }
            Ok(Box::new(goal))
        });
        registry.register("JointPositionList", |params| {
            let p: JointListParams = parse("JointPositionList", params)?;
            let mut goal = JointPositionList::new(p.goals);
            if let Some(v) = p.max_velocity {
                goal = goal.with_max_velocity(v);
            }
            Ok(Box::new(goal))
        });
        registry.register("CartesianPosition", |params| {
            let p: PoseGoalParams = parse("CartesianPosition", params)?;
            let mut goal =
                CartesianPosition::new(&p.root, &p.tip, p.position("CartesianPosition")?);
            if let Some(v) = p.max_velocity {
                goal = goal.with_max_velocity(v);
            }
            if let Some(a) = p.max_acceleration {
                goal = goal.with_max_acceleration(a);
            }
            Ok(Box::new(goal))
        });
        registry.register("CartesianOrientation", |params| {
            let p: PoseGoalParams = parse("CartesianOrientation", params)?;
            let mut goal =
                CartesianOrientation::new(&p.root, &p.tip, p.orientation("CartesianOrientation")?);
            if let Some(v) = p.max_velocity {
                goal = goal.with_max_velocity(v);
            }
            if let Some(a) = p.max_acceleration {
                goal = goal.with_max_acceleration(a);
            }
            Ok(Box::new(goal))
        });
        registry.register("CartesianOrientationSlerp", |params| {
            let p: PoseGoalParams = parse("CartesianOrientationSlerp", params)?;
            let mut goal = CartesianOrientationSlerp::new(
                &p.root,
                &p.tip,
                p.orientation("CartesianOrientationSlerp")?,
            );
            if let Some(v) = p.max_velocity {
                goal = goal.with_max_velocity(v);
            }
            if let Some(a) = p.max_acceleration {
                goal = goal.with_max_acceleration(a);
            }
            Ok(Box::new(goal))
        });
        registry.register("CartesianPose", |params| {
            let p: PoseGoalParams = parse("CartesianPose", params)?;
            Ok(Box::new(CartesianPose::new(
                &p.root,
                &p.tip,
                p.position("CartesianPose")?,
                p.orientation("CartesianPose")?,
            )))
        });
        registry.register("AlignPlanes", |params| {
            let p: AlignPlanesParams = parse("AlignPlanes", params)?;
            let mut goal = AlignPlanes::new(
                &p.root,
                &p.tip,
                p.root_normal.vector(),
                p.tip_normal.vector(),
            );
            if let Some(v) = p.max_velocity {
                goal = goal.with_max_velocity(v);
            }
            Ok(Box::new(goal))
        });
        registry.register("Pointing", |params| {
            let p: PointingParams = parse("Pointing", params)?;
            let mut goal = Pointing::new(&p.root, &p.tip, p.goal_point.point());
            if let Some(axis) = p.pointing_axis {
                goal = goal.with_pointing_axis(axis.vector());
            }
            Ok(Box::new(goal))
        });
        registry.register("BasePointingForward", |params| {
            let p: BasePointingForwardParams = parse("BasePointingForward", params)?;
            let mut goal = BasePointingForward::new(&p.odom, &p.base_footprint);
            if let Some(axis) = p.forward_axis {
                goal = goal.with_forward_axis(axis.vector());
            }
            Ok(Box::new(goal))
        });
        registry.register("GravityJoint", |params| {
            let p: GravityJointParams = parse("GravityJoint", params)?;
            Ok(Box::new(GravityJoint::new(&p.joint, &p.body)))
        });
        registry.register("GraspBar", |params| {
            let p: GraspBarParams = parse("GraspBar", params)?;
            let mut goal = GraspBar::new(
                &p.root,
                &p.tip,
                p.tip_grasp_axis.vector(),
                p.bar_center.point(),
                p.bar_axis.vector(),
                p.bar_length,
            );
            if let Some(v) = p.max_velocity {
                goal = goal.with_max_velocity(v);
            }
            Ok(Box::new(goal))
        });
        registry.register("UpdateParameters", |params| {
            Ok(Box::new(UpdateParameters::new(params.clone())))
        });

        registry
    }

    pub fn register(
        &mut self,
        tag: &str,
        factory: impl Fn(&Value) -> Result<Box<dyn Goal>, GoalError> + Send + Sync + 'static,
    ) {
        self.factories.insert(tag.to_string(), Box::new(factory));
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Build a goal from its tag and parameter blob.
    pub fn build(&self, tag: &str, params: &Value) -> Result<Box<dyn Goal>, GoalError> {
        let factory = self
            .factories
            .get(tag)
            .ok_or_else(|| GoalError::UnknownConstraintType(tag.to_string()))?;
        factory(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_tag_is_rejected() {
        let registry = GoalRegistry::with_builtin_goals();
        let err = registry.build("FlyToMoon", &json!({})).unwrap_err();
        assert!(matches!(err, GoalError::UnknownConstraintType(tag) if tag == "FlyToMoon"));
    }

    #[test]
    fn malformed_params_are_rejected() {
        let registry = GoalRegistry::with_builtin_goals();
        let err = registry
            .build("JointPositionRevolute", &json!({"joint": "elbow"}))
            .unwrap_err();
        assert!(matches!(err, GoalError::MalformedParameters { .. }));
    }

    #[test]
    fn builds_joint_goal_with_defaults() {
        let registry = GoalRegistry::with_builtin_goals();
        let goal = registry
            .build(
                "JointPositionRevolute",
                &json!({"joint": "elbow", "goal": 0.4}),
            )
            .unwrap();
        assert_eq!(goal.identity(), "JointPositionRevolute/elbow");
    }

    #[test]
    fn builds_cartesian_pose() {
        let registry = GoalRegistry::with_builtin_goals();
        let goal = registry
            .build(
                "CartesianPose",
                &json!({
                    "root": "base",
                    "tip": "tool",
                    "position": {"x": 0.3, "y": 0.0, "z": 0.5},
                    "orientation": {"x": 0.0, "y": 0.0, "z": 0.0, "w": 1.0},
                }),
            )
            .unwrap();
        assert_eq!(goal.identity(), "CartesianPose/base/tool");
    }

    #[test]
    fn missing_pose_member_is_reported() {
        let registry = GoalRegistry::with_builtin_goals();
        let err = registry
            .build(
                "CartesianPose",
                &json!({"root": "base", "tip": "tool", "position": {"x": 0.0, "y": 0.0, "z": 0.0}}),
            )
            .unwrap_err();
        assert!(matches!(err, GoalError::MalformedParameters { .. }));
    }
}
