//! Serial-chain [`KinematicModel`] implementation.
//!
//! Links are ordered from the root; joint `i` connects link `i` to link
//! `i + 1`. Symbolic forward kinematics composes each joint's constant
//! origin with a Rodrigues rotation (or translation) over the joint's
//! position symbol.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use nalgebra::{Isometry3, Translation3, UnitQuaternion, UnitVector3, Vector3};
use pliant_cas::{rotation_from_axis_angle, ExprFrame, ExprMat3, ExprVec3};
use pliant_core::{Context, ModelError, StateKey};

use crate::model::{JointKind, JointPositions, KinematicModel};

/// One joint of a serial chain.
#[derive(Debug, Clone)]
pub struct JointSpec {
    pub name: String,
    pub kind: JointKind,
    /// Static transform from the parent link frame to this joint's frame.
    pub origin: Isometry3<f64>,
    /// Motion axis in the joint frame.
    pub axis: UnitVector3<f64>,
    /// Child link moved by this joint.
    pub child_link: String,
    /// Position limits; `None` for continuous joints.
    pub position_limits: Option<(f64, f64)>,
    /// Static velocity limit in rad/s or m/s.
    pub velocity_limit: f64,
}

impl JointSpec {
    pub fn revolute(name: &str, child_link: &str, origin: Isometry3<f64>, axis: Vector3<f64>) -> Self {
        Self {
            name: name.into(),
            kind: JointKind::Revolute,
            origin,
            axis: UnitVector3::new_normalize(axis),
            child_link: child_link.into(),
            position_limits: Some((-std::f64::consts::PI, std::f64::consts::PI)),
            velocity_limit: 1.0,
        }
    }

    pub fn continuous(name: &str, child_link: &str, origin: Isometry3<f64>, axis: Vector3<f64>) -> Self {
        Self {
            name: name.into(),
            kind: JointKind::Continuous,
            origin,
            axis: UnitVector3::new_normalize(axis),
            child_link: child_link.into(),
            position_limits: None,
            velocity_limit: 1.0,
        }
    }

    pub fn prismatic(name: &str, child_link: &str, origin: Isometry3<f64>, axis: Vector3<f64>) -> Self {
        Self {
            name: name.into(),
            kind: JointKind::Prismatic,
            origin,
            axis: UnitVector3::new_normalize(axis),
            child_link: child_link.into(),
            position_limits: Some((-1.0, 1.0)),
            velocity_limit: 0.1,
        }
    }

    pub fn fixed(name: &str, child_link: &str, origin: Isometry3<f64>) -> Self {
        Self {
            name: name.into(),
            kind: JointKind::Fixed,
            origin,
            axis: Vector3::z_axis(),
            child_link: child_link.into(),
            position_limits: None,
            velocity_limit: 0.0,
        }
    }

    pub fn with_position_limits(mut self, lower: f64, upper: f64) -> Self {
        self.position_limits = Some((lower, upper));
        self
    }

    pub fn with_velocity_limit(mut self, limit: f64) -> Self {
        self.velocity_limit = limit;
        self
    }
}

/// A serial chain of joints rooted at a named base link.
#[derive(Debug, Clone)]
pub struct SerialChainModel {
    name: String,
    /// Link names; `links[0]` is the root, `links[i + 1]` is joint i's child.
    links: Vec<String>,
    joints: Vec<JointSpec>,
    self_collision_pairs: Vec<(String, String)>,
    revision: u64,
}

impl SerialChainModel {
    pub fn new(name: &str, root_link: &str, joints: Vec<JointSpec>) -> Self {
        let mut links = Vec::with_capacity(joints.len() + 1);
        links.push(root_link.to_string());
        links.extend(joints.iter().map(|j| j.child_link.clone()));

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        for link in &links {
            link.hash(&mut hasher);
        }
        for joint in &joints {
            joint.name.hash(&mut hasher);
            joint.kind.as_str().hash(&mut hasher);
        }
        let revision = hasher.finish();

        Self {
            name: name.to_string(),
            links,
            joints,
            self_collision_pairs: Vec::new(),
            revision,
        }
    }

    pub fn with_self_collision_pairs(mut self, pairs: Vec<(String, String)>) -> Self {
        self.self_collision_pairs = pairs;
        self
    }

    fn link_index(&self, link: &str) -> Result<usize, ModelError> {
        self.links
            .iter()
            .position(|l| l == link)
            .ok_or_else(|| ModelError::UnknownLink(link.to_string()))
    }

    fn joint(&self, name: &str) -> Result<&JointSpec, ModelError> {
        self.joints
            .iter()
            .find(|j| j.name == name)
            .ok_or_else(|| ModelError::UnknownJoint(name.to_string()))
    }

    /// Symbolic motion transform of one joint.
    fn joint_motion_expr(&self, ctx: &mut Context, joint: &JointSpec) -> ExprFrame {
        let axis = ExprVec3::from_f64(joint.axis.x, joint.axis.y, joint.axis.z);
        match joint.kind {
            JointKind::Fixed => ExprFrame::identity(),
            JointKind::Prismatic => {
                let q = ctx.expr(&StateKey::joint_position(&joint.name));
                ExprFrame::new(ExprMat3::identity(), axis.scale(&q))
            }
            JointKind::Revolute | JointKind::Continuous => {
                let q = ctx.expr(&StateKey::joint_position(&joint.name));
                ExprFrame::new(rotation_from_axis_angle(&axis, &q), ExprVec3::zeros())
            }
        }
    }

    fn joint_motion_numeric(
        &self,
        positions: &JointPositions,
        joint: &JointSpec,
    ) -> Result<Isometry3<f64>, ModelError> {
        let q = if joint.kind.is_actuated() {
            *positions
                .get(&joint.name)
                .ok_or_else(|| ModelError::MissingJointState(joint.name.clone()))?
        } else {
            0.0
        };
        Ok(match joint.kind {
            JointKind::Prismatic => Isometry3::from_parts(
                Translation3::from(joint.axis.into_inner() * q),
                UnitQuaternion::identity(),
            ),
            JointKind::Fixed => Isometry3::identity(),
            JointKind::Revolute | JointKind::Continuous => Isometry3::from_parts(
                Translation3::identity(),
                UnitQuaternion::from_axis_angle(&joint.axis, q),
            ),
        })
    }

    /// Symbolic transform from link index `from` up the chain to `to`
    /// (`from <= to`).
    fn segment_expr(&self, ctx: &mut Context, from: usize, to: usize) -> ExprFrame {
        let mut frame = ExprFrame::identity();
        for joint in &self.joints[from..to] {
            let origin = ExprFrame::from_isometry(&joint.origin);
            let motion = self.joint_motion_expr(ctx, joint);
            frame = frame.mul(&origin).mul(&motion);
        }
        frame
    }

    fn segment_numeric(
        &self,
        positions: &JointPositions,
        from: usize,
        to: usize,
    ) -> Result<Isometry3<f64>, ModelError> {
        let mut iso = Isometry3::identity();
        for joint in &self.joints[from..to] {
            iso = iso * joint.origin * self.joint_motion_numeric(positions, joint)?;
        }
        Ok(iso)
    }
}

impl KinematicModel for SerialChainModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn root(&self) -> &str {
        &self.links[0]
    }

    fn revision(&self) -> u64 {
        self.revision
    }

    fn joint_names(&self) -> Vec<&str> {
        self.joints
            .iter()
            .filter(|j| j.kind.is_actuated())
            .map(|j| j.name.as_str())
            .collect()
    }

    fn joint_kind(&self, joint: &str) -> Result<JointKind, ModelError> {
        Ok(self.joint(joint)?.kind)
    }

    fn joint_velocity_limit(&self, joint: &str) -> Result<f64, ModelError> {
        Ok(self.joint(joint)?.velocity_limit)
    }

    fn joint_position_limits(&self, joint: &str) -> Result<Option<(f64, f64)>, ModelError> {
        Ok(self.joint(joint)?.position_limits)
    }

    fn joint_axis(&self, joint: &str) -> Result<Vector3<f64>, ModelError> {
        Ok(self.joint(joint)?.axis.into_inner())
    }

    fn parent_link(&self, joint: &str) -> Result<&str, ModelError> {
        let idx = self
            .joints
            .iter()
            .position(|j| j.name == joint)
            .ok_or_else(|| ModelError::UnknownJoint(joint.to_string()))?;
        Ok(&self.links[idx])
    }

    fn child_link(&self, joint: &str) -> Result<&str, ModelError> {
        Ok(&self.joint(joint)?.child_link)
    }

    fn controlled_links(&self) -> Vec<&str> {
        self.joints
            .iter()
            .filter(|j| j.kind.is_actuated())
            .map(|j| j.child_link.as_str())
            .collect()
    }

    fn self_collision_pairs(&self) -> Vec<(&str, &str)> {
        self.self_collision_pairs
            .iter()
            .map(|(a, b)| (a.as_str(), b.as_str()))
            .collect()
    }

    fn controlling_joint(&self, link: &str) -> Result<&str, ModelError> {
        let idx = self.link_index(link)?;
        self.joints[..idx]
            .iter()
            .rev()
            .find(|j| j.kind.is_actuated())
            .map(|j| j.name.as_str())
            .ok_or_else(|| ModelError::NoControllingJoint(link.to_string()))
    }

    fn fk_expression(
        &self,
        ctx: &mut Context,
        root: &str,
        tip: &str,
    ) -> Result<ExprFrame, ModelError> {
        let r = self.link_index(root)?;
        let t = self.link_index(tip)?;
        if r <= t {
            Ok(self.segment_expr(ctx, r, t))
        } else {
            Ok(self.segment_expr(ctx, t, r).inverse())
        }
    }

    fn fk_numeric(
        &self,
        positions: &JointPositions,
        root: &str,
        tip: &str,
    ) -> Result<Isometry3<f64>, ModelError> {
        let r = self.link_index(root)?;
        let t = self.link_index(tip)?;
        if r <= t {
            self.segment_numeric(positions, r, t)
        } else {
            Ok(self.segment_numeric(positions, t, r)?.inverse())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::joint_position_symbols;
    use approx::assert_relative_eq;
    use pliant_cas::{Expr, Symbol};

    fn two_link_arm() -> SerialChainModel {
        SerialChainModel::new(
            "two_link_arm",
            "base",
            vec![
                JointSpec::revolute(
                    "shoulder",
                    "upper_arm",
                    Isometry3::translation(0.0, 0.0, 0.05),
                    Vector3::y(),
                )
                .with_velocity_limit(3.0),
                JointSpec::revolute(
                    "elbow",
                    "forearm",
                    Isometry3::translation(0.0, 0.0, 0.3),
                    Vector3::y(),
                )
                .with_velocity_limit(5.0),
                JointSpec::fixed(
                    "ee_fixed",
                    "end_effector",
                    Isometry3::translation(0.0, 0.0, 0.25),
                ),
            ],
        )
    }

    fn eval_expr(ctx: &Context, e: &Expr) -> f64 {
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
    fn joint_queries() {
        let model = two_link_arm();
        assert_eq!(model.joint_names(), vec!["shoulder", "elbow"]);
        assert_eq!(model.controlled_links(), vec!["upper_arm", "forearm"]);
        assert_eq!(model.joint_kind("elbow").unwrap(), JointKind::Revolute);
        assert_relative_eq!(model.joint_velocity_limit("elbow").unwrap(), 5.0);
        assert!(model.joint_kind("missing").is_err());
    }

    #[test]
    fn controlling_joint_walks_past_fixed_joints() {
        let model = two_link_arm();
        assert_eq!(model.controlling_joint("end_effector").unwrap(), "elbow");
        assert_eq!(model.controlling_joint("upper_arm").unwrap(), "shoulder");
        assert!(matches!(
            model.controlling_joint("base"),
            Err(ModelError::NoControllingJoint(_))
        ));
    }

    #[test]
    fn fk_numeric_zero_position() {
        let model = two_link_arm();
        let positions: JointPositions =
            [("shoulder".to_string(), 0.0), ("elbow".to_string(), 0.0)]
                .into_iter()
                .collect();
        let ee = model.fk_numeric(&positions, "base", "end_effector").unwrap();
        assert_relative_eq!(ee.translation.z, 0.6, epsilon = 1e-12);
        assert_relative_eq!(ee.translation.x, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn fk_expression_matches_numeric() {
        let model = two_link_arm();
        let mut ctx = Context::new();
        let frame = model.fk_expression(&mut ctx, "base", "end_effector").unwrap();

        let q = [0.4, -0.9];
        ctx.bind(&StateKey::joint_position("shoulder"), q[0]);
        ctx.bind(&StateKey::joint_position("elbow"), q[1]);

        let positions: JointPositions =
            [("shoulder".to_string(), q[0]), ("elbow".to_string(), q[1])]
                .into_iter()
                .collect();
        let expected = model.fk_numeric(&positions, "base", "end_effector").unwrap();

        assert_relative_eq!(eval_expr(&ctx, &frame.trans.x), expected.translation.x, epsilon = 1e-12);
        assert_relative_eq!(eval_expr(&ctx, &frame.trans.y), expected.translation.y, epsilon = 1e-12);
        assert_relative_eq!(eval_expr(&ctx, &frame.trans.z), expected.translation.z, epsilon = 1e-12);
        let rot = expected.rotation.to_rotation_matrix();
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(
                    eval_expr(&ctx, &frame.rot.0[i][j]),
                    rot.matrix()[(i, j)],
                    epsilon = 1e-12
                );
            }
        }
    }

    #[test]
    fn fk_reversed_direction_is_inverse() {
        let model = two_link_arm();
        let positions: JointPositions =
            [("shoulder".to_string(), 0.7), ("elbow".to_string(), -0.2)]
                .into_iter()
                .collect();
        let fwd = model.fk_numeric(&positions, "base", "forearm").unwrap();
        let rev = model.fk_numeric(&positions, "forearm", "base").unwrap();
        let id = fwd * rev;
        assert_relative_eq!(id.translation.vector.norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn fk_missing_state_errors() {
        let model = two_link_arm();
        let positions = JointPositions::new();
        assert!(matches!(
            model.fk_numeric(&positions, "base", "forearm"),
            Err(ModelError::MissingJointState(_))
        ));
    }

    #[test]
    fn revision_tracks_structure() {
        let a = two_link_arm();
        let b = two_link_arm();
        assert_eq!(a.revision(), b.revision());

        let c = SerialChainModel::new(
            "two_link_arm",
            "base",
            vec![JointSpec::revolute(
                "shoulder",
                "upper_arm",
                Isometry3::translation(0.0, 0.0, 0.05),
                Vector3::y(),
            )],
        );
        assert_ne!(a.revision(), c.revision());
    }

    #[test]
    fn position_symbols_in_model_order() {
        let model = two_link_arm();
        let mut ctx = Context::new();
        let syms = joint_position_symbols(&mut ctx, &model);
        assert_eq!(syms.len(), 2);
        assert_eq!(ctx.symbol_name(syms[0]), "joints/shoulder/position");
        assert_eq!(ctx.symbol_name(syms[1]), "joints/elbow/position");
    }
}
