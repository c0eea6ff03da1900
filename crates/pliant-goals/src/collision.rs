//! Collision avoidance rows, one per requested contact slot.
//!
//! Rows are one-sided: the projected contact distance may only grow (up to
//! an effectively unbounded upper limit), with a weight that ramps from
//! dominant at touch to zero past the influence distance.

use pliant_cas::Expr;
use pliant_collision::{ExternalContactInputs, SelfContactInputs};
use pliant_core::{CollisionConfig, Context, PliantError, SoftConstraint, WeightCurve};
use pliant_robot::KinematicModel;
use serde_json::json;

use crate::goal::{ConstraintSet, Goal};
use crate::shaping::{limit_acceleration, limit_velocity, tapered_weight};

const UNBOUNDED_ABOVE: f64 = 1e9;

/// One row keeping a tip-fixed point at least `zero_weight_distance` away
/// from a fixed point, measured along a fixed normal in the root frame.
/// Shared by collision-flavored goals that know their geometry up front.
#[allow(clippy::too_many_arguments)]
pub fn add_maximize_point_distance(
    ctx: &mut Context,
    model: &dyn KinematicModel,
    set: &mut ConstraintSet,
    identity: &str,
    max_velocity: Expr,
    root: &str,
    tip: &str,
    tip_p_a: &pliant_cas::ExprVec3,
    root_p_b: &pliant_cas::ExprVec3,
    root_v_normal: &pliant_cas::ExprVec3,
    zero_weight_distance: f64,
) -> Result<(), PliantError> {
    let root_t_tip = model.fk_expression(ctx, root, tip)?;
    let root_p_a = root_t_tip.transform_point(tip_p_a);
    let dist = root_v_normal.dot(&root_p_a.sub(root_p_b));

    let curve = WeightCurve {
        min_x: zero_weight_distance,
        ..WeightCurve::external_default()
    };
    let weight = tapered_weight(&dist, &curve);

    let penetration = Expr::constant(zero_weight_distance) - dist.clone();
    let limit = limit_velocity(ctx, penetration, max_velocity);

    set.add(
        identity.to_string(),
        SoftConstraint::new(limit, Expr::constant(UNBOUNDED_ABOVE), weight, dist),
    )?;
    Ok(())
}

/// Push a controlled link away from the closest external obstacle in its
/// `idx`-th contact slot.
pub struct ExternalCollisionAvoidance {
    /// Child link of the controlling joint the contact was filed under.
    pub link: String,
    pub idx: usize,
    pub repel_velocity: f64,
    pub max_acceleration: f64,
    pub zero_weight_distance: f64,
    pub curve: WeightCurve,
}

impl ExternalCollisionAvoidance {
    pub fn new(link: &str, idx: usize, config: &CollisionConfig) -> Self {
        Self {
            link: link.to_string(),
            idx,
            repel_velocity: config.repel_velocity,
            max_acceleration: config.max_acceleration,
            zero_weight_distance: config.zero_weight_distance,
            curve: config.external_curve,
        }
    }
}

impl Goal for ExternalCollisionAvoidance {
    fn identity(&self) -> String {
        format!("ExternalCollisionAvoidance/{}/{}", self.link, self.idx)
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
                "repel_velocity": self.repel_velocity,
                "max_acceleration": self.max_acceleration,
                "zero_weight_distance": self.zero_weight_distance,
            }),
        );
        let repel_velocity = ctx.param_expr(&identity, &["repel_velocity"])?;
        let max_acceleration = ctx.param_expr(&identity, &["max_acceleration"])?;
        let zero_weight_distance = ctx.param_expr(&identity, &["zero_weight_distance"])?;

        let inputs = ExternalContactInputs::request(ctx, &self.link, self.idx);
        let root = model.root().to_string();
        let r_t_a = model.fk_expression(ctx, &root, &self.link)?;

        let r_p_pa = r_t_a.transform_point(&inputs.position_on_a);
        let dist = inputs.normal.dot(&r_p_pa.sub(&inputs.position_on_b));

        let weight = tapered_weight(&inputs.distance, &self.curve);

        let penetration = zero_weight_distance - inputs.distance.clone();
        let repel = limit_acceleration(
            ctx,
            model,
            &dist,
            penetration,
            max_acceleration,
            repel_velocity,
        );
        // Never demand more clearance gain than the current distance allows,
        // so deep penetrations stay feasible.
        let limit = (-inputs.distance.clone()).max(&repel);

        set.add(
            identity,
            SoftConstraint::new(limit, Expr::constant(UNBOUNDED_ABOVE), weight, dist),
        )?;
        Ok(())
    }
}

/// Keep two controlled links of the robot apart, per contact slot.
pub struct SelfCollisionAvoidance {
    /// Reduced link pair, sorted.
    pub link_a: String,
    pub link_b: String,
    pub idx: usize,
    pub repel_velocity: f64,
    pub zero_weight_distance: f64,
    pub curve: WeightCurve,
}

impl SelfCollisionAvoidance {
    pub fn new(link_a: &str, link_b: &str, idx: usize, config: &CollisionConfig) -> Self {
        Self {
            link_a: link_a.to_string(),
            link_b: link_b.to_string(),
            idx,
            repel_velocity: config.repel_velocity,
            zero_weight_distance: config.zero_weight_distance,
            curve: config.self_curve,
        }
    }
}

impl Goal for SelfCollisionAvoidance {
    fn identity(&self) -> String {
        format!(
            "SelfCollisionAvoidance/{}/{}/{}",
            self.link_a, self.link_b, self.idx
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
                "repel_velocity": self.repel_velocity,
                "zero_weight_distance": self.zero_weight_distance,
            }),
        );
        let repel_velocity = ctx.param_expr(&identity, &["repel_velocity"])?;
        let zero_weight_distance = ctx.param_expr(&identity, &["zero_weight_distance"])?;

        let inputs = SelfContactInputs::request(ctx, &self.link_a, &self.link_b, self.idx);
        let b_t_a = model.fk_expression(ctx, &self.link_b, &self.link_a)?;

        // Both contact points in link b's frame; dist is their separation
        // projected on the contact normal.
        let b_p_pa = b_t_a.transform_point(&inputs.position_on_a);
        let dist = inputs.normal.dot(&b_p_pa.sub(&inputs.position_on_b));

        let weight = tapered_weight(&inputs.distance, &self.curve);
        let penetration = zero_weight_distance - inputs.distance.clone();
        let limit = limit_velocity(ctx, penetration, repel_velocity);

        set.add(
            identity,
            SoftConstraint::new(limit, Expr::constant(UNBOUNDED_ABOVE), weight, dist),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Isometry3, Point3, Vector3};
    use pliant_cas::Symbol;
    use pliant_collision::{Collisions, ContactBody, ContactRecord};
    use pliant_core::{StateKey, WEIGHT_MAX, WEIGHT_MIN};
    use pliant_robot::{JointPositions, JointSpec, SerialChainModel};

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

    fn slider() -> SerialChainModel {
        SerialChainModel::new(
            "slider",
            "base",
            vec![JointSpec::prismatic(
                "slide",
                "carriage",
                Isometry3::identity(),
                Vector3::x(),
            )],
        )
    }

    #[test]
    fn close_contact_gets_dominant_weight_and_repel_bound() {
        let model = slider();
        let config = CollisionConfig::default();
        let mut ctx = Context::with_sample_period(0.05);
        let mut set = ConstraintSet::new();
        ExternalCollisionAvoidance::new("carriage", 0, &config)
            .make_constraints(&mut ctx, &model, &mut set)
            .unwrap();

        // Wall 5 mm in front of the carriage along +x; normal pushes back.
        let mut collisions = Collisions::new(config.max_contacts_per_key);
        let positions: JointPositions = [("slide".to_string(), 0.0)].into_iter().collect();
        collisions
            .ingest(
                &model,
                &positions,
                &[ContactRecord {
                    link_a: "carriage".into(),
                    body_b: ContactBody::External("wall".into()),
                    link_b: "wall".into(),
                    position_on_a: Point3::new(0.0, 0.0, 0.0),
                    position_on_b: Point3::new(0.005, 0.0, 0.0),
                    normal: -Vector3::x(),
                    distance: 0.005,
                }],
            )
            .unwrap();
        ctx.bind(&StateKey::joint_position("slide"), 0.0);
        ctx.bind(&StateKey::joint_velocity("slide"), 0.0);
        collisions.bind(&mut ctx);

        let (_, row) = set.iter().next().unwrap();
        let weight = eval(&ctx, &row.weight);
        assert!(
            weight > pliant_core::WEIGHTS[4],
            "5 mm contact should be near max weight, got {weight}"
        );
        assert!(weight <= WEIGHT_MAX);
        // The lower bound demands the projected distance grow.
        assert!(eval(&ctx, &row.lower) > 0.0);
        assert_relative_eq!(eval(&ctx, &row.upper), 1e9);
    }

    #[test]
    fn distant_contact_weight_is_zero() {
        let model = slider();
        let config = CollisionConfig::default();
        let mut ctx = Context::with_sample_period(0.05);
        let mut set = ConstraintSet::new();
        ExternalCollisionAvoidance::new("carriage", 0, &config)
            .make_constraints(&mut ctx, &model, &mut set)
            .unwrap();

        // No contacts filed at all: the sentinel slot binds distance 100.
        let collisions = Collisions::new(config.max_contacts_per_key);
        ctx.bind(&StateKey::joint_position("slide"), 0.0);
        ctx.bind(&StateKey::joint_velocity("slide"), 0.0);
        collisions.bind(&mut ctx);

        let (_, row) = set.iter().next().unwrap();
        assert_relative_eq!(eval(&ctx, &row.weight), WEIGHT_MIN);
    }

    #[test]
    fn point_distance_row_repels_inside_influence() {
        let model = slider();
        let mut ctx = Context::with_sample_period(0.05);
        let mut set = ConstraintSet::new();
        // Keep the carriage origin 10 cm away from a post at x = 0.02,
        // measured along +x.
        add_maximize_point_distance(
            &mut ctx,
            &model,
            &mut set,
            "KeepAway/post",
            Expr::constant(0.1),
            "base",
            "carriage",
            &pliant_cas::ExprVec3::zeros(),
            &pliant_cas::ExprVec3::from_f64(0.02, 0.0, 0.0),
            &pliant_cas::ExprVec3::from_f64(1.0, 0.0, 0.0),
            0.1,
        )
        .unwrap();

        ctx.bind(&StateKey::joint_position("slide"), 0.0);
        let (_, row) = set.iter().next().unwrap();
        // dist = -0.02, penetration 0.12, clamped to one tick of velocity.
        assert_relative_eq!(eval(&ctx, &row.lower), 0.1 * 0.05, epsilon = 1e-12);
        assert_relative_eq!(eval(&ctx, &row.weight), WEIGHT_MAX, epsilon = 1e-9);
    }

    #[test]
    fn self_collision_limit_tracks_penetration() {
        let model = SerialChainModel::new(
            "arm",
            "base",
            vec![
                JointSpec::revolute("j1", "link1", Isometry3::identity(), Vector3::y()),
                JointSpec::revolute(
                    "j2",
                    "link2",
                    Isometry3::translation(0.0, 0.0, 0.2),
                    Vector3::y(),
                ),
            ],
        );
        let config = CollisionConfig::default();
        let mut ctx = Context::with_sample_period(0.05);
        let mut set = ConstraintSet::new();
        SelfCollisionAvoidance::new("link1", "link2", 0, &config)
            .make_constraints(&mut ctx, &model, &mut set)
            .unwrap();

        ctx.bind(&StateKey::joint_position("j1"), 0.0);
        ctx.bind(&StateKey::joint_position("j2"), 0.0);
        ctx.bind(&StateKey::joint_velocity("j1"), 0.0);
        ctx.bind(&StateKey::joint_velocity("j2"), 0.0);

        let mut collisions = Collisions::new(config.max_contacts_per_key);
        let positions: JointPositions =
            [("j1".to_string(), 0.0), ("j2".to_string(), 0.0)]
                .into_iter()
                .collect();
        collisions
            .ingest(
                &model,
                &positions,
                &[ContactRecord {
                    link_a: "link1".into(),
                    body_b: ContactBody::Robot,
                    link_b: "link2".into(),
                    position_on_a: Point3::new(0.0, 0.0, 0.19),
                    position_on_b: Point3::new(0.0, 0.0, -0.01),
                    normal: -Vector3::z(),
                    distance: 0.02,
                }],
            )
            .unwrap();
        collisions.bind(&mut ctx);

        let (_, row) = set.iter().next().unwrap();
        // Penetration of the influence zone: 0.05 - 0.02, clamped to one
        // tick of repel velocity.
        assert_relative_eq!(
            eval(&ctx, &row.lower),
            config.repel_velocity * 0.05,
            epsilon = 1e-12
        );
        assert!(eval(&ctx, &row.weight) > WEIGHT_MIN);
    }
}
