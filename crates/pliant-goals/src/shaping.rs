//! Error shaping: tapered weights and velocity/acceleration limiting.
//!
//! Weights taper off with distance to the goal through a piecewise curve
//! (flat, power fit, cubic saddle, flat) so that far-away goals yield to
//! closer ones. Command shaping clamps the per-tick displacement to what
//! the joint can reach under its velocity and acceleration limits.

use std::f64::consts::PI;

use pliant_cas::{if_greater, if_less_eq, jacobian, Expr};
use pliant_core::{Context, WeightCurve};
use pliant_robot::{joint_position_symbols, joint_velocity_symbols, KinematicModel};

/// Power fit through (p1x, p1y) and (p2x, p2y) that flattens out at the
/// saddle point. Valid for `x <= saddle_x`.
fn polynomial_blend(x: &Expr, p1x: f64, p1y: f64, p2x: f64, p2y: f64, sx: f64, sy: f64) -> Expr {
    let order = ((p2y - sy) / (p1y - sy)).ln() / ((sx - p2x) / (sx - p1x)).ln();
    let a = (p1y - sy) / (sx - p1x).powf(order);
    (Expr::constant(sx) - x.clone()).powf(order) * a + sy
}

/// Cubic of the form `x^3 - x^2` scaled to run from a local maximum at
/// (max_x, max_y) to a local minimum at (min_x, min_y).
fn cubic_blend(x: &Expr, max_x: f64, max_y: f64, min_x: f64, min_y: f64) -> Expr {
    let o1 = 3.0;
    let o2 = 2.0;
    let a = (o2 / o1) * (1.0 / (min_x - max_x));
    let b = (o1.powf(o1) / o2.powf(o2)) * (max_y - min_y);
    let t = (x.clone() - max_x) * a;
    t.powf(o1) * b - t.powf(o2) * b + max_y
}

/// Piecewise tapering weight over the absolute goal error `x`.
///
/// Flat at `p1_y` up to `p1_x`, a power fit down to the saddle, a cubic
/// down to `min_x`, then flat at `min_y`.
pub fn tapered_weight(x: &Expr, curve: &WeightCurve) -> Expr {
    let f0 = Expr::constant(curve.p1_y);
    let f1 = polynomial_blend(
        x,
        curve.p1_x,
        curve.p1_y,
        curve.p2_x,
        curve.p2_y,
        curve.saddle_x,
        curve.saddle_y,
    );
    let f2 = cubic_blend(x, curve.saddle_x, curve.saddle_y, curve.min_x, curve.min_y);
    let f3 = Expr::constant(curve.min_y);
    if_less_eq(
        x.clone(),
        Expr::constant(curve.p1_x),
        f0,
        if_less_eq(
            x.clone(),
            Expr::constant(curve.saddle_x),
            f1,
            if_less_eq(x.clone(), Expr::constant(curve.min_x), f2, f3),
        ),
    )
}

/// Taper anchors for angular goals: full weight inside pi/8 error,
/// near-minimum beyond pi/4.
pub fn angular_goal_curve() -> WeightCurve {
    WeightCurve {
        p1_x: 0.0,
        p1_y: pliant_core::WEIGHTS[5],
        p2_x: PI / 8.0,
        p2_y: pliant_core::WEIGHTS[4],
        saddle_x: PI / 6.0,
        saddle_y: pliant_core::WEIGHTS[3],
        min_x: PI / 4.0,
        min_y: pliant_core::WEIGHTS[1],
    }
}

/// Taper anchors for translational goals: full weight inside 1 cm error,
/// near-minimum beyond 6 cm.
pub fn translation_goal_curve() -> WeightCurve {
    WeightCurve {
        p1_x: 0.0,
        p1_y: pliant_core::WEIGHTS[5],
        p2_x: 0.01,
        p2_y: pliant_core::WEIGHTS[4],
        saddle_x: 0.05,
        saddle_y: pliant_core::WEIGHTS[3],
        min_x: 0.06,
        min_y: pliant_core::WEIGHTS[1],
    }
}

/// Velocity of `expr` induced by the current joint velocities.
pub fn expr_velocity(ctx: &mut Context, model: &dyn KinematicModel, expr: &Expr) -> Expr {
    let positions = joint_position_symbols(ctx, model);
    let velocities = joint_velocity_symbols(ctx, model);
    let grad = jacobian(std::slice::from_ref(expr), &positions);
    grad[0]
        .iter()
        .zip(&velocities)
        .fold(Expr::zero(), |acc, (d, qd)| {
            acc + d.clone() * Expr::symbol(*qd)
        })
}

/// Clamp a per-tick displacement to `max_velocity` over one sample period.
pub fn limit_velocity(ctx: &mut Context, error: Expr, max_velocity: Expr) -> Expr {
    let bound = max_velocity * ctx.sample_period_expr();
    error.min(&bound).max(&(-bound.clone()))
}

/// Clamp a per-tick displacement so the velocity of `current_position`
/// stays within `max_velocity` and changes by at most `max_acceleration`
/// per tick, with a square-root braking ramp near the goal.
pub fn limit_acceleration(
    ctx: &mut Context,
    model: &dyn KinematicModel,
    current_position: &Expr,
    error: Expr,
    max_acceleration: Expr,
    max_velocity: Expr,
) -> Expr {
    let dt = ctx.sample_period_expr();
    let last_velocity = expr_velocity(ctx, model, current_position) * dt.clone();
    let max_velocity = max_velocity * dt.clone();
    let max_acceleration = max_acceleration * dt;

    // Rescale so one unit is one acceleration step.
    let m = Expr::one() / max_acceleration.clone();
    let error = error * m.clone();
    let max_acceleration = max_acceleration * m.clone();
    let last_velocity = last_velocity * m.clone();
    let max_velocity = max_velocity * m.clone();

    let sign = error.signum();
    let error = error.abs();
    let braking = (error.floor() * 2.0 * max_acceleration.clone()
        + max_acceleration.clone().powf(2.0) / 4.0)
        .sqrt()
        - max_acceleration.clone() / 2.0;
    let cmd = if_greater(max_acceleration.clone(), error.clone(), error, braking) * sign;

    let upper = (last_velocity.clone() + max_acceleration.clone()).min(&max_velocity);
    let lower = (last_velocity - max_acceleration).max(&(-max_velocity.clone()));
    cmd.min(&upper).max(&lower) / m
}

/// Wrap an angle into `(-pi, pi]`.
pub fn normalize_angle(angle: Expr) -> Expr {
    let wraps = ((angle.clone() + PI) / (2.0 * PI)).floor();
    angle - wraps * (2.0 * PI)
}

/// Signed shortest rotation from `from` to `to`.
pub fn shortest_angular_distance(from: Expr, to: Expr) -> Expr {
    normalize_angle(to - from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Isometry3, Vector3};
    use pliant_cas::Symbol;
    use pliant_core::{StateKey, WEIGHTS, WEIGHT_MIN};
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
    fn tapered_weight_hits_anchor_points() {
        let mut ctx = Context::new();
        let x = ctx.expr(&StateKey::joint_position("q"));
        let curve = angular_goal_curve();
        let w = tapered_weight(&x, &curve);

        for (xv, expected) in [
            (0.0, WEIGHTS[5]),
            (PI / 8.0, WEIGHTS[4]),
            (PI / 6.0, WEIGHTS[3]),
            (PI / 4.0, WEIGHTS[1]),
            (1.0, WEIGHTS[1]),
        ] {
            ctx.bind(&StateKey::joint_position("q"), xv);
            assert_relative_eq!(eval(&ctx, &w), expected, max_relative = 1e-9);
        }
    }

    #[test]
    fn tapered_weight_is_non_increasing() {
        let mut ctx = Context::new();
        let x = ctx.expr(&StateKey::joint_position("q"));
        let w = tapered_weight(&x, &angular_goal_curve());

        let mut last = f64::INFINITY;
        for step in 0..200 {
            ctx.bind(&StateKey::joint_position("q"), step as f64 * 0.005);
            let v = eval(&ctx, &w);
            assert!(v <= last + 1e-9, "weight rose at step {step}: {v} > {last}");
            assert!(v >= WEIGHT_MIN);
            last = v;
        }
    }

    #[test]
    fn limit_velocity_clamps_symmetrically() {
        let mut ctx = Context::with_sample_period(0.05);
        let err = ctx.expr(&StateKey::joint_position("q"));
        let limited = limit_velocity(&mut ctx, err, Expr::constant(1.0));

        ctx.bind(&StateKey::joint_position("q"), 2.0);
        assert_relative_eq!(eval(&ctx, &limited), 0.05);
        ctx.bind(&StateKey::joint_position("q"), -2.0);
        assert_relative_eq!(eval(&ctx, &limited), -0.05);
        ctx.bind(&StateKey::joint_position("q"), 0.01);
        assert_relative_eq!(eval(&ctx, &limited), 0.01);
    }

    fn one_joint_model() -> SerialChainModel {
        SerialChainModel::new(
            "probe",
            "base",
            vec![JointSpec::revolute(
                "q",
                "tip",
                Isometry3::identity(),
                Vector3::y(),
            )],
        )
    }

    #[test]
    fn limit_acceleration_respects_both_limits() {
        let model = one_joint_model();
        let mut ctx = Context::with_sample_period(0.05);
        let q = ctx.expr(&StateKey::joint_position("q"));
        let err = ctx.expr(&StateKey::param("goal", &["error"]));
        ctx.set_goal_params("goal", serde_json::json!({"error": 0.0}));

        let max_vel = 0.5;
        let max_acc = 0.8;
        let cmd = limit_acceleration(
            &mut ctx,
            &model,
            &q,
            err,
            Expr::constant(max_acc),
            Expr::constant(max_vel),
        );

        let dt = 0.05;
        for (qdot, error) in [(0.0, 10.0), (0.2, 10.0), (0.5, -10.0), (-0.3, 0.001)] {
            ctx.bind(&StateKey::joint_position("q"), 0.0);
            ctx.bind(&StateKey::joint_velocity("q"), qdot);
            ctx.bind(&StateKey::param("goal", &["error"]), error);
            let v = eval(&ctx, &cmd) / dt;
            assert!(v.abs() <= max_vel + 1e-9, "velocity limit broken: {v}");
            assert!(
                (v - qdot).abs() <= max_acc + 1e-9,
                "acceleration limit broken: {v} from {qdot}"
            );
        }
    }

    #[test]
    fn limit_acceleration_stops_at_small_error() {
        let model = one_joint_model();
        let mut ctx = Context::with_sample_period(0.05);
        let q = ctx.expr(&StateKey::joint_position("q"));
        let err = ctx.expr(&StateKey::param("goal", &["error"]));
        ctx.set_goal_params("goal", serde_json::json!({"error": 0.0}));
        let cmd = limit_acceleration(
            &mut ctx,
            &model,
            &q,
            err,
            Expr::constant(1.0),
            Expr::constant(1.0),
        );

        ctx.bind(&StateKey::joint_position("q"), 0.0);
        ctx.bind(&StateKey::joint_velocity("q"), 0.0);
        ctx.bind(&StateKey::param("goal", &["error"]), 0.0);
        assert_relative_eq!(eval(&ctx, &cmd), 0.0, epsilon = 1e-12);

        // Small errors pass through untouched (already below one step).
        ctx.bind(&StateKey::param("goal", &["error"]), 0.004);
        assert_relative_eq!(eval(&ctx, &cmd), 0.004, epsilon = 1e-12);
    }

    #[test]
    fn shortest_angular_distance_wraps() {
        let ctx = Context::new();
        let d = shortest_angular_distance(Expr::constant(3.0), Expr::constant(-3.0));
        assert_relative_eq!(eval(&ctx, &d), 2.0 * PI - 6.0, epsilon = 1e-12);
        let d = shortest_angular_distance(Expr::constant(0.1), Expr::constant(0.4));
        assert_relative_eq!(eval(&ctx, &d), 0.3, epsilon = 1e-12);
    }
}
