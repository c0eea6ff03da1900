//! End-to-end control scenarios over small serial chains.

use nalgebra::{Isometry3, Point3, Vector3};
use pliant_collision::{ContactBody, ContactRecord};
use pliant_core::ControlConfig;
use pliant_goals::{CartesianPosition, JointPositionRevolute};
use pliant_qp::WholeBodyController;
use pliant_robot::{JointPositions, JointSpec, SerialChainModel};

fn one_revolute() -> Box<SerialChainModel> {
    Box::new(SerialChainModel::new(
        "arm",
        "base",
        vec![JointSpec::revolute(
            "elbow",
            "forearm",
            Isometry3::identity(),
            Vector3::z(),
        )],
    ))
}

fn one_slider() -> Box<SerialChainModel> {
    Box::new(SerialChainModel::new(
        "slider",
        "base",
        vec![JointSpec::prismatic(
            "slide",
            "carriage",
            Isometry3::identity(),
            Vector3::x(),
        )],
    ))
}

fn state(joint: &str, q: f64) -> JointPositions {
    [(joint.to_string(), q)].into_iter().collect()
}

#[test]
fn revolute_goal_is_velocity_bounded_and_overshoot_free() {
    let config = ControlConfig {
        sample_period: 0.1,
        ..ControlConfig::default()
    };
    let mut controller = WholeBodyController::new(one_revolute(), config).unwrap();
    controller
        .add_goal(Box::new(
            JointPositionRevolute::new("elbow", 1.0)
                .with_max_velocity(1.0)
                .with_max_acceleration(1.0),
        ))
        .unwrap();

    let dt = 0.1;
    let mut q = 0.0;
    let mut first_step = None;
    for _ in 0..40 {
        let commands = controller.tick(&state("elbow", q), &[]).unwrap();
        let step = commands["elbow"] * dt;
        if first_step.is_none() {
            first_step = Some(step);
        }
        // Never backward, never past the goal.
        assert!(step >= -1e-9, "backward step {step}");
        q += step;
        assert!(q <= 1.0 + 1e-6, "overshoot to {q}");
    }

    // First tick saturates the velocity bound without exceeding it.
    let first = first_step.unwrap();
    assert!(first <= 0.1 + 1e-9);
    assert!(first >= 0.09);

    assert!((1.0 - q).abs() < 1e-3, "did not converge: {q}");
}

#[test]
fn cartesian_goal_follows_a_ballistic_velocity_profile() {
    let mut controller =
        WholeBodyController::new(one_slider(), ControlConfig::default()).unwrap();
    // 0.5 m straight-line travel along x. Starting slightly off zero keeps
    // the tip-distance derivative well defined on the first tick.
    controller
        .add_goal(Box::new(
            CartesianPosition::new("base", "carriage", Point3::new(0.51, 0.0, 0.0))
                .with_max_velocity(0.1)
                .with_max_acceleration(0.1),
        ))
        .unwrap();

    let dt = controller.config().sample_period;
    let mut q = 0.01;
    let mut velocities = Vec::new();
    for _ in 0..400 {
        let commands = controller.tick(&state("slide", q), &[]).unwrap();
        let v = commands["slide"];
        assert!(v >= -1e-6, "moved away from the goal: {v}");
        velocities.push(v);
        q += v * dt;
    }

    let peak_idx = velocities
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap();
    let peak = velocities[peak_idx];

    assert!(peak <= 0.1 + 1e-6, "peak velocity {peak} breaks the limit");
    // Ramp up: the start is well below the peak.
    assert!(velocities[0] < peak - 0.01);
    // Ramp down: nonincreasing after the peak.
    for w in velocities[peak_idx..].windows(2) {
        assert!(w[1] <= w[0] + 1e-4, "velocity rose after the peak");
    }
    assert!((0.51 - q).abs() < 1e-3, "terminal error too large: {q}");
}

#[test]
fn close_contact_outweighs_and_repels_a_cartesian_pull() {
    let mut config = ControlConfig::default();
    config.collision.zero_weight_distance = 0.05;
    config.collision.max_acceleration = 0.005;

    let mut controller = WholeBodyController::new(one_slider(), config).unwrap();
    // Pull toward +x, straight into the obstacle.
    controller
        .add_goal(Box::new(
            CartesianPosition::new("base", "carriage", Point3::new(0.41, 0.0, 0.0))
                .with_max_velocity(0.01),
        ))
        .unwrap();
    controller.enable_collision_avoidance(1).unwrap();

    // Wall 4 cm ahead of the carriage; normal points back at the robot.
    let contact = ContactRecord {
        link_a: "carriage".into(),
        body_b: ContactBody::External("wall".into()),
        link_b: "wall".into(),
        position_on_a: Point3::new(0.0, 0.0, 0.0),
        position_on_b: Point3::new(0.05, 0.0, 0.0),
        normal: -Vector3::x(),
        distance: 0.04,
    };

    let commands = controller.tick(&state("slide", 0.01), &[contact]).unwrap();

    // Avoidance dominates: the commanded velocity points away from the wall
    // even though the Cartesian goal pulls into it.
    assert!(
        commands["slide"] < -1e-4,
        "expected a repel command, got {}",
        commands["slide"]
    );

    let dump = controller.last_dump().unwrap();
    let avoidance_weight = dump
        .filtered
        .weight_of("slack/ExternalCollisionAvoidance/carriage/0")
        .unwrap();
    let goal_weight = dump
        .filtered
        .weight_of("slack/CartesianPosition/base/carriage/x")
        .unwrap();
    assert!(
        avoidance_weight > goal_weight,
        "avoidance {avoidance_weight} vs goal {goal_weight}"
    );

    // The avoidance row's lower bound demands clearance gain.
    let row = dump
        .filtered
        .row_index("ExternalCollisionAvoidance/carriage/0")
        .unwrap();
    assert!(dump.filtered.lba[row] > 0.0);
}

#[test]
fn unchanged_goal_set_reuses_the_compiled_structure() {
    let mut controller =
        WholeBodyController::new(one_revolute(), ControlConfig::default()).unwrap();
    controller
        .add_goal(Box::new(JointPositionRevolute::new("elbow", 0.4)))
        .unwrap();

    controller.tick(&state("elbow", 0.0), &[]).unwrap();
    let first = controller.last_dump().unwrap();
    let rows = first.unfiltered.row_names.clone();
    let cols = first.unfiltered.col_names.clone();

    // Swapping in an identical goal forces a rebuild, but the structure
    // fingerprint matches, so nothing is recompiled.
    controller.remove_goal("JointPositionRevolute/elbow");
    controller
        .add_goal(Box::new(JointPositionRevolute::new("elbow", 0.4)))
        .unwrap();
    controller.tick(&state("elbow", 0.01), &[]).unwrap();

    assert_eq!(controller.recompilations(), 1);
    let second = controller.last_dump().unwrap();
    assert_eq!(second.unfiltered.row_names, rows);
    assert_eq!(second.unfiltered.col_names, cols);
}
