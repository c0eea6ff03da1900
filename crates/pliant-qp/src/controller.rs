//! The per-tick whole-body control loop.
//!
//! Goals are added or removed between ticks; the next tick re-authors the
//! constraint set and recompiles the QP structure only if its fingerprint
//! actually changed. A normal tick just binds fresh joint state and
//! collision contacts, re-evaluates the compiled tape and solves.

use std::collections::BTreeMap;

use pliant_cas::Expr;
use pliant_collision::{Collisions, ContactRecord};
use pliant_core::{
    Context, ControlConfig, JointConstraint, ModelError, PliantError, QpError, SoftConstraint,
    StateKey, WEIGHT_BELOW_CA,
};
use pliant_goals::{
    ConstraintSet, ExternalCollisionAvoidance, Goal, GoalRegistry, SelfCollisionAvoidance,
};
use pliant_robot::{joint_position_expr, JointPositions, KinematicModel};
use serde_json::Value;
use tracing::{error, info};

use crate::assemble::{QpAssembler, StructuralFingerprint};
use crate::diagnostics::{QpDump, QpMatrices};
use crate::solver::QpSolverAdapter;

/// Velocity bounds for every controlled joint: the static limit over one
/// period, tightened so the position limits cannot be crossed in one step.
fn build_joint_constraints(
    ctx: &mut Context,
    model: &dyn KinematicModel,
) -> Result<BTreeMap<String, JointConstraint>, PliantError> {
    let dt = ctx.sample_period_expr();
    let mut map = BTreeMap::new();
    for joint in model.joint_names() {
        let cap = Expr::constant(model.joint_velocity_limit(joint)?) * dt.clone();
        let (lower, upper) = match model.joint_position_limits(joint)? {
            Some((lo, hi)) => {
                let q = joint_position_expr(ctx, joint);
                (
                    (Expr::constant(lo) - q.clone()).max(&(-cap.clone())),
                    (Expr::constant(hi) - q).min(&cap),
                )
            }
            None => (-cap.clone(), cap.clone()),
        };
        map.insert(
            joint.to_string(),
            JointConstraint::new(lower, upper, Expr::constant(WEIGHT_BELOW_CA)),
        );
    }
    Ok(map)
}

/// Owns everything that survives across ticks: the context, the goal set,
/// the compiled constraint structure and the solver state.
pub struct WholeBodyController {
    config: ControlConfig,
    model: Box<dyn KinematicModel>,
    ctx: Context,
    goals: BTreeMap<String, Box<dyn Goal>>,
    collisions: Collisions,
    assembler: Option<QpAssembler>,
    adapter: QpSolverAdapter,
    structure_dirty: bool,
    last_velocities: BTreeMap<String, f64>,
    last_dump: Option<QpDump>,
    recompilations: u64,
}

impl WholeBodyController {
    pub fn new(model: Box<dyn KinematicModel>, config: ControlConfig) -> Result<Self, PliantError> {
        config.validate()?;
        let ctx = Context::with_sample_period(config.sample_period);
        let adapter = QpSolverAdapter::new(config.max_solver_iterations);
        let collisions = Collisions::new(config.collision.max_contacts_per_key);
        Ok(Self {
            config,
            model,
            ctx,
            goals: BTreeMap::new(),
            collisions,
            assembler: None,
            adapter,
            structure_dirty: true,
            last_velocities: BTreeMap::new(),
            last_dump: None,
            recompilations: 0,
        })
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    pub fn model(&self) -> &dyn KinematicModel {
        self.model.as_ref()
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    /// Add (or replace) a goal. Validation runs immediately, so a rejected
    /// goal leaves the active set untouched and later ticks unaffected.
    ///
    /// Parameters seed once per identity: replacing a goal without removing
    /// it first keeps any values retuned via [`Self::update_params`].
    ///
    /// A goal that emits no rows (parameter retuning) acts right here and
    /// is not retained.
    pub fn add_goal(&mut self, goal: Box<dyn Goal>) -> Result<(), PliantError> {
        let identity = goal.identity();
        let mut scratch = ConstraintSet::new();
        if let Err(err) = goal.make_constraints(&mut self.ctx, self.model.as_ref(), &mut scratch) {
            // Drop anything the failed builder seeded, unless a live goal
            // with this identity still owns the blob.
            if !self.goals.contains_key(&identity) {
                self.ctx.clear_goal_params(&identity);
            }
            return Err(err);
        }
        if scratch.is_empty() {
            return Ok(());
        }
        self.goals.insert(identity, goal);
        self.structure_dirty = true;
        Ok(())
    }

    /// Build a goal from its wire tag and add it.
    pub fn add_goal_from_registry(
        &mut self,
        registry: &GoalRegistry,
        tag: &str,
        params: &Value,
    ) -> Result<(), PliantError> {
        let goal = registry.build(tag, params)?;
        self.add_goal(goal)
    }

    /// Remove a goal by identity. Takes effect at the next tick. The goal's
    /// stored parameters are dropped with it, so a later re-add seeds from
    /// the constructor again.
    pub fn remove_goal(&mut self, identity: &str) -> bool {
        let removed = self.goals.remove(identity).is_some();
        if removed {
            self.ctx.clear_goal_params(identity);
            self.structure_dirty = true;
        }
        removed
    }

    pub fn clear_goals(&mut self) {
        if !self.goals.is_empty() {
            let identities: Vec<String> = self.goals.keys().cloned().collect();
            for identity in identities {
                self.ctx.clear_goal_params(&identity);
            }
            self.goals.clear();
            self.structure_dirty = true;
        }
    }

    pub fn goal_identities(&self) -> impl Iterator<Item = &str> {
        self.goals.keys().map(String::as_str)
    }

    /// Avoidance goals for every controlled link and self-collision pair,
    /// watching the `slots_per_key` closest contacts each.
    pub fn enable_collision_avoidance(&mut self, slots_per_key: usize) -> Result<(), PliantError> {
        let collision = self.config.collision.clone();
        let links: Vec<String> = self
            .model
            .controlled_links()
            .iter()
            .map(|l| (*l).to_string())
            .collect();
        for link in &links {
            for idx in 0..slots_per_key {
                self.add_goal(Box::new(ExternalCollisionAvoidance::new(
                    link, idx, &collision,
                )))?;
            }
        }
        let pairs: Vec<(String, String)> = self
            .model
            .self_collision_pairs()
            .iter()
            .map(|(a, b)| ((*a).to_string(), (*b).to_string()))
            .collect();
        for (a, b) in &pairs {
            for idx in 0..slots_per_key {
                self.add_goal(Box::new(SelfCollisionAvoidance::new(a, b, idx, &collision)))?;
            }
        }
        Ok(())
    }

    /// Overwrite numeric parameters of active goals without a structural
    /// rebuild.
    pub fn update_params(&mut self, updates: &Value) -> Result<(), PliantError> {
        self.ctx.update_params(updates)?;
        Ok(())
    }

    /// How many times the constraint structure has been recompiled.
    pub fn recompilations(&self) -> u64 {
        self.recompilations
    }

    /// Matrices of the last tick, for postmortem inspection.
    pub fn last_dump(&self) -> Option<&QpDump> {
        self.last_dump.as_ref()
    }

    /// One control tick: bind state and contacts, solve, emit velocities.
    ///
    /// On failure the error is distinct from "goal satisfied" and no
    /// command is produced; the caller decides between holding the last
    /// command and aborting.
    pub fn tick(
        &mut self,
        positions: &JointPositions,
        contacts: &[ContactRecord],
    ) -> Result<BTreeMap<String, f64>, PliantError> {
        let joint_names: Vec<String> = self
            .model
            .joint_names()
            .iter()
            .map(|j| (*j).to_string())
            .collect();
        for name in &joint_names {
            let q = positions
                .get(name)
                .copied()
                .ok_or_else(|| ModelError::MissingJointState(name.clone()))?;
            self.ctx.bind(&StateKey::joint_position(name), q);
            let v = self.last_velocities.get(name).copied().unwrap_or(0.0);
            self.ctx.bind(&StateKey::joint_velocity(name), v);
        }

        if self.structure_dirty {
            self.rebuild()?;
        }

        let fk_pairs: Vec<(String, String)> = self
            .ctx
            .fk_requests()
            .map(|(r, t)| (r.to_string(), t.to_string()))
            .collect();
        for (root, tip) in fk_pairs {
            let iso = self.model.fk_numeric(positions, &root, &tip)?;
            self.ctx.set_fk_evaluated(&root, &tip, &iso);
        }

        self.collisions.clear();
        self.collisions
            .ingest(self.model.as_ref(), positions, contacts)?;
        self.collisions.bind(&mut self.ctx);

        let Some(assembler) = self.assembler.as_ref() else {
            return Err(QpError::EmptyProblem.into());
        };
        let assembled = assembler.evaluate(&self.ctx)?;
        let n_joints = assembled.n_joints();
        let (filtered, map) = assembled.filter(self.config.zero_weight_epsilon);

        let dims = (filtered.n_variables(), filtered.n_rows());
        if self.adapter.dims().is_some_and(|d| d != dims) {
            info!(
                vars = dims.0,
                rows = dims.1,
                "filtered dimensions changed, resetting solver"
            );
            self.adapter = QpSolverAdapter::new(self.config.max_solver_iterations);
        }

        match self.adapter.solve(&filtered) {
            Ok(solution) => {
                let full = map.expand(&solution);
                let dt = self.config.sample_period;
                let mut commands = BTreeMap::new();
                for (idx, name) in assembled.col_names[..n_joints].iter().enumerate() {
                    let velocity = full[idx] / dt;
                    commands.insert(name.clone(), velocity);
                    self.last_velocities.insert(name.clone(), velocity);
                }
                self.last_dump = Some(QpDump {
                    unfiltered: QpMatrices::from(&assembled),
                    filtered: QpMatrices::from(&filtered),
                    solution: Some(full),
                });
                Ok(commands)
            }
            Err(err) => {
                self.last_dump = Some(QpDump {
                    unfiltered: QpMatrices::from(&assembled),
                    filtered: QpMatrices::from(&filtered),
                    solution: None,
                });
                error!(error = %err, "QP solve failed, matrices retained for inspection");
                Err(err.into())
            }
        }
    }

    /// Re-author the constraint set; recompile only if its structure
    /// actually changed.
    fn rebuild(&mut self) -> Result<(), PliantError> {
        let mut set = ConstraintSet::new();
        for goal in self.goals.values() {
            goal.make_constraints(&mut self.ctx, self.model.as_ref(), &mut set)?;
        }
        let soft: BTreeMap<String, SoftConstraint> = set.into_rows();
        let joints = build_joint_constraints(&mut self.ctx, self.model.as_ref())?;

        let fingerprint = StructuralFingerprint::new(&soft, &joints, self.model.revision());
        let unchanged = self
            .assembler
            .as_ref()
            .is_some_and(|a| *a.fingerprint() == fingerprint);
        if !unchanged {
            let assembler =
                QpAssembler::new(&mut self.ctx, &soft, &joints, self.model.revision());
            info!(
                rows = assembler.n_rows(),
                variables = assembler.n_variables(),
                instructions = assembler.instruction_count(),
                "recompiled constraint structure"
            );
            self.assembler = Some(assembler);
            self.adapter = QpSolverAdapter::new(self.config.max_solver_iterations);
            self.recompilations += 1;
        }
        self.structure_dirty = false;
        Ok(())
    }
}
