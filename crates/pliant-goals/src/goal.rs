//! The goal interface and the named constraint set goals emit into.

use std::collections::BTreeMap;

use pliant_cas::Expr;
use pliant_core::{Context, GoalError, PliantError, SoftConstraint};
use pliant_robot::KinematicModel;

/// Named soft constraints, keyed by the emitting goal's identity plus a
/// row suffix. Names must be unique across all active goals.
#[derive(Debug, Default)]
pub struct ConstraintSet {
    rows: BTreeMap<String, SoftConstraint>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a soft row under `name`. Duplicate names are rejected.
    pub fn add(&mut self, name: String, constraint: SoftConstraint) -> Result<(), GoalError> {
        if self.rows.contains_key(&name) {
            return Err(GoalError::NamingConflict(name));
        }
        self.rows.insert(name, constraint);
        Ok(())
    }

    /// Add a zero-slack row, enforced exactly if feasible.
    pub fn add_hard(
        &mut self,
        name: String,
        lower: Expr,
        upper: Expr,
        weight: Expr,
        expression: Expr,
    ) -> Result<(), GoalError> {
        self.add(name, SoftConstraint::hard(lower, upper, weight, expression))
    }

    /// Add a weight-zero row that carries `expr` into solver dumps without
    /// ever constraining the solution.
    pub fn add_debug(&mut self, name: String, expr: Expr) -> Result<(), GoalError> {
        self.add(
            name,
            SoftConstraint::new(expr.clone(), expr, Expr::zero(), Expr::one()),
        )
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SoftConstraint)> {
        self.rows.iter().map(|(n, c)| (n.as_str(), c))
    }

    pub fn into_rows(self) -> BTreeMap<String, SoftConstraint> {
        self.rows
    }
}

/// A motion goal. Emits soft constraint rows once at build time; the rows
/// stay valid until the goal set changes structurally.
pub trait Goal {
    /// Unique name of this goal instance, used as constraint name prefix
    /// and as the key for its runtime-tunable parameters.
    fn identity(&self) -> String;

    fn make_constraints(
        &self,
        ctx: &mut Context,
        model: &dyn KinematicModel,
        set: &mut ConstraintSet,
    ) -> Result<(), PliantError>;
}

impl std::fmt::Debug for dyn Goal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Goal").field(&self.identity()).finish()
    }
}
