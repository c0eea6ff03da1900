//! Stacking the active constraints into one compiled QP structure.
//!
//! The assembler lays out the combined symbolic matrix once per structural
//! change and lowers it to a tape. Every tick only re-evaluates the tape
//! with fresh bindings and filters out rows and columns whose weight has
//! decayed to zero, so the solver never sees a singular direction.
//!
//! Layout of the compiled grid (rows x columns):
//!
//! ```text
//!            [ J cols |  S cols | lb col | ub col ]
//!   H rows   [  A_h   |    0    |  lbA   |  ubA   ]
//!   S rows   [  A_s   |    I    |  lbA   |  ubA   ]
//! J+S rows   [  diag(weights)   |   lb   |   ub   ]
//! ```
//!
//! `H` are the hard soft-constraint rows (zero slack tolerance), `S` the
//! remaining soft rows, `J` the controlled joints. Hard rows get no slack
//! column and no weight-diagonal entry.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};
use pliant_cas::{jacobian, CompiledMatrix, Expr, Symbol};
use pliant_core::{Context, ContextError, JointConstraint, SoftConstraint, StateKey};

/// Identity of a compiled constraint structure.
///
/// Two rebuilds with equal fingerprints produce identical row and column
/// layouts, so the compiled tape and the solver state stay valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralFingerprint {
    pub hard_names: Vec<String>,
    pub soft_names: Vec<String>,
    pub joint_names: Vec<String>,
    pub robot_revision: u64,
}

impl StructuralFingerprint {
    pub fn new(
        soft: &BTreeMap<String, SoftConstraint>,
        joints: &BTreeMap<String, JointConstraint>,
        robot_revision: u64,
    ) -> Self {
        Self {
            hard_names: soft
                .iter()
                .filter(|(_, c)| c.is_hard())
                .map(|(n, _)| n.clone())
                .collect(),
            soft_names: soft
                .iter()
                .filter(|(_, c)| !c.is_hard())
                .map(|(n, _)| n.clone())
                .collect(),
            joint_names: joints.keys().cloned().collect(),
            robot_revision,
        }
    }
}

/// The compiled constraint structure of one structural rebuild.
pub struct QpAssembler {
    fingerprint: StructuralFingerprint,
    compiled: CompiledMatrix,
    n_joints: usize,
    n_hard: usize,
    n_soft: usize,
}

impl QpAssembler {
    /// Lay out and compile the combined matrix.
    ///
    /// Constraint maps are iterated in key order, so row and column indices
    /// are reproducible across rebuilds of the same goal set.
    pub fn new(
        ctx: &mut Context,
        soft: &BTreeMap<String, SoftConstraint>,
        joints: &BTreeMap<String, JointConstraint>,
        robot_revision: u64,
    ) -> Self {
        let fingerprint = StructuralFingerprint::new(soft, joints, robot_revision);

        let joint_syms: Vec<Symbol> = fingerprint
            .joint_names
            .iter()
            .map(|j| ctx.symbol(&StateKey::joint_position(j)))
            .collect();

        let hard: Vec<&SoftConstraint> =
            soft.values().filter(|c| c.is_hard()).collect();
        let softs: Vec<&SoftConstraint> =
            soft.values().filter(|c| !c.is_hard()).collect();

        let n_joints = joint_syms.len();
        let n_hard = hard.len();
        let n_soft = softs.len();
        let n_cols = n_joints + n_soft + 2;

        // One differentiation pass over the whole stacked expression vector.
        let exprs: Vec<Expr> = hard
            .iter()
            .chain(softs.iter())
            .map(|c| c.expression.clone())
            .collect();
        let jac = jacobian(&exprs, &joint_syms);

        let mut grid: Vec<Vec<Expr>> = Vec::with_capacity(n_hard + 2 * n_soft + n_joints);
        for (i, c) in hard.iter().enumerate() {
            let mut row = Vec::with_capacity(n_cols);
            row.extend(jac[i].iter().cloned());
            row.extend((0..n_soft).map(|_| Expr::zero()));
            row.push(c.lower.clone());
            row.push(c.upper.clone());
            grid.push(row);
        }
        for (i, c) in softs.iter().enumerate() {
            let mut row = Vec::with_capacity(n_cols);
            row.extend(jac[n_hard + i].iter().cloned());
            row.extend((0..n_soft).map(|k| if k == i { Expr::one() } else { Expr::zero() }));
            row.push(c.lower.clone());
            row.push(c.upper.clone());
            grid.push(row);
        }
        for (j, c) in joints.values().enumerate() {
            let mut row: Vec<Expr> = (0..n_cols).map(|_| Expr::zero()).collect();
            row[j] = c.weight.clone();
            row[n_joints + n_soft] = c.lower.clone();
            row[n_joints + n_soft + 1] = c.upper.clone();
            grid.push(row);
        }
        for (i, c) in softs.iter().enumerate() {
            let mut row: Vec<Expr> = (0..n_cols).map(|_| Expr::zero()).collect();
            row[n_joints + i] = c.weight.clone();
            row[n_joints + n_soft] = Expr::constant(c.lower_slack_limit);
            row[n_joints + n_soft + 1] = Expr::constant(c.upper_slack_limit);
            grid.push(row);
        }

        let compiled = CompiledMatrix::compile(&grid);

        Self {
            fingerprint,
            compiled,
            n_joints,
            n_hard,
            n_soft,
        }
    }

    pub fn fingerprint(&self) -> &StructuralFingerprint {
        &self.fingerprint
    }

    /// Controlled joint names, in column order.
    pub fn joint_names(&self) -> &[String] {
        &self.fingerprint.joint_names
    }

    /// The symbols the compiled tape reads each tick.
    pub fn inputs(&self) -> &[Symbol] {
        self.compiled.inputs()
    }

    pub fn instruction_count(&self) -> usize {
        self.compiled.instruction_count()
    }

    pub fn n_variables(&self) -> usize {
        self.n_joints + self.n_soft
    }

    pub fn n_rows(&self) -> usize {
        self.n_hard + self.n_soft
    }

    /// Substitute the context's current bindings and slice out the numeric
    /// problem. Fails on the first unbound symbol.
    pub fn evaluate(&self, ctx: &Context) -> Result<AssembledQp, ContextError> {
        let values = ctx.gather(self.compiled.inputs())?;
        let m = self.compiled.eval(&values);

        let n_vars = self.n_joints + self.n_soft;
        let n_rows = self.n_hard + self.n_soft;
        let lb_col = n_vars;
        let ub_col = n_vars + 1;

        let a = m.view((0, 0), (n_rows, n_vars)).into_owned();
        let lba = DVector::from_fn(n_rows, |i, _| m[(i, lb_col)]);
        let uba = DVector::from_fn(n_rows, |i, _| m[(i, ub_col)]);
        let weights = DVector::from_fn(n_vars, |k, _| m[(n_rows + k, k)]);
        let lb = DVector::from_fn(n_vars, |k, _| m[(n_rows + k, lb_col)]);
        let ub = DVector::from_fn(n_vars, |k, _| m[(n_rows + k, ub_col)]);

        let mut row_names = self.fingerprint.hard_names.clone();
        row_names.extend(self.fingerprint.soft_names.iter().cloned());
        let mut col_names = self.fingerprint.joint_names.clone();
        col_names.extend(
            self.fingerprint
                .soft_names
                .iter()
                .map(|n| format!("slack/{n}")),
        );

        Ok(AssembledQp {
            weights,
            a,
            lb,
            ub,
            lba,
            uba,
            row_names,
            col_names,
            n_joints: self.n_joints,
            n_hard: self.n_hard,
        })
    }
}

/// The evaluated, unfiltered numeric problem of one tick.
#[derive(Debug, Clone)]
pub struct AssembledQp {
    /// Weight diagonal over the decision variables (joints, then slacks).
    pub weights: DVector<f64>,
    /// Constraint rows (hard, then soft) over the decision variables.
    pub a: DMatrix<f64>,
    pub lb: DVector<f64>,
    pub ub: DVector<f64>,
    pub lba: DVector<f64>,
    pub uba: DVector<f64>,
    pub row_names: Vec<String>,
    pub col_names: Vec<String>,
    n_joints: usize,
    n_hard: usize,
}

impl AssembledQp {
    pub fn n_joints(&self) -> usize {
        self.n_joints
    }

    pub fn n_hard(&self) -> usize {
        self.n_hard
    }

    /// Drop rows and columns whose weight is at or below `epsilon`.
    ///
    /// A zero-weight soft row constrains nothing and leaves the QP singular
    /// along its slack, so the row and its slack column go together; a
    /// zero-weight joint column belongs to an uncontrolled joint. Hard rows
    /// carry no weight and are always kept.
    pub fn filter(&self, epsilon: f64) -> (FilteredQp, FilterMap) {
        let kept_cols: Vec<usize> = (0..self.weights.len())
            .filter(|&k| self.weights[k] > epsilon)
            .collect();
        let kept_rows: Vec<usize> = (0..self.a.nrows())
            .filter(|&i| {
                i < self.n_hard || self.weights[self.n_joints + (i - self.n_hard)] > epsilon
            })
            .collect();

        let a = DMatrix::from_fn(kept_rows.len(), kept_cols.len(), |i, j| {
            self.a[(kept_rows[i], kept_cols[j])]
        });
        let filtered = FilteredQp {
            weights: DVector::from_fn(kept_cols.len(), |j, _| self.weights[kept_cols[j]]),
            a,
            lb: DVector::from_fn(kept_cols.len(), |j, _| self.lb[kept_cols[j]]),
            ub: DVector::from_fn(kept_cols.len(), |j, _| self.ub[kept_cols[j]]),
            lba: DVector::from_fn(kept_rows.len(), |i, _| self.lba[kept_rows[i]]),
            uba: DVector::from_fn(kept_rows.len(), |i, _| self.uba[kept_rows[i]]),
            row_names: kept_rows
                .iter()
                .map(|&i| self.row_names[i].clone())
                .collect(),
            col_names: kept_cols
                .iter()
                .map(|&j| self.col_names[j].clone())
                .collect(),
        };
        let map = FilterMap {
            kept_cols,
            n_cols: self.weights.len(),
        };
        (filtered, map)
    }
}

/// The numeric problem handed to the solver, zero-weight rows and columns
/// removed.
#[derive(Debug, Clone)]
pub struct FilteredQp {
    pub weights: DVector<f64>,
    pub a: DMatrix<f64>,
    pub lb: DVector<f64>,
    pub ub: DVector<f64>,
    pub lba: DVector<f64>,
    pub uba: DVector<f64>,
    pub row_names: Vec<String>,
    pub col_names: Vec<String>,
}

impl FilteredQp {
    pub fn n_variables(&self) -> usize {
        self.weights.len()
    }

    pub fn n_rows(&self) -> usize {
        self.a.nrows()
    }
}

/// Restores a filtered solution to its original variable indices.
#[derive(Debug, Clone)]
pub struct FilterMap {
    kept_cols: Vec<usize>,
    n_cols: usize,
}

impl FilterMap {
    /// Scatter a filtered solution back; dropped positions read zero.
    pub fn expand(&self, solution: &DVector<f64>) -> DVector<f64> {
        let mut full = DVector::zeros(self.n_cols);
        for (j, &col) in self.kept_cols.iter().enumerate() {
            full[col] = solution[j];
        }
        full
    }

    pub fn kept_columns(&self) -> &[usize] {
        &self.kept_cols
    }
}
