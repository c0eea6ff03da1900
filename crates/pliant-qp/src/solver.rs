//! Clarabel adapter owning solver state across ticks.
//!
//! The first solve fixes the problem dimensions for the life of the
//! adapter; a dimension change without a fresh adapter is an invariant
//! violation, reported as such rather than recovered. The prior optimum is
//! retained so the caller can hold the last command on failure.

use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus,
    SupportedConeT::{NonnegativeConeT, ZeroConeT},
};
use nalgebra::{DMatrix, DVector};
use pliant_core::QpError;
use tracing::{debug, warn};

use crate::assemble::FilteredQp;

/// Bounds at or beyond this magnitude are treated as absent.
const UNBOUNDED: f64 = 1e8;

fn is_bounded(v: f64) -> bool {
    v.is_finite() && v.abs() < UNBOUNDED
}

/// Wraps Clarabel behind the controller's solve contract.
pub struct QpSolverAdapter {
    max_iterations: u32,
    dims: Option<(usize, usize)>,
    last_solution: Option<DVector<f64>>,
}

impl QpSolverAdapter {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            max_iterations,
            dims: None,
            last_solution: None,
        }
    }

    /// `(variables, rows)` fixed at cold start, `None` before the first
    /// solve.
    pub fn dims(&self) -> Option<(usize, usize)> {
        self.dims
    }

    /// The optimum of the last successful solve.
    pub fn last_solution(&self) -> Option<&DVector<f64>> {
        self.last_solution.as_ref()
    }

    /// Solve `min 0.5 x' diag(w) x` subject to the row and variable bounds.
    ///
    /// Returns the full decision vector (joint steps, then slacks) or a
    /// distinct failure; never a partial result.
    pub fn solve(&mut self, qp: &FilteredQp) -> Result<DVector<f64>, QpError> {
        let vars = qp.n_variables();
        let rows = qp.n_rows();
        if vars == 0 {
            return Err(QpError::EmptyProblem);
        }
        match self.dims {
            None => {
                self.dims = Some((vars, rows));
                debug!(vars, rows, "solver cold start");
            }
            Some((expected_vars, expected_rows))
                if (expected_vars, expected_rows) != (vars, rows) =>
            {
                return Err(QpError::StructuralMismatch {
                    expected_vars,
                    expected_rows,
                    got_vars: vars,
                    got_rows: rows,
                });
            }
            Some(_) => {}
        }

        let mut lb = qp.lb.clone();
        let mut ub = qp.ub.clone();
        let mut lba = qp.lba.clone();
        let mut uba = qp.uba.clone();
        let had_nan = sanitize_bounds(&mut lb, &mut ub) | sanitize_bounds(&mut lba, &mut uba);
        if had_nan {
            warn!("NaN bounds treated as unconstrained");
        }
        if qp.weights.iter().any(|v| v.is_nan()) || qp.a.iter().any(|v| v.is_nan()) {
            return Err(QpError::NanAfterRetry);
        }

        let x = self.solve_once(&qp.weights, &qp.a, &lb, &ub, &lba, &uba)?;
        self.last_solution = Some(x.clone());
        Ok(x)
    }

    fn solve_once(
        &self,
        weights: &DVector<f64>,
        a: &DMatrix<f64>,
        lb: &DVector<f64>,
        ub: &DVector<f64>,
        lba: &DVector<f64>,
        uba: &DVector<f64>,
    ) -> Result<DVector<f64>, QpError> {
        let vars = weights.len();
        let rows = a.nrows();

        let row_is_eq =
            |i: usize| is_bounded(lba[i]) && is_bounded(uba[i]) && (uba[i] - lba[i]).abs() <= 1e-12;
        let var_is_eq =
            |j: usize| is_bounded(lb[j]) && is_bounded(ub[j]) && (ub[j] - lb[j]).abs() <= 1e-12;

        let mut n_eq = 0;
        let mut n_ineq = 0;
        for i in 0..rows {
            if row_is_eq(i) {
                n_eq += 1;
            } else {
                n_ineq += usize::from(is_bounded(uba[i])) + usize::from(is_bounded(lba[i]));
            }
        }
        for j in 0..vars {
            if var_is_eq(j) {
                n_eq += 1;
            } else {
                n_ineq += usize::from(is_bounded(ub[j])) + usize::from(is_bounded(lb[j]));
            }
        }

        // Equalities first (zero cone), then inequalities (nonnegative cone).
        let mut a_all = DMatrix::zeros(n_eq + n_ineq, vars);
        let mut b_all = DVector::zeros(n_eq + n_ineq);
        let mut r = 0;

        for i in 0..rows {
            if row_is_eq(i) {
                a_all.row_mut(r).copy_from(&a.row(i));
                b_all[r] = uba[i];
                r += 1;
            }
        }
        for j in 0..vars {
            if var_is_eq(j) {
                a_all[(r, j)] = 1.0;
                b_all[r] = ub[j];
                r += 1;
            }
        }
        for i in 0..rows {
            if row_is_eq(i) {
                continue;
            }
            if is_bounded(uba[i]) {
                a_all.row_mut(r).copy_from(&a.row(i));
                b_all[r] = uba[i];
                r += 1;
            }
            if is_bounded(lba[i]) {
                a_all.row_mut(r).copy_from(&a.row(i));
                a_all.row_mut(r).neg_mut();
                b_all[r] = -lba[i];
                r += 1;
            }
        }
        for j in 0..vars {
            if var_is_eq(j) {
                continue;
            }
            if is_bounded(ub[j]) {
                a_all[(r, j)] = 1.0;
                b_all[r] = ub[j];
                r += 1;
            }
            if is_bounded(lb[j]) {
                a_all[(r, j)] = -1.0;
                b_all[r] = -lb[j];
                r += 1;
            }
        }
        debug_assert_eq!(r, n_eq + n_ineq);

        let p_csc = diag_to_csc(weights);
        let a_csc = dmatrix_to_csc(&a_all);
        let q = vec![0.0; vars];
        let b: Vec<f64> = b_all.iter().copied().collect();
        let cones = vec![ZeroConeT(n_eq), NonnegativeConeT(n_ineq)];

        let settings = DefaultSettingsBuilder::default()
            .max_iter(self.max_iterations)
            .verbose(false)
            .build()
            .expect("valid solver settings");

        let Ok(mut solver) = DefaultSolver::new(&p_csc, &q, &a_csc, &b, &cones, settings) else {
            return Err(QpError::NotConverged);
        };
        solver.solve();

        let solution = &solver.solution;
        match solution.status {
            SolverStatus::Solved | SolverStatus::AlmostSolved => {
                Ok(DVector::from_column_slice(&solution.x))
            }
            SolverStatus::PrimalInfeasible
            | SolverStatus::DualInfeasible
            | SolverStatus::AlmostPrimalInfeasible
            | SolverStatus::AlmostDualInfeasible => Err(QpError::Infeasible),
            SolverStatus::MaxIterations => {
                Err(QpError::IterationBudgetExceeded(self.max_iterations))
            }
            _ => Err(QpError::NotConverged),
        }
    }
}

/// Replace NaN bounds with unbounded values. Returns whether any were hit.
fn sanitize_bounds(lower: &mut DVector<f64>, upper: &mut DVector<f64>) -> bool {
    let mut hit = false;
    for v in lower.iter_mut() {
        if v.is_nan() {
            *v = f64::NEG_INFINITY;
            hit = true;
        }
    }
    for v in upper.iter_mut() {
        if v.is_nan() {
            *v = f64::INFINITY;
            hit = true;
        }
    }
    hit
}

/// Diagonal weight vector to upper-triangular CSC.
fn diag_to_csc(weights: &DVector<f64>) -> CscMatrix<f64> {
    let n = weights.len();
    let mut colptr = vec![0usize; n + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();
    for j in 0..n {
        if weights[j] != 0.0 {
            rowval.push(j);
            nzval.push(weights[j]);
        }
        colptr[j + 1] = rowval.len();
    }
    CscMatrix::new(n, n, colptr, rowval, nzval)
}

/// Dense nalgebra matrix to CSC.
fn dmatrix_to_csc(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();
    for j in 0..ncols {
        for i in 0..nrows {
            let v = m[(i, j)];
            if v.abs() > 1e-15 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }
    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// One joint step plus one slack tracking a single row target.
    fn tracking_qp(target: f64, slack_weight: f64) -> FilteredQp {
        FilteredQp {
            weights: DVector::from_vec(vec![1.0, slack_weight]),
            a: DMatrix::from_row_slice(1, 2, &[1.0, 1.0]),
            lb: DVector::from_vec(vec![-10.0, -1e9]),
            ub: DVector::from_vec(vec![10.0, 1e9]),
            lba: DVector::from_vec(vec![target]),
            uba: DVector::from_vec(vec![target]),
            row_names: vec!["goal".into()],
            col_names: vec!["q".into(), "slack/goal".into()],
        }
    }

    #[test]
    fn high_weight_rows_dominate() {
        let mut adapter = QpSolverAdapter::new(200);
        let x = adapter.solve(&tracking_qp(0.5, 1000.0)).unwrap();
        // v = target * w_s / (w_j + w_s)
        assert_relative_eq!(x[0], 0.5 * 1000.0 / 1001.0, epsilon = 1e-4);
        assert_relative_eq!(x[0] + x[1], 0.5, epsilon = 1e-6);
        assert!(adapter.last_solution().is_some());
    }

    #[test]
    fn variable_bounds_cap_the_step() {
        let mut qp = tracking_qp(0.5, 1000.0);
        qp.ub[0] = 0.1;
        let mut adapter = QpSolverAdapter::new(200);
        let x = adapter.solve(&qp).unwrap();
        assert!(x[0] <= 0.1 + 1e-6);
        // The slack absorbs the remainder.
        assert_relative_eq!(x[1], 0.5 - x[0], epsilon = 1e-5);
    }

    #[test]
    fn dimension_change_without_reset_is_fatal() {
        let mut adapter = QpSolverAdapter::new(200);
        adapter.solve(&tracking_qp(0.5, 1000.0)).unwrap();

        let bigger = FilteredQp {
            weights: DVector::from_vec(vec![1.0, 1.0, 1.0]),
            a: DMatrix::from_row_slice(1, 3, &[1.0, 0.0, 1.0]),
            lb: DVector::from_vec(vec![-1.0; 3]),
            ub: DVector::from_vec(vec![1.0; 3]),
            lba: DVector::from_vec(vec![0.0]),
            uba: DVector::from_vec(vec![0.0]),
            row_names: vec!["goal".into()],
            col_names: vec!["a".into(), "b".into(), "slack/goal".into()],
        };
        let err = adapter.solve(&bigger).unwrap_err();
        assert!(matches!(err, QpError::StructuralMismatch { .. }));
    }

    #[test]
    fn conflicting_hard_rows_report_infeasible() {
        let qp = FilteredQp {
            weights: DVector::from_vec(vec![1.0]),
            a: DMatrix::from_row_slice(2, 1, &[1.0, 1.0]),
            lb: DVector::from_vec(vec![-10.0]),
            ub: DVector::from_vec(vec![10.0]),
            lba: DVector::from_vec(vec![1.0, -1.0]),
            uba: DVector::from_vec(vec![1.0, -1.0]),
            row_names: vec!["up".into(), "down".into()],
            col_names: vec!["q".into()],
        };
        let mut adapter = QpSolverAdapter::new(200);
        let err = adapter.solve(&qp).unwrap_err();
        assert!(matches!(err, QpError::Infeasible));
    }

    #[test]
    fn exhausted_iteration_budget_is_distinct() {
        let mut adapter = QpSolverAdapter::new(1);
        let err = adapter.solve(&tracking_qp(0.5, 1000.0)).unwrap_err();
        assert!(matches!(err, QpError::IterationBudgetExceeded(1)));
    }

    #[test]
    fn nan_bounds_are_treated_as_unconstrained() {
        let mut qp = tracking_qp(0.5, 1000.0);
        qp.lba[0] = f64::NAN;
        let mut adapter = QpSolverAdapter::new(200);
        // Only the upper row bound remains; zero already satisfies it.
        let x = adapter.solve(&qp).unwrap();
        assert!(x[0] <= 0.5 + 1e-6);
    }

    #[test]
    fn nan_in_the_matrix_escalates() {
        let mut qp = tracking_qp(0.5, 1000.0);
        qp.weights[0] = f64::NAN;
        let mut adapter = QpSolverAdapter::new(200);
        let err = adapter.solve(&qp).unwrap_err();
        assert!(matches!(err, QpError::NanAfterRetry));
    }

    #[test]
    fn empty_problem_is_rejected() {
        let qp = FilteredQp {
            weights: DVector::zeros(0),
            a: DMatrix::zeros(0, 0),
            lb: DVector::zeros(0),
            ub: DVector::zeros(0),
            lba: DVector::zeros(0),
            uba: DVector::zeros(0),
            row_names: vec![],
            col_names: vec![],
        };
        let mut adapter = QpSolverAdapter::new(200);
        assert!(matches!(
            adapter.solve(&qp).unwrap_err(),
            QpError::EmptyProblem
        ));
    }
}
