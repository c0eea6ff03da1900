//! Postmortem access to the solver inputs of the last tick.

use nalgebra::{DMatrix, DVector};

use crate::assemble::{AssembledQp, FilteredQp};

/// One snapshot of the numeric problem, rows and columns attributed by name.
#[derive(Debug, Clone)]
pub struct QpMatrices {
    pub weights: DVector<f64>,
    pub a: DMatrix<f64>,
    pub lb: DVector<f64>,
    pub ub: DVector<f64>,
    pub lba: DVector<f64>,
    pub uba: DVector<f64>,
    pub row_names: Vec<String>,
    pub col_names: Vec<String>,
}

impl QpMatrices {
    pub fn row_index(&self, name: &str) -> Option<usize> {
        self.row_names.iter().position(|n| n == name)
    }

    pub fn col_index(&self, name: &str) -> Option<usize> {
        self.col_names.iter().position(|n| n == name)
    }

    /// The weight attributed to a named column, if it survived filtering.
    pub fn weight_of(&self, col_name: &str) -> Option<f64> {
        self.col_index(col_name).map(|j| self.weights[j])
    }
}

impl From<&AssembledQp> for QpMatrices {
    fn from(qp: &AssembledQp) -> Self {
        Self {
            weights: qp.weights.clone(),
            a: qp.a.clone(),
            lb: qp.lb.clone(),
            ub: qp.ub.clone(),
            lba: qp.lba.clone(),
            uba: qp.uba.clone(),
            row_names: qp.row_names.clone(),
            col_names: qp.col_names.clone(),
        }
    }
}

impl From<&FilteredQp> for QpMatrices {
    fn from(qp: &FilteredQp) -> Self {
        Self {
            weights: qp.weights.clone(),
            a: qp.a.clone(),
            lb: qp.lb.clone(),
            ub: qp.ub.clone(),
            lba: qp.lba.clone(),
            uba: qp.uba.clone(),
            row_names: qp.row_names.clone(),
            col_names: qp.col_names.clone(),
        }
    }
}

/// Everything the last solve saw, before and after filtering.
#[derive(Debug, Clone)]
pub struct QpDump {
    pub unfiltered: QpMatrices,
    pub filtered: QpMatrices,
    /// Solution re-expanded to unfiltered indices; `None` if the solve
    /// failed.
    pub solution: Option<DVector<f64>>,
}
