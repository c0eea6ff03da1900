//! Constraint row types consumed by the QP assembler.

use pliant_cas::Expr;

/// Default slack bound for soft rows. Effectively unconstrained slack.
pub const DEFAULT_SLACK_LIMIT: f64 = 1e9;

/// One scalar row of the QP.
///
/// `lower`/`upper` bound the allowed change of `expression` over one control
/// period. `weight` is the row's priority; higher dominates. Rows are created
/// by a builder, immutable afterward, and consumed by the assembler once per
/// structural rebuild.
#[derive(Debug, Clone)]
pub struct SoftConstraint {
    pub lower: Expr,
    pub upper: Expr,
    pub weight: Expr,
    pub expression: Expr,
    pub lower_slack_limit: f64,
    pub upper_slack_limit: f64,
}

impl SoftConstraint {
    pub fn new(lower: Expr, upper: Expr, weight: Expr, expression: Expr) -> Self {
        Self {
            lower,
            upper,
            weight,
            expression,
            lower_slack_limit: -DEFAULT_SLACK_LIMIT,
            upper_slack_limit: DEFAULT_SLACK_LIMIT,
        }
    }

    /// A row with zero slack tolerance, enforced exactly if feasible.
    pub fn hard(lower: Expr, upper: Expr, weight: Expr, expression: Expr) -> Self {
        Self {
            lower,
            upper,
            weight,
            expression,
            lower_slack_limit: 0.0,
            upper_slack_limit: 0.0,
        }
    }

    /// Hard rows get no slack column and no weight-diagonal entry.
    pub fn is_hard(&self) -> bool {
        self.lower_slack_limit == 0.0 && self.upper_slack_limit == 0.0
    }
}

/// Bounds and weight on one controlled joint's velocity command itself.
///
/// One per controlled joint; the set is replaced wholesale whenever the
/// actuated joint set changes.
#[derive(Debug, Clone)]
pub struct JointConstraint {
    pub lower: Expr,
    pub upper: Expr,
    pub weight: Expr,
}

impl JointConstraint {
    pub fn new(lower: Expr, upper: Expr, weight: Expr) -> Self {
        Self { lower, upper, weight }
    }
}
