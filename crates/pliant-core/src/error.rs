use thiserror::Error;

/// Top-level error type for the pliant workspace.
#[derive(Debug, Error)]
pub enum PliantError {
    #[error("Goal error: {0}")]
    Goal(#[from] GoalError),

    #[error("QP error: {0}")]
    Qp(#[from] QpError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Goal validation and authoring errors.
///
/// Surfaced to the goal's requester; the control tick itself continues.
#[derive(Debug, Error)]
pub enum GoalError {
    #[error("Unknown constraint type: {0}")]
    UnknownConstraintType(String),

    #[error("{goal} requires a {expected} joint, but {joint} is {actual}")]
    WrongJointType {
        goal: String,
        joint: String,
        expected: String,
        actual: String,
    },

    #[error("Malformed parameters for {identity}: {message}")]
    MalformedParameters { identity: String, message: String },

    #[error("A constraint named '{0}' already exists")]
    NamingConflict(String),
}

/// Solve-stage failures, each distinct from "goal satisfied".
#[derive(Debug, Error)]
pub enum QpError {
    #[error("QP is infeasible")]
    Infeasible,

    #[error("QP solver did not converge")]
    NotConverged,

    #[error("QP solver exceeded its iteration budget of {0}")]
    IterationBudgetExceeded(u32),

    #[error("Problem dimensions changed: expected {expected_vars}x{expected_rows}, got {got_vars}x{got_rows}; a fresh solver is required")]
    StructuralMismatch {
        expected_vars: usize,
        expected_rows: usize,
        got_vars: usize,
        got_rows: usize,
    },

    #[error("NaN in solver inputs persisted after sanitization retry")]
    NanAfterRetry,

    #[error("QP has no rows to solve")]
    EmptyProblem,
}

/// Kinematic model lookup errors.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Unknown joint: {0}")]
    UnknownJoint(String),

    #[error("Unknown link: {0}")]
    UnknownLink(String),

    #[error("No kinematic path from {root} to {tip}")]
    NoKinematicPath { root: String, tip: String },

    #[error("No position provided for joint: {0}")]
    MissingJointState(String),

    #[error("Link {0} has no actuated ancestor joint")]
    NoControllingJoint(String),
}

/// Context/state-store errors.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Symbol '{0}' has no bound value")]
    UnboundSymbol(String),

    #[error("No numeric parameter at {identity}/{path}")]
    UnknownParameter { identity: String, path: String },

    #[error("Malformed parameter update at '{path}': {message}")]
    MalformedUpdate { path: String, message: String },
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid sample_period: {0} (must be > 0)")]
    InvalidSamplePeriod(f64),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Weight curve '{curve}' is invalid: {message}")]
    InvalidWeightCurve { curve: String, message: String },
}
