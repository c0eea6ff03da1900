use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::weights::{WEIGHTS, WEIGHT_MAX, WEIGHT_MIN};

// ---------------------------------------------------------------------------
// Serde default functions
// ---------------------------------------------------------------------------

const fn default_sample_period() -> f64 {
    0.05
}
const fn default_max_iterations() -> u32 {
    200
}
const fn default_zero_weight_epsilon() -> f64 {
    1e-10
}
const fn default_repel_velocity() -> f64 {
    0.1
}
const fn default_collision_max_acceleration() -> f64 {
    0.005
}
const fn default_zero_weight_distance() -> f64 {
    0.05
}
const fn default_max_contacts_per_key() -> usize {
    20
}

// ---------------------------------------------------------------------------
// ControlConfig
// ---------------------------------------------------------------------------

/// Main controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Control period in seconds (default: 0.05 = 20 Hz).
    #[serde(default = "default_sample_period")]
    pub sample_period: f64,

    /// Iteration budget for one QP solve.
    #[serde(default = "default_max_iterations")]
    pub max_solver_iterations: u32,

    /// Weights at or below this are treated as structurally zero and their
    /// rows/columns filtered before the solve.
    #[serde(default = "default_zero_weight_epsilon")]
    pub zero_weight_epsilon: f64,

    #[serde(default)]
    pub collision: CollisionConfig,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            sample_period: default_sample_period(),
            max_solver_iterations: default_max_iterations(),
            zero_weight_epsilon: default_zero_weight_epsilon(),
            collision: CollisionConfig::default(),
        }
    }
}

impl ControlConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// Validate configuration. Returns Err on invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_period <= 0.0 {
            return Err(ConfigError::InvalidSamplePeriod(self.sample_period));
        }
        if self.max_solver_iterations == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_solver_iterations".into(),
                message: "must be > 0".into(),
            });
        }
        if self.zero_weight_epsilon < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "zero_weight_epsilon".into(),
                message: "must be >= 0".into(),
            });
        }
        self.collision.validate()
    }
}

// ---------------------------------------------------------------------------
// CollisionConfig
// ---------------------------------------------------------------------------

/// Collision-avoidance tuning.
///
/// External and self avoidance carry separate weight curves; the original
/// tuning used different low/mid breakpoints per path and the distinction is
/// kept configurable rather than unified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollisionConfig {
    /// Repelling velocity bound in m/s.
    #[serde(default = "default_repel_velocity")]
    pub repel_velocity: f64,

    /// Acceleration bound on external-contact repulsion in m/s^2.
    #[serde(default = "default_collision_max_acceleration")]
    pub max_acceleration: f64,

    /// Distance at which avoidance stops pushing, in meters.
    #[serde(default = "default_zero_weight_distance")]
    pub zero_weight_distance: f64,

    /// Ledger capacity per controlling joint or link pair.
    #[serde(default = "default_max_contacts_per_key")]
    pub max_contacts_per_key: usize,

    /// Distance-to-weight curve for external contacts.
    #[serde(default = "WeightCurve::external_default")]
    pub external_curve: WeightCurve,

    /// Distance-to-weight curve for self contacts.
    #[serde(default = "WeightCurve::self_default")]
    pub self_curve: WeightCurve,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            repel_velocity: default_repel_velocity(),
            max_acceleration: default_collision_max_acceleration(),
            zero_weight_distance: default_zero_weight_distance(),
            max_contacts_per_key: default_max_contacts_per_key(),
            external_curve: WeightCurve::external_default(),
            self_curve: WeightCurve::self_default(),
        }
    }
}

impl CollisionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repel_velocity <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "collision.repel_velocity".into(),
                message: "must be > 0".into(),
            });
        }
        if self.max_acceleration <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "collision.max_acceleration".into(),
                message: "must be > 0".into(),
            });
        }
        if self.max_contacts_per_key == 0 {
            return Err(ConfigError::InvalidValue {
                field: "collision.max_contacts_per_key".into(),
                message: "must be > 0".into(),
            });
        }
        self.external_curve.validate("collision.external_curve")?;
        self.self_curve.validate("collision.self_curve")
    }
}

// ---------------------------------------------------------------------------
// WeightCurve
// ---------------------------------------------------------------------------

/// Control points of the piecewise distance-to-weight curve.
///
/// Points are ordered by ascending x and descending weight: flat at `p1_y`
/// left of `p1_x`, two matched power laws through the saddle, flat at
/// `min_y` right of `min_x`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightCurve {
    pub p1_x: f64,
    pub p1_y: f64,
    pub p2_x: f64,
    pub p2_y: f64,
    pub saddle_x: f64,
    pub saddle_y: f64,
    pub min_x: f64,
    pub min_y: f64,
}

impl WeightCurve {
    pub fn external_default() -> Self {
        Self {
            p1_x: 0.0,
            p1_y: WEIGHT_MAX,
            p2_x: 0.01,
            p2_y: WEIGHTS[4],
            saddle_x: 0.05,
            saddle_y: WEIGHTS[2],
            min_x: 0.06,
            min_y: WEIGHT_MIN,
        }
    }

    pub fn self_default() -> Self {
        Self {
            p1_x: 0.0,
            p1_y: WEIGHT_MAX,
            p2_x: 0.01,
            p2_y: WEIGHTS[4],
            saddle_x: 0.05,
            saddle_y: WEIGHTS[2],
            min_x: 0.06,
            min_y: WEIGHT_MIN,
        }
    }

    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let xs = [self.p1_x, self.p2_x, self.saddle_x, self.min_x];
        if xs.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::InvalidWeightCurve {
                curve: name.into(),
                message: "x breakpoints must be strictly ascending".into(),
            });
        }
        let ys = [self.p1_y, self.p2_y, self.saddle_y, self.min_y];
        if ys.windows(2).any(|w| w[0] <= w[1]) {
            return Err(ConfigError::InvalidWeightCurve {
                curve: name.into(),
                message: "weights must be strictly descending".into(),
            });
        }
        Ok(())
    }
}
