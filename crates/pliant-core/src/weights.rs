//! The priority-weight ladder.
//!
//! A geometric sequence (powers of six, plus a true zero) so that adjacent
//! levels dominate each other reliably in the weighted least-squares sense.
//! Every builder picks from this ladder; collision avoidance sits strictly
//! between the extremes so goals and joint limits can be tuned to either side
//! of it without touching avoidance code.

/// `[0] ++ [6^k for k in 0..=6]`.
pub const WEIGHTS: [f64; 8] = [
    0.0, 1.0, 6.0, 36.0, 216.0, 1296.0, 7776.0, 46656.0,
];

pub const WEIGHT_MIN: f64 = WEIGHTS[0];
pub const WEIGHT_BELOW_CA: f64 = WEIGHTS[1];
pub const WEIGHT_COLLISION_AVOIDANCE: f64 = WEIGHTS[3];
pub const WEIGHT_ABOVE_CA: f64 = WEIGHTS[3];
pub const WEIGHT_MAX: f64 = WEIGHTS[7];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_is_powers_of_six() {
        assert_eq!(WEIGHTS[0], 0.0);
        for k in 0..7 {
            assert_eq!(WEIGHTS[k + 1], 6f64.powi(k as i32));
        }
    }

    #[test]
    fn ladder_is_strictly_increasing() {
        for pair in WEIGHTS.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn collision_avoidance_sits_strictly_inside() {
        assert!(WEIGHT_MIN < WEIGHT_COLLISION_AVOIDANCE);
        assert!(WEIGHT_COLLISION_AVOIDANCE < WEIGHT_MAX);
        assert!(WEIGHT_BELOW_CA < WEIGHT_COLLISION_AVOIDANCE);
    }
}
