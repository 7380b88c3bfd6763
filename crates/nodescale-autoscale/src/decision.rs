//! Scaling decisions.
//!
//! Pure arithmetic, no I/O. The target-tracking step and the bounds policy
//! are kept apart so that the former stays exactly `ceil(current * metric /
//! target)`.

use nodescale_state::MetricSemantics;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("target value must be a positive number, got {0}")]
pub struct InvalidTargetError(pub f64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("min_replicas {min} exceeds max_replicas {max}")]
pub struct InvalidBoundsError {
    pub min: u32,
    pub max: u32,
}

/// Size that brings `metric` back to `target` given `current` replicas.
///
/// `metric` is the raw sample; `semantics` converts it to the target's unit
/// first. A group at zero stays at zero; scaling up from zero is the bounds
/// policy's job.
pub fn compute_desired(
    current: u32,
    metric: f64,
    target: f64,
    semantics: MetricSemantics,
) -> Result<u32, InvalidTargetError> {
    // Written as a negated comparison so NaN is rejected too.
    if !(target > 0.0) {
        return Err(InvalidTargetError(target));
    }
    let raw = (f64::from(current) * semantics.normalize(metric) / target).ceil();
    if raw.is_nan() || raw <= 0.0 {
        return Ok(0);
    }
    // Float-to-int casts saturate at u32::MAX.
    Ok(raw as u32)
}

/// Optional floor and ceiling applied after [`compute_desired`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplicaBounds {
    min: Option<u32>,
    max: Option<u32>,
}

impl ReplicaBounds {
    pub fn new(min: Option<u32>, max: Option<u32>) -> Result<Self, InvalidBoundsError> {
        if let (Some(min), Some(max)) = (min, max)
            && min > max
        {
            return Err(InvalidBoundsError { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn apply(&self, desired: u32) -> u32 {
        let floored = self.min.map_or(desired, |min| desired.max(min));
        self.max.map_or(floored, |max| floored.min(max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MetricSemantics::{AverageUtilization, AverageValue, Value};

    #[test]
    fn utilization_scenario() {
        // 0.85 utilization against a 60% target on five nodes.
        assert_eq!(compute_desired(5, 0.85, 60.0, AverageUtilization), Ok(8));
    }

    #[test]
    fn average_value_scenario() {
        assert_eq!(compute_desired(1, 41.0, 4.0, AverageValue), Ok(11));
    }

    #[test]
    fn utilization_is_compared_in_percent() {
        // Without the conversion 0.6 against 60 would collapse to one node.
        assert_eq!(compute_desired(4, 0.6, 60.0, AverageUtilization), Ok(4));
        assert_eq!(compute_desired(4, 0.6, 60.0, Value), Ok(1));
    }

    #[test]
    fn exact_ratio_does_not_round_up() {
        assert_eq!(compute_desired(4, 50.0, 50.0, Value), Ok(4));
        assert_eq!(compute_desired(3, 20.0, 60.0, Value), Ok(1));
    }

    #[test]
    fn zero_current_stays_zero() {
        assert_eq!(compute_desired(0, 1000.0, 1.0, Value), Ok(0));
    }

    #[test]
    fn zero_metric_scales_to_zero() {
        assert_eq!(compute_desired(7, 0.0, 10.0, AverageUtilization), Ok(0));
    }

    #[test]
    fn negative_metric_clamps_at_zero() {
        assert_eq!(compute_desired(3, -5.0, 1.0, Value), Ok(0));
    }

    #[test]
    fn non_positive_targets_are_rejected() {
        for target in [0.0, -1.0, f64::NAN, f64::NEG_INFINITY] {
            assert!(compute_desired(3, 10.0, target, Value).is_err(), "target {target}");
        }
    }

    #[test]
    fn huge_ratios_saturate() {
        assert_eq!(compute_desired(u32::MAX, 1e12, 1e-12, Value), Ok(u32::MAX));
    }

    #[test]
    fn bounds_clamp_both_ways() {
        let bounds = ReplicaBounds::new(Some(2), Some(10)).unwrap();
        assert_eq!(bounds.apply(0), 2);
        assert_eq!(bounds.apply(5), 5);
        assert_eq!(bounds.apply(40), 10);
    }

    #[test]
    fn unset_bounds_pass_through() {
        let bounds = ReplicaBounds::default();
        assert_eq!(bounds.apply(0), 0);
        assert_eq!(bounds.apply(123), 123);
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        assert_eq!(
            ReplicaBounds::new(Some(5), Some(3)),
            Err(InvalidBoundsError { min: 5, max: 3 })
        );
        assert!(ReplicaBounds::new(Some(3), Some(3)).is_ok());
    }
}
