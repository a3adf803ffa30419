//! Property tests for range wrapping and random-walk proposals.

use mcmcp::services::{clamp_wrap, ProposalCovariance, ProposalGenerator};
use proptest::prelude::*;

proptest! {
    /// Property: wrapped values always land in the range
    #[test]
    fn prop_wrapped_values_are_in_range(
        values in prop::collection::vec(-1.0e4f64..1.0e4, 1..10),
        min in -100.0f64..0.0,
        width in 0.5f64..100.0,
    ) {
        let max = min + width;
        for v in clamp_wrap(&values, min, max) {
            prop_assert!(v >= min && v <= max, "{v} outside [{min}, {max}]");
        }
    }

    /// Property: values already in range are untouched
    #[test]
    fn prop_in_range_values_are_unchanged(values in prop::collection::vec(-30.0f64..=30.0, 1..10)) {
        prop_assert_eq!(clamp_wrap(&values, -30.0, 30.0), values);
    }

    /// Property: proposals stay inside every dimension's range
    #[test]
    fn prop_proposals_stay_in_range(
        state in prop::collection::vec(-5.0f64..5.0, 3),
        variance in 0.1f64..400.0,
    ) {
        let ranges = vec![(-5.0, 5.0), (-5.0, 5.0), (-5.0, 5.0)];
        let covariance = ProposalCovariance::diagonal(&[variance; 3]).unwrap();
        let generator = ProposalGenerator::new(ranges.clone(), covariance).unwrap();
        let proposal = generator.propose(&state).unwrap();
        for (value, (min, max)) in proposal.iter().zip(&ranges) {
            prop_assert!(value >= min && value <= max);
        }
    }
}

#[test]
fn test_wrap_examples() {
    assert_eq!(clamp_wrap(&[35.0], -30.0, 30.0), vec![-25.0]);
    assert_eq!(clamp_wrap(&[-35.0], -30.0, 30.0), vec![25.0]);
    assert_eq!(clamp_wrap(&[0.0, 30.0, -30.0], -30.0, 30.0), vec![0.0, 30.0, -30.0]);
}
