//! Assertion validity window.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::error::{ValidationError, ValidationResult};
use crate::model::Conditions;

const MAX_SKEW_SECS: u64 = (i64::MAX / 1000) as u64;

/// Check `conditions` against `now` with `skew_secs` of tolerance on both
/// edges. Missing conditions pass.
pub fn validate_validity_period(
    conditions: Option<&Conditions>,
    now: DateTime<Utc>,
    skew_secs: u64,
) -> ValidationResult<()> {
    let Some(conditions) = conditions else {
        debug!("Assertion has no Conditions, skipping validity period check");
        return Ok(());
    };

    let skew = Duration::seconds(skew_secs.min(MAX_SKEW_SECS) as i64);

    if let Some(not_before) = conditions.not_before {
        // Overflow means the edge lies beyond any representable instant.
        if not_before.checked_sub_signed(skew).is_some_and(|t| t > now) {
            debug!(not_before = %not_before, now = %now, "Assertion not yet valid");
            return Err(ValidationError::AssertionNotYetValid);
        }
    }

    if let Some(not_on_or_after) = conditions.not_on_or_after {
        if not_on_or_after
            .checked_add_signed(skew)
            .is_some_and(|t| t < now)
        {
            debug!(not_on_or_after = %not_on_or_after, now = %now, "Assertion expired");
            return Err(ValidationError::AssertionExpired);
        }
    }

    if let (Some(not_before), Some(not_on_or_after)) =
        (conditions.not_before, conditions.not_on_or_after)
    {
        if not_before > not_on_or_after {
            return Err(ValidationError::MalformedValidityWindow);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn window(not_before: Option<i64>, not_on_or_after: Option<i64>) -> Conditions {
        Conditions {
            not_before: not_before.map(at),
            not_on_or_after: not_on_or_after.map(at),
            audience_restrictions: vec![],
        }
    }

    #[test]
    fn test_no_conditions_passes() {
        assert!(validate_validity_period(None, at(0), 0).is_ok());
        assert!(validate_validity_period(Some(&window(None, None)), at(0), 0).is_ok());
    }

    #[test]
    fn test_inside_window() {
        let c = window(Some(-60), Some(60));
        assert!(validate_validity_period(Some(&c), at(0), 0).is_ok());
    }

    #[test]
    fn test_edges_are_inclusive() {
        let c = window(Some(0), Some(100));
        assert!(validate_validity_period(Some(&c), at(0), 0).is_ok());
        assert!(validate_validity_period(Some(&c), at(100), 0).is_ok());
    }

    #[test]
    fn test_not_yet_valid() {
        let c = window(Some(100), Some(200));
        assert_eq!(
            validate_validity_period(Some(&c), at(0), 30),
            Err(ValidationError::AssertionNotYetValid)
        );
        // within skew
        assert!(validate_validity_period(Some(&c), at(80), 30).is_ok());
    }

    #[test]
    fn test_expired() {
        let c = window(Some(-200), Some(-100));
        assert_eq!(
            validate_validity_period(Some(&c), at(0), 30),
            Err(ValidationError::AssertionExpired)
        );
        assert!(validate_validity_period(Some(&c), at(-80), 30).is_ok());
    }

    #[test]
    fn test_inverted_window() {
        let c = window(Some(10), Some(-10));
        assert_eq!(
            validate_validity_period(Some(&c), at(0), 20),
            Err(ValidationError::MalformedValidityWindow)
        );
    }

    #[test]
    fn test_huge_skew_does_not_panic() {
        let c = window(Some(0), Some(10));
        assert!(validate_validity_period(Some(&c), at(5), u64::MAX).is_ok());
    }

    proptest! {
        #[test]
        fn test_window_property(
            start in -10_000i64..10_000,
            len in 0i64..10_000,
            skew in 0u64..600,
            offset in -20_000i64..20_000,
        ) {
            let c = window(Some(start), Some(start + len));
            let skew_i = skew as i64;
            let result = validate_validity_period(Some(&c), at(offset), skew);

            if offset < start - skew_i {
                prop_assert_eq!(result, Err(ValidationError::AssertionNotYetValid));
            } else if offset > start + len + skew_i {
                prop_assert_eq!(result, Err(ValidationError::AssertionExpired));
            } else {
                prop_assert!(result.is_ok());
            }
        }
    }
}
