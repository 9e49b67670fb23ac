//! Audience restriction check.

use tracing::debug;

use crate::error::{ValidationError, ValidationResult};
use crate::model::Conditions;

/// Pass iff `sp_id` appears in any audience restriction.
///
/// An assertion without Conditions, or whose Conditions declare no
/// restriction, fails with [`ValidationError::NoAudienceRestriction`].
pub fn validate_audience(conditions: Option<&Conditions>, sp_id: &str) -> ValidationResult<()> {
    let restrictions = match conditions {
        Some(c) if !c.audience_restrictions.is_empty() => &c.audience_restrictions,
        _ => {
            debug!("Assertion declares no audience restriction");
            return Err(ValidationError::NoAudienceRestriction);
        }
    };

    let matched = !sp_id.is_empty()
        && restrictions
            .iter()
            .any(|r| r.audiences.iter().any(|a| a == sp_id));

    if matched {
        Ok(())
    } else {
        debug!(
            sp_id = %sp_id,
            audiences = ?restrictions.iter().flat_map(|r| &r.audiences).collect::<Vec<_>>(),
            "Service provider not in audience restrictions"
        );
        Err(ValidationError::AudienceMismatch)
    }
}
