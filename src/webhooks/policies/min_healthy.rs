//! minHealthy and selector validation policy.
//!
//! Rejects percentages outside [0%,100%] and malformed selectors at
//! admission. Negative *integer* minHealthy values are deliberately let
//! through: the reconciler catches them and disables the NHC with
//! DisabledInvalidConfig, so a bad write degrades the check instead of
//! being lost at the API server. The reconciler also re-validates the
//! percentage path because the webhook is optional (it only runs when
//! certificates are mounted).

use crate::controller::{selector, validation};
use crate::webhooks::policies::{ValidationContext, ValidationResult};

/// Validate the minHealthy percentage bounds and selector syntax.
pub fn validate(ctx: &ValidationContext<'_>) -> ValidationResult {
    if let Err(e) = validation::validate_min_healthy_percentage(&ctx.resource.spec.min_healthy) {
        return ValidationResult::denied("InvalidMinHealthy", &e.to_string());
    }
    if let Err(e) = selector::validate(&ctx.resource.spec.selector) {
        return ValidationResult::denied("InvalidSelector", &format!("Invalid selector: {}", e));
    }
    ValidationResult::allowed()
}
