//! Guards against disruptive changes while remediation is running.
//!
//! A selector change mid-remediation can strand remediation CRs for nodes
//! the NHC no longer selects, and deleting the NHC would abandon them
//! entirely. Both are refused until the in-flight set drains.

use crate::crd::NodeHealthCheck;
use crate::webhooks::policies::{ValidationContext, ValidationResult};

/// Denial message fragment shared by both guards.
const ONGOING_REMEDIATION: &str = "prohibited due to running remediation";

/// Validate an UPDATE: the selector is frozen while remediating.
pub fn validate_update(ctx: &ValidationContext<'_>) -> ValidationResult {
    let Some(old) = ctx.old_resource else {
        return ValidationResult::allowed();
    };
    if old.is_remediating() && ctx.resource.spec.selector != old.spec.selector {
        return ValidationResult::denied(
            "OngoingRemediation",
            &format!("selector update {}", ONGOING_REMEDIATION),
        );
    }
    ValidationResult::allowed()
}

/// Validate a DELETE: refused while remediating.
pub fn validate_delete(nhc: &NodeHealthCheck) -> ValidationResult {
    if nhc.is_remediating() {
        return ValidationResult::denied(
            "OngoingRemediation",
            &format!("deletion {}", ONGOING_REMEDIATION),
        );
    }
    ValidationResult::allowed()
}
