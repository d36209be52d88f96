//! Validation policies for NodeHealthCheck admission webhooks.
//!
//! Policies are organized into tiers:
//! - Tier 1 (Critical): Always enforced (minHealthy bounds, selector syntax)
//! - Tier 2 (Update): Only enforced on UPDATE operations (selector freeze
//!   while remediating)
//!
//! Deletion is guarded separately in `remediation_guard`.

pub mod min_healthy;
pub mod remediation_guard;

use crate::crd::NodeHealthCheck;

/// Result of a validation check
#[derive(Debug)]
pub struct ValidationResult {
    /// Whether the validation passed
    pub allowed: bool,
    /// Reason for denial (if not allowed)
    pub reason: Option<String>,
    /// Detailed message (if not allowed)
    pub message: Option<String>,
}

impl ValidationResult {
    /// Create an allowed result
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            message: None,
        }
    }

    /// Create a denied result
    pub fn denied(reason: &str, message: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
        }
    }
}

/// Context for validation
pub struct ValidationContext<'a> {
    /// The resource being validated
    pub resource: &'a NodeHealthCheck,
    /// The old resource (for UPDATE operations)
    pub old_resource: Option<&'a NodeHealthCheck>,
    /// Whether this is a dry-run request
    pub dry_run: bool,
}

impl<'a> ValidationContext<'a> {
    /// Check if this is an UPDATE operation
    pub fn is_update(&self) -> bool {
        self.old_resource.is_some()
    }
}

/// Run all validation policies
pub fn validate_all(ctx: &ValidationContext<'_>) -> ValidationResult {
    // Tier 1: Critical validations (always enforced)
    let result = min_healthy::validate(ctx);
    if !result.allowed {
        return result;
    }

    // Tier 2: Update validations (only for UPDATE operations)
    if ctx.is_update() {
        let result = remediation_guard::validate_update(ctx);
        if !result.allowed {
            return result;
        }
    }

    ValidationResult::allowed()
}
