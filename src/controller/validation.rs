//! Deferred validation of NodeHealthCheck specs.
//!
//! The admission webhook rejects what it can at write time; everything that
//! cannot be expressed there (negative integer minHealthy, template xor
//! escalation arity, malformed durations) is validated here during
//! reconcile and surfaces as phase Disabled with reason
//! DisabledInvalidConfig.

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::controller::error::{Error, Result};
use crate::controller::selector;
use crate::crd::NodeHealthCheck;

/// Validate the NHC spec. Returns `Error::InvalidConfig` describing the
/// first problem found.
pub fn validate_spec(nhc: &NodeHealthCheck) -> Result<()> {
    validate_min_healthy(&nhc.spec.min_healthy)?;

    if let Err(e) = selector::validate(&nhc.spec.selector) {
        return Err(Error::InvalidConfig(format!("invalid selector: {}", e)));
    }

    for condition in &nhc.spec.unhealthy_conditions {
        if condition.duration().is_none() {
            return Err(Error::InvalidConfig(format!(
                "unhealthy condition {}={} has malformed duration {:?}",
                condition.r#type, condition.status, condition.duration
            )));
        }
    }

    match (
        nhc.spec.remediation_template.as_ref(),
        nhc.spec.escalating_remediations.as_ref(),
    ) {
        (Some(_), Some(_)) => Err(Error::InvalidConfig(
            "remediationTemplate and escalatingRemediations are mutually exclusive".to_string(),
        )),
        (None, None) => Err(Error::InvalidConfig(
            "one of remediationTemplate or escalatingRemediations must be set".to_string(),
        )),
        (Some(_), None) => Ok(()),
        (None, Some(_)) => validate_escalations(nhc),
    }
}

fn validate_escalations(nhc: &NodeHealthCheck) -> Result<()> {
    let steps = nhc.escalations_sorted();
    if steps.is_empty() {
        return Err(Error::InvalidConfig(
            "escalatingRemediations must not be empty".to_string(),
        ));
    }
    for pair in steps.windows(2) {
        if pair[0].order == pair[1].order {
            return Err(Error::InvalidConfig(format!(
                "escalatingRemediations order {} is not unique",
                pair[0].order
            )));
        }
    }
    for step in &steps {
        if step.timeout().is_none() {
            return Err(Error::InvalidConfig(format!(
                "escalation step order {} has malformed timeout {:?}",
                step.order, step.timeout
            )));
        }
    }
    Ok(())
}

/// Full minHealthy validation, used at reconcile time. A negative integer
/// disables the NHC here rather than at admission.
pub fn validate_min_healthy(min_healthy: &IntOrString) -> Result<()> {
    match min_healthy {
        IntOrString::Int(i) if *i < 0 => Err(Error::InvalidConfig(format!(
            "MinHealthy is negative: {}",
            i
        ))),
        IntOrString::Int(_) => Ok(()),
        IntOrString::String(s) => {
            parse_percentage(s).map(|_| ()).map_err(Error::InvalidConfig)
        }
    }
}

/// The subset of minHealthy validation enforced at admission: percentage
/// strings must parse and stay within [0%,100%]. Integer values pass
/// untouched; negative ones are caught by `validate_min_healthy` during
/// reconcile, which disables the NHC instead of blocking the write.
pub fn validate_min_healthy_percentage(min_healthy: &IntOrString) -> Result<()> {
    match min_healthy {
        IntOrString::Int(_) => Ok(()),
        IntOrString::String(s) => {
            parse_percentage(s).map(|_| ()).map_err(Error::InvalidConfig)
        }
    }
}

/// Resolve minHealthy against the number of observed nodes. Percentages
/// round up so the floor is never undershot.
pub fn resolve_min_healthy(min_healthy: &IntOrString, observed: usize) -> Result<usize> {
    match min_healthy {
        IntOrString::Int(i) if *i < 0 => Err(Error::InvalidConfig(format!(
            "MinHealthy is negative: {}",
            i
        ))),
        IntOrString::Int(i) => Ok(*i as usize),
        IntOrString::String(s) => {
            let percent = parse_percentage(s).map_err(Error::InvalidConfig)?;
            Ok((observed * percent).div_ceil(100))
        }
    }
}

fn parse_percentage(s: &str) -> std::result::Result<usize, String> {
    let Some(number) = s.strip_suffix('%') else {
        return Err(format!("MinHealthy {:?} is not a percentage", s));
    };
    let percent: usize = number
        .trim()
        .parse()
        .map_err(|_| format!("MinHealthy {:?} is not a valid percentage", s))?;
    if percent > 100 {
        return Err(format!("MinHealthy percentage {} is above 100%", percent));
    }
    Ok(percent)
}
