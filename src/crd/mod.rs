//! Custom Resource Definitions for node-healthcheck-operator.
//!
//! - `NodeHealthCheck`: declarative node health policy and remediation
//!   escalation, reconciled by this operator.

mod node_health_check;

pub use node_health_check::*;
