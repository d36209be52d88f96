//! Label selector evaluation for node matching.
//!
//! The NHC selector is a standard LabelSelector (matchLabels plus
//! matchExpressions). Listing goes through the API server with the string
//! form; the watch mapper re-evaluates selectors client-side against node
//! labels.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

/// Check the selector is well-formed: known operators, and value lists that
/// agree with the operator's arity.
pub fn validate(selector: &LabelSelector) -> Result<(), String> {
    for expr in selector.match_expressions.iter().flatten() {
        let values = expr.values.as_deref().unwrap_or_default();
        match expr.operator.as_str() {
            "In" | "NotIn" => {
                if values.is_empty() {
                    return Err(format!(
                        "operator {} on key {} requires at least one value",
                        expr.operator, expr.key
                    ));
                }
            }
            "Exists" | "DoesNotExist" => {
                if !values.is_empty() {
                    return Err(format!(
                        "operator {} on key {} must not carry values",
                        expr.operator, expr.key
                    ));
                }
            }
            other => return Err(format!("unknown selector operator: {}", other)),
        }
    }
    Ok(())
}

/// Whether the selector matches a node's labels. An empty selector matches
/// every node.
pub fn matches(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> bool {
    for (key, value) in selector.match_labels.iter().flatten() {
        if labels.get(key) != Some(value) {
            return false;
        }
    }
    for expr in selector.match_expressions.iter().flatten() {
        let values = expr.values.as_deref().unwrap_or_default();
        let current = labels.get(&expr.key);
        let ok = match expr.operator.as_str() {
            "In" => current.is_some_and(|v| values.contains(v)),
            "NotIn" => !current.is_some_and(|v| values.contains(v)),
            "Exists" => current.is_some(),
            "DoesNotExist" => current.is_none(),
            _ => false,
        };
        if !ok {
            return false;
        }
    }
    true
}

/// String form accepted by the API server's labelSelector parameter.
/// None for the empty selector (list everything).
pub fn to_selector_string(selector: &LabelSelector) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    for (key, value) in selector.match_labels.iter().flatten() {
        parts.push(format!("{}={}", key, value));
    }
    for expr in selector.match_expressions.iter().flatten() {
        let values = expr.values.as_deref().unwrap_or_default().join(",");
        match expr.operator.as_str() {
            "In" => parts.push(format!("{} in ({})", expr.key, values)),
            "NotIn" => parts.push(format!("{} notin ({})", expr.key, values)),
            "Exists" => parts.push(expr.key.clone()),
            "DoesNotExist" => parts.push(format!("!{}", expr.key)),
            _ => {}
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(","))
    }
}
