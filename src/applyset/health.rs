//! Health derived from `.status.conditions`

use kube::api::DynamicObject;
use serde_json::Value;

/// An object is unhealthy when any status condition is `"False"`. Objects
/// without conditions are considered healthy.
pub fn is_healthy(object: &DynamicObject) -> bool {
    let Some(conditions) = object
        .data
        .pointer("/status/conditions")
        .and_then(Value::as_array)
    else {
        return true;
    };

    let mut healthy = true;
    for condition in conditions {
        let kind = condition.get("type").and_then(Value::as_str).unwrap_or_default();
        match condition.get("status").and_then(Value::as_str) {
            Some("True") => {}
            Some("False") => {
                tracing::debug!(
                    name = object.metadata.name.as_deref().unwrap_or_default(),
                    condition = kind,
                    "condition is False"
                );
                healthy = false;
            }
            other => {
                tracing::warn!(
                    name = object.metadata.name.as_deref().unwrap_or_default(),
                    condition = kind,
                    status = ?other,
                    "unexpected condition status"
                );
            }
        }
    }
    healthy
}
