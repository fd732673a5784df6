//! Status conditions shared by all NSX CRDs

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type reported by every reconciled CR
pub const CONDITION_READY: &str = "Ready";

/// Condition of a custom resource
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type, e.g. `Ready`
    #[serde(rename = "type")]
    pub type_: String,

    /// `True`, `False` or `Unknown`
    pub status: String,

    /// Short machine readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// `Ready=True`
    pub fn ready() -> Self {
        Self {
            type_: CONDITION_READY.to_string(),
            status: "True".to_string(),
            reason: None,
            message: None,
            last_transition_time: Some(Utc::now()),
        }
    }

    /// `Ready=False` with a reason and message
    pub fn not_ready(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_: CONDITION_READY.to_string(),
            status: "False".to_string(),
            reason: Some(reason.into()),
            message: Some(message.into()),
            last_transition_time: Some(Utc::now()),
        }
    }

    /// Same type, status, reason and message (transition time ignored)
    pub fn same_state(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Insert or replace the condition of the same type.
/// Returns false when an identical condition is already present, so callers
/// can skip the status patch.
pub fn merge_condition(conditions: &mut Vec<Condition>, condition: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) if existing.same_state(&condition) => false,
        Some(existing) => {
            *existing = condition;
            true
        }
        None => {
            conditions.push(condition);
            true
        }
    }
}

/// Whether the `Ready` condition is `True`
pub fn is_ready(conditions: &[Condition]) -> bool {
    conditions
        .iter()
        .any(|c| c.type_ == CONDITION_READY && c.status == "True")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_condition_inserts_and_replaces() {
        let mut conditions = Vec::new();
        assert!(merge_condition(&mut conditions, Condition::not_ready("SubnetSetInUse", "in use")));
        assert_eq!(conditions.len(), 1);
        assert!(!is_ready(&conditions));

        assert!(merge_condition(&mut conditions, Condition::ready()));
        assert_eq!(conditions.len(), 1, "Ready should be replaced, not appended");
        assert!(is_ready(&conditions));
    }

    #[test]
    fn test_merge_identical_condition_is_noop() {
        let mut conditions = vec![Condition::not_ready("GatewayConnectionNotSet", "no gateway")];
        let changed = merge_condition(
            &mut conditions,
            Condition::not_ready("GatewayConnectionNotSet", "no gateway"),
        );
        assert!(!changed);
    }

    #[test]
    fn test_condition_serializes_type_field() {
        let value = serde_json::to_value(Condition::ready()).expect("serializable");
        assert_eq!(value["type"], "Ready");
        assert_eq!(value["status"], "True");
        assert!(value.get("reason").is_none());
    }
}
