// Update event model
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Well-known object type names emitted by the backend.
pub mod object_types {
    pub const CASE: &str = "case";
    pub const CASE_TASK: &str = "case_task";
    pub const CASE_TASK_LOG: &str = "case_task_log";
    pub const CASE_ARTIFACT: &str = "case_artifact";
    pub const CASE_ARTIFACT_JOB: &str = "case_artifact_job";
    pub const ALERT: &str = "alert";
    pub const ACTION: &str = "action";
    pub const USER: &str = "user";
    pub const DASHBOARD: &str = "dashboard";
}

/// Kind of change carried by an event. Informational only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operation {
    Creation,
    Update,
    Delete,
    Unknown(String),
}

impl From<String> for Operation {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "creation" | "create" => Operation::Creation,
            "update" => Operation::Update,
            "delete" | "deletion" => Operation::Delete,
            _ => Operation::Unknown(value),
        }
    }
}

impl From<Operation> for String {
    fn from(value: Operation) -> Self {
        match value {
            Operation::Creation => "Creation".to_string(),
            Operation::Update => "Update".to_string(),
            Operation::Delete => "Delete".to_string(),
            Operation::Unknown(s) => s,
        }
    }
}

impl Default for Operation {
    fn default() -> Self {
        Operation::Unknown(String::new())
    }
}

/// Routing part of an update event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBase {
    /// Top-level aggregate id. Empty when the change has no specific root.
    #[serde(default)]
    pub root_id: String,
    pub object_type: String,
    #[serde(default)]
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Epoch milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// One unit of change notification received from the stream.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UpdateEvent {
    pub base: EventBase,
    /// Object type -> per-type counters. Only the keys are interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<BTreeMap<String, serde_json::Value>>,
}

impl UpdateEvent {
    /// Minimal event with a root id and primary object type.
    pub fn new(root_id: impl Into<String>, object_type: impl Into<String>) -> Self {
        Self {
            base: EventBase {
                root_id: root_id.into(),
                object_type: object_type.into(),
                ..Default::default()
            },
            summary: None,
        }
    }

    /// Builder: set the operation.
    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.base.operation = operation;
        self
    }

    /// Builder: set the event id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.base.id = Some(id.into());
        self
    }

    /// Builder: record a counter for `object_type` in the summary.
    pub fn with_summary(mut self, object_type: impl Into<String>, count: u64) -> Self {
        self.summary
            .get_or_insert_with(BTreeMap::new)
            .insert(object_type.into(), serde_json::Value::from(count));
        self
    }

    pub fn root_id(&self) -> &str {
        &self.base.root_id
    }

    pub fn object_type(&self) -> &str {
        &self.base.object_type
    }

    /// Types referenced by the summary other than the primary one, ascending.
    pub fn secondary_object_types(&self) -> impl Iterator<Item = &str> {
        let primary = self.object_type();
        self.summary
            .iter()
            .flat_map(|s| s.keys())
            .map(String::as_str)
            .filter(move |t| *t != primary)
    }

    /// True when the event affects `object_type`, primarily or via its summary.
    pub fn touches(&self, object_type: &str) -> bool {
        self.object_type() == object_type
            || self
                .summary
                .as_ref()
                .is_some_and(|s| s.contains_key(object_type))
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.base
            .start_date
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_backend_payload() {
        let raw = json!({
            "base": {
                "objectType": "case_task",
                "rootId": "AVx1",
                "operation": "Update",
                "objectId": "t1",
                "startDate": 1500000000000i64,
                "details": {"status": "Completed"}
            },
            "summary": {"case_task": {"Update": 1}, "case": {"Update": 1}}
        });
        let ev: UpdateEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(ev.root_id(), "AVx1");
        assert_eq!(ev.object_type(), "case_task");
        assert_eq!(ev.base.operation, Operation::Update);
        assert_eq!(ev.secondary_object_types().collect::<Vec<_>>(), vec!["case"]);
        assert!(ev.touches("case"));
        assert!(!ev.touches("alert"));
        assert!(ev.started_at().is_some());
    }

    #[test]
    fn missing_root_is_empty_sentinel() {
        let ev: UpdateEvent =
            serde_json::from_value(json!({"base": {"objectType": "user"}})).unwrap();
        assert_eq!(ev.root_id(), "");
        assert_eq!(ev.base.operation, Operation::Unknown(String::new()));
        assert_eq!(ev.secondary_object_types().count(), 0);
    }

    #[test]
    fn unknown_operation_is_preserved() {
        let op: Operation = serde_json::from_value(json!("Merge")).unwrap();
        assert_eq!(op, Operation::Unknown("Merge".into()));
        assert_eq!(serde_json::to_value(op).unwrap(), json!("Merge"));
    }
}
