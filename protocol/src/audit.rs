//! Append-only audit entries persisted as newline-delimited JSON.

use std::collections::BTreeMap;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditEventType {
    SecretsScan,
    FixGenerated,
    FixApplied,
    FixReverted,
    ValidationCheck,
    AccessDenied,
    SecurityAlert,
    ConfigChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Failure,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub ts: DateTime<Utc>,
    pub event: AuditEventType,
    pub actor: String,
    pub resource: String,
    pub action: String,
    pub status: AuditStatus,
    pub details: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn entry_round_trips_as_json_line() {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            ts: Utc::now(),
            event: AuditEventType::SecretsScan,
            actor: "pipeline".to_string(),
            resource: "ci-log".to_string(),
            action: "redact".to_string(),
            status: AuditStatus::Success,
            details: "3 secrets masked".to_string(),
            metadata: BTreeMap::new(),
        };
        let line = serde_json::to_string(&entry).unwrap();
        assert!(!line.contains('\n'));
        let back: AuditEntry = serde_json::from_str(&line).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn event_type_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&AuditEventType::SecurityAlert).unwrap(),
            "\"security_alert\""
        );
    }
}
