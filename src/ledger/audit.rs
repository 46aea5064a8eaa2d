use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::error::Category;
use serde_json::{Map, Value};
use thiserror::Error;
use utoipa::{IntoParams, ToSchema};

use super::block::{format_timestamp, Block, Payload};
use super::chain::{Ledger, LedgerError};

/// Payload `type` of audit-log entries
pub const AUDIT_LOG_TYPE: &str = "audit_log";

/// Payload `type` of data-integrity records
pub const DATA_INTEGRITY_TYPE: &str = "data_integrity";

/// Errors raised when a request body cannot become a ledger payload
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Missing field: {0}")]
    MissingField(String),

    /// A field or the body itself has the wrong JSON type
    #[error("{0}")]
    InvalidType(String),

    #[error("Malformed JSON: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for PayloadError {
    fn from(err: serde_json::Error) -> Self {
        PayloadError::from(&err)
    }
}

impl From<&serde_json::Error> for PayloadError {
    fn from(err: &serde_json::Error) -> Self {
        let message = err.to_string();

        match err.classify() {
            Category::Data => match missing_field(&message) {
                Some(field) => PayloadError::MissingField(field.to_string()),
                None => PayloadError::InvalidType(message),
            },
            Category::Syntax | Category::Eof | Category::Io => PayloadError::Malformed(message),
        }
    }
}

// serde reports these as "missing field `name`", possibly followed by a position
fn missing_field(message: &str) -> Option<&str> {
    message.strip_prefix("missing field `")?.split('`').next()
}

/// An access or action event to be recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuditEntry {
    pub event_type: String,
    pub user_id: String,
    pub action: String,
    pub resource: String,

    /// Free-form context, defaults to `{}`
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: Map<String, Value>,
}

impl AuditEntry {
    /// Creates an entry with empty metadata
    ///
    /// # Arguments
    ///
    /// * `event_type` - Kind of event, e.g. `"data_access"` or `"prediction"`
    /// * `user_id` - Who performed the action
    /// * `action` - What was done
    /// * `resource` - What it was done to
    pub fn new(
        event_type: impl Into<String>,
        user_id: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        AuditEntry {
            event_type: event_type.into(),
            user_id: user_id.into(),
            action: action.into(),
            resource: resource.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    fn into_payload(self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("type".to_string(), Value::from(AUDIT_LOG_TYPE));
        payload.insert("event_type".to_string(), Value::from(self.event_type));
        payload.insert("user_id".to_string(), Value::from(self.user_id));
        payload.insert("action".to_string(), Value::from(self.action));
        payload.insert("resource".to_string(), Value::from(self.resource));
        payload.insert("metadata".to_string(), Value::Object(self.metadata));
        payload.insert("timestamp".to_string(), Value::from(format_timestamp(Utc::now())));
        payload
    }
}

/// Digest of an external data set, anchored in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct IntegrityRecord {
    pub data_id: String,
    pub data_hash: String,

    /// Defaults to `"unknown"`
    #[serde(default = "default_data_type")]
    pub data_type: String,
}

fn default_data_type() -> String {
    "unknown".to_string()
}

impl IntegrityRecord {
    pub fn new(data_id: impl Into<String>, data_hash: impl Into<String>, data_type: impl Into<String>) -> Self {
        IntegrityRecord {
            data_id: data_id.into(),
            data_hash: data_hash.into(),
            data_type: data_type.into(),
        }
    }

    fn into_payload(self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("type".to_string(), Value::from(DATA_INTEGRITY_TYPE));
        payload.insert("data_id".to_string(), Value::from(self.data_id));
        payload.insert("data_hash".to_string(), Value::from(self.data_hash));
        payload.insert("data_type".to_string(), Value::from(self.data_type));
        payload.insert("timestamp".to_string(), Value::from(format_timestamp(Utc::now())));
        payload
    }
}

/// Optional equality filters for the audit trail, combined with AND
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuditTrailFilter {
    /// Only entries recorded for this user
    pub user_id: Option<String>,

    /// Only entries touching this resource
    pub resource: Option<String>,
}

impl AuditTrailFilter {
    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    fn matches(&self, block: &Block) -> bool {
        if block.payload_type() != Some(AUDIT_LOG_TYPE) {
            return false;
        }

        // An empty value, as sent by `?user_id=`, does not filter
        let field_is = |key: &str, wanted: &Option<String>| match wanted.as_deref() {
            Some(wanted) if !wanted.is_empty() => {
                block.payload().get(key).and_then(Value::as_str) == Some(wanted)
            }
            _ => true,
        };

        field_is("user_id", &self.user_id) && field_is("resource", &self.resource)
    }
}

impl Ledger {
    /// Appends an audit-log entry, mining within the ledger's budget
    ///
    /// The stored payload gains `type = "audit_log"` and a `timestamp`.
    ///
    /// # Returns
    ///
    /// The new block, or `LedgerError::Mining` if the budget ran out first
    pub fn record_audit_log(&self, entry: AuditEntry) -> Result<Block, LedgerError> {
        self.append_within(entry.into_payload(), self.mining_budget())
    }

    /// Appends a data-integrity record, mining within the ledger's budget
    pub fn record_data_hash(&self, record: IntegrityRecord) -> Result<Block, LedgerError> {
        self.append_within(record.into_payload(), self.mining_budget())
    }

    /// Audit-log blocks matching `filter`, oldest first
    ///
    /// # Arguments
    ///
    /// * `filter` - Equality filters on `user_id` and `resource`; unset or empty values match everything
    pub fn audit_trail(&self, filter: &AuditTrailFilter) -> Vec<Block> {
        self.blocks().into_iter().filter(|block| filter.matches(block)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded_ledger() -> Ledger {
        let ledger = Ledger::with_difficulty(1).unwrap();
        let entries = [("alice", "patient/1"), ("bob", "patient/2"), ("alice", "patient/1")];

        for (i, (user, resource)) in entries.iter().enumerate() {
            ledger.record_data_hash(IntegrityRecord::new(format!("ds-{}", i), "abc123", "csv")).unwrap();
            ledger
                .record_audit_log(AuditEntry::new("data_access", *user, "read", *resource))
                .unwrap();
        }

        ledger
    }

    #[test]
    fn test_audit_entry_payload_shape() {
        let ledger = Ledger::with_difficulty(1).unwrap();
        let mut metadata = Map::new();
        metadata.insert("ip".to_string(), json!("10.0.0.1"));

        let block = ledger
            .record_audit_log(AuditEntry::new("prediction", "alice", "predict", "model/risk").with_metadata(metadata))
            .unwrap();

        let payload = block.payload();
        assert_eq!(block.payload_type(), Some(AUDIT_LOG_TYPE));
        assert_eq!(payload["event_type"], "prediction");
        assert_eq!(payload["user_id"], "alice");
        assert_eq!(payload["action"], "predict");
        assert_eq!(payload["resource"], "model/risk");
        assert_eq!(payload["metadata"], json!({"ip": "10.0.0.1"}));
        assert!(payload["timestamp"].is_string());
        assert!(block.meets_difficulty(1));
    }

    #[test]
    fn test_integrity_record_payload_shape() {
        let ledger = Ledger::with_difficulty(1).unwrap();
        let block = ledger.record_data_hash(IntegrityRecord::new("ds-1", "ff00", "parquet")).unwrap();

        let payload = block.payload();
        assert_eq!(block.payload_type(), Some(DATA_INTEGRITY_TYPE));
        assert_eq!(payload["data_id"], "ds-1");
        assert_eq!(payload["data_hash"], "ff00");
        assert_eq!(payload["data_type"], "parquet");
        assert!(payload["timestamp"].is_string());
    }

    #[test]
    fn test_audit_trail_skips_other_payloads() {
        let ledger = seeded_ledger();
        assert_eq!(ledger.len(), 7);
        assert_eq!(ledger.audit_trail(&AuditTrailFilter::default()).len(), 3);
    }

    #[test]
    fn test_audit_trail_filters_by_user() {
        let ledger = seeded_ledger();
        let trail = ledger.audit_trail(&AuditTrailFilter::default().user("alice"));

        assert_eq!(trail.len(), 2);
        assert!(trail.iter().all(|block| block.payload()["user_id"] == "alice"));
        assert!(trail[0].created_at() <= trail[1].created_at());

        let all = ledger.blocks();
        let position = |block: &Block| all.iter().position(|b| b.hash() == block.hash());
        assert!(position(&trail[0]) < position(&trail[1]));
    }

    #[test]
    fn test_audit_trail_filters_by_user_and_resource() {
        let ledger = seeded_ledger();

        let both = AuditTrailFilter::default().user("alice").resource("patient/1");
        assert_eq!(ledger.audit_trail(&both).len(), 2);

        let bob_on_one = AuditTrailFilter::default().user("bob").resource("patient/1");
        assert!(ledger.audit_trail(&bob_on_one).is_empty());

        let by_resource = AuditTrailFilter::default().resource("patient/2");
        let trail = ledger.audit_trail(&by_resource);
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].payload()["user_id"], "bob");
    }

    #[test]
    fn test_audit_trail_user_and_resource_single_match() {
        let ledger = Ledger::with_difficulty(1).unwrap();
        for (user, resource) in [("alice", "patient/1"), ("bob", "patient/2"), ("alice", "patient/3")] {
            ledger.record_audit_log(AuditEntry::new("data_access", user, "read", resource)).unwrap();
        }

        let filter = AuditTrailFilter::default().user("alice").resource("patient/1");
        assert_eq!(ledger.audit_trail(&filter).len(), 1);
        assert_eq!(ledger.audit_trail(&AuditTrailFilter::default().user("alice")).len(), 2);
    }

    #[test]
    fn test_audit_trail_ignores_empty_filters() {
        let ledger = Ledger::with_difficulty(1).unwrap();
        for user in ["alice", "bob"] {
            ledger.record_audit_log(AuditEntry::new("data_access", user, "read", "patient/1")).unwrap();
        }

        let filter = AuditTrailFilter::default().user("").resource("patient/1");
        assert_eq!(ledger.audit_trail(&filter).len(), 2);
        assert_eq!(ledger.audit_trail(&AuditTrailFilter::default().user("").resource("")).len(), 2);
    }

    fn decode<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, PayloadError> {
        serde_json::from_value(body).map_err(PayloadError::from)
    }

    #[test]
    fn test_audit_entry_decodes_from_json() {
        let body = json!({
            "event_type": "data_access",
            "user_id": "alice",
            "action": "read",
            "resource": "patient/1",
        });

        let entry: AuditEntry = decode(body).unwrap();
        assert_eq!(entry, AuditEntry::new("data_access", "alice", "read", "patient/1"));
    }

    #[test]
    fn test_audit_entry_decoding_rejects_bad_input() {
        let missing = json!({"event_type": "x", "action": "read", "resource": "r"});
        assert_eq!(
            decode::<AuditEntry>(missing),
            Err(PayloadError::MissingField("user_id".to_string()))
        );

        let wrong_type = json!({"event_type": "x", "user_id": 7, "action": "read", "resource": "r"});
        assert!(matches!(
            decode::<AuditEntry>(wrong_type),
            Err(PayloadError::InvalidType(ref message)) if message.contains("expected a string")
        ));

        let bad_metadata = json!({"event_type": "x", "user_id": "a", "action": "read", "resource": "r", "metadata": [1]});
        assert!(matches!(decode::<AuditEntry>(bad_metadata), Err(PayloadError::InvalidType(_))));

        assert!(decode::<AuditEntry>(json!("not an object")).is_err());
    }

    #[test]
    fn test_payload_error_from_raw_body() {
        let missing = serde_json::from_str::<IntegrityRecord>(r#"{"data_id": "d"}"#).unwrap_err();
        assert_eq!(PayloadError::from(missing), PayloadError::MissingField("data_hash".to_string()));

        let truncated = serde_json::from_str::<IntegrityRecord>(r#"{"data_id": "d""#).unwrap_err();
        assert!(matches!(PayloadError::from(truncated), PayloadError::Malformed(_)));

        let garbage = serde_json::from_str::<IntegrityRecord>("data_id=d").unwrap_err();
        assert!(matches!(PayloadError::from(garbage), PayloadError::Malformed(_)));
    }

    #[test]
    fn test_integrity_record_defaults_data_type() {
        let record: IntegrityRecord = decode(json!({"data_id": "d", "data_hash": "h"})).unwrap();
        assert_eq!(record.data_type, "unknown");

        assert_eq!(
            decode::<IntegrityRecord>(json!({"data_id": "d"})),
            Err(PayloadError::MissingField("data_hash".to_string()))
        );
    }
}
