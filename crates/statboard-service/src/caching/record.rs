use chrono::{TimeZone, Utc};
use serde_json::Value;

use super::identifier::Identifier;

/// An immutable, persisted snapshot: one generation of the JSON artifact named by
/// `identifier`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    /// The logical artifact this snapshot belongs to.
    pub identifier: Identifier,
    /// The serialized JSON payload.
    pub payload: String,
    /// Generation timestamp, epoch milliseconds.
    pub generated_at: u64,
}

/// Normalizes a payload's embedded timestamp before persisting.
///
/// If the payload is a JSON object without a top-level `timestamp` field, a `timestamp`
/// (epoch milliseconds) and a human-readable `timestamp_f` mirror are injected as the first
/// two members. Anything else passes through unchanged.
pub(super) fn normalize_payload(payload: &str, generated_at: u64) -> String {
    let Ok(Value::Object(object)) = serde_json::from_str::<Value>(payload) else {
        return payload.to_owned();
    };
    if object.contains_key("timestamp") {
        return payload.to_owned();
    }

    let mut normalized = serde_json::Map::with_capacity(object.len() + 2);
    normalized.insert("timestamp".to_owned(), Value::from(generated_at));
    normalized.insert(
        "timestamp_f".to_owned(),
        Value::from(format_timestamp(generated_at)),
    );
    normalized.extend(object);

    // serializing a Map cannot fail
    serde_json::to_string(&Value::Object(normalized)).unwrap_or_else(|_| payload.to_owned())
}

fn format_timestamp(epoch_ms: u64) -> String {
    match Utc.timestamp_millis_opt(epoch_ms as i64).single() {
        Some(date) => date.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => epoch_ms.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::identifier::DataKind;
    use super::*;

    #[test]
    fn test_timestamp_injected_first() {
        let normalized = normalize_payload(r#"{"a":1}"#, 1_000);
        assert!(normalized.starts_with(r#"{"timestamp":1000,"timestamp_f":"#));

        let value: Value = serde_json::from_str(&normalized).unwrap();
        assert_eq!(value["timestamp"], 1_000);
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_existing_timestamp_kept() {
        let payload = r#"{"timestamp":42,"a":1}"#;
        assert_eq!(normalize_payload(payload, 1_000), payload);
    }

    #[test]
    fn test_non_object_passthrough() {
        assert_eq!(normalize_payload("[1,2,3]", 1_000), "[1,2,3]");
        assert_eq!(normalize_payload("not json", 1_000), "not json");
    }

    #[test]
    fn test_record_clone_is_cheap_enough() {
        let record = SnapshotRecord {
            identifier: DataKind::Players.global(),
            payload: r#"{"players":[]}"#.to_owned(),
            generated_at: 123,
        };
        assert_eq!(record.clone(), record);
    }
}
