//! Versioned, checksummed encoding of the pending-change queue.
//!
//! The queue is stored as one value:
//!
//! ```json
//! {"schemaVersion":2,"checksum":"<sha256 of changes>","changes":[...]}
//! ```
//!
//! Version 1 is the bare JSON array written by legacy mobile clients
//! (untyped `data` blobs, millisecond `timestamp`). Older envelopes are
//! upgraded step by step through [`MIGRATIONS`]; an entry that cannot be
//! upgraded fails the load instead of being dropped.

use crate::model::{ChangeKind, ChangePayload, EntityKind, EntityRecord, PendingChange, Priority};
use crate::storage::PersistenceError;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::info;

/// Storage key holding the queue.
pub const QUEUE_KEY: &str = "pantry-sync/pending-changes";

/// Version written by this build.
pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    schema_version: u32,
    #[serde(default)]
    checksum: Option<String>,
    changes: Value,
}

/// Upgrades the `changes` value from `from` to `from + 1`.
struct Migration {
    from: u32,
    migrate: fn(Value) -> Result<Value, PersistenceError>,
}

const MIGRATIONS: &[Migration] = &[Migration {
    from: 1,
    migrate: migrate_v1_to_v2,
}];

/// Decoded queue plus whether it was upgraded from an older version.
#[derive(Debug)]
pub struct Decoded {
    pub changes: Vec<PendingChange>,
    pub migrated_from: Option<u32>,
}

/// SHA-256 over the canonical serialization of `changes`.
fn checksum(changes: &Value) -> Result<String, PersistenceError> {
    let bytes = serde_json::to_vec(changes)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Serialize the queue at the current schema version.
///
/// # Errors
///
/// Returns an error if a change cannot be serialized.
pub fn encode(changes: &[PendingChange]) -> Result<Vec<u8>, PersistenceError> {
    let changes = serde_json::to_value(changes)?;
    let envelope = Envelope {
        schema_version: SCHEMA_VERSION,
        checksum: Some(checksum(&changes)?),
        changes,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Parse a stored queue, upgrading older versions.
///
/// # Errors
///
/// Returns [`PersistenceError::UnsupportedSchema`] for versions newer than
/// this build, [`PersistenceError::ChecksumMismatch`] for corrupted
/// envelopes, and [`PersistenceError::Migration`] when a legacy entry
/// cannot be upgraded.
pub fn decode(bytes: &[u8]) -> Result<Decoded, PersistenceError> {
    let raw: Value = serde_json::from_slice(bytes)?;

    let (mut version, mut changes) = if raw.is_array() {
        (1, raw)
    } else {
        let envelope: Envelope = serde_json::from_value(raw)?;
        if envelope.schema_version > SCHEMA_VERSION {
            return Err(PersistenceError::UnsupportedSchema {
                found: envelope.schema_version,
                supported: SCHEMA_VERSION,
            });
        }
        if let Some(expected) = &envelope.checksum {
            let actual = checksum(&envelope.changes)?;
            if *expected != actual {
                return Err(PersistenceError::ChecksumMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        (envelope.schema_version, envelope.changes)
    };

    let original = version;
    while version < SCHEMA_VERSION {
        let step = MIGRATIONS
            .iter()
            .find(|m| m.from == version)
            .ok_or(PersistenceError::UnsupportedSchema {
                found: version,
                supported: SCHEMA_VERSION,
            })?;
        changes = (step.migrate)(changes)?;
        version += 1;
    }

    let changes: Vec<PendingChange> = serde_json::from_value(changes)?;
    let migrated_from = (original < SCHEMA_VERSION).then_some(original);
    if let Some(from) = migrated_from {
        info!(from, to = SCHEMA_VERSION, count = changes.len(), "Upgraded pending change queue");
    }

    Ok(Decoded {
        changes,
        migrated_from,
    })
}

fn migration_error(index: usize, reason: impl Into<String>) -> PersistenceError {
    PersistenceError::Migration {
        from: 1,
        index,
        reason: reason.into(),
    }
}

fn legacy_str<'a>(entry: &'a Value, field: &str) -> Option<&'a str> {
    entry.get(field).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn legacy_timestamp(entry: &Value) -> Option<DateTime<Utc>> {
    match entry.get("timestamp")? {
        Value::Number(n) => Utc.timestamp_millis_opt(n.as_i64()?).single(),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

/// Convert the legacy bare array into v2 changes.
///
/// Legacy `restore` operations re-write the whole record and become
/// updates. Entities outside product/recipe/shoppingList cannot be
/// represented and fail the migration.
fn migrate_v1_to_v2(changes: Value) -> Result<Value, PersistenceError> {
    let Value::Array(entries) = changes else {
        return Err(migration_error(0, "legacy queue is not an array"));
    };

    let mut upgraded = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let id = legacy_str(&entry, "id").ok_or_else(|| migration_error(index, "missing id"))?;
        let entity_id = legacy_str(&entry, "entityId")
            .ok_or_else(|| migration_error(index, "missing entityId"))?;
        let kind: EntityKind = legacy_str(&entry, "entity")
            .ok_or_else(|| migration_error(index, "missing entity"))?
            .parse()
            .map_err(|e: String| migration_error(index, e))?;
        let change_kind = match legacy_str(&entry, "type") {
            Some("create") => ChangeKind::Create,
            Some("update" | "restore") => ChangeKind::Update,
            Some("delete") => ChangeKind::Delete,
            other => {
                return Err(migration_error(
                    index,
                    format!("unknown change type {other:?}"),
                ));
            }
        };
        let enqueued_at =
            legacy_timestamp(&entry).ok_or_else(|| migration_error(index, "missing timestamp"))?;

        let payload = if change_kind == ChangeKind::Delete {
            ChangePayload::delete(kind)
        } else {
            let mut data = entry
                .get("data")
                .cloned()
                .filter(Value::is_object)
                .ok_or_else(|| migration_error(index, "create/update without data"))?;
            if let Some(fields) = data.as_object_mut() {
                fields
                    .entry("id")
                    .or_insert_with(|| Value::String(entity_id.to_string()));
                fields
                    .entry("createdAt")
                    .or_insert_with(|| Value::String(enqueued_at.to_rfc3339()));
            }
            let record = EntityRecord::from_value(kind, data)
                .map_err(|e| migration_error(index, format!("invalid {kind} data: {e}")))?;
            ChangePayload::from_record(change_kind, record)
                .ok_or_else(|| migration_error(index, "delete carries no record"))?
        };

        let priority = legacy_str(&entry, "priority")
            .map_or(Ok(Priority::Normal), str::parse)
            .map_err(|e: String| migration_error(index, e))?;
        let retry_count = entry
            .get("retryCount")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0);

        let change = PendingChange {
            id: id.to_string(),
            entity_id: entity_id.to_string(),
            payload,
            enqueued_at,
            sequence: index as u64,
            priority,
            retry_count,
            origin_user: legacy_str(&entry, "userId").unwrap_or("unknown").to_string(),
            origin_device: legacy_str(&entry, "deviceId").unwrap_or("unknown").to_string(),
        };
        upgraded.push(serde_json::to_value(change)?);
    }

    Ok(Value::Array(upgraded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewChange, Product};
    use serde_json::json;

    fn sample() -> Vec<PendingChange> {
        let created = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        vec![
            NewChange::create(Product::new("p1", "Milk", created)).into_pending(created, "u1", "d1"),
            NewChange::delete(EntityKind::Recipe, "r1").into_pending(created, "u1", "d1"),
        ]
    }

    #[test]
    fn test_encode_decode() {
        let changes = sample();
        let bytes = encode(&changes).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["schemaVersion"], SCHEMA_VERSION);
        assert_eq!(value["checksum"].as_str().unwrap().len(), 64);

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.changes, changes);
        assert!(decoded.migrated_from.is_none());
    }

    #[test]
    fn test_float_fields_survive_checksum() {
        let created = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut product = Product::new("p1", "Flour", created);
        product.quantity = 0.049_999_999_999_999_996;
        product.price = Some(5.123_456_789_012_345);
        let mut changes = vec![NewChange::update(product).into_pending(created, "u1", "d1")];

        for cents in 1..2_000_u32 {
            let mut split = Product::new(format!("p{cents}"), "Rice", created);
            split.quantity = f64::from(cents) / 100.0 / 3.0;
            changes.push(NewChange::update(split).into_pending(created, "u1", "d1"));
        }

        let decoded = decode(&encode(&changes).unwrap()).unwrap();
        assert_eq!(decoded.changes, changes);
    }

    #[test]
    fn test_tampered_envelope_is_rejected() {
        let bytes = encode(&sample()).unwrap();
        let mut value: Value = serde_json::from_slice(&bytes).unwrap();
        value["changes"][0]["retryCount"] = json!(2);
        let tampered = serde_json::to_vec(&value).unwrap();

        assert!(matches!(
            decode(&tampered),
            Err(PersistenceError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_future_version_is_rejected() {
        let bytes = serde_json::to_vec(&json!({"schemaVersion": 9, "changes": []})).unwrap();
        assert!(matches!(
            decode(&bytes),
            Err(PersistenceError::UnsupportedSchema { found: 9, .. })
        ));
    }

    #[test]
    fn test_legacy_array_is_upgraded() {
        let legacy = json!([
            {
                "id": "change_1",
                "type": "create",
                "entity": "product",
                "entityId": "p1",
                "data": {"name": "Milk", "quantity": 2, "unit": "l"},
                "timestamp": 1_700_000_000_000_i64,
                "userId": "user_1",
                "deviceId": "phone",
                "retryCount": 1,
                "priority": "high"
            },
            {
                "id": "change_2",
                "type": "delete",
                "entity": "shoppingList",
                "entityId": "l1",
                "timestamp": 1_700_000_001_000_i64,
                "userId": "user_1",
                "retryCount": 0,
                "priority": "low"
            }
        ]);

        let decoded = decode(&serde_json::to_vec(&legacy).unwrap()).unwrap();
        assert_eq!(decoded.migrated_from, Some(1));
        assert_eq!(decoded.changes.len(), 2);

        let first = &decoded.changes[0];
        assert_eq!(first.priority, Priority::High);
        assert_eq!(first.retry_count, 1);
        assert_eq!(first.origin_device, "phone");
        let Some(EntityRecord::Product(product)) = first.payload.record() else {
            panic!("expected product record");
        };
        assert_eq!(product.id, "p1");
        assert_eq!(product.created_at, first.enqueued_at);

        let second = &decoded.changes[1];
        assert_eq!(second.change_kind(), ChangeKind::Delete);
        assert_eq!(second.origin_device, "unknown");
    }

    #[test]
    fn test_unmigratable_entry_fails_with_index() {
        let legacy = json!([
            {"id": "c1", "type": "delete", "entity": "product", "entityId": "p1", "timestamp": 1},
            {"id": "c2", "type": "update", "entity": "familyGroup", "entityId": "f1", "timestamp": 2, "data": {}}
        ]);

        let err = decode(&serde_json::to_vec(&legacy).unwrap()).unwrap_err();
        assert!(matches!(err, PersistenceError::Migration { from: 1, index: 1, .. }));
    }
}
