//! Enqueue command implementation.

use super::{load_config, open_database, open_queue, resolve_origin};
use crate::cli::EnqueueArgs;
use crate::error::{Error, Result};
use crate::model::{ChangeKind, ChangePayload, EntityRecord, NewChange};
use crate::sync::SyncError;
use crate::validate::{normalize_entity, normalize_operation, normalize_priority};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use tracing::info;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EnqueueOutput<'a> {
    id: &'a str,
    entity: &'a str,
    entity_id: &'a str,
    op: &'a str,
    priority: &'a str,
    queue_depth: usize,
}

/// Execute the enqueue command.
///
/// # Errors
///
/// Returns an error if an argument does not resolve, the record is invalid,
/// or the queue cannot be written.
pub fn execute(
    args: &EnqueueArgs,
    db_path: Option<&PathBuf>,
    config_path: Option<&PathBuf>,
    user: Option<&str>,
    device: Option<&str>,
    json: bool,
) -> Result<()> {
    let change = build_change(args)?;

    let (mut config, config_path) = load_config(config_path)?;
    let (user, device) = resolve_origin(user, device, &mut config, &config_path)?;

    let db = open_database(db_path)?;
    let queue = open_queue(&db)?;

    change.validate().map_err(SyncError::InvalidChange)?;
    let pending = queue.enqueue(change.into_pending(Utc::now(), &user, &device))?;
    info!(change_id = %pending.id, entity_id = %pending.entity_id, "Change queued");

    if json {
        let output = EnqueueOutput {
            id: &pending.id,
            entity: pending.entity_kind().as_str(),
            entity_id: &pending.entity_id,
            op: pending.change_kind().as_str(),
            priority: pending.priority.as_str(),
            queue_depth: queue.len(),
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!(
            "Queued {} ({} {} {}, {} pending)",
            pending.id,
            pending.change_kind(),
            pending.entity_kind(),
            pending.entity_id,
            queue.len()
        );
    }
    Ok(())
}

/// Turn the raw arguments into a typed change.
fn build_change(args: &EnqueueArgs) -> Result<NewChange> {
    let entity = normalize_entity(&args.entity).map_err(|(input, suggestion)| {
        invalid("entity", &input, suggestion, "product, recipe, shoppingList")
    })?;
    let op = normalize_operation(&args.op).map_err(|(input, suggestion)| {
        invalid("operation", &input, suggestion, "create, update, delete")
    })?;
    let priority = normalize_priority(&args.priority).map_err(|(input, suggestion)| {
        invalid("priority", &input, suggestion, "high, normal, low")
    })?;

    let raw = match (&args.data, &args.file) {
        (Some(data), _) => Some(data.clone()),
        (None, Some(path)) => Some(fs::read_to_string(path)?),
        (None, None) => None,
    };

    if op == ChangeKind::Delete {
        if raw.is_some() {
            return Err(Error::InvalidArgument(
                "delete changes carry no record; drop --data/--file".to_string(),
            ));
        }
        return Ok(NewChange::delete(entity, args.id.clone()).with_priority(priority));
    }

    let raw = raw.ok_or_else(|| {
        Error::InvalidArgument(format!("{op} needs a record; pass --data or --file"))
    })?;
    let mut value: Value = serde_json::from_str(&raw)
        .map_err(|e| Error::InvalidArgument(format!("record is not valid JSON: {e}")))?;
    let fields = value
        .as_object_mut()
        .ok_or_else(|| Error::InvalidArgument("record must be a JSON object".to_string()))?;
    fields
        .entry("id")
        .or_insert_with(|| Value::String(args.id.clone()));
    fields
        .entry("createdAt")
        .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));

    let record = EntityRecord::from_value(entity, value)
        .map_err(|e| Error::InvalidArgument(format!("record is not a valid {entity}: {e}")))?;
    let payload = ChangePayload::from_record(op, record)
        .ok_or_else(|| Error::Other(format!("no payload for {op}")))?;

    Ok(NewChange {
        entity_id: args.id.clone(),
        payload,
        priority,
    })
}

fn invalid(what: &str, input: &str, suggestion: Option<String>, valid: &str) -> Error {
    let message = match suggestion {
        Some(s) => format!("Invalid {what} '{input}'. Did you mean '{s}'?"),
        None => format!("Invalid {what} '{input}'. Valid values: {valid}"),
    };
    Error::InvalidArgument(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityKind, Priority};

    fn args(entity: &str, op: &str, data: Option<&str>) -> EnqueueArgs {
        EnqueueArgs {
            entity: entity.to_string(),
            op: op.to_string(),
            id: "p1".to_string(),
            data: data.map(String::from),
            file: None,
            priority: "urgent".to_string(),
        }
    }

    #[test]
    fn test_build_change_fills_id_and_created_at() {
        let change = build_change(&args("item", "add", Some(r#"{"name":"Milk"}"#))).unwrap();
        assert_eq!(change.entity_id, "p1");
        assert_eq!(change.priority, Priority::High);
        assert_eq!(change.payload.entity_kind(), EntityKind::Product);
        assert_eq!(change.payload.change_kind(), ChangeKind::Create);
        assert_eq!(change.payload.record_id(), Some("p1"));
        assert!(change.validate().is_ok());
    }

    #[test]
    fn test_build_change_delete_rejects_data() {
        let change = build_change(&args("list", "rm", None)).unwrap();
        assert_eq!(change.payload.entity_kind(), EntityKind::ShoppingList);
        assert!(change.payload.record().is_none());

        let err = build_change(&args("list", "rm", Some("{}"))).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_build_change_errors() {
        let err = build_change(&args("prodcut", "create", Some("{}"))).unwrap_err();
        assert!(err.to_string().contains("Did you mean 'product'"));
        assert_eq!(err.error_code().as_str(), "INVALID_ENTITY");

        let err = build_change(&args("product", "update", None)).unwrap_err();
        assert!(err.to_string().contains("--data"));

        let err = build_change(&args("product", "create", Some("[1]"))).unwrap_err();
        assert!(err.to_string().contains("JSON object"));
    }
}
