//! Pending change types.
//!
//! A [`PendingChange`] is one local mutation waiting to be applied remotely.
//! Its payload is a tagged sum over entity kinds and operations, so a
//! `Delete` never carries a record and a `Product` change can never hold a
//! recipe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::entity::{Entity, EntityKind, EntityRecord, Product, Recipe, ShoppingList};

/// Scheduling priority of a pending change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Sort rank: lower ranks are dispatched first.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Self::High),
            "normal" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            _ => Err(format!("Unknown priority: {s}")),
        }
    }
}

/// The operation a change performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl ChangeKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed operation on one record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data", rename_all = "camelCase")]
pub enum RecordChange<T> {
    Create(T),
    Update(T),
    Delete,
}

impl<T> RecordChange<T> {
    #[must_use]
    pub const fn kind(&self) -> ChangeKind {
        match self {
            Self::Create(_) => ChangeKind::Create,
            Self::Update(_) => ChangeKind::Update,
            Self::Delete => ChangeKind::Delete,
        }
    }

    #[must_use]
    pub const fn data(&self) -> Option<&T> {
        match self {
            Self::Create(data) | Self::Update(data) => Some(data),
            Self::Delete => None,
        }
    }
}

/// Change payload, tagged by entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", content = "change", rename_all = "camelCase")]
pub enum ChangePayload {
    Product(RecordChange<Product>),
    Recipe(RecordChange<Recipe>),
    ShoppingList(RecordChange<ShoppingList>),
}

/// The remote call a payload maps to.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOp {
    Create(EntityRecord),
    Update(EntityRecord),
    Delete(EntityKind),
}

fn to_op<T: Entity>(change: &RecordChange<T>) -> RemoteOp {
    match change {
        RecordChange::Create(data) => RemoteOp::Create(data.clone().into_record()),
        RecordChange::Update(data) => RemoteOp::Update(data.clone().into_record()),
        RecordChange::Delete => RemoteOp::Delete(T::KIND),
    }
}

impl ChangePayload {
    /// Payload deleting the entity of the given kind.
    #[must_use]
    pub const fn delete(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Product => Self::Product(RecordChange::Delete),
            EntityKind::Recipe => Self::Recipe(RecordChange::Delete),
            EntityKind::ShoppingList => Self::ShoppingList(RecordChange::Delete),
        }
    }

    /// Build a create/update payload from an untyped record.
    ///
    /// Returns `None` for [`ChangeKind::Delete`], which carries no record.
    #[must_use]
    pub fn from_record(kind: ChangeKind, record: EntityRecord) -> Option<Self> {
        fn lift<T>(kind: ChangeKind, data: T) -> Option<RecordChange<T>> {
            match kind {
                ChangeKind::Create => Some(RecordChange::Create(data)),
                ChangeKind::Update => Some(RecordChange::Update(data)),
                ChangeKind::Delete => None,
            }
        }

        Some(match record {
            EntityRecord::Product(p) => Self::Product(lift(kind, p)?),
            EntityRecord::Recipe(r) => Self::Recipe(lift(kind, r)?),
            EntityRecord::ShoppingList(l) => Self::ShoppingList(lift(kind, l)?),
        })
    }

    #[must_use]
    pub const fn entity_kind(&self) -> EntityKind {
        match self {
            Self::Product(_) => EntityKind::Product,
            Self::Recipe(_) => EntityKind::Recipe,
            Self::ShoppingList(_) => EntityKind::ShoppingList,
        }
    }

    #[must_use]
    pub const fn change_kind(&self) -> ChangeKind {
        match self {
            Self::Product(c) => c.kind(),
            Self::Recipe(c) => c.kind(),
            Self::ShoppingList(c) => c.kind(),
        }
    }

    /// Identifier of the record carried by create/update payloads.
    #[must_use]
    pub fn record_id(&self) -> Option<&str> {
        match self {
            Self::Product(c) => c.data().map(|d| d.id.as_str()),
            Self::Recipe(c) => c.data().map(|d| d.id.as_str()),
            Self::ShoppingList(c) => c.data().map(|d| d.id.as_str()),
        }
    }

    /// The record carried by create/update payloads.
    #[must_use]
    pub fn record(&self) -> Option<EntityRecord> {
        match self.to_op() {
            RemoteOp::Create(record) | RemoteOp::Update(record) => Some(record),
            RemoteOp::Delete(_) => None,
        }
    }

    #[must_use]
    pub fn to_op(&self) -> RemoteOp {
        match self {
            Self::Product(c) => to_op(c),
            Self::Recipe(c) => to_op(c),
            Self::ShoppingList(c) => to_op(c),
        }
    }
}

/// A queued local mutation.
///
/// Only `retry_count` changes after enqueue, and only through the change
/// store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
    pub id: String,
    pub entity_id: String,
    pub payload: ChangePayload,
    pub enqueued_at: DateTime<Utc>,
    /// Store-assigned tiebreaker for equal `enqueued_at` values.
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub retry_count: u32,
    pub origin_user: String,
    pub origin_device: String,
}

impl PendingChange {
    #[must_use]
    pub const fn entity_kind(&self) -> EntityKind {
        self.payload.entity_kind()
    }

    #[must_use]
    pub const fn change_kind(&self) -> ChangeKind {
        self.payload.change_kind()
    }

    /// Key that partitions changes applying to the same record.
    #[must_use]
    pub fn entity_key(&self) -> (EntityKind, &str) {
        (self.entity_kind(), self.entity_id.as_str())
    }

    /// Queue ordering: priority, then enqueue time, then sequence.
    #[must_use]
    pub fn queue_order(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .rank()
            .cmp(&other.priority.rank())
            .then_with(|| self.enqueued_at.cmp(&other.enqueued_at))
            .then_with(|| self.sequence.cmp(&other.sequence))
    }

    /// Ordering among changes of the same entity.
    #[must_use]
    pub fn entity_order(&self, other: &Self) -> std::cmp::Ordering {
        self.enqueued_at
            .cmp(&other.enqueued_at)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

/// Generate a new change ID.
#[must_use]
pub fn generate_change_id() -> String {
    format!("chg_{}", &uuid::Uuid::new_v4().simple().to_string()[..12])
}

/// A change as submitted by the application, before the engine stamps it.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChange {
    pub entity_id: String,
    pub payload: ChangePayload,
    pub priority: Priority,
}

impl NewChange {
    /// Create `record` remotely.
    #[must_use]
    pub fn create<T: Entity>(record: T) -> Self {
        Self {
            entity_id: record.id().to_string(),
            payload: T::wrap(RecordChange::Create(record)),
            priority: Priority::Normal,
        }
    }

    /// Replace the remote copy of `record`.
    #[must_use]
    pub fn update<T: Entity>(record: T) -> Self {
        Self {
            entity_id: record.id().to_string(),
            payload: T::wrap(RecordChange::Update(record)),
            priority: Priority::Normal,
        }
    }

    /// Delete the remote record of `kind` with the given id.
    #[must_use]
    pub fn delete(kind: EntityKind, entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            payload: ChangePayload::delete(kind),
            priority: Priority::Normal,
        }
    }

    #[must_use]
    pub fn product(kind: ChangeKind, product: Product) -> Self {
        match kind {
            ChangeKind::Create => Self::create(product),
            ChangeKind::Update => Self::update(product),
            ChangeKind::Delete => Self::delete(EntityKind::Product, product.id),
        }
    }

    #[must_use]
    pub fn recipe(kind: ChangeKind, recipe: Recipe) -> Self {
        match kind {
            ChangeKind::Create => Self::create(recipe),
            ChangeKind::Update => Self::update(recipe),
            ChangeKind::Delete => Self::delete(EntityKind::Recipe, recipe.id),
        }
    }

    #[must_use]
    pub fn shopping_list(kind: ChangeKind, list: ShoppingList) -> Self {
        match kind {
            ChangeKind::Create => Self::create(list),
            ChangeKind::Update => Self::update(list),
            ChangeKind::Delete => Self::delete(EntityKind::ShoppingList, list.id),
        }
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Check the change before it is queued.
    ///
    /// # Errors
    ///
    /// Returns a message when the entity id is empty, the record id does not
    /// match the entity id, or the record itself is invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.entity_id.trim().is_empty() {
            return Err("entity id must not be empty".to_string());
        }
        if let Some(record_id) = self.payload.record_id() {
            if record_id != self.entity_id {
                return Err(format!(
                    "record id '{record_id}' does not match entity id '{}'",
                    self.entity_id
                ));
            }
        }
        if let Some(record) = self.payload.record() {
            record.validate()?;
        }
        Ok(())
    }

    /// Stamp the change for the queue.
    #[must_use]
    pub fn into_pending(
        self,
        enqueued_at: DateTime<Utc>,
        origin_user: &str,
        origin_device: &str,
    ) -> PendingChange {
        PendingChange {
            id: generate_change_id(),
            entity_id: self.entity_id,
            payload: self.payload,
            enqueued_at,
            sequence: 0,
            priority: self.priority,
            retry_count: 0,
            origin_user: origin_user.to_string(),
            origin_device: origin_device.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_payload_tags() {
        let change = NewChange::create(Product::new("p1", "Milk", ts(0)));
        let value = serde_json::to_value(&change.payload).unwrap();
        assert_eq!(value["entity"], "product");
        assert_eq!(value["change"]["op"], "create");
        assert_eq!(value["change"]["data"]["name"], "Milk");

        let delete = serde_json::to_value(ChangePayload::delete(EntityKind::ShoppingList)).unwrap();
        assert_eq!(delete["entity"], "shoppingList");
        assert_eq!(delete["change"]["op"], "delete");

        let back: ChangePayload = serde_json::from_value(delete).unwrap();
        assert_eq!(back.change_kind(), ChangeKind::Delete);
        assert!(back.record().is_none());
    }

    #[test]
    fn test_validate_rejects_id_mismatch() {
        let mut change = NewChange::update(Product::new("p1", "Milk", ts(0)));
        assert!(change.validate().is_ok());

        change.entity_id = "p2".into();
        let err = change.validate().unwrap_err();
        assert!(err.contains("does not match"));

        let delete = NewChange::delete(EntityKind::Recipe, "");
        assert!(delete.validate().is_err());
    }

    #[test]
    fn test_queue_order() {
        let base = NewChange::create(Product::new("p1", "Milk", ts(0)));
        let mut a = base.clone().into_pending(ts(5), "u", "d");
        let mut b = base.clone().with_priority(Priority::High).into_pending(ts(9), "u", "d");
        let mut c = base.into_pending(ts(5), "u", "d");
        a.sequence = 1;
        b.sequence = 2;
        c.sequence = 3;

        let mut all = vec![c.clone(), a.clone(), b.clone()];
        all.sort_by(PendingChange::queue_order);
        let ids: Vec<_> = all.iter().map(|x| x.sequence).collect();
        assert_eq!(ids, vec![2, 1, 3]);
        assert_eq!(a.entity_order(&b), std::cmp::Ordering::Less);
    }

    #[test]
    fn test_from_record_and_to_op() {
        let record = EntityRecord::Product(Product::new("p1", "Milk", ts(0)));
        let payload = ChangePayload::from_record(ChangeKind::Update, record.clone()).unwrap();
        assert_eq!(payload.to_op(), RemoteOp::Update(record.clone()));
        assert!(ChangePayload::from_record(ChangeKind::Delete, record).is_none());
    }

    #[test]
    fn test_generate_change_id_format() {
        let id = generate_change_id();
        assert!(id.starts_with("chg_"));
        assert_eq!(id.len(), 16);
    }
}
