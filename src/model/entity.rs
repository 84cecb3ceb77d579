//! Pantry entity records carried by pending changes.
//!
//! Records serialize in camelCase so the remote service and the persisted
//! queue share one JSON shape. `updatedAt` drives the `Merge` conflict
//! strategy; it is optional because records created offline may not have
//! been stamped yet.

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::change::{ChangePayload, RecordChange};

/// The kinds of entity the engine knows how to synchronize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Product,
    Recipe,
    ShoppingList,
}

impl EntityKind {
    pub const ALL: [Self; 3] = [Self::Product, Self::Recipe, Self::ShoppingList];

    /// Wire name used in persisted changes and config keys.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Recipe => "recipe",
            Self::ShoppingList => "shoppingList",
        }
    }

    /// Remote collection that stores this kind.
    #[must_use]
    pub const fn collection(&self) -> &'static str {
        match self {
            Self::Product => "products",
            Self::Recipe => "recipes",
            Self::ShoppingList => "shoppingLists",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "product" => Ok(Self::Product),
            "recipe" => Ok(Self::Recipe),
            "shoppingList" | "shopping_list" => Ok(Self::ShoppingList),
            _ => Err(format!("Unknown entity kind: {s}")),
        }
    }
}

/// Behaviour shared by every synchronizable record type.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> &str;

    fn updated_at(&self) -> Option<DateTime<Utc>>;

    /// Lift a typed change for this record into the queue payload.
    fn wrap(change: RecordChange<Self>) -> ChangePayload;

    fn into_record(self) -> EntityRecord;

    /// Field-level checks applied before a change is accepted.
    ///
    /// # Errors
    ///
    /// Returns a human-readable message describing the first invalid field.
    fn validate(&self) -> Result<(), String> {
        if self.id().trim().is_empty() {
            return Err(format!("{} id must not be empty", Self::KIND));
        }
        Ok(())
    }
}

/// A pantry product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default = "default_quantity")]
    pub quantity: f64,
    #[serde(default)]
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_consumed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

const fn default_quantity() -> f64 {
    1.0
}

impl Product {
    /// Minimal product with the given id and name.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            quantity: default_quantity(),
            unit: String::new(),
            expiry_date: None,
            location: None,
            owner_id: None,
            category: None,
            barcode: None,
            notes: None,
            tags: Vec::new(),
            is_consumed: false,
            price: None,
            created_at,
            updated_at: None,
        }
    }
}

impl Entity for Product {
    const KIND: EntityKind = EntityKind::Product;

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn wrap(change: RecordChange<Self>) -> ChangePayload {
        ChangePayload::Product(change)
    }

    fn into_record(self) -> EntityRecord {
        EntityRecord::Product(self)
    }

    fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("product id must not be empty".to_string());
        }
        if self.name.trim().is_empty() {
            return Err("product name must not be empty".to_string());
        }
        if !self.quantity.is_finite() || self.quantity < 0.0 {
            return Err(format!("product quantity must be >= 0, got {}", self.quantity));
        }
        Ok(())
    }
}

/// One ingredient line of a recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeIngredient {
    pub name: String,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub optional: bool,
}

/// A saved recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub ingredients: Vec<RecipeIngredient>,
    #[serde(default)]
    pub instructions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servings: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preparation_time: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooking_time: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Entity for Recipe {
    const KIND: EntityKind = EntityKind::Recipe;

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn wrap(change: RecordChange<Self>) -> ChangePayload {
        ChangePayload::Recipe(change)
    }

    fn into_record(self) -> EntityRecord {
        EntityRecord::Recipe(self)
    }

    fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("recipe id must not be empty".to_string());
        }
        if self.name.trim().is_empty() {
            return Err("recipe name must not be empty".to_string());
        }
        if let Some(ing) = self.ingredients.iter().find(|i| i.name.trim().is_empty()) {
            return Err(format!("recipe ingredient has an empty name (unit: '{}')", ing.unit));
        }
        Ok(())
    }
}

/// One line on a shopping list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShoppingListItem {
    pub id: String,
    pub name: String,
    #[serde(default = "default_quantity")]
    pub quantity: f64,
    #[serde(default)]
    pub checked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_by: Option<String>,
}

/// A (possibly shared) shopping list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShoppingList {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub items: Vec<ShoppingListItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shared_with: Vec<String>,
    #[serde(default)]
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Entity for ShoppingList {
    const KIND: EntityKind = EntityKind::ShoppingList;

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn wrap(change: RecordChange<Self>) -> ChangePayload {
        ChangePayload::ShoppingList(change)
    }

    fn into_record(self) -> EntityRecord {
        EntityRecord::ShoppingList(self)
    }

    fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("shopping list id must not be empty".to_string());
        }
        if self.name.trim().is_empty() {
            return Err("shopping list name must not be empty".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for item in &self.items {
            if !seen.insert(item.id.as_str()) {
                return Err(format!("shopping list item id '{}' appears twice", item.id));
            }
        }
        Ok(())
    }
}

/// Any synchronizable record, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", content = "record", rename_all = "camelCase")]
pub enum EntityRecord {
    Product(Product),
    Recipe(Recipe),
    ShoppingList(ShoppingList),
}

impl EntityRecord {
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Product(_) => EntityKind::Product,
            Self::Recipe(_) => EntityKind::Recipe,
            Self::ShoppingList(_) => EntityKind::ShoppingList,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Product(p) => &p.id,
            Self::Recipe(r) => &r.id,
            Self::ShoppingList(l) => &l.id,
        }
    }

    #[must_use]
    pub const fn updated_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Product(p) => p.updated_at,
            Self::Recipe(r) => r.updated_at,
            Self::ShoppingList(l) => l.updated_at,
        }
    }

    /// Field checks for the wrapped record.
    ///
    /// # Errors
    ///
    /// Returns the first validation message from the wrapped record.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Product(p) => p.validate(),
            Self::Recipe(r) => r.validate(),
            Self::ShoppingList(l) => l.validate(),
        }
    }

    /// The bare record as JSON, without the kind tag.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::Product(p) => serde_json::to_value(p),
            Self::Recipe(r) => serde_json::to_value(r),
            Self::ShoppingList(l) => serde_json::to_value(l),
        }
    }

    /// Parse a bare JSON record of the given kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the value does not match the kind's schema.
    pub fn from_value(kind: EntityKind, value: serde_json::Value) -> serde_json::Result<Self> {
        Ok(match kind {
            EntityKind::Product => Self::Product(serde_json::from_value(value)?),
            EntityKind::Recipe => Self::Recipe(serde_json::from_value(value)?),
            EntityKind::ShoppingList => Self::ShoppingList(serde_json::from_value(value)?),
        })
    }
}
