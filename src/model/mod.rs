//! Data models for pantry-sync.
//!
//! This module contains the domain models:
//! - Product, Recipe, ShoppingList (entity records)
//! - PendingChange and its typed payload

pub mod change;
pub mod entity;

pub use change::{
    generate_change_id, ChangeKind, ChangePayload, NewChange, PendingChange, Priority,
    RecordChange, RemoteOp,
};
pub use entity::{
    Entity, EntityKind, EntityRecord, Product, Recipe, RecipeIngredient, ShoppingList,
    ShoppingListItem,
};
