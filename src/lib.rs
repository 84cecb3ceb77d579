//! pantry-sync - offline-first sync for pantry data
//!
//! This crate provides the sync engine and the `psync` CLI built on it.
//!
//! # Architecture
//!
//! - [`sync`] - Change queue, network monitor, scheduler, batch processor and conflict resolver
//! - [`model`] - Data types (Product, Recipe, ShoppingList, PendingChange)
//! - [`storage`] - Durable key/value contract with SQLite and in-memory backends
//! - [`config`] - Sync settings and the `config.json` file
//! - [`cli`] - Command-line interface using clap
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod storage;
pub mod sync;
pub mod validate;

pub use error::{Error, Result};
