//! # Incident Harness Core
//!
//! Runtime-agnostic logic for Incident Harness: data models, the error
//! taxonomy, vector utilities, the store abstraction, hybrid search, plan
//! parsing, and confidence routing.
//!
//! This crate contains no tokio, sqlx, HTTP clients, or filesystem I/O.
//! External services (embedder, planner, notifier, ticket tracker, OCR,
//! status enrichment) are reached only through the traits in [`providers`].

pub mod embedding;
pub mod error;
pub mod models;
pub mod plan;
pub mod providers;
pub mod routing;
pub mod search;
pub mod store;

pub use error::{Error, Result};
