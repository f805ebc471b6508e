//! Core data models for the photo store.
//!
//! Records map to database rows via `sqlx::FromRow` and serialize as JSON
//! via `serde`.

pub mod photo;
