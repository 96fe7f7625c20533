//! Core data models for the content-addressed media store.
//!
//! These entities represent the logical structure of stored files and their
//! derived variants. They map cleanly to database rows via `sqlx::FromRow`
//! and serialize naturally as JSON via `serde`.

pub mod file_record;
pub mod level;
