//! Base entity domain model.
//!
//! # Responsibility
//! - Define the canonical record and the activity policy it is judged by.
//! - Keep soft-delete, polymorphism and activity as separate capabilities.
//!
//! # Invariants
//! - Every record is identified by a stable `EntityId`.
//! - Deletion is a tombstone (`deleted_at`), not row removal.

pub mod activity;
pub mod entity;
