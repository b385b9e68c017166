//! Domain model for identity clusters.
//!
//! # Responsibility
//! - Define the canonical contact record used by core business logic.
//! - Keep one storage shape for both primary and secondary precedence.
//!
//! # Invariants
//! - Every contact is identified by a store-assigned `ContactId`.
//! - Deletion is represented by soft-delete tombstones, not hard delete.

pub mod contact;
