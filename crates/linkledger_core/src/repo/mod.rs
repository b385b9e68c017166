//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the narrow data access contract of the contact store.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Repository writes must validate drafts before persistence.
//! - Repository reads must reject invalid persisted state instead of
//!   masking it.

pub mod contact_repo;
