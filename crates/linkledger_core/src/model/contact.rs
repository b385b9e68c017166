//! Contact domain model.
//!
//! # Responsibility
//! - Define the canonical record for one identifying fragment.
//! - Express the primary/secondary linkage shape of identity clusters.
//!
//! # Invariants
//! - `id` is store-assigned and never reused for another contact.
//! - At least one of `email` / `phone_number` is present.
//! - `linked_id` is present exactly when precedence is secondary, and a
//!   secondary always links directly to a primary (clusters are flat).
//! - `deleted_at` is the source of truth for tombstone state.
//!
//! # See also
//! - docs/architecture/data-model.md

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Store-assigned identifier for every contact row.
///
/// Kept as a type alias to make semantic intent explicit in signatures.
pub type ContactId = i64;

/// Linkage role of a contact within its identity cluster.
///
/// Transitions are one-directional: a primary may be demoted to secondary
/// during a cluster merge, never the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPrecedence {
    /// Canonical root record of an identity cluster.
    Primary,
    /// Additional fragment of the same identity, linked to one primary.
    Secondary,
}

/// Canonical record for one identifying fragment of a person.
///
/// Field names serialize in camelCase to match the external boundary
/// contract consumed by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    /// Store-assigned row id, immutable once created.
    pub id: ContactId,
    /// Optional email fragment. Immutable after creation.
    pub email: Option<String>,
    /// Optional phone fragment. Immutable after creation.
    pub phone_number: Option<String>,
    /// Cluster role. Only ever changes primary -> secondary.
    pub link_precedence: LinkPrecedence,
    /// Id of the cluster primary; present exactly for secondaries.
    pub linked_id: Option<ContactId>,
    /// Epoch ms creation timestamp; seniority tie-break input.
    pub created_at: i64,
    /// Epoch ms update timestamp.
    pub updated_at: i64,
    /// Epoch ms soft-delete marker. Deleted rows are invisible to lookups.
    pub deleted_at: Option<i64>,
}

impl Contact {
    /// Returns whether this contact is a cluster primary.
    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }

    /// Returns whether this contact should be considered visible/active.
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Validates structural linkage coherence of this record.
    ///
    /// # Errors
    /// - `MissingIdentifiers` when both fragments are absent.
    /// - `MissingLink` when a secondary carries no `linked_id`.
    /// - `UnexpectedLink` when a primary carries a `linked_id`.
    /// - `SelfLink` when a contact links to itself.
    pub fn validate(&self) -> Result<(), ContactValidationError> {
        if self.email.is_none() && self.phone_number.is_none() {
            return Err(ContactValidationError::MissingIdentifiers);
        }
        match (self.link_precedence, self.linked_id) {
            (LinkPrecedence::Secondary, None) => Err(ContactValidationError::MissingLink(self.id)),
            (LinkPrecedence::Primary, Some(_)) => {
                Err(ContactValidationError::UnexpectedLink(self.id))
            }
            (LinkPrecedence::Secondary, Some(linked_id)) if linked_id == self.id => {
                Err(ContactValidationError::SelfLink(self.id))
            }
            _ => Ok(()),
        }
    }
}

/// Creation draft for a new contact row.
///
/// The store assigns `id` and timestamps; callers only decide the
/// fragments and the linkage target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    /// Optional email fragment.
    pub email: Option<String>,
    /// Optional phone fragment.
    pub phone_number: Option<String>,
    /// `None` creates a primary; `Some(id)` creates a secondary under `id`.
    pub linked_id: Option<ContactId>,
}

impl NewContact {
    /// Draft for a new cluster root.
    pub fn primary(email: Option<&str>, phone_number: Option<&str>) -> Self {
        Self {
            email: email.map(str::to_string),
            phone_number: phone_number.map(str::to_string),
            linked_id: None,
        }
    }

    /// Draft for a new fragment under an existing primary.
    pub fn secondary_of(primary_id: ContactId, email: &str, phone_number: &str) -> Self {
        Self {
            email: Some(email.to_string()),
            phone_number: Some(phone_number.to_string()),
            linked_id: Some(primary_id),
        }
    }

    /// Validates that this draft can become a well-formed contact.
    pub fn validate(&self) -> Result<(), ContactValidationError> {
        if self.email.is_none() && self.phone_number.is_none() {
            return Err(ContactValidationError::MissingIdentifiers);
        }
        Ok(())
    }
}

/// Structural validation error for contact records and drafts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactValidationError {
    /// Both email and phone number are absent.
    MissingIdentifiers,
    /// A secondary contact carries no link to its primary.
    MissingLink(ContactId),
    /// A primary contact carries a linkage reference.
    UnexpectedLink(ContactId),
    /// A contact links to itself.
    SelfLink(ContactId),
}

impl Display for ContactValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingIdentifiers => {
                write!(f, "contact needs an email or a phone number")
            }
            Self::MissingLink(id) => {
                write!(f, "secondary contact {id} has no linked primary")
            }
            Self::UnexpectedLink(id) => {
                write!(f, "primary contact {id} must not carry a linked id")
            }
            Self::SelfLink(id) => write!(f, "contact {id} links to itself"),
        }
    }
}

impl Error for ContactValidationError {}
