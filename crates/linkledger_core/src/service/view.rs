//! Identity summary projection.
//!
//! # Responsibility
//! - Aggregate a resolved primary and its secondaries into the externally
//!   visible identity summary.
//!
//! # Invariants
//! - `emails` and `phone_numbers` are insertion-ordered and duplicate-free,
//!   with the primary's own values first.
//! - `primary_contact_id` always refers to a primary-precedence record.

use crate::model::contact::{Contact, ContactId};
use crate::repo::contact_repo::{ContactRepository, RepoResult};
use serde::{Deserialize, Serialize};

/// Externally visible summary of one identity cluster.
///
/// Serializes in camelCase to match the boundary contract consumed by the
/// transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityView {
    /// Id of the cluster's primary contact.
    pub primary_contact_id: ContactId,
    /// Deduplicated emails, primary's own first, then retrieval order.
    pub emails: Vec<String>,
    /// Deduplicated phone numbers, primary's own first, then retrieval order.
    pub phone_numbers: Vec<String>,
    /// Ids of all linked secondaries in retrieval order.
    pub secondary_contact_ids: Vec<ContactId>,
}

/// Builds the identity summary for one resolved primary.
pub(crate) fn build_identity_view<R: ContactRepository>(
    repo: &R,
    primary: &Contact,
) -> RepoResult<IdentityView> {
    let secondaries = repo.list_secondaries(primary.id)?;

    let mut emails = Vec::new();
    let mut phone_numbers = Vec::new();
    push_unique(&mut emails, primary.email.as_deref());
    push_unique(&mut phone_numbers, primary.phone_number.as_deref());

    let mut secondary_contact_ids = Vec::with_capacity(secondaries.len());
    for secondary in &secondaries {
        push_unique(&mut emails, secondary.email.as_deref());
        push_unique(&mut phone_numbers, secondary.phone_number.as_deref());
        secondary_contact_ids.push(secondary.id);
    }

    Ok(IdentityView {
        primary_contact_id: primary.id,
        emails,
        phone_numbers,
        secondary_contact_ids,
    })
}

// Sequence + membership check instead of a set, so ordering never depends
// on hash iteration.
fn push_unique(values: &mut Vec<String>, candidate: Option<&str>) {
    if let Some(candidate) = candidate {
        if !values.iter().any(|existing| existing == candidate) {
            values.push(candidate.to_string());
        }
    }
}
