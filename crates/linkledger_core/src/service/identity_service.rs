//! Identity reconciliation use-case service.
//!
//! # Responsibility
//! - Provide the `identify` entry point over a contact repository.
//! - Execute reconciliation decisions transactionally and build the
//!   externally visible identity summary.
//!
//! # Invariants
//! - Validation failures are detected before any store access.
//! - Each request commits one consistent mutation or none.
//! - Only busy/locked store conflicts are retried, with bounded backoff;
//!   linkage-integrity failures are surfaced, never retried.
//! - Log events carry presence flags and row ids, never raw fragments.

use crate::model::contact::{Contact, ContactId, NewContact};
use crate::repo::contact_repo::{ContactRepository, RepoError, RepoResult};
use crate::service::reconcile::{decide_cluster_action, partition_matches, ClusterAction};
use crate::service::view::{build_identity_view, IdentityView};
use log::{error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::thread;
use std::time::{Duration, Instant};

const MAX_CONFLICT_RETRIES: u32 = 3;
const CONFLICT_BACKOFF_START: Duration = Duration::from_millis(20);

/// Identify request carrying raw identifying fragments.
///
/// Fragments are trimmed before matching; blank strings count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifyRequest {
    /// Optional email fragment.
    pub email: Option<String>,
    /// Optional phone fragment.
    pub phone_number: Option<String>,
}

impl IdentifyRequest {
    /// Builds a request from borrowed fragments.
    pub fn new(email: Option<&str>, phone_number: Option<&str>) -> Self {
        Self {
            email: email.map(str::to_string),
            phone_number: phone_number.map(str::to_string),
        }
    }
}

/// Service error for the identify use-case.
#[derive(Debug)]
pub enum IdentifyError {
    /// Both identifying fields are absent or blank; nothing was touched.
    MissingIdentifiers,
    /// A secondary does not resolve to a visible primary; stored linkage
    /// is corrupt and the request cannot be answered.
    DanglingLink {
        secondary_id: ContactId,
        linked_id: Option<ContactId>,
    },
    /// Persistence-layer failure.
    Store(RepoError),
}

impl IdentifyError {
    fn is_retriable(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_busy())
    }

    fn code(&self) -> &'static str {
        match self {
            Self::MissingIdentifiers => "missing_identifiers",
            Self::DanglingLink { .. } => "dangling_link",
            Self::Store(_) => "store_failure",
        }
    }
}

impl Display for IdentifyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingIdentifiers => {
                write!(f, "identify request needs an email or a phone number")
            }
            Self::DanglingLink {
                secondary_id,
                linked_id,
            } => write!(
                f,
                "secondary contact {secondary_id} does not resolve to a visible primary (linked_id={linked_id:?})"
            ),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for IdentifyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for IdentifyError {
    fn from(value: RepoError) -> Self {
        Self::Store(value)
    }
}

/// Use-case service resolving identifying fragments into identity clusters.
pub struct IdentityService<R: ContactRepository> {
    repo: R,
}

impl<R: ContactRepository> IdentityService<R> {
    /// Creates a service using the provided repository implementation.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Resolves the fragments of `request` into an identity summary,
    /// creating or merging contact records as required.
    ///
    /// # Contract
    /// - Requests with neither fragment fail with `MissingIdentifiers`
    ///   before any store access.
    /// - The read-decide-write sequence runs as one atomic unit; a reader
    ///   never observes a partially applied merge or creation.
    /// - The returned view always refers to a primary-precedence record.
    ///
    /// # Side effects
    /// - May persist one new contact row or demote merged primaries.
    /// - Emits `identify` logging events with duration and status.
    pub fn identify(&self, request: &IdentifyRequest) -> Result<IdentityView, IdentifyError> {
        let started_at = Instant::now();
        let email = normalize_fragment(request.email.as_deref());
        let phone_number = normalize_fragment(request.phone_number.as_deref());

        info!(
            "event=identify module=service status=start has_email={} has_phone={}",
            email.is_some(),
            phone_number.is_some()
        );

        if email.is_none() && phone_number.is_none() {
            warn!("event=identify module=service status=error error_code=missing_identifiers");
            return Err(IdentifyError::MissingIdentifiers);
        }

        let mut attempt: u32 = 0;
        let outcome = loop {
            let result = self
                .repo
                .run_atomic(|repo| reconcile_request(repo, email, phone_number));
            match result {
                Err(err) if err.is_retriable() && attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    let backoff = CONFLICT_BACKOFF_START * 2u32.pow(attempt - 1);
                    warn!(
                        "event=identify_retry module=service status=retry attempt={} backoff_ms={}",
                        attempt,
                        backoff.as_millis()
                    );
                    thread::sleep(backoff);
                }
                other => break other,
            }
        };

        match &outcome {
            Ok(view) => info!(
                "event=identify module=service status=ok duration_ms={} primary_id={} secondaries={}",
                started_at.elapsed().as_millis(),
                view.primary_contact_id,
                view.secondary_contact_ids.len()
            ),
            Err(err) => error!(
                "event=identify module=service status=error duration_ms={} error_code={} error={}",
                started_at.elapsed().as_millis(),
                err.code(),
                err
            ),
        }

        outcome
    }
}

fn reconcile_request<R: ContactRepository>(
    repo: &R,
    email: Option<&str>,
    phone_number: Option<&str>,
) -> Result<IdentityView, IdentifyError> {
    if let Some(exact) = repo.find_exact(email, phone_number)? {
        // Known fragment set: no write, but the response must come from
        // the cluster's true primary even when the match is a secondary.
        let primary = resolve_primary_of(repo, exact)?;
        return Ok(build_identity_view(repo, &primary)?);
    }

    let matches = repo.find_by_either(email, phone_number)?;
    let action = decide_cluster_action(partition_matches(matches));

    let primary = match action {
        ClusterAction::CreateCluster => {
            let created = repo.create_contact(&NewContact::primary(email, phone_number))?;
            info!(
                "event=cluster_create module=service status=ok primary_id={}",
                created.id
            );
            created
        }
        ClusterAction::ExtendCluster { primary } => {
            maybe_add_secondary(repo, &primary, email, phone_number)?;
            primary
        }
        ClusterAction::AlreadyRepresented { primary } => primary,
        ClusterAction::MergeClusters { elder, juniors } => {
            for junior in juniors {
                let relinked = repo.merge_clusters(elder.id, junior.id)?;
                info!(
                    "event=cluster_merge module=service status=ok elder_id={} junior_id={} relinked={}",
                    elder.id, junior.id, relinked
                );
            }
            elder
        }
        ClusterAction::FollowLink { secondary } => {
            let primary = resolve_primary_of(repo, secondary)?;
            maybe_add_secondary(repo, &primary, email, phone_number)?;
            primary
        }
    };

    Ok(build_identity_view(repo, &primary)?)
}

fn resolve_primary_of<R: ContactRepository>(
    repo: &R,
    contact: Contact,
) -> Result<Contact, IdentifyError> {
    if contact.is_primary() {
        return Ok(contact);
    }

    let secondary_id = contact.id;
    let linked_id = contact.linked_id;
    let resolved = match linked_id {
        Some(linked_id) => repo.get_contact(linked_id)?,
        None => None,
    };

    match resolved {
        Some(primary) if primary.is_primary() => Ok(primary),
        _ => Err(IdentifyError::DanglingLink {
            secondary_id,
            linked_id,
        }),
    }
}

/// Persists a new secondary only when the request carried both fragments;
/// a single-field request matching an existing cluster is already fully
/// represented.
fn maybe_add_secondary<R: ContactRepository>(
    repo: &R,
    primary: &Contact,
    email: Option<&str>,
    phone_number: Option<&str>,
) -> RepoResult<()> {
    if let (Some(email), Some(phone_number)) = (email, phone_number) {
        let created =
            repo.create_contact(&NewContact::secondary_of(primary.id, email, phone_number))?;
        info!(
            "event=secondary_create module=service status=ok primary_id={} secondary_id={}",
            primary.id, created.id
        );
    }
    Ok(())
}

fn normalize_fragment(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
