//! Pure reconciliation decisions for identify requests.
//!
//! # Responsibility
//! - Partition a match set by linkage precedence.
//! - Decide the cluster action a request requires, as data, without I/O.
//!
//! # Invariants
//! - Seniority orders by `created_at`, then ascending id; decisions are
//!   reproducible for identical match sets.
//! - Deciding never mutates anything; execution is the service's job.

use crate::model::contact::Contact;
use std::cmp::Ordering;

/// Match set split by linkage precedence, retrieval order preserved.
#[derive(Debug, Clone, Default)]
pub(crate) struct MatchPartition {
    pub primaries: Vec<Contact>,
    pub secondaries: Vec<Contact>,
}

/// Splits a match set into primary- and secondary-precedence records.
pub(crate) fn partition_matches(matches: Vec<Contact>) -> MatchPartition {
    let mut partition = MatchPartition::default();
    for contact in matches {
        if contact.is_primary() {
            partition.primaries.push(contact);
        } else {
            partition.secondaries.push(contact);
        }
    }
    partition
}

/// Next step for one identify request, decided from the match set alone.
#[derive(Debug, Clone)]
pub(crate) enum ClusterAction {
    /// One primary matched and the fragment pair is not yet represented;
    /// the cluster may grow by one secondary.
    ExtendCluster { primary: Contact },
    /// One primary matched and a linked secondary already carries the
    /// fragment pair; nothing to persist.
    AlreadyRepresented { primary: Contact },
    /// The request straddles distinct primaries; every junior merges into
    /// the elder.
    MergeClusters {
        elder: Contact,
        juniors: Vec<Contact>,
    },
    /// Only secondaries matched; the true primary is behind the first
    /// match's link.
    FollowLink { secondary: Contact },
    /// Nothing matched; a new cluster root is needed.
    CreateCluster,
}

/// Decides the cluster action for one partitioned match set.
pub(crate) fn decide_cluster_action(partition: MatchPartition) -> ClusterAction {
    let MatchPartition {
        mut primaries,
        secondaries,
    } = partition;

    if primaries.is_empty() {
        return match secondaries.into_iter().next() {
            Some(secondary) => ClusterAction::FollowLink { secondary },
            None => ClusterAction::CreateCluster,
        };
    }

    primaries.sort_by(seniority_order);
    let elder = primaries.remove(0);

    if !primaries.is_empty() {
        return ClusterAction::MergeClusters {
            elder,
            juniors: primaries,
        };
    }

    if has_covering_secondary(&elder, &secondaries) {
        ClusterAction::AlreadyRepresented { primary: elder }
    } else {
        ClusterAction::ExtendCluster { primary: elder }
    }
}

/// Seniority: earliest `created_at` wins; ascending id breaks ties.
pub(crate) fn seniority_order(a: &Contact, b: &Contact) -> Ordering {
    (a.created_at, a.id).cmp(&(b.created_at, b.id))
}

/// A linked secondary whose fragments both differ from the primary's own
/// proves the requested pair already resolves into this cluster.
fn has_covering_secondary(primary: &Contact, secondaries: &[Contact]) -> bool {
    secondaries.iter().any(|secondary| {
        secondary.linked_id == Some(primary.id)
            && secondary.email != primary.email
            && secondary.phone_number != primary.phone_number
    })
}

#[cfg(test)]
mod tests {
    use super::{decide_cluster_action, partition_matches, ClusterAction};
    use crate::model::contact::{Contact, ContactId, LinkPrecedence};

    fn primary(id: ContactId, created_at: i64, email: &str, phone: &str) -> Contact {
        Contact {
            id,
            email: Some(email.to_string()),
            phone_number: Some(phone.to_string()),
            link_precedence: LinkPrecedence::Primary,
            linked_id: None,
            created_at,
            updated_at: created_at,
            deleted_at: None,
        }
    }

    fn secondary(id: ContactId, linked_id: ContactId, email: &str, phone: &str) -> Contact {
        Contact {
            id,
            email: Some(email.to_string()),
            phone_number: Some(phone.to_string()),
            link_precedence: LinkPrecedence::Secondary,
            linked_id: Some(linked_id),
            created_at: 5_000,
            updated_at: 5_000,
            deleted_at: None,
        }
    }

    #[test]
    fn empty_match_set_creates_a_cluster() {
        let action = decide_cluster_action(partition_matches(Vec::new()));
        assert!(matches!(action, ClusterAction::CreateCluster));
    }

    #[test]
    fn secondary_only_matches_follow_the_first_link() {
        let matches = vec![secondary(4, 1, "a@x.com", "100"), secondary(5, 1, "b@y.com", "200")];
        let action = decide_cluster_action(partition_matches(matches));
        match action {
            ClusterAction::FollowLink { secondary } => assert_eq!(secondary.id, 4),
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn single_primary_without_coverage_extends_the_cluster() {
        let matches = vec![primary(1, 1_000, "a@x.com", "100")];
        let action = decide_cluster_action(partition_matches(matches));
        match action {
            ClusterAction::ExtendCluster { primary } => assert_eq!(primary.id, 1),
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn covering_secondary_means_already_represented() {
        // Both of the secondary's fragments differ from the primary's own,
        // yet it links into the primary's cluster.
        let matches = vec![
            primary(1, 1_000, "a@x.com", "100"),
            secondary(2, 1, "c@z.com", "300"),
        ];
        let action = decide_cluster_action(partition_matches(matches));
        match action {
            ClusterAction::AlreadyRepresented { primary } => assert_eq!(primary.id, 1),
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn secondary_sharing_a_fragment_with_the_primary_does_not_cover() {
        let matches = vec![
            primary(1, 1_000, "a@x.com", "100"),
            secondary(2, 1, "a@x.com", "300"),
        ];
        let action = decide_cluster_action(partition_matches(matches));
        assert!(matches!(action, ClusterAction::ExtendCluster { .. }));
    }

    #[test]
    fn two_primaries_merge_with_the_earlier_as_elder() {
        let matches = vec![
            primary(3, 2_000, "b@y.com", "300"),
            primary(1, 1_000, "a@x.com", "100"),
        ];
        let action = decide_cluster_action(partition_matches(matches));
        match action {
            ClusterAction::MergeClusters { elder, juniors } => {
                assert_eq!(elder.id, 1);
                assert_eq!(juniors.len(), 1);
                assert_eq!(juniors[0].id, 3);
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn equal_creation_times_break_ties_by_ascending_id() {
        let matches = vec![
            primary(9, 1_000, "b@y.com", "300"),
            primary(2, 1_000, "a@x.com", "100"),
        ];
        let action = decide_cluster_action(partition_matches(matches));
        match action {
            ClusterAction::MergeClusters { elder, juniors } => {
                assert_eq!(elder.id, 2);
                assert_eq!(juniors[0].id, 9);
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn three_primaries_all_merge_into_the_single_elder() {
        let matches = vec![
            primary(5, 3_000, "c@z.com", "500"),
            primary(1, 1_000, "a@x.com", "100"),
            primary(3, 2_000, "b@y.com", "300"),
        ];
        let action = decide_cluster_action(partition_matches(matches));
        match action {
            ClusterAction::MergeClusters { elder, juniors } => {
                assert_eq!(elder.id, 1);
                let junior_ids: Vec<_> = juniors.iter().map(|c| c.id).collect();
                assert_eq!(junior_ids, vec![3, 5]);
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }
}
