use linkledger_core::db::open_db_in_memory;
use linkledger_core::{
    ContactRepository, IdentifyError, IdentifyRequest, IdentityService, LinkPrecedence,
    NewContact, SqliteContactRepository,
};
use rusqlite::{params, Connection};

#[test]
fn straddling_request_merges_clusters_under_the_elder() {
    let conn = open_db_in_memory().unwrap();
    let service = IdentityService::new(SqliteContactRepository::try_new(&conn).unwrap());
    service
        .identify(&IdentifyRequest::new(Some("a@x.com"), Some("100")))
        .unwrap();
    service
        .identify(&IdentifyRequest::new(Some("a@x.com"), Some("200")))
        .unwrap();
    service
        .identify(&IdentifyRequest::new(Some("b@y.com"), Some("300")))
        .unwrap();
    set_created_at(&conn, 1, 1_000);
    set_created_at(&conn, 2, 1_500);
    set_created_at(&conn, 3, 2_000);

    // Email from cluster 1, phone from cluster 3.
    let view = service
        .identify(&IdentifyRequest::new(Some("a@x.com"), Some("300")))
        .unwrap();

    assert_eq!(view.primary_contact_id, 1);
    assert_eq!(
        view.emails,
        vec!["a@x.com".to_string(), "b@y.com".to_string()]
    );
    assert_eq!(
        view.phone_numbers,
        vec!["100".to_string(), "200".to_string(), "300".to_string()]
    );
    assert_eq!(view.secondary_contact_ids, vec![2, 3]);

    // The merge itself persists no new row, even for a novel pair.
    assert_eq!(contact_count(&conn), 3);

    let (precedence, linked_id) = linkage(&conn, 3);
    assert_eq!(precedence, "secondary");
    assert_eq!(linked_id, Some(1));
}

#[test]
fn elder_survives_regardless_of_which_fragment_matched_it() {
    let conn = open_db_in_memory().unwrap();
    let service = IdentityService::new(SqliteContactRepository::try_new(&conn).unwrap());
    // The phone-matched cluster is the older one here.
    service
        .identify(&IdentifyRequest::new(Some("a@x.com"), Some("100")))
        .unwrap();
    service
        .identify(&IdentifyRequest::new(Some("b@y.com"), Some("300")))
        .unwrap();
    set_created_at(&conn, 1, 2_000);
    set_created_at(&conn, 2, 1_000);

    let view = service
        .identify(&IdentifyRequest::new(Some("a@x.com"), Some("300")))
        .unwrap();

    assert_eq!(view.primary_contact_id, 2);
    let (precedence, linked_id) = linkage(&conn, 1);
    assert_eq!(precedence, "secondary");
    assert_eq!(linked_id, Some(2));
}

#[test]
fn equal_creation_times_keep_the_lower_id_as_primary() {
    let conn = open_db_in_memory().unwrap();
    let service = IdentityService::new(SqliteContactRepository::try_new(&conn).unwrap());
    service
        .identify(&IdentifyRequest::new(Some("a@x.com"), Some("100")))
        .unwrap();
    service
        .identify(&IdentifyRequest::new(Some("b@y.com"), Some("300")))
        .unwrap();
    set_created_at(&conn, 1, 1_000);
    set_created_at(&conn, 2, 1_000);

    let view = service
        .identify(&IdentifyRequest::new(Some("a@x.com"), Some("300")))
        .unwrap();

    assert_eq!(view.primary_contact_id, 1);
}

#[test]
fn merge_flattens_the_junior_clusters_dependents() {
    let conn = open_db_in_memory().unwrap();
    let service = IdentityService::new(SqliteContactRepository::try_new(&conn).unwrap());
    service
        .identify(&IdentifyRequest::new(Some("a@x.com"), Some("100")))
        .unwrap();
    service
        .identify(&IdentifyRequest::new(Some("b@y.com"), Some("300")))
        .unwrap();
    // Grow the junior cluster before the merge.
    service
        .identify(&IdentifyRequest::new(Some("d@w.com"), Some("300")))
        .unwrap();
    set_created_at(&conn, 1, 1_000);
    set_created_at(&conn, 2, 2_000);
    set_created_at(&conn, 3, 2_500);

    let view = service
        .identify(&IdentifyRequest::new(Some("a@x.com"), Some("300")))
        .unwrap();

    assert_eq!(view.primary_contact_id, 1);
    assert_eq!(view.secondary_contact_ids, vec![2, 3]);

    // Former dependent of the junior now links straight to the elder.
    let (_, linked_id) = linkage(&conn, 3);
    assert_eq!(linked_id, Some(1));

    // No two-hop chains anywhere.
    for id in [2, 3] {
        let (precedence, linked_id) = linkage(&conn, id);
        assert_eq!(precedence, "secondary");
        let (parent_precedence, _) = linkage(&conn, linked_id.unwrap());
        assert_eq!(parent_precedence, "primary");
    }
}

#[test]
fn merged_view_is_stable_on_repeat_requests() {
    let conn = open_db_in_memory().unwrap();
    let service = IdentityService::new(SqliteContactRepository::try_new(&conn).unwrap());
    service
        .identify(&IdentifyRequest::new(Some("a@x.com"), Some("100")))
        .unwrap();
    service
        .identify(&IdentifyRequest::new(Some("b@y.com"), Some("300")))
        .unwrap();
    set_created_at(&conn, 1, 1_000);
    set_created_at(&conn, 2, 2_000);

    let merged = service
        .identify(&IdentifyRequest::new(Some("a@x.com"), Some("300")))
        .unwrap();
    let repeated = service
        .identify(&IdentifyRequest::new(Some("a@x.com"), Some("300")))
        .unwrap();

    assert_eq!(merged, repeated);
    assert_eq!(contact_count(&conn), 2);
}

#[test]
fn secondary_pointing_to_invisible_primary_is_an_integrity_error() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteContactRepository::try_new(&conn).unwrap();
    let primary = repo
        .create_contact(&NewContact::primary(Some("a@x.com"), Some("100")))
        .unwrap();
    let secondary = repo
        .create_contact(&NewContact::secondary_of(primary.id, "c@z.com", "300"))
        .unwrap();
    let service = IdentityService::new(repo);

    // Corrupt the store: tombstone the primary out from under its
    // secondary.
    conn.execute(
        "UPDATE contacts SET deleted_at = 42 WHERE id = ?1;",
        [primary.id],
    )
    .unwrap();

    let err = service
        .identify(&IdentifyRequest::new(Some("c@z.com"), Some("999")))
        .unwrap_err();

    match err {
        IdentifyError::DanglingLink {
            secondary_id,
            linked_id,
        } => {
            assert_eq!(secondary_id, secondary.id);
            assert_eq!(linked_id, Some(primary.id));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn secondary_chained_to_a_secondary_is_an_integrity_error() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteContactRepository::try_new(&conn).unwrap();
    let primary = repo
        .create_contact(&NewContact::primary(Some("a@x.com"), Some("100")))
        .unwrap();
    let middle = repo
        .create_contact(&NewContact::secondary_of(primary.id, "c@z.com", "300"))
        .unwrap();
    let tail = repo
        .create_contact(&NewContact::secondary_of(primary.id, "e@v.com", "500"))
        .unwrap();
    let service = IdentityService::new(repo);

    // Corrupt the store: chain the tail behind another secondary.
    conn.execute(
        "UPDATE contacts SET linked_id = ?1 WHERE id = ?2;",
        params![middle.id, tail.id],
    )
    .unwrap();

    let err = service
        .identify(&IdentifyRequest::new(Some("e@v.com"), None))
        .unwrap_err();
    assert!(matches!(err, IdentifyError::DanglingLink { .. }));
}

#[test]
fn demoted_primary_stays_secondary_forever() {
    let conn = open_db_in_memory().unwrap();
    let service = IdentityService::new(SqliteContactRepository::try_new(&conn).unwrap());
    service
        .identify(&IdentifyRequest::new(Some("a@x.com"), Some("100")))
        .unwrap();
    service
        .identify(&IdentifyRequest::new(Some("b@y.com"), Some("300")))
        .unwrap();
    set_created_at(&conn, 1, 1_000);
    set_created_at(&conn, 2, 2_000);
    service
        .identify(&IdentifyRequest::new(Some("a@x.com"), Some("300")))
        .unwrap();

    // Re-identifying the demoted cluster's own pair must answer through
    // the surviving elder without promoting anything back.
    let view = service
        .identify(&IdentifyRequest::new(Some("b@y.com"), Some("300")))
        .unwrap();

    assert_eq!(view.primary_contact_id, 1);
    let (precedence, _) = linkage(&conn, 2);
    assert_eq!(precedence, "secondary");
}

#[test]
fn merge_preserves_precedence_model_roundtrip() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteContactRepository::try_new(&conn).unwrap();
    let elder = repo
        .create_contact(&NewContact::primary(Some("a@x.com"), Some("100")))
        .unwrap();
    let junior = repo
        .create_contact(&NewContact::primary(Some("b@y.com"), Some("300")))
        .unwrap();

    repo.merge_clusters(elder.id, junior.id).unwrap();

    let junior_after = repo.get_contact(junior.id).unwrap().unwrap();
    assert_eq!(junior_after.link_precedence, LinkPrecedence::Secondary);
    assert!(junior_after.validate().is_ok());
    assert!(junior_after.updated_at >= junior.updated_at);
}

fn contact_count(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM contacts;", [], |row| row.get(0))
        .unwrap()
}

fn set_created_at(conn: &Connection, id: i64, created_at: i64) {
    conn.execute(
        "UPDATE contacts SET created_at = ?1 WHERE id = ?2;",
        params![created_at, id],
    )
    .unwrap();
}

fn linkage(conn: &Connection, id: i64) -> (String, Option<i64>) {
    conn.query_row(
        "SELECT link_precedence, linked_id FROM contacts WHERE id = ?1;",
        [id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .unwrap()
}
