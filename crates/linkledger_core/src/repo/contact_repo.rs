//! Contact repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide the fixed store operations the reconciliation flow needs:
//!   exact lookup, either-field lookup, create, cluster merge, and
//!   secondary listing.
//! - Keep SQL details inside the core persistence boundary.
//!
//! # Invariants
//! - Soft-deleted rows are invisible to every operation.
//! - `merge_clusters` applies demotion and dependent relinking as one
//!   atomic unit; no reader can observe a two-hop link chain.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::contact::{
    Contact, ContactId, ContactValidationError, LinkPrecedence, NewContact,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};

const CONTACT_SELECT_SQL: &str = "SELECT
    id,
    email,
    phone_number,
    link_precedence,
    linked_id,
    created_at,
    updated_at,
    deleted_at
FROM contacts";

pub type RepoResult<T> = Result<T, RepoError>;

/// Generic repository error for contact persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    /// Draft or persisted record fails structural validation.
    Validation(ContactValidationError),
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Target contact does not exist, is soft-deleted, or has the wrong
    /// precedence for the requested mutation.
    NotFound(ContactId),
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Required column is missing from an expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
}

impl RepoError {
    /// Returns whether this error is a SQLite busy/locked serialization
    /// conflict, the only failure class callers may retry.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::Db(DbError::Sqlite(rusqlite::Error::SqliteFailure(inner, _)))
                if matches!(
                    inner.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                )
        )
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "contact not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted contact data: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "connection not migrated: expected schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => write!(f, "required table missing: {table}"),
            Self::MissingRequiredColumn { table, column } => {
                write!(f, "required column missing: {table}.{column}")
            }
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ContactValidationError> for RepoError {
    fn from(value: ContactValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Repository interface for the contact store.
///
/// Each operation has a fixed input/output shape; callers never compose
/// ad hoc predicates. Absent lookup fields mean "unconstrained", never
/// "must be null".
pub trait ContactRepository {
    /// Finds the single visible record where every supplied field matches
    /// exactly. Deterministic pick: earliest `created_at`, then lowest id.
    fn find_exact(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> RepoResult<Option<Contact>>;
    /// Finds all visible records matching the supplied email OR the
    /// supplied phone number, ordered by `created_at` then id.
    fn find_by_either(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> RepoResult<Vec<Contact>>;
    /// Loads one visible contact by id.
    fn get_contact(&self, id: ContactId) -> RepoResult<Option<Contact>>;
    /// Lists visible secondaries linked to one primary, in creation order.
    fn list_secondaries(&self, primary_id: ContactId) -> RepoResult<Vec<Contact>>;
    /// Persists a new contact row and returns it with store-assigned
    /// id and timestamps.
    fn create_contact(&self, draft: &NewContact) -> RepoResult<Contact>;
    /// Demotes `junior_id` to a secondary of `elder_id` and re-points
    /// every dependent of the junior to the elder, atomically. Returns
    /// the number of re-pointed dependents.
    fn merge_clusters(&self, elder_id: ContactId, junior_id: ContactId) -> RepoResult<usize>;
    /// Runs `op` as one atomic unit of work: every read in `op` observes
    /// a stable snapshot and either all of its writes commit or none do.
    fn run_atomic<T, E>(&self, op: impl FnOnce(&Self) -> Result<T, E>) -> Result<T, E>
    where
        Self: Sized,
        E: From<RepoError>;
}

/// SQLite-backed contact repository.
#[derive(Debug)]
pub struct SqliteContactRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteContactRepository<'conn> {
    /// Creates a repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_contacts_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl ContactRepository for SqliteContactRepository<'_> {
    fn find_exact(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> RepoResult<Option<Contact>> {
        let mut sql = format!("{CONTACT_SELECT_SQL} WHERE deleted_at IS NULL");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(email) = email {
            sql.push_str(" AND email = ?");
            bind_values.push(Value::Text(email.to_string()));
        }
        if let Some(phone_number) = phone_number {
            sql.push_str(" AND phone_number = ?");
            bind_values.push(Value::Text(phone_number.to_string()));
        }

        // Identifier-free requests are rejected upstream; without a
        // predicate this must not match the whole table.
        if bind_values.is_empty() {
            return Ok(None);
        }

        sql.push_str(" ORDER BY created_at ASC, id ASC LIMIT 1;");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_contact_row(row)?));
        }

        Ok(None)
    }

    fn find_by_either(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> RepoResult<Vec<Contact>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(email) = email {
            clauses.push("email = ?");
            bind_values.push(Value::Text(email.to_string()));
        }
        if let Some(phone_number) = phone_number {
            clauses.push("phone_number = ?");
            bind_values.push(Value::Text(phone_number.to_string()));
        }

        if clauses.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "{CONTACT_SELECT_SQL}
             WHERE deleted_at IS NULL
               AND ({})
             ORDER BY created_at ASC, id ASC;",
            clauses.join(" OR ")
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut contacts = Vec::new();

        while let Some(row) = rows.next()? {
            contacts.push(parse_contact_row(row)?);
        }

        Ok(contacts)
    }

    fn get_contact(&self, id: ContactId) -> RepoResult<Option<Contact>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{CONTACT_SELECT_SQL} WHERE id = ?1 AND deleted_at IS NULL;"))?;

        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_contact_row(row)?));
        }

        Ok(None)
    }

    fn list_secondaries(&self, primary_id: ContactId) -> RepoResult<Vec<Contact>> {
        let mut stmt = self.conn.prepare(&format!(
            "{CONTACT_SELECT_SQL}
             WHERE linked_id = ?1
               AND link_precedence = 'secondary'
               AND deleted_at IS NULL
             ORDER BY created_at ASC, id ASC;"
        ))?;

        let mut rows = stmt.query([primary_id])?;
        let mut contacts = Vec::new();

        while let Some(row) = rows.next()? {
            contacts.push(parse_contact_row(row)?);
        }

        Ok(contacts)
    }

    fn create_contact(&self, draft: &NewContact) -> RepoResult<Contact> {
        draft.validate()?;

        let precedence = if draft.linked_id.is_some() {
            LinkPrecedence::Secondary
        } else {
            LinkPrecedence::Primary
        };

        self.conn.execute(
            "INSERT INTO contacts (
                email,
                phone_number,
                linked_id,
                link_precedence
            ) VALUES (?1, ?2, ?3, ?4);",
            params![
                draft.email.as_deref(),
                draft.phone_number.as_deref(),
                draft.linked_id,
                link_precedence_to_db(precedence),
            ],
        )?;

        load_required_contact(self.conn, self.conn.last_insert_rowid())
    }

    fn merge_clusters(&self, elder_id: ContactId, junior_id: ContactId) -> RepoResult<usize> {
        if elder_id == junior_id {
            return Err(RepoError::InvalidData(format!(
                "cannot merge contact {elder_id} into itself"
            )));
        }

        // Savepoint instead of a transaction so the pair stays atomic
        // whether or not an outer unit of work is already open.
        self.conn.execute_batch("SAVEPOINT merge_clusters;")?;
        match demote_and_relink(self.conn, elder_id, junior_id) {
            Ok(relinked) => {
                self.conn.execute_batch("RELEASE merge_clusters;")?;
                Ok(relinked)
            }
            Err(err) => {
                let _ = self
                    .conn
                    .execute_batch("ROLLBACK TO merge_clusters; RELEASE merge_clusters;");
                Err(err)
            }
        }
    }

    fn run_atomic<T, E>(&self, op: impl FnOnce(&Self) -> Result<T, E>) -> Result<T, E>
    where
        E: From<RepoError>,
    {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(|err| E::from(RepoError::from(err)))?;
        let value = op(self)?;
        tx.commit().map_err(|err| E::from(RepoError::from(err)))?;
        Ok(value)
    }
}

fn demote_and_relink(
    conn: &Connection,
    elder_id: ContactId,
    junior_id: ContactId,
) -> RepoResult<usize> {
    let elder_is_primary: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM contacts
            WHERE id = ?1
              AND link_precedence = 'primary'
              AND deleted_at IS NULL
        );",
        [elder_id],
        |row| row.get(0),
    )?;
    if elder_is_primary == 0 {
        return Err(RepoError::NotFound(elder_id));
    }

    let demoted = conn.execute(
        "UPDATE contacts
         SET link_precedence = 'secondary',
             linked_id = ?1,
             updated_at = (strftime('%s', 'now') * 1000)
         WHERE id = ?2
           AND link_precedence = 'primary'
           AND deleted_at IS NULL;",
        params![elder_id, junior_id],
    )?;
    if demoted == 0 {
        return Err(RepoError::NotFound(junior_id));
    }

    let relinked = conn.execute(
        "UPDATE contacts
         SET linked_id = ?1,
             updated_at = (strftime('%s', 'now') * 1000)
         WHERE linked_id = ?2
           AND link_precedence = 'secondary'
           AND deleted_at IS NULL;",
        params![elder_id, junior_id],
    )?;

    Ok(relinked)
}

fn load_required_contact(conn: &Connection, id: ContactId) -> RepoResult<Contact> {
    let mut stmt =
        conn.prepare(&format!("{CONTACT_SELECT_SQL} WHERE id = ?1 AND deleted_at IS NULL;"))?;

    let mut rows = stmt.query([id])?;
    match rows.next()? {
        Some(row) => parse_contact_row(row),
        None => Err(RepoError::NotFound(id)),
    }
}

fn parse_contact_row(row: &Row<'_>) -> RepoResult<Contact> {
    let precedence_text: String = row.get("link_precedence")?;
    let link_precedence = parse_link_precedence(&precedence_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid link precedence `{precedence_text}` in contacts.link_precedence"
        ))
    })?;

    let contact = Contact {
        id: row.get("id")?,
        email: row.get("email")?,
        phone_number: row.get("phone_number")?,
        link_precedence,
        linked_id: row.get("linked_id")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        deleted_at: row.get("deleted_at")?,
    };
    contact.validate()?;
    Ok(contact)
}

fn link_precedence_to_db(precedence: LinkPrecedence) -> &'static str {
    match precedence {
        LinkPrecedence::Primary => "primary",
        LinkPrecedence::Secondary => "secondary",
    }
}

fn parse_link_precedence(value: &str) -> Option<LinkPrecedence> {
    match value {
        "primary" => Some(LinkPrecedence::Primary),
        "secondary" => Some(LinkPrecedence::Secondary),
        _ => None,
    }
}

fn ensure_contacts_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    if !table_exists(conn, "contacts")? {
        return Err(RepoError::MissingRequiredTable("contacts"));
    }

    for column in [
        "id",
        "email",
        "phone_number",
        "linked_id",
        "link_precedence",
        "created_at",
        "updated_at",
        "deleted_at",
    ] {
        if !column_exists(conn, "contacts", column)? {
            return Err(RepoError::MissingRequiredColumn {
                table: "contacts",
                column,
            });
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM pragma_table_info(?1)
            WHERE name = ?2
        );",
        params![table, column],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}
