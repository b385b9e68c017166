//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `linkledger_core` linkage.
//! - Keep output deterministic for quick local sanity checks.

use linkledger_core::db::open_db_in_memory;
use linkledger_core::{IdentifyRequest, IdentityService, SqliteContactRepository};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("linkledger_core ping={}", linkledger_core::ping());
    println!("linkledger_core version={}", linkledger_core::core_version());

    // One in-memory identify round-trip proves the whole stack links:
    // migrations, repository probe, reconciliation, view building.
    let conn = open_db_in_memory()?;
    let repo = SqliteContactRepository::try_new(&conn)?;
    let service = IdentityService::new(repo);

    let view = service.identify(&IdentifyRequest::new(
        Some("probe@example.com"),
        Some("555-0100"),
    ))?;
    println!(
        "identify primary_contact_id={} emails={} phone_numbers={} secondaries={}",
        view.primary_contact_id,
        view.emails.len(),
        view.phone_numbers.len(),
        view.secondary_contact_ids.len()
    );

    Ok(())
}
