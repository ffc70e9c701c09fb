//! Database migrations embedded at compile time.
//!
//! The base DDL in `schema.rs` is schema version
//! [`CURRENT_SCHEMA_VERSION`]. Later changes go in `/migrations/` at the crate
//! root as numbered SQL files, embedded with `include_str!` and listed in
//! `MIGRATIONS`, so the binary carries no runtime file dependencies.

use rusqlite::{Connection, Result};
use tracing::info;

use super::schema::CURRENT_SCHEMA_VERSION;

/// A single migration with version identifier and SQL content.
struct Migration {
    version: &'static str,
    sql: &'static str,
}

/// All migrations in order, applied on top of the base DDL.
///
/// Version names match the SQL filenames (without .sql extension).
const MIGRATIONS: &[Migration] = &[];

/// Schema version: the base DDL plus every embedded migration.
#[must_use]
pub fn latest_version() -> usize {
    usize::try_from(CURRENT_SCHEMA_VERSION).unwrap_or(0) + MIGRATIONS.len()
}

/// Run all pending migrations on the database.
///
/// Already-applied migrations (tracked in `schema_migrations`) are skipped,
/// so this is safe to call on every open.
///
/// # Errors
///
/// Returns an error if a migration fails to apply.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let applied: std::collections::HashSet<String> = conn
        .prepare("SELECT version FROM schema_migrations")?
        .query_map([], |row| row.get(0))?
        .collect::<Result<_, _>>()?;

    for migration in MIGRATIONS {
        if applied.contains(migration.version) {
            continue;
        }

        info!(version = migration.version, "Applying migration");

        conn.execute_batch(migration.sql)?;

        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![migration.version, chrono::Utc::now().timestamp_millis()],
        )?;
    }

    Ok(())
}
