//! Schema versioning for the job database.
//!
//! The applied version lives in SQLite's `user_version` pragma. Each step
//! runs in its own transaction together with the version bump, so a crash
//! mid-upgrade leaves the previous version intact.

use rusqlite::Connection;

use super::error::DatabaseError;

struct SchemaStep {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const STEPS: &[SchemaStep] = &[
    SchemaStep {
        version: 1,
        name: "generation_jobs",
        sql: include_str!("sql/001_create_generation_jobs.sql"),
    },
    SchemaStep {
        version: 2,
        name: "generated_units",
        sql: include_str!("sql/002_create_generated_units.sql"),
    },
    SchemaStep {
        version: 3,
        name: "job_lease_column",
        sql: include_str!("sql/003_add_lease_expires_at.sql"),
    },
];

/// Latest schema version this build knows about.
pub fn latest_version() -> u32 {
    STEPS.last().map(|s| s.version).unwrap_or(0)
}

pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.query_row("PRAGMA user_version", [], |r| r.get(0))?)
}

/// Brings the schema up to [`latest_version`]. A database written by a
/// newer build is rejected rather than touched.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    let current = schema_version(conn)?;
    if current > latest_version() {
        return Err(DatabaseError::Migration {
            version: current,
            reason: format!(
                "database schema is newer than this build supports (v{})",
                latest_version()
            ),
        });
    }

    for step in STEPS.iter().filter(|s| s.version > current) {
        log::info!("Applying schema v{} ({})", step.version, step.name);
        apply(conn, step).map_err(|e| DatabaseError::Migration {
            version: step.version,
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

fn apply(conn: &Connection, step: &SchemaStep) -> Result<(), rusqlite::Error> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(step.sql)?;
    // Pragmas take no bound parameters.
    tx.execute_batch(&format!("PRAGMA user_version = {}", step.version))?;
    tx.commit()
}
