//! Ledger schema migrations.
//!
//! # Responsibility
//! - List the ledger schema steps in the order they were introduced.
//! - Bring a connection from its recorded schema version to the latest one
//!   inside a single transaction.
//!
//! # Invariants
//! - Step versions start at 1 and increase by exactly 1.
//! - `PRAGMA user_version` always names the last step applied.
//! - A database newer than this binary is refused, never downgraded.

use crate::db::{DbError, DbResult};
use log::{error, info};
use rusqlite::{Connection, Transaction};
use std::time::Instant;

/// One schema step and the `user_version` it leaves behind.
#[derive(Debug, Clone, Copy)]
struct SchemaStep {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const SCHEMA_STEPS: &[SchemaStep] = &[
    SchemaStep {
        version: 1,
        name: "ledger",
        sql: include_str!("0001_ledger.sql"),
    },
    SchemaStep {
        version: 2,
        name: "media_files",
        sql: include_str!("0002_media_files.sql"),
    },
];

/// Schema version written by the newest step this binary knows.
pub fn latest_version() -> u32 {
    SCHEMA_STEPS.last().map_or(0, |step| step.version)
}

/// Applies every step newer than the connection's `user_version`.
///
/// Returns how many steps ran; `0` when the schema was already current.
///
/// # Side effects
/// - Emits `migration_apply` logging events with versions and duration.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<u32> {
    let from_version = recorded_version(conn)?;
    let latest = latest_version();
    if from_version > latest {
        error!(
            "event=migration_apply module=db status=error from_version={} latest_version={} error_code=unsupported_schema_version",
            from_version, latest
        );
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: from_version,
            latest_supported: latest,
        });
    }

    let pending: Vec<&SchemaStep> = SCHEMA_STEPS
        .iter()
        .filter(|step| step.version > from_version)
        .collect();
    if pending.is_empty() {
        return Ok(0);
    }

    let started_at = Instant::now();
    info!(
        "event=migration_apply module=db status=start from_version={} to_version={} pending={}",
        from_version,
        latest,
        pending.len()
    );

    let tx = conn.transaction()?;
    if let Err(err) = run_steps(&tx, &pending) {
        error!(
            "event=migration_apply module=db status=error from_version={} duration_ms={} error={}",
            from_version,
            started_at.elapsed().as_millis(),
            err
        );
        return Err(err);
    }
    tx.commit()?;

    info!(
        "event=migration_apply module=db status=ok from_version={} to_version={} applied={} duration_ms={}",
        from_version,
        latest,
        pending.len(),
        started_at.elapsed().as_millis()
    );
    Ok(pending.len() as u32)
}

fn run_steps(tx: &Transaction<'_>, steps: &[&SchemaStep]) -> DbResult<()> {
    for step in steps {
        tx.execute_batch(step.sql)?;
        // PRAGMA does not accept bound parameters.
        tx.execute_batch(&format!("PRAGMA user_version = {};", step.version))?;
        info!(
            "event=migration_step module=db status=ok version={} name={}",
            step.version, step.name
        );
    }
    Ok(())
}

fn recorded_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?)
}
