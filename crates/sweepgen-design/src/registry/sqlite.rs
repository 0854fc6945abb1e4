use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use sweepgen_core::errors::{ErrorInfo, SweepError};
use tracing::{debug, info};

use super::{reconcile, Assignment, Experiment, Registry, RegistryTx, RetryPolicy};
use crate::config::DEFAULT_EXPERIMENT;
use crate::hash::signature_hash;
use crate::sweep::Signature;

const SCHEMA_VERSION: i64 = 2;

fn sqlite_error(code: &str, err: rusqlite::Error) -> SweepError {
    if let rusqlite::Error::SqliteFailure(failure, _) = &err {
        if matches!(failure.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) {
            return SweepError::registry_timeout(err.to_string());
        }
    }
    SweepError::RegistryConflict(ErrorInfo::new(code, err.to_string()))
}

/// Registry stored in a SQLite database shared between runs.
///
/// Each synchronisation is one `IMMEDIATE` transaction: the write lock is
/// taken up front so concurrent runs serialise instead of interleaving their
/// identifier ranges, and any failure rolls the whole experiment back.
pub struct SqliteRegistry {
    path: PathBuf,
    conn: Mutex<Connection>,
    retry: RetryPolicy,
}

impl SqliteRegistry {
    /// Opens (creating if needed) the registry at `path`.
    pub fn open(path: &Path, timeout: Duration, retry: RetryPolicy) -> Result<Self, SweepError> {
        let conn = Connection::open(path).map_err(|err| {
            SweepError::RegistryConflict(
                ErrorInfo::new("registry.open", "failed to open sqlite registry")
                    .with_context("path", path.display().to_string())
                    .with_hint(err.to_string()),
            )
        })?;
        conn.busy_timeout(timeout)
            .map_err(|err| sqlite_error("registry.busy_timeout", err))?;
        retry.run(|| init_schema(&conn))?;
        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
            retry,
        })
    }

    fn synchronize_once(&self, experiment: &Experiment) -> Result<Assignment, SweepError> {
        let mut conn = self.conn.lock().map_err(|_| {
            SweepError::RegistryConflict(ErrorInfo::new(
                "registry.poisoned",
                "registry connection lock poisoned",
            ))
        })?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| sqlite_error("registry.begin", err))?;
        let assignment = {
            let mut session = SqliteTx { conn: &tx };
            reconcile(&mut session, experiment)?
        };
        tx.commit()
            .map_err(|err| sqlite_error("registry.commit", err))?;
        Ok(assignment)
    }
}

impl Registry for SqliteRegistry {
    fn label(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }

    fn synchronize(&self, experiment: &Experiment) -> Result<Option<Assignment>, SweepError> {
        let assignment = self.retry.run(|| self.synchronize_once(experiment))?;
        info!(
            registry = %self.label(),
            experiment_id = assignment.experiment_id,
            scenarios = assignment.ids.len(),
            "registry synchronised"
        );
        Ok(Some(assignment))
    }
}

struct SqliteTx<'a> {
    conn: &'a Connection,
}

impl RegistryTx for SqliteTx<'_> {
    fn register_or_find_experiment(
        &mut self,
        name: &str,
        description: &str,
    ) -> Result<i64, SweepError> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM experiments WHERE name = ?1 AND description = ?2",
                params![name, description],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| sqlite_error("registry.find_experiment", err))?;
        if let Some(id) = existing {
            debug!(experiment_id = id, "found registered experiment");
            return Ok(id);
        }
        // the default name is shared; experiments under it differ by description
        if name != DEFAULT_EXPERIMENT {
            let clash: Option<(i64, String)> = self
                .conn
                .query_row(
                    "SELECT id, description FROM experiments WHERE name = ?1 ORDER BY id LIMIT 1",
                    params![name],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(|err| sqlite_error("registry.find_experiment", err))?;
            if let Some((id, stored)) = clash {
                return Err(SweepError::RegistryConflict(
                    ErrorInfo::new(
                        "registry.description_mismatch",
                        "experiment already registered with another description",
                    )
                    .with_context("experiment", name)
                    .with_context("experiment_id", id.to_string())
                    .with_context("registered", stored)
                    .with_context("requested", description),
                ));
            }
        }
        self.conn
            .execute(
                "INSERT INTO experiments(name, description, created_at) VALUES (?1, ?2, ?3)",
                params![name, description, Utc::now().to_rfc3339()],
            )
            .map_err(|err| sqlite_error("registry.insert_experiment", err))?;
        Ok(self.conn.last_insert_rowid())
    }

    fn register_or_find_combination(
        &mut self,
        experiment_id: i64,
        signature: &Signature,
    ) -> Result<i64, SweepError> {
        let hash = signature_hash(signature)?;
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM scenarios WHERE experiment_id = ?1 AND signature_hash = ?2",
                params![experiment_id, hash],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| sqlite_error("registry.find_scenario", err))?;
        if let Some(id) = existing {
            return Ok(id);
        }
        self.conn
            .execute(
                "INSERT INTO scenarios(experiment_id, signature_hash, signature) VALUES (?1, ?2, ?3)",
                params![experiment_id, hash, signature.to_string()],
            )
            .map_err(|err| sqlite_error("registry.insert_scenario", err))?;
        Ok(self.conn.last_insert_rowid())
    }
}

/// Creates the registry tables and records the schema version.
fn init_schema(conn: &Connection) -> Result<(), SweepError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta(version INTEGER NOT NULL);
        CREATE TABLE IF NOT EXISTS experiments(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            description TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(name, description)
        );
        CREATE TABLE IF NOT EXISTS scenarios(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            experiment_id INTEGER NOT NULL,
            signature_hash TEXT NOT NULL,
            signature TEXT NOT NULL,
            UNIQUE(experiment_id, signature_hash),
            FOREIGN KEY(experiment_id) REFERENCES experiments(id)
        );",
    )
    .map_err(|err| sqlite_error("registry.schema", err))?;
    set_version(conn, SCHEMA_VERSION)
}

fn set_version(conn: &Connection, version: i64) -> Result<(), SweepError> {
    let existing: Option<i64> = conn
        .query_row("SELECT version FROM meta LIMIT 1", [], |row| row.get(0))
        .optional()
        .map_err(|err| sqlite_error("registry.schema", err))?;
    match existing {
        Some(current) if current == version => Ok(()),
        Some(current) => Err(SweepError::RegistryConflict(ErrorInfo::new(
            "registry.schema_version",
            format!("registry schema {current} incompatible with expected {version}"),
        ))),
        None => {
            conn.execute("INSERT INTO meta(version) VALUES (?1)", params![version])
                .map_err(|err| sqlite_error("registry.schema", err))?;
            Ok(())
        }
    }
}
