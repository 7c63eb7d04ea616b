use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDateTime, Utc};
use migralign_common::{Error, MigrationRecord, Result};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::{debug, info};

use crate::schema::{APPLIED_FORMAT, recorder_table_sql};

/// Read access to the record of which migrations have been applied.
pub trait MigrationStore {
    /// The most recently applied migration of `app_label`, if any.
    fn latest_applied(&self, app_label: &str) -> Result<Option<MigrationRecord>>;

    /// Every migration name recorded as applied for `app_label`.
    fn applied_names(&self, app_label: &str) -> Result<BTreeSet<String>>;
}

/// [`MigrationStore`] backed by the executor's recorder table in SQLite.
pub struct MigrationRecorder {
    conn: Mutex<Connection>,
    table: String,
}

impl MigrationRecorder {
    /// Open an existing database read-only. Fails if the file or the recorder
    /// table is missing.
    pub fn open(db_path: &Path, table: &str) -> Result<Self> {
        info!("opening migration recorder at {}", db_path.display());
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(db_path, flags).map_err(|e| {
            Error::Database(format!(
                "failed to open database at {}: {e}",
                db_path.display()
            ))
        })?;

        let recorder = Self {
            conn: Mutex::new(conn),
            table: table.to_string(),
        };
        let rows = recorder.row_count()?;
        debug!("recorder table `{table}` holds {rows} rows");
        Ok(recorder)
    }

    /// Writable in-memory recorder with an empty table, for fixtures.
    pub fn in_memory(table: &str) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;
        conn.execute_batch(&recorder_table_sql(table))
            .map_err(|e| Error::Database(format!("failed to create recorder table: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
            table: table.to_string(),
        })
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("migration recorder lock poisoned".into()))
    }

    /// Insert an applied row. Only the migration executor writes here in
    /// production.
    pub fn record_applied(&self, app_label: &str, name: &str, applied: DateTime<Utc>) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            &format!("INSERT INTO {} (app, name, applied) VALUES (?1, ?2, ?3)", self.table),
            params![app_label, name, applied.format(APPLIED_FORMAT).to_string()],
        )
        .map_err(|e| Error::Database(format!("failed to record migration: {e}")))?;
        Ok(())
    }

    pub fn row_count(&self) -> Result<usize> {
        let conn = self.connection()?;
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |row| {
                row.get(0)
            })
            .map_err(|e| {
                Error::Database(format!("failed to query recorder table `{}`: {e}", self.table))
            })?;
        Ok(count as usize)
    }
}

impl MigrationStore for MigrationRecorder {
    fn latest_applied(&self, app_label: &str) -> Result<Option<MigrationRecord>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT app, name, applied FROM {}
                 WHERE app = ?1
                 ORDER BY applied DESC, id DESC
                 LIMIT 1",
                self.table
            ))
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        stmt.query_row(params![app_label], |row| {
            Ok(MigrationRecord {
                app: row.get(0)?,
                name: row.get(1)?,
                applied: parse_applied(&row.get::<_, String>(2)?),
            })
        })
        .optional()
        .map_err(|e| Error::Database(format!("failed to query latest migration: {e}")))
    }

    fn applied_names(&self, app_label: &str) -> Result<BTreeSet<String>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(&format!("SELECT name FROM {} WHERE app = ?1", self.table))
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map(params![app_label], |row| row.get::<_, String>(0))
            .map_err(|e| Error::Database(format!("failed to query applied migrations: {e}")))?;

        let mut names = BTreeSet::new();
        for row in rows {
            names.insert(
                row.map_err(|e| Error::Database(format!("failed to read migration row: {e}")))?,
            );
        }
        Ok(names)
    }
}

fn parse_applied(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            // The executor writes "YYYY-MM-DD HH:MM:SS.ffffff", older rows may
            // lack the fraction.
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
                .map(|naive| naive.and_utc())
                .ok()
        })
}
