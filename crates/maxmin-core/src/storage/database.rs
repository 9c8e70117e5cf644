//! SQLite persistence of derived values.
//!
//! Provides persistent storage for:
//! - The latest value of every derived output with its period's last reset
//! - The reset history skip-list consumed by the next restore

use std::path::Path;

use rusqlite::{params, Connection};

use super::data_dir;
use crate::error::DatabaseError;
use crate::period::{Extremum, Field, PeriodKind};
use crate::tracker::{ResetHistory, RestoreRecord};

/// SQLite database for derived values.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Get a reference to the underlying SQLite connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Open the database at `~/.config/maxmin/maxmin.db`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, DatabaseError> {
        let dir = data_dir().map_err(|e| DatabaseError::DataDir(e.to_string()))?;
        Self::open_at(&dir.join("maxmin.db"))
    }

    /// Open (or create) the database file at `path`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open_at(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (for tests).
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub fn open_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS period_values (
                    period      TEXT NOT NULL,
                    field       TEXT NOT NULL,
                    value       REAL NOT NULL,
                    last_reset  TEXT,
                    PRIMARY KEY (period, field)
                );

                CREATE TABLE IF NOT EXISTS reset_history (
                    period  TEXT NOT NULL,
                    field   TEXT NOT NULL,
                    PRIMARY KEY (period, field)
                );",
            )
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))
    }

    /// Replace the persisted values of the `tracked` pairs with `records`.
    ///
    /// Tracked pairs without a record are deleted, so a value that became
    /// absent is not restored on the next start. Rows outside `tracked`
    /// are left alone.
    ///
    /// # Errors
    /// Returns an error if any write fails; the batch is rolled back.
    pub fn save_snapshot(
        &mut self,
        tracked: &[(PeriodKind, Field)],
        records: &[RestoreRecord],
    ) -> Result<(), DatabaseError> {
        let tx = self.conn.transaction()?;
        {
            let mut delete =
                tx.prepare("DELETE FROM period_values WHERE period = ?1 AND field = ?2")?;
            for &(period, field) in tracked {
                let present = records
                    .iter()
                    .any(|record| record.period == period && record.field == field);
                if !present {
                    delete.execute(params![period.as_str(), field.as_str()])?;
                }
            }

            let mut stmt = tx.prepare(
                "INSERT INTO period_values (period, field, value, last_reset)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(period, field) DO UPDATE SET
                    value = excluded.value,
                    last_reset = excluded.last_reset",
            )?;
            for record in records {
                stmt.execute(params![
                    record.period.as_str(),
                    record.field.as_str(),
                    record.value,
                    record.last_reset,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// All persisted derived values. Rows naming unknown periods or fields
    /// are skipped.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub fn load_records(&self) -> Result<Vec<RestoreRecord>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT period, field, value, last_reset FROM period_values ORDER BY period, field",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (period, field, value, last_reset) = row?;
            let (Ok(period), Ok(field)) = (period.parse::<PeriodKind>(), field.parse::<Field>())
            else {
                continue;
            };
            records.push(RestoreRecord {
                period,
                field,
                value,
                last_reset,
            });
        }
        Ok(records)
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub fn load_reset_history(&self) -> Result<ResetHistory, DatabaseError> {
        let mut stmt = self.conn.prepare("SELECT period, field FROM reset_history")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut history = ResetHistory::new();
        for row in rows {
            let (period, field) = row?;
            let (Ok(period), Ok(extremum)) = (period.parse::<PeriodKind>(), field.parse::<Extremum>())
            else {
                continue;
            };
            history.insert(period, extremum);
        }
        Ok(history)
    }

    /// Clear the skip-list once a reconciliation pass consumed it.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub fn clear_reset_history(&self) -> Result<(), DatabaseError> {
        self.conn.execute("DELETE FROM reset_history", [])?;
        Ok(())
    }

    /// Drop one persisted extremum and keep the next restore from bringing
    /// it back.
    ///
    /// # Errors
    /// Returns an error if any write fails.
    pub fn forget(&mut self, period: PeriodKind, extremum: Extremum) -> Result<(), DatabaseError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM period_values WHERE period = ?1 AND field = ?2",
            params![period.as_str(), extremum.field().as_str()],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO reset_history (period, field) VALUES (?1, ?2)",
            params![period.as_str(), extremum.field().as_str()],
        )?;
        tx.commit()?;
        Ok(())
    }
}
