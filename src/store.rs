//! Durable alert storage (C3), backed by a bundled SQLite database.
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{info, warn};
use uuid::Uuid;

use crate::alert::{Alert, Category, Severity, Status};
use crate::error::StoreError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS alerts (
    id TEXT PRIMARY KEY,
    severity TEXT NOT NULL,
    category TEXT NOT NULL,
    status TEXT NOT NULL,
    source TEXT NOT NULL,
    message TEXT NOT NULL,
    description TEXT NOT NULL,
    created_at TEXT NOT NULL,
    acknowledged_at TEXT,
    dismissed_at TEXT
);
CREATE INDEX IF NOT EXISTS alerts_status_idx ON alerts(status);
CREATE INDEX IF NOT EXISTS alerts_created_at_idx ON alerts(created_at);
";

/// Outcome of a guarded status transition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The transition was legal and the row was updated.
    Applied,
    /// The alert's current status wasn't one of the allowed source statuses;
    /// the row is unchanged.
    NoOp(Status),
}

/// Alert store. The prepared-statement cache `rusqlite::Connection`
/// maintains internally is not thread-safe, so every access to the
/// connection is serialized behind a single mutex.
pub struct AlertStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl AlertStore {
    /// Opens (creating if absent) the alert database at `path`. If `path`'s
    /// parent directory cannot be created or the file cannot be opened, an
    /// attempt is made at `fallback` (the runtime state directory under the
    /// user's home) before giving up.
    pub fn open(path: &Path, fallback: &Path) -> Result<Self, StoreError> {
        match Self::open_at(path) {
            Ok(store) => Ok(store),
            Err(primary_err) => {
                warn!(
                    primary = %path.display(),
                    fallback = %fallback.display(),
                    error = %primary_err,
                    "falling back to alternate alert store location"
                );
                Self::open_at(fallback).map_err(|source| StoreError::Unwritable {
                    path: path.display().to_string(),
                    fallback: fallback.display().to_string(),
                    source,
                })
            }
        }
    }

    fn open_at(path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.display(), "alert store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    /// Opens an in-memory store, used by tests that don't need durability.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    /// Path of the backing database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Inserts a new alert.
    pub fn insert(&self, alert: &Alert) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        conn.execute(
            "INSERT INTO alerts (id, severity, category, status, source, message, description, created_at, acknowledged_at, dismissed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                alert.id.to_string(),
                alert.severity.to_string(),
                alert.category.to_string(),
                alert.status.to_string(),
                alert.source,
                alert.message,
                alert.description,
                alert.created_at.to_rfc3339(),
                alert.acknowledged_at.map(|t| t.to_rfc3339()),
                alert.dismissed_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Retrieves a single alert by id.
    pub fn get(&self, id: Uuid) -> Result<Alert, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        conn.query_row(
            "SELECT id, severity, category, status, source, message, description, created_at, acknowledged_at, dismissed_at
             FROM alerts WHERE id = ?1",
            params![id.to_string()],
            row_to_alert,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Lists alerts, optionally filtered by status, newest first.
    pub fn list(&self, status: Option<Status>) -> Result<Vec<Alert>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let mut rows = Vec::new();
        let query = "SELECT id, severity, category, status, source, message, description, created_at, acknowledged_at, dismissed_at
                     FROM alerts WHERE (?1 IS NULL OR status = ?1) ORDER BY created_at DESC";
        let mut stmt = conn.prepare(query)?;
        let mapped = stmt.query_map(params![status.map(|s| s.to_string())], row_to_alert)?;
        for row in mapped {
            rows.push(row?);
        }
        Ok(rows)
    }

    /// Transitions a single alert to `status`, stamping the matching
    /// transition timestamp (`acknowledged_at` or `dismissed_at`).
    pub fn update_status(&self, id: Uuid, status: Status) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let now = Utc::now().to_rfc3339();
        let changed = match status {
            Status::Acknowledged => conn.execute(
                "UPDATE alerts SET status = ?1, acknowledged_at = ?2 WHERE id = ?3",
                params![status.to_string(), now, id.to_string()],
            )?,
            Status::Dismissed => conn.execute(
                "UPDATE alerts SET status = ?1, dismissed_at = ?2 WHERE id = ?3",
                params![status.to_string(), now, id.to_string()],
            )?,
            Status::Active => conn.execute(
                "UPDATE alerts SET status = ?1 WHERE id = ?2",
                params![status.to_string(), id.to_string()],
            )?,
        };
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Transitions a single alert to `to`, but only if its current status is
    /// one of `allowed_from`. The read of the current status and the
    /// conditional write happen under one lock acquisition, so no other
    /// writer can act on the row in between. Returns `NoOp` with the alert's
    /// actual current status rather than applying an illegal transition
    /// (e.g. re-acknowledging an already-`Dismissed` alert, which would
    /// otherwise stamp `acknowledged_at` after the existing `dismissed_at`).
    pub fn transition_status(
        &self,
        id: Uuid,
        allowed_from: &[Status],
        to: Status,
    ) -> Result<TransitionOutcome, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let current: String = conn
            .query_row("SELECT status FROM alerts WHERE id = ?1", params![id.to_string()], |row| row.get(0))
            .optional()?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let current: Status = current
            .parse()
            .map_err(|_| StoreError::from(rusqlite::Error::InvalidColumnType(0, "status".into(), rusqlite::types::Type::Text)))?;
        if !allowed_from.contains(&current) {
            return Ok(TransitionOutcome::NoOp(current));
        }

        let now = Utc::now().to_rfc3339();
        match to {
            Status::Acknowledged => conn.execute(
                "UPDATE alerts SET status = ?1, acknowledged_at = ?2 WHERE id = ?3",
                params![to.to_string(), now, id.to_string()],
            )?,
            Status::Dismissed => conn.execute(
                "UPDATE alerts SET status = ?1, dismissed_at = ?2 WHERE id = ?3",
                params![to.to_string(), now, id.to_string()],
            )?,
            Status::Active => conn.execute(
                "UPDATE alerts SET status = ?1 WHERE id = ?2",
                params![to.to_string(), id.to_string()],
            )?,
        };
        Ok(TransitionOutcome::Applied)
    }

    /// Replaces an alert's long description.
    pub fn set_description(&self, id: Uuid, description: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let changed = conn.execute(
            "UPDATE alerts SET description = ?1 WHERE id = ?2",
            params![description, id.to_string()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Transitions every alert currently in status `from` to `to`, returning
    /// the number of rows affected. Used by `acknowledge_all_active`.
    pub fn update_status_bulk(&self, from: Status, to: Status) -> Result<u64, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let now = Utc::now().to_rfc3339();
        let changed = match to {
            Status::Acknowledged => conn.execute(
                "UPDATE alerts SET status = ?1, acknowledged_at = ?2 WHERE status = ?3",
                params![to.to_string(), now, from.to_string()],
            )?,
            Status::Dismissed => conn.execute(
                "UPDATE alerts SET status = ?1, dismissed_at = ?2 WHERE status = ?3",
                params![to.to_string(), now, from.to_string()],
            )?,
            Status::Active => conn.execute(
                "UPDATE alerts SET status = ?1 WHERE status = ?2",
                params![to.to_string(), from.to_string()],
            )?,
        };
        Ok(changed as u64)
    }

    /// Counts alerts by status and severity, used to rebuild the in-memory
    /// counters at startup.
    pub fn count_by_status_and_severity(&self, status: Status) -> Result<Vec<(Severity, u64)>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let mut stmt = conn.prepare(
            "SELECT severity, COUNT(*) FROM alerts WHERE status = ?1 GROUP BY severity",
        )?;
        let mapped = stmt.query_map(params![status.to_string()], |row| {
            let severity: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((severity, count as u64))
        })?;
        let mut counts = Vec::new();
        for row in mapped {
            let (severity, count) = row?;
            let severity = severity
                .parse::<Severity>()
                .map_err(|_| rusqlite::Error::InvalidColumnType(0, "severity".into(), rusqlite::types::Type::Text))?;
            counts.push((severity, count));
        }
        Ok(counts)
    }

    /// Returns the alerts currently in `Active` status, used to rebuild
    /// `AlertManager`'s in-memory dedup set at startup.
    pub fn active_sources(&self) -> Result<Vec<Alert>, StoreError> {
        self.list(Some(Status::Active))
    }

    /// Deletes every alert created before `cutoff`, regardless of status.
    /// Retention is a hard age cutoff: an alert left active past the
    /// retention window is purged along with its history, not kept forever.
    pub fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let deleted = conn.execute(
            "DELETE FROM alerts WHERE created_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(deleted as u64)
    }

    /// Total number of alerts in the store, regardless of status.
    pub fn count(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn row_to_alert(row: &rusqlite::Row) -> rusqlite::Result<Alert> {
    let id: String = row.get(0)?;
    let severity: String = row.get(1)?;
    let category: String = row.get(2)?;
    let status: String = row.get(3)?;
    let created_at: String = row.get(7)?;
    let acknowledged_at: Option<String> = row.get(8)?;
    let dismissed_at: Option<String> = row.get(9)?;

    let parse_ts = |idx: usize, s: &str| -> rusqlite::Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| rusqlite::Error::InvalidColumnType(idx, "timestamp".into(), rusqlite::types::Type::Text))
    };

    Ok(Alert {
        id: id
            .parse()
            .map_err(|_| rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text))?,
        severity: severity
            .parse()
            .map_err(|_| rusqlite::Error::InvalidColumnType(1, "severity".into(), rusqlite::types::Type::Text))?,
        category: category
            .parse()
            .map_err(|_| rusqlite::Error::InvalidColumnType(2, "category".into(), rusqlite::types::Type::Text))?,
        status: status
            .parse()
            .map_err(|_| rusqlite::Error::InvalidColumnType(3, "status".into(), rusqlite::types::Type::Text))?,
        source: row.get(4)?,
        message: row.get(5)?,
        description: row.get(6)?,
        created_at: parse_ts(7, &created_at)?,
        acknowledged_at: acknowledged_at.map(|t| parse_ts(8, &t)).transpose()?,
        dismissed_at: dismissed_at.map(|t| parse_ts(9, &t)).transpose()?,
    })
}
