#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(
    missing_docs,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery
)]
#![allow(clippy::module_name_repetitions)]

//! Persistence for download records.
//!
//! # Design
//! - Records live in one `SQLite` table; every operation reads or writes the
//!   row itself, so separate handles on the same file (the monitor and a CLI
//!   invocation) always see each other's writes.
//! - Status changes are compare-and-set on the status read just before the
//!   write. A lost race re-reads the row and re-checks the transition.
//! - Progress only ever moves up and only for records the monitor still
//!   reconciles; the comparison happens inside the `UPDATE`.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use bindery_core::{DownloadRecord, DownloadStatus, DownloadStore, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, migrate::Migrator};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_CONNECTIONS: u32 = 4;

const INSERT_SQL: &str = r"
    INSERT INTO downloads (
        id,
        title,
        author,
        series,
        series_number,
        category,
        remote_handle,
        status,
        progress,
        organized_path,
        error_message,
        created_at,
        completed_at,
        organized_at
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
";

const SELECT_ONE_SQL: &str = r"
    SELECT
        id, title, author, series, series_number, category, remote_handle, status,
        progress, organized_path, error_message, created_at, completed_at, organized_at
    FROM downloads
    WHERE id = ?
";

const SELECT_ALL_SQL: &str = r"
    SELECT
        id, title, author, series, series_number, category, remote_handle, status,
        progress, organized_path, error_message, created_at, completed_at, organized_at
    FROM downloads
    ORDER BY created_at, id
";

const SELECT_ACTIVE_SQL: &str = r"
    SELECT
        id, title, author, series, series_number, category, remote_handle, status,
        progress, organized_path, error_message, created_at, completed_at, organized_at
    FROM downloads
    WHERE status IN ('queued', 'downloading', 'completed')
    ORDER BY created_at, id
";

const SELECT_STATUS_SQL: &str = r"
    SELECT status FROM downloads WHERE id = ?
";

const UPDATE_STATUS_SQL: &str = r"
    UPDATE downloads
    SET
        status = ?,
        completed_at = COALESCE(completed_at, ?),
        organized_at = COALESCE(organized_at, ?)
    WHERE id = ? AND status = ?
";

const UPDATE_PROGRESS_SQL: &str = r"
    UPDATE downloads
    SET progress = ?
    WHERE id = ?
        AND status IN ('queued', 'downloading', 'completed')
        AND progress < ?
";

const UPDATE_ERROR_SQL: &str = r"
    UPDATE downloads SET error_message = ? WHERE id = ?
";

const UPDATE_ORGANIZED_PATH_SQL: &str = r"
    UPDATE downloads SET organized_path = ? WHERE id = ?
";

const DELETE_SQL: &str = r"
    DELETE FROM downloads WHERE id = ?
";

/// [`DownloadStore`] backed by `SQLite`.
#[derive(Debug, Clone)]
pub struct RecordStore {
    pool: SqlitePool,
}

impl RecordStore {
    /// Open (or create) the database at `path` and apply pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the directory cannot be created,
    /// the file is not a usable database, or a migration fails.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| StoreError::database("records.create_dir", err))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|err| StoreError::database("records.connect", err))?;
        let store = Self::migrated(pool).await?;
        debug!(path = %path.display(), "record store opened");
        Ok(store)
    }

    /// Private database that disappears with the store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the schema cannot be created.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|err| StoreError::database("records.connect", err))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|err| StoreError::database("records.connect", err))?;
        Self::migrated(pool).await
    }

    async fn migrated(pool: SqlitePool) -> StoreResult<Self> {
        MIGRATOR
            .run(&pool)
            .await
            .map_err(|err| StoreError::database("records.migrate", err))?;
        Ok(Self { pool })
    }

    async fn status_of(&self, id: Uuid) -> StoreResult<DownloadStatus> {
        let row = sqlx::query(SELECT_STATUS_SQL)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| StoreError::database("downloads.status", err))?
            .ok_or(StoreError::NotFound { id })?;
        let status: String = row
            .try_get("status")
            .map_err(|err| StoreError::database("downloads.status", err))?;
        parse_status(&status)
    }

    async fn fetch_records(&self, sql: &'static str) -> StoreResult<Vec<DownloadRecord>> {
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| StoreError::database("downloads.list", err))?;
        rows.iter().map(decode_record).collect()
    }

    /// Fail with `NotFound` when no row exists for `id`.
    async fn ensure_exists(&self, id: Uuid) -> StoreResult<()> {
        self.status_of(id).await.map(|_| ())
    }
}

#[async_trait]
impl DownloadStore for RecordStore {
    async fn create(&self, record: DownloadRecord) -> StoreResult<()> {
        let organized_path = record
            .organized_path
            .as_ref()
            .map(|path| path.to_string_lossy().into_owned());
        let result = sqlx::query(INSERT_SQL)
            .bind(record.id.to_string())
            .bind(record.title.as_str())
            .bind(record.author.as_str())
            .bind(record.series.as_deref())
            .bind(record.series_number.as_deref())
            .bind(record.category.as_deref())
            .bind(record.remote_handle.as_str())
            .bind(record.status.as_str())
            .bind(record.progress)
            .bind(organized_path)
            .bind(record.error_message.as_deref())
            .bind(record.created_at.timestamp_micros())
            .bind(record.completed_at.map(|at| at.timestamp_micros()))
            .bind(record.organized_at.map(|at| at.timestamp_micros()))
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                Err(StoreError::Duplicate { id: record.id })
            }
            Err(err) => Err(StoreError::database("downloads.create", err)),
        }
    }

    async fn get(&self, id: Uuid) -> StoreResult<DownloadRecord> {
        let row = sqlx::query(SELECT_ONE_SQL)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| StoreError::database("downloads.get", err))?
            .ok_or(StoreError::NotFound { id })?;
        decode_record(&row)
    }

    async fn list(&self) -> StoreResult<Vec<DownloadRecord>> {
        self.fetch_records(SELECT_ALL_SQL).await
    }

    async fn list_active(&self) -> StoreResult<Vec<DownloadRecord>> {
        self.fetch_records(SELECT_ACTIVE_SQL).await
    }

    async fn update_status(&self, id: Uuid, status: DownloadStatus) -> StoreResult<()> {
        loop {
            let current = self.status_of(id).await?;
            if current == status {
                return Ok(());
            }
            if !current.can_transition_to(status) {
                return Err(StoreError::InvalidTransition {
                    id,
                    from: current,
                    to: status,
                });
            }

            let now = now_micros();
            let completed_at = (status == DownloadStatus::Completed).then_some(now);
            let organized_at = (status == DownloadStatus::Organized).then_some(now);
            let result = sqlx::query(UPDATE_STATUS_SQL)
                .bind(status.as_str())
                .bind(completed_at)
                .bind(organized_at)
                .bind(id.to_string())
                .bind(current.as_str())
                .execute(&self.pool)
                .await
                .map_err(|err| StoreError::database("downloads.update_status", err))?;
            if result.rows_affected() > 0 {
                return Ok(());
            }
            debug!(
                download_id = %id,
                from = %current,
                to = %status,
                "status changed underneath; retrying"
            );
        }
    }

    async fn update_progress(&self, id: Uuid, progress: f64) -> StoreResult<()> {
        if !progress.is_finite() {
            return self.ensure_exists(id).await;
        }
        let progress = progress.clamp(0.0, 100.0);
        let result = sqlx::query(UPDATE_PROGRESS_SQL)
            .bind(progress)
            .bind(id.to_string())
            .bind(progress)
            .execute(&self.pool)
            .await
            .map_err(|err| StoreError::database("downloads.update_progress", err))?;
        if result.rows_affected() == 0 {
            self.ensure_exists(id).await?;
        }
        Ok(())
    }

    async fn update_error(&self, id: Uuid, message: Option<String>) -> StoreResult<()> {
        let result = sqlx::query(UPDATE_ERROR_SQL)
            .bind(message)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|err| StoreError::database("downloads.update_error", err))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { id });
        }
        Ok(())
    }

    async fn update_organized_path(&self, id: Uuid, path: &Path) -> StoreResult<()> {
        let result = sqlx::query(UPDATE_ORGANIZED_PATH_SQL)
            .bind(path.to_string_lossy().into_owned())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|err| StoreError::database("downloads.update_organized_path", err))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { id });
        }
        Ok(())
    }

    async fn mark_completed(&self, id: Uuid) -> StoreResult<()> {
        self.update_status(id, DownloadStatus::Completed).await
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query(DELETE_SQL)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|err| StoreError::database("downloads.delete", err))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { id });
        }
        Ok(())
    }
}

fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

fn parse_status(value: &str) -> StoreResult<DownloadStatus> {
    value.parse().map_err(|err: bindery_core::UnknownStatus| StoreError::Corrupt {
        detail: err.to_string(),
    })
}

fn timestamp(column: &'static str, micros: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| StoreError::Corrupt {
        detail: format!("{column} {micros} is out of range"),
    })
}

fn decode_record(row: &SqliteRow) -> StoreResult<DownloadRecord> {
    let get_error = |err: sqlx::Error| StoreError::database("downloads.decode", err);

    let id: String = row.try_get("id").map_err(get_error)?;
    let id = Uuid::parse_str(&id).map_err(|err| StoreError::Corrupt {
        detail: format!("id '{id}': {err}"),
    })?;
    let status: String = row.try_get("status").map_err(get_error)?;
    let organized_path: Option<String> = row.try_get("organized_path").map_err(get_error)?;
    let created_at: i64 = row.try_get("created_at").map_err(get_error)?;
    let completed_at: Option<i64> = row.try_get("completed_at").map_err(get_error)?;
    let organized_at: Option<i64> = row.try_get("organized_at").map_err(get_error)?;

    Ok(DownloadRecord {
        id,
        title: row.try_get("title").map_err(get_error)?,
        author: row.try_get("author").map_err(get_error)?,
        series: row.try_get("series").map_err(get_error)?,
        series_number: row.try_get("series_number").map_err(get_error)?,
        category: row.try_get("category").map_err(get_error)?,
        remote_handle: row.try_get("remote_handle").map_err(get_error)?,
        status: parse_status(&status)?,
        progress: row.try_get("progress").map_err(get_error)?,
        organized_path: organized_path.map(Into::into),
        error_message: row.try_get("error_message").map_err(get_error)?,
        created_at: timestamp("created_at", created_at)?,
        completed_at: completed_at
            .map(|micros| timestamp("completed_at", micros))
            .transpose()?,
        organized_at: organized_at
            .map(|micros| timestamp("organized_at", micros))
            .transpose()?,
    })
}
