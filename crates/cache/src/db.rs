//! Index database: pool setup and the `files`/`pins` queries

use std::path::Path;
use std::time::Duration;

use hotload_errors::{Error, StateError, StorageError};
use hotload_types::FileState;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{query, Executor, Pool, Row, Sqlite};

/// Create the index connection pool.
///
/// The pool holds a single connection: every statement and transaction is
/// serialized, which is what linearizes state transitions per hash.
///
/// # Errors
///
/// Returns an error if the path does not end in `.db` or the database
/// cannot be opened.
pub async fn create_pool(db_path: &Path) -> Result<Pool<Sqlite>, Error> {
    if !db_path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("db"))
    {
        return Err(StorageError::InvalidPath {
            path: format!("{} (cache database must end in .db)", db_path.display()),
        }
        .into());
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(|e| {
            Error::from(StateError::DatabaseError {
                message: e.to_string(),
            })
        })?;

    Ok(pool)
}

/// Run database migrations
///
/// # Errors
///
/// Returns an error if any migration fails to execute.
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<(), Error> {
    sqlx::migrate!("./migrations").run(pool).await.map_err(|e| {
        StateError::MigrationFailed {
            message: e.to_string(),
        }
        .into()
    })
}

/// One row of the `files` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub id: i64,
    pub sha256_hex: String,
    /// Set only for manifest entries.
    pub manifest_for_application_name: Option<String>,
    pub file_state: FileState,
    pub size_bytes: i64,
    pub last_used_at_epoch_ms: i64,
    /// Set only for manifest entries.
    pub fresh_at_epoch_ms: Option<i64>,
}

impl CacheEntry {
    fn from_row(row: &SqliteRow) -> Result<Self, Error> {
        let state: String = row.try_get("file_state")?;
        let file_state = FileState::parse(&state).ok_or_else(|| StateError::StateCorrupted {
            message: format!("unknown file_state {state}"),
        })?;
        Ok(Self {
            id: row.try_get("id")?,
            sha256_hex: row.try_get("sha256_hex")?,
            manifest_for_application_name: row.try_get("manifest_for_application_name")?,
            file_state,
            size_bytes: row.try_get("size_bytes")?,
            last_used_at_epoch_ms: row.try_get("last_used_at_epoch_ms")?,
            fresh_at_epoch_ms: row.try_get("fresh_at_epoch_ms")?,
        })
    }

    /// Name of the entry's file inside the cache directory.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("entry-{}.bin", self.id)
    }
}

fn optional_entry(row: Option<SqliteRow>) -> Result<Option<CacheEntry>, Error> {
    row.as_ref().map(CacheEntry::from_row).transpose()
}

pub async fn get_by_sha256<'e, E>(executor: E, sha256_hex: &str) -> Result<Option<CacheEntry>, Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = query("SELECT * FROM files WHERE sha256_hex = ?1")
        .bind(sha256_hex)
        .fetch_optional(executor)
        .await?;
    optional_entry(row)
}

pub async fn get_by_id<'e, E>(executor: E, id: i64) -> Result<Option<CacheEntry>, Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = query("SELECT * FROM files WHERE id = ?1")
        .bind(id)
        .fetch_optional(executor)
        .await?;
    optional_entry(row)
}

/// Insert a DIRTY row. Returns false if a row for the hash already exists.
pub async fn insert_dirty<'e, E>(
    executor: E,
    sha256_hex: &str,
    manifest_for_application_name: Option<&str>,
    now_epoch_ms: i64,
    fresh_at_epoch_ms: Option<i64>,
) -> Result<bool, Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = query(
        "INSERT OR IGNORE INTO files
            (sha256_hex, manifest_for_application_name, file_state, size_bytes,
             last_used_at_epoch_ms, fresh_at_epoch_ms)
         VALUES (?1, ?2, 'DIRTY', 0, ?3, ?4)",
    )
    .bind(sha256_hex)
    .bind(manifest_for_application_name)
    .bind(now_epoch_ms)
    .bind(fresh_at_epoch_ms)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn mark_ready<'e, E>(executor: E, id: i64, size_bytes: i64, now_epoch_ms: i64) -> Result<(), Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    query(
        "UPDATE files SET file_state = 'READY', size_bytes = ?2, last_used_at_epoch_ms = ?3
         WHERE id = ?1",
    )
    .bind(id)
    .bind(size_bytes)
    .bind(now_epoch_ms)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn touch<'e, E>(executor: E, id: i64, now_epoch_ms: i64) -> Result<(), Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    query("UPDATE files SET last_used_at_epoch_ms = ?2 WHERE id = ?1")
        .bind(id)
        .bind(now_epoch_ms)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn update_fresh_at<'e, E>(executor: E, id: i64, fresh_at_epoch_ms: i64) -> Result<(), Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    query("UPDATE files SET fresh_at_epoch_ms = ?2 WHERE id = ?1")
        .bind(id)
        .bind(fresh_at_epoch_ms)
        .execute(executor)
        .await?;
    Ok(())
}

/// Delete a row and its pins.
pub async fn delete_entry(pool: &Pool<Sqlite>, id: i64) -> Result<(), Error> {
    let mut tx = pool.begin().await?;
    query("DELETE FROM pins WHERE file_id = ?1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    query("DELETE FROM files WHERE id = ?1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

pub async fn any_dirty<'e, E>(executor: E) -> Result<Option<CacheEntry>, Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = query("SELECT * FROM files WHERE file_state = 'DIRTY' LIMIT 1")
        .fetch_optional(executor)
        .await?;
    optional_entry(row)
}

/// Bytes held by READY entries, pinned ones included.
pub async fn ready_bytes<'e, E>(executor: E) -> Result<i64, Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = query("SELECT COALESCE(SUM(size_bytes), 0) AS total FROM files WHERE file_state = 'READY'")
        .fetch_one(executor)
        .await?;
    Ok(row.try_get("total")?)
}

/// Least recently used READY entry that no application has pinned.
pub async fn oldest_unpinned_ready<'e, E>(executor: E) -> Result<Option<CacheEntry>, Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = query(
        "SELECT * FROM files
         WHERE file_state = 'READY'
           AND NOT EXISTS (SELECT 1 FROM pins WHERE pins.file_id = files.id)
         ORDER BY last_used_at_epoch_ms ASC, id ASC
         LIMIT 1",
    )
    .fetch_optional(executor)
    .await?;
    optional_entry(row)
}

/// Freshest READY manifest pinned by `application_name`, optionally
/// skipping one file.
pub async fn pinned_manifest<'e, E>(
    executor: E,
    application_name: &str,
    excluding_id: Option<i64>,
) -> Result<Option<CacheEntry>, Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = query(
        "SELECT files.* FROM files
         JOIN pins ON pins.file_id = files.id
         WHERE pins.application_name = ?1
           AND files.manifest_for_application_name = ?1
           AND files.file_state = 'READY'
           AND (?2 IS NULL OR files.id != ?2)
         ORDER BY files.fresh_at_epoch_ms DESC, files.id DESC
         LIMIT 1",
    )
    .bind(application_name)
    .bind(excluding_id)
    .fetch_optional(executor)
    .await?;
    optional_entry(row)
}

pub async fn create_pin<'e, E>(executor: E, file_id: i64, application_name: &str) -> Result<(), Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    query("INSERT OR IGNORE INTO pins (file_id, application_name) VALUES (?1, ?2)")
        .bind(file_id)
        .bind(application_name)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn delete_pin<'e, E>(executor: E, file_id: i64, application_name: &str) -> Result<(), Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    query("DELETE FROM pins WHERE file_id = ?1 AND application_name = ?2")
        .bind(file_id)
        .bind(application_name)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn delete_application_pins<'e, E>(executor: E, application_name: &str) -> Result<(), Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    query("DELETE FROM pins WHERE application_name = ?1")
        .bind(application_name)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn is_pinned<'e, E>(executor: E, file_id: i64, application_name: &str) -> Result<bool, Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = query("SELECT 1 FROM pins WHERE file_id = ?1 AND application_name = ?2")
        .bind(file_id)
        .bind(application_name)
        .fetch_optional(executor)
        .await?;
    Ok(row.is_some())
}

pub async fn count_files<'e, E>(executor: E) -> Result<i64, Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = query("SELECT COUNT(*) AS n FROM files").fetch_one(executor).await?;
    Ok(row.try_get("n")?)
}

pub async fn count_pins<'e, E>(executor: E) -> Result<i64, Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = query("SELECT COUNT(*) AS n FROM pins").fetch_one(executor).await?;
    Ok(row.try_get("n")?)
}
