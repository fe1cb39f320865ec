//! Local SQLite cache layer.
//!
//! Uses rusqlite with WAL mode. Two tables carry everything: a key/value
//! collection cache holding one JSON array per synced collection, and a
//! category/key settings table for small scalars (order-number prefix,
//! realtime cursors). The cache is a durability layer only; the in-memory
//! store is authoritative while the process runs.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

pub struct CacheState {
    conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Initialize the cache at `{data_dir}/pos-cache.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(data_dir: &Path) -> Result<CacheState, String> {
    fs::create_dir_all(data_dir).map_err(|e| format!("Failed to create data dir: {e}"))?;

    let db_path = data_dir.join("pos-cache.db");
    info!("Opening cache database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Cache open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                let _ = fs::remove_file(db_path.with_extension("db-wal"));
                let _ = fs::remove_file(db_path.with_extension("db-shm"));
            }
            open_and_configure(&db_path).map_err(|e| format!("Cache open failed after retry: {e}"))?
        }
    };

    run_migrations(&conn)?;

    info!("Cache initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(CacheState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// In-memory cache for tests and ephemeral sessions.
pub fn open_in_memory() -> Result<CacheState, String> {
    let conn = Connection::open_in_memory().map_err(|e| format!("sqlite open: {e}"))?;
    run_migrations(&conn)?;
    Ok(CacheState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    })
}

fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;

    Ok(conn)
}

fn run_migrations(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    info!("Migrating cache from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Migration v1: collection cache, one JSON array per collection.
fn migrate_v1(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS collection_cache (
            cache_key TEXT PRIMARY KEY,
            data TEXT NOT NULL,
            updated_at TEXT DEFAULT (datetime('now'))
        );

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| format!("migration v1: {e}"))
}

/// Migration v2: category/key settings store.
fn migrate_v2(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS local_settings (
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            updated_at TEXT DEFAULT (datetime('now')),
            PRIMARY KEY (setting_category, setting_key)
        );

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| format!("migration v2: {e}"))
}

impl CacheState {
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Raw JSON for a collection. `None` means the key has never been
    /// written, which is distinct from an empty (`"[]"`) collection.
    pub fn read_collection(&self, cache_key: &str) -> Option<String> {
        self.conn()
            .query_row(
                "SELECT data FROM collection_cache WHERE cache_key = ?1",
                params![cache_key],
                |row| row.get(0),
            )
            .ok()
    }

    /// Overwrite a collection wholesale. Partial updates are never written;
    /// the caller always persists the full array.
    pub fn write_collection(&self, cache_key: &str, data: &str) -> Result<(), String> {
        self.conn()
            .execute(
                "INSERT INTO collection_cache (cache_key, data, updated_at)
                 VALUES (?1, ?2, datetime('now'))
                 ON CONFLICT(cache_key) DO UPDATE SET
                    data = excluded.data,
                    updated_at = excluded.updated_at",
                params![cache_key, data],
            )
            .map_err(|e| format!("write_collection {cache_key}: {e}"))?;
        Ok(())
    }

    pub fn get_setting(&self, category: &str, key: &str) -> Option<String> {
        self.conn()
            .query_row(
                "SELECT setting_value FROM local_settings
                 WHERE setting_category = ?1 AND setting_key = ?2",
                params![category, key],
                |row| row.get(0),
            )
            .ok()
    }

    pub fn set_setting(&self, category: &str, key: &str, value: &str) -> Result<(), String> {
        self.conn()
            .execute(
                "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
                 VALUES (?1, ?2, ?3, datetime('now'))
                 ON CONFLICT(setting_category, setting_key) DO UPDATE SET
                    setting_value = excluded.setting_value,
                    updated_at = excluded.updated_at",
                params![category, key, value],
            )
            .map_err(|e| format!("set_setting {category}/{key}: {e}"))?;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
