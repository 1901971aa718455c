//! Database setup for SQLite with sqlite-vec
//!
//! Registers the sqlite-vec extension before any connection opens so the
//! vec0 virtual table is available, then runs migrations.

use std::str::FromStr;
use std::sync::Once;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::{Error, Result};

static VEC_INIT: Once = Once::new();

/// Register sqlite-vec as an auto extension for every new connection.
///
/// Must run before the pool opens its first connection. Idempotent.
pub fn register_vector_extension() {
    VEC_INIT.call_once(|| unsafe {
        libsqlite3_sys::sqlite3_auto_extension(Some(std::mem::transmute::<
            *const (),
            unsafe extern "C" fn(
                *mut libsqlite3_sys::sqlite3,
                *mut *mut std::os::raw::c_char,
                *const libsqlite3_sys::sqlite3_api_routines,
            ) -> std::os::raw::c_int,
        >(sqlite_vec::sqlite3_vec_init as *const ())));
    });
}

/// Open the connection pool and run migrations.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    register_vector_extension();

    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| Error::Configuration(format!("Invalid DATABASE_URL: {e}")))?
        .create_if_missing(true)
        .foreign_keys(true);

    let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(10);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to run migrations: {e}")))?;

    Ok(pool)
}

/// Open an in-memory database with the full schema, for local mode and tests.
///
/// The pool is pinned to a single never-expiring connection: an in-memory
/// SQLite database lives and dies with its connection.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    register_vector_extension();

    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|e| Error::Configuration(format!("in-memory options: {e}")))?
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to run migrations: {e}")))?;

    Ok(pool)
}

/// Ensure the vec_knowledge virtual table exists with the configured
/// dimension. Safe to call multiple times (IF NOT EXISTS).
pub async fn ensure_vec_table(pool: &SqlitePool, dimension: usize) -> Result<()> {
    sqlx::query(&format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS vec_knowledge USING vec0(\
         embedding_id TEXT PRIMARY KEY, \
         embedding float[{dimension}])"
    ))
    .execute(pool)
    .await?;
    tracing::info!(dimension, "vec_knowledge virtual table ready");
    Ok(())
}

/// Health check
pub async fn health_check(pool: &SqlitePool) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
