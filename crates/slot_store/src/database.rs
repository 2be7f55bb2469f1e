use std::path::Path;
use std::str::FromStr;

use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

/// Creates a connection pool backed by the SQLite file at `path`, creating it if needed.
///
/// The pool holds a single connection, so reads and writes are serialized.
pub async fn create_connection_pool(path: &Path) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
}

/// Creates a pool over a private in-memory database.
///
/// The connection is never recycled; closing it discards the data.
pub async fn create_memory_pool() -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
}

/// Tests the database connection by executing a simple query.
pub async fn test_connection(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let row = sqlx::query("SELECT 1 as test").fetch_one(pool).await?;

    let test_value: i64 = row.try_get("test")?;
    tracing::debug!("Cache database reachable, test value: {}", test_value);

    Ok(())
}
