//! SQLite pool construction and schema bootstrap.
//!
//! `create_pool` connects and applies the idempotent schema, so callers
//! (the binary and tests alike) always see a ready `cadence_items` table.
//! Calendar dates are stored as ISO-8601 `TEXT`, which keeps lexicographic
//! and chronological order identical for range predicates.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS cadence_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        patient_id INTEGER NOT NULL,
        practice_id INTEGER NOT NULL,
        test_order_id INTEGER,
        cadence_date TEXT NOT NULL,
        order_date TEXT,
        blood_collection_date TEXT,
        blood_collection_method TEXT NOT NULL DEFAULT '',
        active INTEGER NOT NULL DEFAULT 0,
        item_status TEXT NOT NULL DEFAULT 'Future',
        published INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    "CREATE INDEX IF NOT EXISTS idx_cadence_items_patient ON cadence_items (patient_id)",
    "CREATE INDEX IF NOT EXISTS idx_cadence_items_status ON cadence_items (item_status)",
    "CREATE INDEX IF NOT EXISTS idx_cadence_items_published ON cadence_items (published)",
];

/// Open a SQLite pool for `database_url` and apply the schema.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    // A pooled `:memory:` URL would hand every connection its own empty
    // database, so in-memory pools are pinned to a single connection.
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    for statement in SCHEMA {
        sqlx::query(statement).execute(&pool).await?;
    }

    Ok(pool)
}
