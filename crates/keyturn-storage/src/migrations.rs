//! Database schema migrations.
//!
//! Applies the users and action_tokens tables, tracked in
//! schema_migrations.

use rusqlite::Connection;
use tracing::info;

use keyturn_core::error::KeyturnError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), KeyturnError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| KeyturnError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| KeyturnError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: users and action tokens. Timestamps are Unix milliseconds.
fn apply_v1(conn: &Connection) -> Result<(), KeyturnError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            email           TEXT NOT NULL,
            first_name      TEXT,
            last_name       TEXT,
            is_staff        INTEGER NOT NULL DEFAULT 0,
            email_verified  INTEGER NOT NULL DEFAULT 0,
            auth_token      TEXT NOT NULL UNIQUE,
            created_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_users_email
            ON users (email);

        CREATE TABLE IF NOT EXISTS action_tokens (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            token_key       TEXT NOT NULL UNIQUE
                            CHECK (length(token_key) BETWEEN 1 AND 40),
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL,
            consumed_at     INTEGER,
            consumer_id     INTEGER REFERENCES users(id) ON DELETE CASCADE,
            first_name      TEXT,
            last_name       TEXT,
            email           TEXT NOT NULL,
            is_canceled     INTEGER NOT NULL DEFAULT 0,
            action          TEXT NOT NULL
                            CHECK (length(action) BETWEEN 1 AND 100),
            target_type     TEXT,
            target_id       INTEGER,
            CHECK ((target_type IS NULL) = (target_id IS NULL))
        );

        CREATE INDEX IF NOT EXISTS idx_action_tokens_action
            ON action_tokens (action, created_at DESC);

        CREATE INDEX IF NOT EXISTS idx_action_tokens_target
            ON action_tokens (target_type, target_id)
            WHERE target_type IS NOT NULL;

        CREATE INDEX IF NOT EXISTS idx_action_tokens_email
            ON action_tokens (email);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| KeyturnError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}
