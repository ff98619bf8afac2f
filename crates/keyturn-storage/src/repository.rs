//! Repository implementations for SQLite-backed persistence.
//!
//! Provides TokenRepository and UserRepository that operate on the
//! Database struct using raw SQL.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::debug;

use keyturn_core::error::KeyturnError;
use keyturn_core::key::generate_key;
use keyturn_core::token::{ActionToken, NewToken, TokenPolicy};
use keyturn_core::types::{TargetRef, User};

use crate::db::Database;

const TOKEN_COLUMNS: &str = "id, token_key, created_at, updated_at, consumed_at, consumer_id,
     first_name, last_name, email, is_canceled, action, target_type, target_id";

const USER_COLUMNS: &str =
    "id, email, first_name, last_name, is_staff, email_verified, auth_token, created_at";

/// Filters for listing tokens. `None` means "don't filter on this".
#[derive(Debug, Clone, Default)]
pub struct TokenFilters {
    pub action: Option<String>,
    pub is_canceled: Option<bool>,
    pub expired: Option<bool>,
    pub consumed: Option<bool>,
    pub target: Option<TargetRef>,
    /// Substring matched against email, first and last name.
    pub search: Option<String>,
    pub limit: Option<u64>,
}

impl TokenFilters {
    /// Tokens that are neither consumed, canceled nor expired.
    pub fn pending() -> Self {
        Self {
            is_canceled: Some(false),
            expired: Some(false),
            consumed: Some(false),
            ..Self::default()
        }
    }

    pub fn consumed() -> Self {
        Self {
            consumed: Some(true),
            ..Self::default()
        }
    }

    pub fn for_target(mut self, target: TargetRef) -> Self {
        self.target = Some(target);
        self
    }
}

/// Result of an unconditional consumption.
#[derive(Debug, Clone)]
pub struct ConsumeOutcome {
    pub token: ActionToken,
    /// Whether this call moved the token from not consumed to consumed.
    pub transitioned: bool,
}

/// Repository for account action tokens.
pub struct TokenRepository {
    db: Arc<Database>,
}

impl TokenRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new token, generating its key when none is supplied.
    pub fn insert(&self, new: &NewToken) -> Result<ActionToken, KeyturnError> {
        new.validate()?;
        let key = new.key.clone().unwrap_or_else(generate_key);
        let now = to_millis(Utc::now());
        let (target_type, target_id) = split_target(new.target.as_ref());

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO action_tokens
                    (token_key, created_at, updated_at, first_name, last_name, email,
                     action, target_type, target_id)
                 VALUES (?1, ?2, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    key,
                    now,
                    new.first_name,
                    new.last_name,
                    new.email.trim(),
                    new.action,
                    target_type,
                    target_id,
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
                {
                    KeyturnError::Validation(format!("Token key already in use: {}", key))
                }
                other => KeyturnError::Storage(format!("Failed to save token: {}", other)),
            })?;

            let id = conn.last_insert_rowid();
            debug!(token_id = id, action = %new.action, "Token inserted");
            fetch_token(conn, "id = ?1", &id)?
                .ok_or_else(|| KeyturnError::Storage(format!("Token {} vanished after insert", id)))
        })
    }

    pub fn find_by_key(&self, key: &str) -> Result<Option<ActionToken>, KeyturnError> {
        self.db.with_conn(|conn| fetch_token(conn, "token_key = ?1", &key))
    }

    pub fn find_by_id(&self, id: i64) -> Result<Option<ActionToken>, KeyturnError> {
        self.db.with_conn(|conn| fetch_token(conn, "id = ?1", &id))
    }

    /// Persist the editable fields of `token` and refresh `updated_at`.
    ///
    /// The key, creation date and consumption fields are never written here.
    pub fn update(&self, token: &ActionToken) -> Result<Option<ActionToken>, KeyturnError> {
        let (target_type, target_id) = split_target(token.target.as_ref());
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE action_tokens
                     SET first_name = ?1, last_name = ?2, email = ?3, is_canceled = ?4,
                         action = ?5, target_type = ?6, target_id = ?7, updated_at = ?8
                     WHERE id = ?9",
                    params![
                        token.first_name,
                        token.last_name,
                        token.email,
                        token.is_canceled,
                        token.action,
                        target_type,
                        target_id,
                        to_millis(Utc::now()),
                        token.id,
                    ],
                )
                .map_err(|e| KeyturnError::Storage(format!("Failed to update token: {}", e)))?;
            if changed == 0 {
                return Ok(None);
            }
            fetch_token(conn, "id = ?1", &token.id)
        })
    }

    /// Flip `is_canceled` on every listed token. Returns the number updated.
    pub fn set_canceled(&self, ids: &[i64], canceled: bool) -> Result<usize, KeyturnError> {
        self.set_canceled_where("id", ids, canceled)
    }

    pub fn set_canceled_by_keys(
        &self,
        keys: &[String],
        canceled: bool,
    ) -> Result<usize, KeyturnError> {
        self.set_canceled_where("token_key", keys, canceled)
    }

    fn set_canceled_where<V: ToSql>(
        &self,
        column: &str,
        values: &[V],
        canceled: bool,
    ) -> Result<usize, KeyturnError> {
        if values.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        let sql = format!(
            "UPDATE action_tokens SET is_canceled = ?, updated_at = ? WHERE {} IN ({})",
            column, placeholders
        );
        let now = to_millis(Utc::now());
        let mut bound: Vec<&dyn ToSql> = vec![&canceled, &now];
        bound.extend(values.iter().map(|v| v as &dyn ToSql));

        self.db.with_conn(|conn| {
            conn.execute(&sql, params_from_iter(bound))
                .map_err(|e| KeyturnError::Storage(format!("Failed to update tokens: {}", e)))
        })
    }

    /// Record consumption by `user_id`, whatever the token's current state.
    ///
    /// The prior consumption state is read in the same transaction as the
    /// write, so `transitioned` is true for exactly one caller.
    pub fn consume(
        &self,
        id: i64,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<ConsumeOutcome>, KeyturnError> {
        self.db.with_tx(|tx| {
            let was_consumed: Option<bool> = tx
                .query_row(
                    "SELECT consumed_at IS NOT NULL AND consumer_id IS NOT NULL
                     FROM action_tokens WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| KeyturnError::Storage(e.to_string()))?;
            let Some(was_consumed) = was_consumed else {
                return Ok(None);
            };

            let now = to_millis(now);
            tx.execute(
                "UPDATE action_tokens SET consumer_id = ?1, consumed_at = ?2, updated_at = ?2
                 WHERE id = ?3",
                params![user_id, now, id],
            )
            .map_err(|e| KeyturnError::Storage(format!("Failed to consume token: {}", e)))?;

            Ok(fetch_token(tx, "id = ?1", &id)?.map(|token| ConsumeOutcome {
                token,
                transitioned: !was_consumed,
            }))
        })
    }

    /// Consume the token only if it is still consumable at `now`.
    ///
    /// Check and write happen in one conditional UPDATE. Returns `None`
    /// when the key is unknown or the token is canceled, expired or
    /// already consumed.
    pub fn consume_if_consumable(
        &self,
        key: &str,
        user_id: i64,
        now: DateTime<Utc>,
        policy: &TokenPolicy,
    ) -> Result<Option<ActionToken>, KeyturnError> {
        let cutoff = to_millis(now - policy.validity());
        let now = to_millis(now);
        self.db.with_tx(|tx| {
            let changed = tx
                .execute(
                    "UPDATE action_tokens SET consumer_id = ?1, consumed_at = ?2, updated_at = ?2
                     WHERE token_key = ?3
                       AND is_canceled = 0
                       AND (consumed_at IS NULL OR consumer_id IS NULL)
                       AND created_at >= ?4",
                    params![user_id, now, key, cutoff],
                )
                .map_err(|e| KeyturnError::Storage(format!("Failed to consume token: {}", e)))?;
            if changed == 0 {
                return Ok(None);
            }
            fetch_token(tx, "token_key = ?1", &key)
        })
    }

    /// List tokens matching `filters`, newest first.
    pub fn list(
        &self,
        filters: &TokenFilters,
        policy: &TokenPolicy,
    ) -> Result<Vec<ActionToken>, KeyturnError> {
        self.list_at(filters, policy, Utc::now())
    }

    pub fn list_at(
        &self,
        filters: &TokenFilters,
        policy: &TokenPolicy,
        now: DateTime<Utc>,
    ) -> Result<Vec<ActionToken>, KeyturnError> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut bound: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(action) = &filters.action {
            clauses.push("action = ?");
            bound.push(Box::new(action.clone()));
        }
        if let Some(canceled) = filters.is_canceled {
            clauses.push("is_canceled = ?");
            bound.push(Box::new(canceled));
        }
        if let Some(expired) = filters.expired {
            clauses.push(if expired {
                "created_at < ?"
            } else {
                "created_at >= ?"
            });
            bound.push(Box::new(to_millis(now - policy.validity())));
        }
        if let Some(consumed) = filters.consumed {
            clauses.push(if consumed {
                "(consumed_at IS NOT NULL AND consumer_id IS NOT NULL)"
            } else {
                "(consumed_at IS NULL OR consumer_id IS NULL)"
            });
        }
        if let Some(target) = &filters.target {
            clauses.push("target_type = ? AND target_id = ?");
            bound.push(Box::new(target.content_type.clone()));
            bound.push(Box::new(target.object_id));
        }
        if let Some(search) = filters.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            clauses.push(
                "(email LIKE ? ESCAPE '\\' OR first_name LIKE ? ESCAPE '\\' \
                 OR last_name LIKE ? ESCAPE '\\')",
            );
            let pattern = format!("%{}%", escape_like(search));
            for _ in 0..3 {
                bound.push(Box::new(pattern.clone()));
            }
        }

        let mut sql = format!("SELECT {} FROM action_tokens", TOKEN_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");
        if let Some(limit) = filters.limit {
            sql.push_str(" LIMIT ?");
            bound.push(Box::new(i64::try_from(limit).unwrap_or(i64::MAX)));
        }

        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| KeyturnError::Storage(format!("Token list prepare: {}", e)))?;
            let rows = stmt
                .query_map(params_from_iter(bound.iter()), map_token_row)
                .map_err(|e| KeyturnError::Storage(format!("Token list query: {}", e)))?;

            let mut tokens = Vec::new();
            for row in rows {
                tokens.push(row.map_err(|e| KeyturnError::Storage(e.to_string()))?);
            }
            Ok(tokens)
        })
    }

    pub fn pending(&self, policy: &TokenPolicy) -> Result<Vec<ActionToken>, KeyturnError> {
        self.list(&TokenFilters::pending(), policy)
    }

    pub fn pending_for(
        &self,
        target: &TargetRef,
        policy: &TokenPolicy,
    ) -> Result<Vec<ActionToken>, KeyturnError> {
        self.list(&TokenFilters::pending().for_target(target.clone()), policy)
    }

    pub fn consumed(&self, policy: &TokenPolicy) -> Result<Vec<ActionToken>, KeyturnError> {
        self.list(&TokenFilters::consumed(), policy)
    }

    pub fn consumed_for(
        &self,
        target: &TargetRef,
        policy: &TokenPolicy,
    ) -> Result<Vec<ActionToken>, KeyturnError> {
        self.list(&TokenFilters::consumed().for_target(target.clone()), policy)
    }

    pub fn count(&self) -> Result<u64, KeyturnError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM action_tokens", [], |row| row.get(0))
                .map_err(|e| KeyturnError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

/// Data for a new user account.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_staff: bool,
}

impl NewUser {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            ..Self::default()
        }
    }

    pub fn staff(mut self) -> Self {
        self.is_staff = true;
        self
    }
}

/// Repository for user accounts.
pub struct UserRepository {
    db: Arc<Database>,
}

impl UserRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create a user with a freshly generated bearer credential.
    pub fn create(&self, new: &NewUser) -> Result<User, KeyturnError> {
        if new.email.trim().is_empty() {
            return Err(KeyturnError::Validation(
                "User email must not be empty".to_string(),
            ));
        }
        let auth_token = generate_key();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (email, first_name, last_name, is_staff, auth_token, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    new.email.trim(),
                    new.first_name,
                    new.last_name,
                    new.is_staff,
                    auth_token,
                    to_millis(Utc::now()),
                ],
            )
            .map_err(|e| KeyturnError::Storage(format!("Failed to save user: {}", e)))?;
            let id = conn.last_insert_rowid();
            fetch_user(conn, "id = ?1", &id)?
                .ok_or_else(|| KeyturnError::Storage(format!("User {} vanished after insert", id)))
        })
    }

    pub fn find_by_id(&self, id: i64) -> Result<Option<User>, KeyturnError> {
        self.db.with_conn(|conn| fetch_user(conn, "id = ?1", &id))
    }

    pub fn find_by_auth_token(&self, token: &str) -> Result<Option<User>, KeyturnError> {
        if token.is_empty() {
            return Ok(None);
        }
        self.db
            .with_conn(|conn| fetch_user(conn, "auth_token = ?1", &token))
    }

    /// Returns `false` when no such user exists.
    pub fn mark_email_verified(&self, id: i64) -> Result<bool, KeyturnError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE users SET email_verified = 1 WHERE id = ?1",
                    params![id],
                )
                .map_err(|e| KeyturnError::Storage(format!("Failed to update user: {}", e)))?;
            Ok(changed > 0)
        })
    }
}

fn fetch_token(
    conn: &Connection,
    predicate: &str,
    value: &dyn ToSql,
) -> Result<Option<ActionToken>, KeyturnError> {
    let sql = format!(
        "SELECT {} FROM action_tokens WHERE {}",
        TOKEN_COLUMNS, predicate
    );
    conn.query_row(&sql, params_from_iter([value]), map_token_row)
        .optional()
        .map_err(|e| KeyturnError::Storage(e.to_string()))
}

fn fetch_user(
    conn: &Connection,
    predicate: &str,
    value: &dyn ToSql,
) -> Result<Option<User>, KeyturnError> {
    let sql = format!("SELECT {} FROM users WHERE {}", USER_COLUMNS, predicate);
    conn.query_row(&sql, params_from_iter([value]), map_user_row)
        .optional()
        .map_err(|e| KeyturnError::Storage(e.to_string()))
}

fn map_token_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActionToken> {
    let target_type: Option<String> = row.get(11)?;
    let target_id: Option<i64> = row.get(12)?;
    Ok(ActionToken {
        id: row.get(0)?,
        key: row.get(1)?,
        created_at: from_millis(2, row.get(2)?)?,
        updated_at: from_millis(3, row.get(3)?)?,
        consumed_at: row
            .get::<_, Option<i64>>(4)?
            .map(|ms| from_millis(4, ms))
            .transpose()?,
        consumer_id: row.get(5)?,
        first_name: row.get(6)?,
        last_name: row.get(7)?,
        email: row.get(8)?,
        is_canceled: row.get(9)?,
        action: row.get(10)?,
        target: match (target_type, target_id) {
            (Some(content_type), Some(object_id)) => Some(TargetRef::new(content_type, object_id)),
            _ => None,
        },
    })
}

fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        is_staff: row.get(4)?,
        email_verified: row.get(5)?,
        auth_token: row.get(6)?,
        created_at: from_millis(7, row.get(7)?)?,
    })
}

fn split_target(target: Option<&TargetRef>) -> (Option<String>, Option<i64>) {
    match target {
        Some(t) => (Some(t.content_type.clone()), Some(t.object_id)),
        None => (None, None),
    }
}

fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

/// Decode the timestamp stored in column `idx`. Out-of-range values are a row error.
fn from_millis(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            Box::new(KeyturnError::Storage(format!(
                "timestamp {} is out of range",
                ms
            ))),
        )
    })
}

/// Escape LIKE wildcards so user text matches literally under `ESCAPE '\'`.
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
