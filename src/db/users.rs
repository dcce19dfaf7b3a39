//! User records.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{StorageError, StorageResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            username: row.get("username")?,
            email: row.get("email")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
}

/// Partial update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUpdate {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Insert-or-update payload: inserts when `id` is absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInput {
    #[serde(default)]
    pub id: Option<i64>,
    pub username: String,
    pub email: String,
}

const SELECT_COLUMNS: &str = "SELECT id, username, email, created_at, updated_at FROM users";

/// CRUD over the `users` table.
pub struct UserStore<'a> {
    conn: &'a Connection,
}

impl<'a> UserStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn list(&self) -> StorageResult<Vec<User>> {
        let mut stmt = self.conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id"))?;
        let users = stmt
            .query_map([], User::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    pub fn get_by_id(&self, id: i64) -> StorageResult<User> {
        self.find(self.conn, id)?
            .ok_or(StorageError::NotFound { entity: "user", id })
    }

    pub fn insert(&self, user: &NewUser) -> StorageResult<User> {
        validate(&user.username, &user.email)?;
        let now = Utc::now();

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO users (username, email, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![user.username, user.email, now],
        )
        .map_err(|e| conflict_or(e, &user.username))?;
        let id = tx.last_insert_rowid();
        let created = self
            .find(&tx, id)?
            .ok_or(StorageError::NotFound { entity: "user", id })?;
        tx.commit()?;

        info!(id, username = %created.username, "inserted user");
        Ok(created)
    }

    pub fn update_by_id(&self, id: i64, update: &UserUpdate) -> StorageResult<User> {
        let tx = self.conn.unchecked_transaction()?;
        let current = self
            .find(&tx, id)?
            .ok_or(StorageError::NotFound { entity: "user", id })?;

        let username = update.username.clone().unwrap_or(current.username);
        let email = update.email.clone().unwrap_or(current.email);
        validate(&username, &email)?;

        tx.execute(
            "UPDATE users SET username = ?1, email = ?2, updated_at = ?3 WHERE id = ?4",
            params![username, email, Utc::now(), id],
        )
        .map_err(|e| conflict_or(e, &username))?;
        let updated = self
            .find(&tx, id)?
            .ok_or(StorageError::NotFound { entity: "user", id })?;
        tx.commit()?;

        info!(id, "updated user");
        Ok(updated)
    }

    pub fn delete_by_id(&self, id: i64) -> StorageResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        let deleted = tx.execute("DELETE FROM users WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(StorageError::NotFound { entity: "user", id });
        }
        tx.commit()?;

        info!(id, "deleted user");
        Ok(())
    }

    /// Insert when `input.id` is absent, update otherwise.
    pub fn save(&self, input: &UserInput) -> StorageResult<User> {
        match input.id {
            Some(id) => {
                debug!(id, "saving existing user");
                self.update_by_id(
                    id,
                    &UserUpdate {
                        username: Some(input.username.clone()),
                        email: Some(input.email.clone()),
                    },
                )
            }
            None => self.insert(&NewUser {
                username: input.username.clone(),
                email: input.email.clone(),
            }),
        }
    }

    fn find(&self, conn: &Connection, id: i64) -> StorageResult<Option<User>> {
        let user = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id],
                User::from_row,
            )
            .optional()?;
        Ok(user)
    }
}

fn validate(username: &str, email: &str) -> StorageResult<()> {
    if username.trim().is_empty() {
        return Err(StorageError::Invalid("username must not be empty".to_string()));
    }
    if !email.contains('@') {
        return Err(StorageError::Invalid(format!("invalid email address: {email}")));
    }
    Ok(())
}

fn conflict_or(err: rusqlite::Error, username: &str) -> StorageError {
    match err.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => {
            StorageError::Conflict(format!("username {username} already exists"))
        }
        _ => StorageError::Sqlite(err),
    }
}
