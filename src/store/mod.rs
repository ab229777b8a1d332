//! Persistence for filo.
//!
//! A write-through SQLite store: the in-memory registries stay
//! authoritative, every committed mutation is mirrored here synchronously,
//! and the whole state is loaded back once at startup. A store failure is
//! never fatal to the server: callers log and carry on.

mod schema;

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use crate::chat::{ChatEntity, Message};
use crate::config::DatabaseConfig;
use crate::user::Account;
use crate::Result;

/// SQLite-backed store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open the store at the configured path, creating the file and schema
    /// as needed.
    pub async fn open(config: &DatabaseConfig) -> Result<Self> {
        let path = Path::new(&config.path);
        info!("Opening store at {:?}", path);

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // The in-memory registries are authoritative and soft-fail means a
        // dropped write must not poison later, independent writes, so
        // referential enforcement stays off.
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", config.path))
            .map_err(sqlx::Error::from)?
            .create_if_missing(true)
            .foreign_keys(false);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory store for testing.
    ///
    /// The pool is pinned to one connection; every connection to
    /// `sqlite::memory:` would otherwise get its own database.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(sqlx::Error::from)?
            .foreign_keys(false);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        // raw_sql: the schema is a batch of statements, not one query
        sqlx::raw_sql(schema::SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Persist a freshly registered account. Status is stored as offline;
    /// presence is a runtime property.
    pub async fn create_user(&self, account: &Account) -> Result<()> {
        sqlx::query("INSERT INTO users (id, username, password, status) VALUES (?, ?, ?, 0)")
            .bind(account.id)
            .bind(&account.username)
            .bind(&account.password)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Persist a freshly created chat with its initial members (and name,
    /// for groups).
    pub async fn create_chat(
        &self,
        chat_id: i64,
        kind: &str,
        name: Option<&str>,
        members: &[i64],
    ) -> Result<()> {
        sqlx::query("INSERT INTO chats (id, kind) VALUES (?, ?)")
            .bind(chat_id)
            .bind(kind)
            .execute(&self.pool)
            .await?;

        if let Some(name) = name {
            sqlx::query("INSERT INTO groups (chat_id, name) VALUES (?, ?)")
                .bind(chat_id)
                .bind(name)
                .execute(&self.pool)
                .await?;
        }

        for &user_id in members {
            self.add_participant(chat_id, user_id).await?;
        }
        Ok(())
    }

    /// Persist a group membership addition.
    pub async fn add_participant(&self, chat_id: i64, user_id: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO chat_members (chat_id, user_id) VALUES (?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(chat_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist a posted message.
    pub async fn append_message(&self, message: &Message) -> Result<()> {
        sqlx::query(
            "INSERT INTO messages (id, chat_id, sender_id, content, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(message.id)
        .bind(message.chat_id)
        .bind(message.sender_id)
        .bind(&message.content)
        .bind(message.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Load every stored account. Called once at startup.
    pub async fn load_all_users(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query("SELECT id, username, password FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        let mut accounts = Vec::with_capacity(rows.len());
        for row in rows {
            accounts.push(Account::new(
                row.try_get::<i64, _>("id")?,
                row.try_get::<String, _>("username")?,
                row.try_get::<String, _>("password")?,
            ));
        }
        Ok(accounts)
    }

    /// Load every stored chat with members and message log. Called once at
    /// startup.
    ///
    /// A self-DM stores the same id in both pair slots, which collapses to a
    /// single member row; a lone member row is rebuilt as the self-pair. Any
    /// other member count for a direct chat is skipped with a warning rather
    /// than poisoning the registry.
    pub async fn load_all_chats(&self) -> Result<Vec<ChatEntity>> {
        let rows = sqlx::query("SELECT id, kind FROM chats ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        let mut chats = Vec::with_capacity(rows.len());
        for row in rows {
            let chat_id: i64 = row.try_get("id")?;
            let kind: String = row.try_get("kind")?;
            let members = self.load_members(chat_id).await?;

            let mut chat = match kind.as_str() {
                "DirectMessage" => match members.as_slice() {
                    [a, b] => ChatEntity::direct(chat_id, *a, *b),
                    [solo] => ChatEntity::direct(chat_id, *solo, *solo),
                    _ => {
                        warn!(
                            "Skipping direct chat {} with {} stored members",
                            chat_id,
                            members.len()
                        );
                        continue;
                    }
                },
                "Gruppo" => {
                    let name = self.load_group_name(chat_id).await?;
                    ChatEntity::group(chat_id, name, members)
                }
                other => {
                    warn!("Skipping chat {} with unknown kind {:?}", chat_id, other);
                    continue;
                }
            };

            for message in self.load_messages(chat_id).await? {
                chat.push_message(message);
            }
            chats.push(chat);
        }
        Ok(chats)
    }

    async fn load_members(&self, chat_id: i64) -> Result<Vec<i64>> {
        let rows =
            sqlx::query("SELECT user_id FROM chat_members WHERE chat_id = ? ORDER BY rowid")
                .bind(chat_id)
                .fetch_all(&self.pool)
                .await?;

        rows.iter()
            .map(|row| row.try_get::<i64, _>("user_id").map_err(Into::into))
            .collect()
    }

    async fn load_group_name(&self, chat_id: i64) -> Result<String> {
        let row = sqlx::query("SELECT name FROM groups WHERE chat_id = ?")
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(row.try_get("name")?),
            None => {
                warn!("Group chat {} has no name row", chat_id);
                Ok(String::new())
            }
        }
    }

    async fn load_messages(&self, chat_id: i64) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT id, sender_id, content, created_at FROM messages
             WHERE chat_id = ? ORDER BY id",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let mut message = Message::new(
                row.try_get::<i64, _>("id")?,
                row.try_get::<i64, _>("sender_id")?,
                chat_id,
                row.try_get::<String, _>("content")?,
            );
            message.timestamp = parse_timestamp(&row.try_get::<String, _>("created_at")?);
            messages.push(message);
        }
        Ok(messages)
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => ts.with_timezone(&Utc),
        Err(e) => {
            warn!("Unparseable stored timestamp {:?}: {}", raw, e);
            Utc::now()
        }
    }
}
