use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::{Executor, Row};
use std::str::FromStr;
use std::time::Duration;

use super::{
    DocumentStore, DocumentStream, Document, SetMode, TransactionFn, apply_set, document_parent,
    validate_collection,
};
use crate::config::DatabaseConfig;
use crate::utils::error::StoreError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    path TEXT PRIMARY KEY NOT NULL,
    parent TEXT NOT NULL,
    body TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_documents_parent ON documents(parent);
"#;

/// Document store over a single SQLite table.
///
/// Transactions run under `BEGIN IMMEDIATE`, which takes the database write
/// lock before the read, so two concurrent merges on the same document are
/// serialized instead of racing. Subscriptions poll.
#[derive(Clone)]
pub struct SqliteDocumentStore {
    pool: SqlitePool,
    poll_interval: Duration,
}

impl SqliteDocumentStore {
    pub async fn connect(config: &DatabaseConfig, poll_interval: Duration) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(config.acquire_timeout));

        // Every connection to `sqlite::memory:` is its own database, so the
        // pool must hold exactly one connection and never recycle it.
        let in_memory = config.url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new()
            .acquire_timeout(Duration::from_secs(config.acquire_timeout));
        pool_options = if in_memory {
            pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options
                .max_connections(config.max_connections)
                .min_connections(config.min_connections)
        };

        let pool = pool_options.connect_with(options).await?;
        let store = Self::from_pool(pool, poll_interval);
        store.migrate().await?;

        tracing::info!("Connected document store at {}", config.url);
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool, poll_interval: Duration) -> Self {
        Self {
            pool,
            poll_interval,
        }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        self.pool.execute(SCHEMA).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn read_body(
        conn: &mut SqliteConnection,
        path: &str,
    ) -> Result<Option<Value>, StoreError> {
        let row = sqlx::query("SELECT body FROM documents WHERE path = ?")
            .bind(path)
            .fetch_optional(&mut *conn)
            .await?;

        match row {
            Some(row) => {
                let body: String = row.try_get("body")?;
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }

    async fn write_body(
        conn: &mut SqliteConnection,
        path: &str,
        body: &Value,
    ) -> Result<(), StoreError> {
        let parent = document_parent(path)?;
        sqlx::query(
            r#"
            INSERT INTO documents (path, parent, body, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                body = excluded.body,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(path)
        .bind(parent)
        .bind(serde_json::to_string(body)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn run_immediate(
        conn: &mut SqliteConnection,
        path: &str,
        update: TransactionFn,
    ) -> Result<Option<Value>, StoreError> {
        let current = Self::read_body(conn, path).await?;
        match update(current)? {
            Some(body) => {
                Self::write_body(conn, path, &body).await?;
                Ok(Some(body))
            }
            None => Ok(None),
        }
    }
}

struct PollState {
    pool: SqlitePool,
    path: String,
    interval: Duration,
    last: Option<Option<String>>,
    broken: bool,
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError> {
        document_parent(path)?;
        let mut conn = self.pool.acquire().await?;
        let body = Self::read_body(&mut conn, path).await?;
        Ok(body.map(|data| Document::new(path, data)))
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        validate_collection(collection)?;
        let rows = sqlx::query("SELECT path, body FROM documents WHERE parent = ? ORDER BY path")
            .bind(collection)
            .fetch_all(&self.pool)
            .await?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            let path: String = row.try_get("path")?;
            let body: String = row.try_get("body")?;
            documents.push(Document::new(path, serde_json::from_str(&body)?));
        }
        Ok(documents)
    }

    async fn set(&self, path: &str, data: Value, mode: SetMode) -> Result<(), StoreError> {
        match mode {
            SetMode::Overwrite => {
                let mut conn = self.pool.acquire().await?;
                Self::write_body(&mut conn, path, &data).await
            }
            SetMode::Merge => {
                self.transaction(
                    path,
                    Box::new(move |existing| Ok(Some(apply_set(existing, data, SetMode::Merge)))),
                )
                .await?;
                Ok(())
            }
        }
    }

    async fn transaction(
        &self,
        path: &str,
        update: TransactionFn,
    ) -> Result<Option<Value>, StoreError> {
        document_parent(path)?;
        let mut conn = self.pool.acquire().await?;

        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        let outcome = match Self::run_immediate(&mut conn, path, update).await {
            Ok(written) => sqlx::query("COMMIT")
                .execute(&mut *conn)
                .await
                .map(|_| written)
                .map_err(StoreError::from),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(written) => Ok(written),
            Err(e) => {
                if let Err(rollback) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    tracing::error!("Rollback failed on {}: {}", path, rollback);
                    // Do not hand a connection with an open transaction back to the pool.
                    drop(conn.detach());
                }
                Err(e)
            }
        }
    }

    fn watch(&self, path: &str) -> DocumentStream {
        if let Err(e) = document_parent(path) {
            return futures::stream::once(async move { Err(e) }).boxed();
        }

        let state = PollState {
            pool: self.pool.clone(),
            path: path.to_string(),
            interval: self.poll_interval,
            last: None,
            broken: false,
        };

        futures::stream::unfold(state, |mut state| async move {
            if state.broken {
                return None;
            }
            loop {
                if state.last.is_some() {
                    tokio::time::sleep(state.interval).await;
                }

                let row = sqlx::query("SELECT body FROM documents WHERE path = ?")
                    .bind(&state.path)
                    .fetch_optional(&state.pool)
                    .await;
                let body: Option<String> = match row.and_then(|r| r.map(|r| r.try_get::<String, _>("body")).transpose()) {
                    Ok(body) => body,
                    Err(e) => {
                        state.broken = true;
                        return Some((Err(StoreError::from(e)), state));
                    }
                };

                if state.last.as_ref() == Some(&body) {
                    continue;
                }
                state.last = Some(body.clone());

                let snapshot = match body {
                    Some(raw) => match serde_json::from_str(&raw) {
                        Ok(data) => Ok(Some(Document::new(state.path.clone(), data))),
                        Err(e) => Err(StoreError::from(e)),
                    },
                    None => Ok(None),
                };
                return Some((snapshot, state));
            }
        })
        .boxed()
    }
}
