//! PostgreSQL persistence for forum items and symbol mentions.

use async_trait::async_trait;
use smi_core::{Comment, Mention, Submission};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "smi-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Message(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Result of a keyed insert. `AlreadyPresent` is the benign outcome of a
/// duplicate-key race: the row lost to a concurrent writer and the
/// transaction was rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    AlreadyPresent,
}

/// The persistence capability the ingester consumes.
///
/// Existence checks are read-only and must surface store failures as
/// errors: an unreachable store is "unknown", never "not present".
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn submission_exists(&self, id: &str) -> Result<bool, StoreError>;

    async fn comment_exists(&self, id: &str) -> Result<bool, StoreError>;

    /// Inserts one submission row in its own transaction.
    async fn insert_submission(&self, submission: &Submission)
        -> Result<WriteOutcome, StoreError>;

    /// Inserts a comment row and its derived mention rows in one
    /// transaction: either all land or none do.
    async fn insert_comment(
        &self,
        comment: &Comment,
        mentions: &[Mention],
    ) -> Result<WriteOutcome, StoreError>;

    /// Tracked symbols from the `symbols` table (NASDAQ + NYSE listings).
    async fn load_symbols(&self) -> Result<Vec<String>, StoreError>;
}

/// `ItemStore` over a pooled PostgreSQL connection.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects the pool eagerly so unreachable-store failures are fatal at
    /// startup rather than surfacing mid-batch.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies the versioned DDL under `migrations/`.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn key_exists(&self, sql: &str, id: &str) -> Result<bool, StoreError> {
        let row = sqlx::query(sql).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl ItemStore for PgStore {
    async fn submission_exists(&self, id: &str) -> Result<bool, StoreError> {
        self.key_exists("SELECT 1 FROM submissions WHERE id = $1", id)
            .await
    }

    async fn comment_exists(&self, id: &str) -> Result<bool, StoreError> {
        self.key_exists("SELECT 1 FROM comments WHERE id = $1", id)
            .await
    }

    async fn insert_submission(
        &self,
        submission: &Submission,
    ) -> Result<WriteOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO submissions (id, title, body, author, created)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&submission.id)
        .bind(&submission.title)
        .bind(&submission.body)
        .bind(&submission.author)
        .bind(submission.created)
        .execute(&mut *tx)
        .await;

        match result {
            Ok(_) => {
                tx.commit().await?;
                Ok(WriteOutcome::Inserted)
            }
            Err(err) if is_unique_violation(&err) => {
                tx.rollback().await?;
                debug!(id = %submission.id, "submission already present, insert rolled back");
                Ok(WriteOutcome::AlreadyPresent)
            }
            Err(err) => {
                tx.rollback().await?;
                Err(err.into())
            }
        }
    }

    async fn insert_comment(
        &self,
        comment: &Comment,
        mentions: &[Mention],
    ) -> Result<WriteOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO comments (id, submission_id, body, author, created)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&comment.id)
        .bind(&comment.submission_id)
        .bind(&comment.body)
        .bind(&comment.author)
        .bind(comment.created)
        .execute(&mut *tx)
        .await;

        match result {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                tx.rollback().await?;
                debug!(id = %comment.id, "comment already present, insert rolled back");
                return Ok(WriteOutcome::AlreadyPresent);
            }
            Err(err) => {
                tx.rollback().await?;
                return Err(err.into());
            }
        }

        for mention in mentions {
            if let Err(err) = sqlx::query(
                r#"
                INSERT INTO mentions (symbol, comment_id, sentiment)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(&mention.symbol)
            .bind(&mention.comment_id)
            .bind(mention.sentiment)
            .execute(&mut *tx)
            .await
            {
                tx.rollback().await?;
                return Err(err.into());
            }
        }

        tx.commit().await?;
        Ok(WriteOutcome::Inserted)
    }

    async fn load_symbols(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT symbol FROM symbols
            WHERE listing_exchange IN ('Q', 'N')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(row.try_get("symbol")?);
        }
        Ok(out)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}
