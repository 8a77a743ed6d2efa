//! SQLite repository

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use uuid::Uuid;

use crate::db::{MetricsSnapshot, PostFilter, PublishRecord, Repository};
use crate::error::{BufferError, DbError, FailureKind, Result};
use crate::types::{Platform, Post, PostStatus, SocialAccount};

const POST_COLUMNS: &str = "id, status, body";

/// Publish-queue order with the limit bound last. Matches `queue_order`.
const QUEUE_ORDER: &str =
    "ORDER BY priority DESC, scheduled_at IS NULL, scheduled_at, created_at, id LIMIT ?";

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `db_path` and run migrations.
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
            }
        }

        // Forward slashes work on every platform; mode=rwc creates the file.
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        Self::from_pool(pool).await
    }

    /// Private in-memory database. One connection, so every query sees the same data.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(DbError::SqlxError)?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_posts(&self, sql: &str, binds: Vec<Bind>) -> Result<Vec<Post>> {
        let mut query = sqlx::query(sql);
        for bind in binds {
            query = match bind {
                Bind::Int(v) => query.bind(v),
                Bind::Text(v) => query.bind(v),
            };
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        rows.iter().map(post_from_row).collect()
    }
}

enum Bind {
    Int(i64),
    Text(String),
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(value: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(value)
        .ok_or_else(|| DbError::Corrupt(format!("timestamp {} out of range", value)).into())
}

fn corrupt(error: BufferError) -> BufferError {
    DbError::Corrupt(error.to_string()).into()
}

fn post_from_row(row: &SqliteRow) -> Result<Post> {
    let status: String = row.try_get("status").map_err(DbError::SqlxError)?;
    let body: String = row.try_get("body").map_err(DbError::SqlxError)?;
    let status: PostStatus = status.parse().map_err(corrupt)?;
    let post: Post = serde_json::from_str(&body).map_err(DbError::from)?;
    Ok(post.with_stored_status(status))
}

fn account_from_row(row: &SqliteRow) -> Result<SocialAccount> {
    let platform: String = row.try_get("platform").map_err(DbError::SqlxError)?;
    let expires: Option<i64> = row.try_get("token_expires_at").map_err(DbError::SqlxError)?;
    let created: i64 = row.try_get("created_at").map_err(DbError::SqlxError)?;

    Ok(SocialAccount {
        id: row.try_get("id").map_err(DbError::SqlxError)?,
        user_id: row.try_get("user_id").map_err(DbError::SqlxError)?,
        platform: platform.parse::<Platform>().map_err(corrupt)?,
        external_id: row.try_get("external_id").map_err(DbError::SqlxError)?,
        display_name: row.try_get("display_name").map_err(DbError::SqlxError)?,
        access_token: row.try_get("access_token").map_err(DbError::SqlxError)?,
        connected: row.try_get::<i64, _>("connected").map_err(DbError::SqlxError)? != 0,
        token_expires_at: expires.map(from_millis).transpose()?,
        created_at: from_millis(created)?,
    })
}

fn record_from_row(row: &SqliteRow) -> Result<PublishRecord> {
    let post_id: String = row.try_get("post_id").map_err(DbError::SqlxError)?;
    let platform: String = row.try_get("platform").map_err(DbError::SqlxError)?;
    let error_kind: Option<String> = row.try_get("error_kind").map_err(DbError::SqlxError)?;
    let attempted: i64 = row.try_get("attempted_at").map_err(DbError::SqlxError)?;

    Ok(PublishRecord {
        id: row.try_get("id").map_err(DbError::SqlxError)?,
        post_id: Uuid::parse_str(&post_id).map_err(|e| DbError::Corrupt(e.to_string()))?,
        account_id: row.try_get("account_id").map_err(DbError::SqlxError)?,
        platform: platform.parse::<Platform>().map_err(corrupt)?,
        success: row.try_get::<i64, _>("success").map_err(DbError::SqlxError)? != 0,
        platform_post_id: row.try_get("platform_post_id").map_err(DbError::SqlxError)?,
        error_message: row.try_get("error_message").map_err(DbError::SqlxError)?,
        error_kind: error_kind.as_deref().and_then(FailureKind::from_db),
        attempted_at: from_millis(attempted)?,
    })
}

/// Re-link a post to its target accounts inside `tx`.
async fn replace_post_accounts(tx: &mut Transaction<'_, Sqlite>, post: &Post) -> Result<()> {
    let id = post.id().to_string();
    sqlx::query("DELETE FROM post_accounts WHERE post_id = ?")
        .bind(&id)
        .execute(&mut **tx)
        .await
        .map_err(DbError::SqlxError)?;

    for account_id in post.social_account_ids() {
        sqlx::query("INSERT INTO post_accounts (post_id, account_id) VALUES (?, ?)")
            .bind(&id)
            .bind(account_id)
            .execute(&mut **tx)
            .await
            .map_err(DbError::SqlxError)?;
    }
    Ok(())
}

fn unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

#[async_trait]
impl Repository for Database {
    async fn create_post(&self, post: &Post) -> Result<()> {
        let body = serde_json::to_string(post).map_err(DbError::from)?;
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO posts (id, user_id, status, post_type, priority, scheduled_at,
                               next_retry_at, retry_count, max_retries, error_kind,
                               created_at, updated_at, body)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(post.id().to_string())
        .bind(post.user_id())
        .bind(post.status().as_str())
        .bind(post.post_type().as_str())
        .bind(post.priority().weight() as i64)
        .bind(post.scheduled_at().map(millis))
        .bind(post.next_retry_at().map(millis))
        .bind(post.retry_count() as i64)
        .bind(post.max_retries() as i64)
        .bind(post.error_kind().map(|k| k.as_str()))
        .bind(millis(post.created_at()))
        .bind(millis(post.updated_at()))
        .bind(&body)
        .execute(&mut *tx)
        .await;

        if let Err(error) = inserted {
            if unique_violation(&error) {
                return Err(BufferError::Conflict(format!("post {} already exists", post.id())));
            }
            return Err(DbError::SqlxError(error).into());
        }

        replace_post_accounts(&mut tx, post).await?;
        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(())
    }

    async fn find_post(&self, id: Uuid) -> Result<Option<Post>> {
        let row = sqlx::query(&format!("SELECT {} FROM posts WHERE id = ?", POST_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(post_from_row).transpose()
    }

    async fn update_post(&self, post: &Post) -> Result<()> {
        if self.write_post(post, None).await? {
            Ok(())
        } else {
            Err(BufferError::NotFound(format!("post {}", post.id())))
        }
    }

    async fn update_post_if_status(&self, post: &Post, expected: PostStatus) -> Result<bool> {
        self.write_post(post, Some(expected)).await
    }

    async fn delete_post(&self, id: Uuid, expected: PostStatus) -> Result<bool> {
        let id = id.to_string();
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let deleted = sqlx::query("DELETE FROM posts WHERE id = ? AND status = ?")
            .bind(&id)
            .bind(expected.as_str())
            .execute(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?
            .rows_affected();

        if deleted == 0 {
            tx.rollback().await.map_err(DbError::SqlxError)?;
            return Ok(false);
        }

        for table in ["post_accounts", "publish_records", "post_metrics_snapshots"] {
            sqlx::query(&format!("DELETE FROM {} WHERE post_id = ?", table))
                .bind(&id)
                .execute(&mut *tx)
                .await
                .map_err(DbError::SqlxError)?;
        }

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(true)
    }

    async fn list_posts(&self, filter: &PostFilter) -> Result<Vec<Post>> {
        let mut where_clauses = vec!["1=1"];
        let mut binds = Vec::new();

        if let Some(user_id) = filter.user_id {
            where_clauses.push("user_id = ?");
            binds.push(Bind::Int(user_id));
        }
        if let Some(status) = filter.status {
            where_clauses.push("status = ?");
            binds.push(Bind::Text(status.as_str().to_string()));
        }
        if let Some(post_type) = filter.post_type {
            where_clauses.push("post_type = ?");
            binds.push(Bind::Text(post_type.as_str().to_string()));
        }
        if let Some(priority) = filter.priority {
            where_clauses.push("priority = ?");
            binds.push(Bind::Int(priority.weight() as i64));
        }
        if let Some(platform) = filter.platform {
            where_clauses.push(
                "id IN (SELECT pa.post_id FROM post_accounts pa \
                 JOIN social_accounts sa ON sa.id = pa.account_id WHERE sa.platform = ?)",
            );
            binds.push(Bind::Text(platform.as_str().to_string()));
        }
        if let Some(start) = filter.scheduled_after {
            where_clauses.push("scheduled_at >= ?");
            binds.push(Bind::Int(millis(start)));
        }
        if let Some(end) = filter.scheduled_before {
            where_clauses.push("scheduled_at <= ?");
            binds.push(Bind::Int(millis(end)));
        }

        let sql = format!(
            "SELECT {} FROM posts WHERE {}",
            POST_COLUMNS,
            where_clauses.join(" AND ")
        );
        let mut posts = self.fetch_posts(&sql, binds).await?;
        // The search term is matched against the decoded body
        if filter.search.is_some() {
            posts.retain(|post| filter.matches(post));
        }
        Ok(filter.arrange(posts))
    }

    async fn find_due_posts(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Post>> {
        let sql = format!(
            "SELECT {} FROM posts WHERE status = 'scheduled' AND scheduled_at <= ? {}",
            POST_COLUMNS, QUEUE_ORDER
        );
        self.fetch_posts(&sql, vec![Bind::Int(millis(now)), Bind::Int(sql_limit(limit))])
            .await
    }

    async fn find_retry_candidates(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Post>> {
        let sql = format!(
            r#"
            SELECT {} FROM posts
            WHERE status = 'failed'
              AND retry_count < max_retries
              AND (error_kind IS NULL OR error_kind != 'permanent')
              AND (next_retry_at IS NULL OR next_retry_at <= ?)
            {}
            "#,
            POST_COLUMNS, QUEUE_ORDER
        );
        self.fetch_posts(&sql, vec![Bind::Int(millis(now)), Bind::Int(sql_limit(limit))])
            .await
    }

    async fn transition_status(&self, id: Uuid, from: PostStatus, to: PostStatus) -> Result<bool> {
        let affected = sqlx::query(
            "UPDATE posts SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(millis(Utc::now()))
        .bind(id.to_string())
        .bind(from.as_str())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?
        .rows_affected();

        Ok(affected == 1)
    }

    async fn count_active_posts(&self, user_id: i64) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM posts WHERE user_id = ? AND status IN ('scheduled', 'publishing')",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(count.max(0) as usize)
    }

    async fn count_scheduled_in_window(
        &self,
        account_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<usize> {
        let exclude = exclude.map(|id| id.to_string());
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM posts p
            JOIN post_accounts pa ON pa.post_id = p.id
            WHERE pa.account_id = ?
              AND p.status = 'scheduled'
              AND p.scheduled_at BETWEEN ? AND ?
              AND (? IS NULL OR p.id != ?)
            "#,
        )
        .bind(account_id)
        .bind(millis(start))
        .bind(millis(end))
        .bind(exclude.clone())
        .bind(exclude)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(count.max(0) as usize)
    }

    async fn create_account(&self, account: &SocialAccount) -> Result<i64> {
        let id = (account.id > 0).then_some(account.id);
        let result = sqlx::query(
            r#"
            INSERT INTO social_accounts (id, user_id, platform, external_id, display_name,
                                         access_token, connected, token_expires_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(account.user_id)
        .bind(account.platform.as_str())
        .bind(&account.external_id)
        .bind(&account.display_name)
        .bind(&account.access_token)
        .bind(account.connected as i64)
        .bind(account.token_expires_at.map(millis))
        .bind(millis(account.created_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.last_insert_rowid()),
            Err(error) if unique_violation(&error) => Err(BufferError::Conflict(format!(
                "{} account {} already connected",
                account.platform, account.external_id
            ))),
            Err(error) => Err(DbError::SqlxError(error).into()),
        }
    }

    async fn find_account(&self, id: i64) -> Result<Option<SocialAccount>> {
        let row = sqlx::query("SELECT * FROM social_accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_account_by_external_id(
        &self,
        user_id: i64,
        platform: Platform,
        external_id: &str,
    ) -> Result<Option<SocialAccount>> {
        let row = sqlx::query(
            "SELECT * FROM social_accounts WHERE user_id = ? AND platform = ? AND external_id = ?",
        )
        .bind(user_id)
        .bind(platform.as_str())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn update_account(&self, account: &SocialAccount) -> Result<()> {
        let affected = sqlx::query(
            r#"
            UPDATE social_accounts
            SET display_name = ?, access_token = ?, connected = ?, token_expires_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&account.display_name)
        .bind(&account.access_token)
        .bind(account.connected as i64)
        .bind(account.token_expires_at.map(millis))
        .bind(account.id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?
        .rows_affected();

        if affected == 0 {
            return Err(BufferError::NotFound(format!("social account {}", account.id)));
        }
        Ok(())
    }

    async fn delete_account(&self, id: i64) -> Result<bool> {
        let affected = sqlx::query("DELETE FROM social_accounts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?
            .rows_affected();

        Ok(affected > 0)
    }

    async fn list_accounts(&self, user_id: i64) -> Result<Vec<SocialAccount>> {
        let rows = sqlx::query("SELECT * FROM social_accounts WHERE user_id = ? ORDER BY id")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(account_from_row).collect()
    }

    async fn record_publish_results(&self, records: &[PublishRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO publish_records (post_id, account_id, platform, success,
                                             platform_post_id, error_message, error_kind,
                                             attempted_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(record.post_id.to_string())
            .bind(record.account_id)
            .bind(record.platform.as_str())
            .bind(record.success as i64)
            .bind(&record.platform_post_id)
            .bind(&record.error_message)
            .bind(record.error_kind.map(|k| k.as_str()))
            .bind(millis(record.attempted_at))
            .execute(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;
        }

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(())
    }

    async fn list_publish_records(&self, post_id: Uuid) -> Result<Vec<PublishRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, post_id, account_id, platform, success, platform_post_id,
                   error_message, error_kind, attempted_at
            FROM publish_records
            WHERE post_id = ?
            ORDER BY attempted_at ASC, id ASC
            "#,
        )
        .bind(post_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(record_from_row).collect()
    }

    async fn record_metrics_snapshot(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        let metrics = serde_json::to_string(&snapshot.metrics).map_err(DbError::from)?;
        sqlx::query(
            "INSERT INTO post_metrics_snapshots (post_id, metrics, recorded_at) VALUES (?, ?, ?)",
        )
        .bind(snapshot.post_id.to_string())
        .bind(metrics)
        .bind(millis(snapshot.recorded_at))
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    async fn list_metrics_snapshots(&self, post_id: Uuid) -> Result<Vec<MetricsSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT metrics, recorded_at FROM post_metrics_snapshots
            WHERE post_id = ?
            ORDER BY recorded_at ASC, id ASC
            "#,
        )
        .bind(post_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter()
            .map(|row| -> Result<MetricsSnapshot> {
                let metrics: String = row.try_get("metrics").map_err(DbError::SqlxError)?;
                let recorded: i64 = row.try_get("recorded_at").map_err(DbError::SqlxError)?;
                Ok(MetricsSnapshot {
                    post_id,
                    metrics: serde_json::from_str(&metrics).map_err(DbError::from)?,
                    recorded_at: from_millis(recorded)?,
                })
            })
            .collect()
    }
}

impl Database {
    /// Shared body of `update_post` and `update_post_if_status`.
    async fn write_post(&self, post: &Post, expected: Option<PostStatus>) -> Result<bool> {
        let body = serde_json::to_string(post).map_err(DbError::from)?;
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let affected = sqlx::query(
            r#"
            UPDATE posts
            SET status = ?, post_type = ?, priority = ?, scheduled_at = ?, next_retry_at = ?,
                retry_count = ?, max_retries = ?, error_kind = ?, updated_at = ?, body = ?
            WHERE id = ? AND (? IS NULL OR status = ?)
            "#,
        )
        .bind(post.status().as_str())
        .bind(post.post_type().as_str())
        .bind(post.priority().weight() as i64)
        .bind(post.scheduled_at().map(millis))
        .bind(post.next_retry_at().map(millis))
        .bind(post.retry_count() as i64)
        .bind(post.max_retries() as i64)
        .bind(post.error_kind().map(|k| k.as_str()))
        .bind(millis(post.updated_at()))
        .bind(&body)
        .bind(post.id().to_string())
        .bind(expected.map(|s| s.as_str()))
        .bind(expected.map(|s| s.as_str()))
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?
        .rows_affected();

        if affected == 0 {
            tx.rollback().await.map_err(DbError::SqlxError)?;
            return Ok(false);
        }

        replace_post_accounts(&mut tx, post).await?;
        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(true)
    }
}
