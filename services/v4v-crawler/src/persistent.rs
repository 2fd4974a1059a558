//!
//! src/persistent.rs  Oct 16th, 2026
//!
//! Work queue and resolution cache for the resolver. Feeds to ingest and
//! remote items to resolve are jobs in sqlite; resolved songs are cached
//! here until exported into the json documents (src/store.rs)
//!

use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use sqlx::{sqlite::SqlitePoolOptions, sqlite::SqliteConnectOptions, Pool, Row, Sqlite};

use crate::errors::CrawlerError;
use crate::model::{FailedItem, ResolvedSong};
use crate::types::RemoteItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobType {
    Feed,
    Resolve
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Feed => "feed",
            JobType::Resolve => "resolve"
        }
    }
    pub fn parse(s: &str) -> Option<JobType> {
        match s {
            "feed" => Some(JobType::Feed),
            "resolve" => Some(JobType::Resolve),
            _ => None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Active,
    Done,
    Failed
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Active  => "active",
            JobStatus::Done    => "done",
            JobStatus::Failed  => "failed"
        }
    }
    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "active"  => Some(JobStatus::Active),
            "done"    => Some(JobStatus::Done),
            "failed"  => Some(JobStatus::Failed),
            _ => None
        }
    }
}

/// A claimed unit of work. `target` is a feed url for Feed jobs and a
/// remote item key (feedGuid:itemGuid) for Resolve jobs
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: i64,
    pub target: String,
    pub kind: JobType,
    pub attempt: i64
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteItemRow {
    pub key: String,
    pub item: RemoteItem,
    pub source_feed: Option<String>,
    pub status: JobStatus,
    pub resolved: Option<ResolvedSong>
}

pub struct Persistent {
    pool: Pool<Sqlite>
}

impl Persistent {

    async fn ensure_schema(pool: &Pool<Sqlite>) -> Result<(), CrawlerError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS feeds (
              id          INTEGER PRIMARY KEY AUTOINCREMENT,
              url         TEXT NOT NULL UNIQUE,
              feed_guid   TEXT,
              title       TEXT,
              status      TEXT NOT NULL DEFAULT 'pending',
              last_error  TEXT,
              parsed_at   INTEGER,
              created_at  INTEGER NOT NULL,
              updated_at  INTEGER NOT NULL
            );
            "
        ).execute(pool).await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS remote_items (
              key           TEXT PRIMARY KEY,
              feed_guid     TEXT NOT NULL,
              item_guid     TEXT,
              feed_url      TEXT,
              medium        TEXT,
              source_feed   TEXT,
              status        TEXT NOT NULL DEFAULT 'pending',
              resolved_json TEXT,
              created_at    INTEGER NOT NULL,
              updated_at    INTEGER NOT NULL
            );
            "
        ).execute(pool).await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS jobs (
              job_id      INTEGER PRIMARY KEY AUTOINCREMENT,
              target      TEXT NOT NULL,
              kind        TEXT NOT NULL CHECK (kind IN ('feed','resolve')),
              status      TEXT NOT NULL CHECK (status IN (
                  'pending','active',
                  'done','failed')
                  ) DEFAULT 'pending',
              attempt     INTEGER NOT NULL DEFAULT 0,
              last_error  TEXT,
              created_at  INTEGER NOT NULL,
              updated_at  INTEGER NOT NULL,
              UNIQUE(target, kind)
            );
            "
        ).execute(pool).await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_jobs_pending ON jobs(kind, status);"
        ).execute(pool).await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_remote_items_feed ON remote_items(feed_guid);"
        ).execute(pool).await?;

        Ok(())
    }

    pub async fn init(database_url: &str) -> Result<Self, CrawlerError> {
        let is_memory = database_url.contains(":memory:");

        let mut opts = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true);

        // WAL is file-only
        if !is_memory {
            opts = opts.journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                       .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        }

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(if is_memory {1} else {8})
            .connect_with(opts)
            .await?;

        Self::ensure_schema(&pool).await?;

        Ok(Self { pool })
    }

    fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    pub async fn count_jobs(&self, kind: JobType, status: JobStatus) ->
        Result<i64, CrawlerError> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE kind = ?1 AND status = ?2;"
        )
        .bind(kind.as_str())
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Returns true when the job was new
    pub async fn enqueue_job_if_missing(&self, target: &str, kind: JobType) ->
        Result<bool, CrawlerError> {
        let inserted = sqlx::query(
            r"
            INSERT OR IGNORE INTO jobs (
            target, kind, status,
            attempt, created_at, updated_at
            )
            VALUES (?1, ?2, 'pending', 0, ?3, ?3);
            "
        )
        .bind(target)
        .bind(kind.as_str())
        .bind(Self::now())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted > 0)
    }

    pub async fn claim_one_job(&self, kind: JobType) ->
        Result<Option<Job>, CrawlerError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r"
            SELECT job_id, target, kind, attempt
              FROM jobs
            WHERE kind = ?1 AND status = 'pending'
            ORDER BY updated_at ASC, job_id ASC
            LIMIT 1;
            "
        )
        .bind(kind.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        let job_id  = row.get::<i64, _>("job_id");
        let target  = row.get::<String, _>("target");
        let kind    = row.get::<String, _>("kind");
        let attempt = row.get::<i64, _>("attempt");
        let now     = Self::now();

        let updated = sqlx::query(
            r"
            UPDATE jobs
                SET status = 'active',
                    attempt = attempt + 1,
                    updated_at = ?1
                WHERE job_id = ?2 AND status = 'pending';
            "
        )
        .bind(now)
        .bind(job_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        tx.commit().await?;

        let kind = JobType::parse(&kind).ok_or_else(
            || CrawlerError::Parse("bad kind in DB".to_string())
        )?;
        Ok(Some(Job { job_id, target, kind, attempt: attempt + 1 }))
    }

    pub async fn complete_job(&self, job_id: i64) -> Result<(), CrawlerError> {
        sqlx::query(
            r"
            UPDATE jobs SET status='done', updated_at = ?1,
                last_error = NULL WHERE job_id = ?2;
            "
        )
        .bind(Self::now())
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn fail_job(&self, job_id: i64, err: &str) -> Result<(), CrawlerError> {
        sqlx::query(
            "UPDATE jobs SET status='failed', updated_at = ?1,
                last_error = ?2 WHERE job_id = ?3;"
        )
        .bind(Self::now())
        .bind(err)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Transient errors go back to pending until the attempt budget is
    /// spent; permanent ones fail straight away. Returns the new status
    pub async fn retry_or_fail_job(
        &self, job: &Job, err: &CrawlerError, max_attempts: i64
    ) -> Result<JobStatus, CrawlerError> {
        if err.is_transient() && job.attempt < max_attempts {
            sqlx::query(
                "UPDATE jobs SET status='pending', updated_at = ?1,
                    last_error = ?2 WHERE job_id = ?3;"
            )
            .bind(Self::now())
            .bind(err.to_string())
            .bind(job.job_id)
            .execute(&self.pool)
            .await?;
            return Ok(JobStatus::Pending);
        }
        self.fail_job(job.job_id, &err.to_string()).await?;
        Ok(JobStatus::Failed)
    }

    /// Failed jobs go back to pending with a fresh attempt budget
    pub async fn reset_failed(&self, kind: JobType) -> Result<u64, CrawlerError> {
        let n = sqlx::query(
            "UPDATE jobs SET status='pending', attempt = 0, updated_at = ?1
                WHERE kind = ?2 AND status = 'failed';"
        )
        .bind(Self::now())
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(n)
    }

    /// Jobs left active by a crashed run
    pub async fn requeue_active(&self) -> Result<u64, CrawlerError> {
        let n = sqlx::query(
            "UPDATE jobs SET status='pending', updated_at = ?1 WHERE status = 'active';"
        )
        .bind(Self::now())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(n)
    }

    pub async fn upsert_feed(&self, url: &str, feed_guid: Option<&str>, title: Option<&str>)
        -> Result<(), CrawlerError> {
        sqlx::query(
            r"
            INSERT INTO feeds (url, feed_guid, title, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, 'pending', ?4, ?4)
            ON CONFLICT(url) DO UPDATE SET
                feed_guid = COALESCE(excluded.feed_guid, feed_guid),
                title = COALESCE(excluded.title, title),
                updated_at = excluded.updated_at;
            "
        )
        .bind(url)
        .bind(feed_guid)
        .bind(title)
        .bind(Self::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_feed(&self, url: &str, ok: bool, err: Option<&str>) ->
        Result<(), CrawlerError> {
        let now = Self::now();
        sqlx::query(
            r"
            UPDATE feeds SET status = ?1, last_error = ?2,
                parsed_at = CASE WHEN ?1 = 'success' THEN ?3 ELSE parsed_at END,
                updated_at = ?3
             WHERE url = ?4;
            "
        )
        .bind(if ok { "success" } else { "error" })
        .bind(err)
        .bind(now)
        .bind(url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn feed_status(&self, url: &str) -> Result<Option<String>, CrawlerError> {
        let status = sqlx::query_scalar("SELECT status FROM feeds WHERE url = ?1;")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(status)
    }

    /// Records a remote item reference and queues its resolution. Feed-only
    /// references are recorded but never resolved to a song. Returns true
    /// when the reference was new
    pub async fn upsert_remote_item(&self, item: &RemoteItem, source_feed: Option<&str>) ->
        Result<bool, CrawlerError> {
        let key = item.key();
        let inserted = sqlx::query(
            r"
            INSERT OR IGNORE INTO remote_items (
                key, feed_guid, item_guid, feed_url, medium, source_feed,
                status, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?7);
            "
        )
        .bind(&key)
        .bind(item.feed_guid.as_str())
        .bind(item.item_guid.as_ref().map(|g| g.as_str()))
        .bind(item.feed_url.as_deref())
        .bind(item.medium.as_deref())
        .bind(source_feed)
        .bind(Self::now())
        .execute(&self.pool)
        .await?
        .rows_affected() > 0;

        if !inserted && item.feed_url.is_some() {
            sqlx::query("UPDATE remote_items SET feed_url = COALESCE(feed_url, ?1) WHERE key = ?2;")
                .bind(item.feed_url.as_deref())
                .bind(&key)
                .execute(&self.pool)
                .await?;
        }

        if item.item_guid.is_some() {
            self.enqueue_job_if_missing(&key, JobType::Resolve).await?;
        }
        Ok(inserted)
    }

    pub async fn get_remote_item(&self, key: &str) ->
        Result<Option<RemoteItemRow>, CrawlerError> {
        let row = sqlx::query(
            r"
            SELECT key, feed_guid, item_guid, feed_url, medium, source_feed,
                   status, resolved_json
              FROM remote_items WHERE key = ?1;
            "
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::remote_row(&r)).transpose()
    }

    fn remote_row(r: &sqlx::sqlite::SqliteRow) -> Result<RemoteItemRow, CrawlerError> {
        let feed_guid: String = r.get("feed_guid");
        let item_guid: Option<String> = r.get("item_guid");
        let mut item = RemoteItem::new(&feed_guid, item_guid.as_deref());
        item.feed_url = r.get("feed_url");
        item.medium = r.get("medium");

        let resolved: Option<String> = r.get("resolved_json");
        let resolved = resolved
            .map(|s| serde_json::from_str::<ResolvedSong>(&s))
            .transpose()?;
        let status: String = r.get("status");

        Ok(RemoteItemRow {
            key: r.get("key"),
            item,
            source_feed: r.get("source_feed"),
            status: JobStatus::parse(&status).unwrap_or(JobStatus::Pending),
            resolved
        })
    }

    pub async fn set_resolved(&self, key: &str, song: &ResolvedSong) -> Result<(), CrawlerError> {
        sqlx::query(
            "UPDATE remote_items SET status = 'done', resolved_json = ?1, updated_at = ?2
                WHERE key = ?3;"
        )
        .bind(serde_json::to_string(song)?)
        .bind(Self::now())
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_remote_failed(&self, key: &str) -> Result<(), CrawlerError> {
        sqlx::query(
            "UPDATE remote_items SET status = 'failed', updated_at = ?1 WHERE key = ?2;"
        )
        .bind(Self::now())
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn resolved_songs(&self) -> Result<Vec<ResolvedSong>, CrawlerError> {
        let rows = sqlx::query(
            "SELECT resolved_json FROM remote_items
                WHERE resolved_json IS NOT NULL ORDER BY created_at ASC, key ASC;"
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                let json: String = r.get("resolved_json");
                serde_json::from_str::<ResolvedSong>(&json).map_err(CrawlerError::from)
            })
            .collect()
    }

    pub async fn failed_items(&self) -> Result<Vec<FailedItem>, CrawlerError> {
        let rows = sqlx::query(
            r"
            SELECT r.feed_guid, r.item_guid, j.last_error, j.attempt
              FROM jobs j JOIN remote_items r ON r.key = j.target
             WHERE j.kind = 'resolve' AND j.status = 'failed'
             ORDER BY j.updated_at ASC;
            "
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| FailedItem {
            feed_guid: r.get("feed_guid"),
            item_guid: r.get("item_guid"),
            error: r.get::<Option<String>, _>("last_error").unwrap_or_default(),
            attempts: r.get("attempt")
        }).collect())
    }
}
