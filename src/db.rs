use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{mysql::MySqlPoolOptions, MySqlPool};
use tokio::sync::OnceCell;
use vercel_runtime::Error;

use crate::profile::{MLProfile, PlatformAggregates};
use crate::types::{
  ContentType, DailyEngagementRow, PerformanceRecord, Platform, PostMetrics,
};

static POOL: OnceCell<MySqlPool> = OnceCell::const_new();

async fn ensure_schema(pool: &MySqlPool) -> Result<(), Error> {
  // Keep schema creation idempotent; avoids footguns in early MVP.
  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS performance_records (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        user_id VARCHAR(128) NOT NULL,
        post_id VARCHAR(128) NOT NULL,
        platform VARCHAR(32) NOT NULL,
        content_type VARCHAR(32) NOT NULL,
        content TEXT NOT NULL,
        hashtags_json TEXT NOT NULL,
        posted_at TIMESTAMP(3) NOT NULL,
        impressions BIGINT NOT NULL DEFAULT 0,
        reach BIGINT NOT NULL DEFAULT 0,
        likes BIGINT NOT NULL DEFAULT 0,
        comments BIGINT NOT NULL DEFAULT 0,
        shares BIGINT NOT NULL DEFAULT 0,
        saves BIGINT NOT NULL DEFAULT 0,
        clicks BIGINT NOT NULL DEFAULT 0,
        engagement_rate DOUBLE NOT NULL DEFAULT 0,
        virality_score DOUBLE NOT NULL DEFAULT 0,
        was_ai_generated TINYINT(1) NOT NULL DEFAULT 0,
        user_approved TINYINT(1) NOT NULL DEFAULT 0,
        updated_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3) ON UPDATE CURRENT_TIMESTAMP(3),
        UNIQUE KEY uq_performance_records (user_id, post_id),
        KEY idx_performance_records_recent (user_id, platform, posted_at)
      );
    "#,
  )
  .execute(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS ml_profiles (
        user_id VARCHAR(128) PRIMARY KEY,
        profile_json MEDIUMTEXT NOT NULL,
        updated_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3) ON UPDATE CURRENT_TIMESTAMP(3)
      );
    "#,
  )
  .execute(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS usage_events (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        user_id VARCHAR(128) NOT NULL,
        event_type VARCHAR(64) NOT NULL,
        provider VARCHAR(32) NOT NULL,
        model VARCHAR(64) NOT NULL,
        prompt_tokens INT NOT NULL,
        completion_tokens INT NOT NULL,
        cost_usd DECIMAL(12,6) NOT NULL,
        occurred_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3),
        KEY idx_usage_events_day (user_id, occurred_at)
      );
    "#,
  )
  .execute(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  Ok(())
}

pub async fn get_pool() -> Result<&'static MySqlPool, Error> {
  POOL
    .get_or_try_init(|| async {
      let url = std::env::var("TIDB_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map_err(|_| -> Error {
          Box::new(std::io::Error::other(
            "Missing TIDB_DATABASE_URL (or DATABASE_URL)",
          ))
        })?;

      let pool = MySqlPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .map_err(|e| -> Error { Box::new(e) })?;

      ensure_schema(&pool).await?;
      Ok::<_, Error>(pool)
    })
    .await
}

type RecordRow = (
  String,             // platform
  String,             // content_type
  String,             // content
  String,             // hashtags_json
  DateTime<Utc>,      // posted_at
  i64,                // impressions
  i64,                // reach
  i64,                // likes
  i64,                // comments
  i64,                // shares
  i64,                // saves
  i64,                // clicks
  f64,                // engagement_rate
  f64,                // virality_score
  i8,                 // was_ai_generated
  i8,                 // user_approved
);

fn record_from_row(row: RecordRow) -> Option<PerformanceRecord> {
  let (
    platform,
    content_type,
    content,
    hashtags_json,
    posted_at,
    impressions,
    reach,
    likes,
    comments,
    shares,
    saves,
    clicks,
    engagement_rate,
    virality_score,
    was_ai_generated,
    user_approved,
  ) = row;

  Some(PerformanceRecord {
    platform: Platform::parse(&platform)?,
    content_type: ContentType::parse(&content_type)?,
    content,
    hashtags: serde_json::from_str::<Vec<String>>(&hashtags_json).unwrap_or_default(),
    posted_at,
    metrics: PostMetrics {
      impressions,
      reach,
      likes,
      comments,
      shares,
      saves,
      clicks,
    },
    engagement_rate,
    virality_score,
    was_ai_generated: was_ai_generated != 0,
    user_approved: user_approved != 0,
  })
}

/// Snapshot of recent records, newest first. Rows with an unknown
/// platform or content type (from an older app version) are skipped.
pub async fn fetch_recent_performance(
  pool: &MySqlPool,
  user_id: &str,
  platform: Option<Platform>,
  since: Option<DateTime<Utc>>,
  limit: usize,
) -> Result<Vec<PerformanceRecord>, Error> {
  let mut sql = String::from(
    r#"
      SELECT platform, content_type, content, hashtags_json, posted_at,
             impressions, reach, likes, comments, shares, saves, clicks,
             CAST(engagement_rate AS DOUBLE) AS engagement_rate,
             CAST(virality_score AS DOUBLE) AS virality_score,
             was_ai_generated, user_approved
      FROM performance_records
      WHERE user_id = ?
    "#,
  );
  if platform.is_some() {
    sql.push_str(" AND platform = ?");
  }
  if since.is_some() {
    sql.push_str(" AND posted_at >= ?");
  }
  sql.push_str(" ORDER BY posted_at DESC LIMIT ?;");

  let mut query = sqlx::query_as::<_, RecordRow>(&sql).bind(user_id);
  if let Some(platform) = platform {
    query = query.bind(platform.as_str());
  }
  if let Some(since) = since {
    query = query.bind(since);
  }
  let rows = query
    .bind(limit as i64)
    .fetch_all(pool)
    .await
    .map_err(|e| -> Error { Box::new(e) })?;

  Ok(rows.into_iter().filter_map(record_from_row).collect())
}

/// Per-day average engagement over the trailing window, oldest first.
pub async fn fetch_daily_engagement(
  pool: &MySqlPool,
  user_id: &str,
  platform: Option<Platform>,
  days: i64,
) -> Result<Vec<DailyEngagementRow>, Error> {
  let mut sql = String::from(
    r#"
      SELECT DATE(posted_at) AS dt,
             CAST(AVG(engagement_rate) AS DOUBLE) AS avg_engagement_rate,
             CAST(COUNT(*) AS SIGNED) AS posts
      FROM performance_records
      WHERE user_id = ? AND posted_at >= ?
    "#,
  );
  if platform.is_some() {
    sql.push_str(" AND platform = ?");
  }
  sql.push_str(" GROUP BY DATE(posted_at) ORDER BY dt ASC;");

  let since = Utc::now() - chrono::Duration::days(days.max(1));
  let mut query = sqlx::query_as::<_, (NaiveDate, f64, i64)>(&sql)
    .bind(user_id)
    .bind(since);
  if let Some(platform) = platform {
    query = query.bind(platform.as_str());
  }
  let rows = query
    .fetch_all(pool)
    .await
    .map_err(|e| -> Error { Box::new(e) })?;

  Ok(
    rows
      .into_iter()
      .map(|(dt, avg_engagement_rate, posts)| DailyEngagementRow {
        dt,
        avg_engagement_rate,
        posts,
      })
      .collect(),
  )
}

pub async fn upsert_performance_record(
  pool: &MySqlPool,
  user_id: &str,
  post_id: &str,
  record: &PerformanceRecord,
) -> Result<(), Error> {
  let hashtags_json =
    serde_json::to_string(&record.hashtags).map_err(|e| -> Error { Box::new(e) })?;

  sqlx::query(
    r#"
      INSERT INTO performance_records
        (user_id, post_id, platform, content_type, content, hashtags_json, posted_at,
         impressions, reach, likes, comments, shares, saves, clicks,
         engagement_rate, virality_score, was_ai_generated, user_approved)
      VALUES
        (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
      ON DUPLICATE KEY UPDATE
        impressions = VALUES(impressions),
        reach = VALUES(reach),
        likes = VALUES(likes),
        comments = VALUES(comments),
        shares = VALUES(shares),
        saves = VALUES(saves),
        clicks = VALUES(clicks),
        engagement_rate = VALUES(engagement_rate),
        virality_score = VALUES(virality_score),
        updated_at = CURRENT_TIMESTAMP(3);
    "#,
  )
  .bind(user_id)
  .bind(post_id)
  .bind(record.platform.as_str())
  .bind(record.content_type.as_str())
  .bind(&record.content)
  .bind(hashtags_json)
  .bind(record.posted_at)
  .bind(record.metrics.impressions)
  .bind(record.metrics.reach)
  .bind(record.metrics.likes)
  .bind(record.metrics.comments)
  .bind(record.metrics.shares)
  .bind(record.metrics.saves)
  .bind(record.metrics.clicks)
  .bind(record.engagement_rate)
  .bind(record.virality_score)
  .bind(record.was_ai_generated)
  .bind(record.user_approved)
  .execute(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  Ok(())
}

pub async fn get_profile(pool: &MySqlPool, user_id: &str) -> Result<Option<MLProfile>, Error> {
  let row = sqlx::query_scalar::<_, String>(
    r#"
      SELECT profile_json FROM ml_profiles WHERE user_id = ? LIMIT 1;
    "#,
  )
  .bind(user_id)
  .fetch_optional(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  // An unreadable document (old model version, manual edit) counts as
  // "no profile yet" and gets rebuilt by the next learning run.
  Ok(row.and_then(|json| serde_json::from_str::<MLProfile>(&json).ok()))
}

/// Read-modify-write of the profile document inside one transaction.
/// The row lock serializes concurrent learning runs for the same user,
/// so a run for platform X can never clobber a concurrent run's update
/// for platform Y.
pub async fn merge_profile_txn(
  pool: &MySqlPool,
  user_id: &str,
  platform: Option<Platform>,
  aggregates: Option<&PlatformAggregates>,
  posts_analyzed: usize,
  now: DateTime<Utc>,
) -> Result<MLProfile, Error> {
  let mut txn = pool.begin().await.map_err(|e| -> Error { Box::new(e) })?;

  let existing = sqlx::query_scalar::<_, String>(
    r#"
      SELECT profile_json FROM ml_profiles WHERE user_id = ? FOR UPDATE;
    "#,
  )
  .bind(user_id)
  .fetch_optional(&mut *txn)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  let mut profile = existing
    .and_then(|json| serde_json::from_str::<MLProfile>(&json).ok())
    .unwrap_or_else(MLProfile::new);

  crate::profile::merge_aggregates(&mut profile, platform, aggregates, posts_analyzed, now);

  let profile_json = serde_json::to_string(&profile).map_err(|e| -> Error { Box::new(e) })?;
  sqlx::query(
    r#"
      INSERT INTO ml_profiles (user_id, profile_json)
      VALUES (?, ?)
      ON DUPLICATE KEY UPDATE
        profile_json = VALUES(profile_json),
        updated_at = CURRENT_TIMESTAMP(3);
    "#,
  )
  .bind(user_id)
  .bind(profile_json)
  .execute(&mut *txn)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  txn.commit().await.map_err(|e| -> Error { Box::new(e) })?;
  Ok(profile)
}

pub async fn insert_usage_event(
  pool: &MySqlPool,
  user_id: &str,
  event_type: &str,
  provider: &str,
  model: &str,
  prompt_tokens: u32,
  completion_tokens: u32,
  cost_usd: f64,
) -> Result<(), Error> {
  sqlx::query(
    r#"
      INSERT INTO usage_events
        (user_id, event_type, provider, model, prompt_tokens, completion_tokens, cost_usd)
      VALUES (?, ?, ?, ?, ?, ?, ?);
    "#,
  )
  .bind(user_id)
  .bind(event_type)
  .bind(provider)
  .bind(model)
  .bind(prompt_tokens as i32)
  .bind(completion_tokens as i32)
  .bind(cost_usd)
  .execute(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  Ok(())
}
