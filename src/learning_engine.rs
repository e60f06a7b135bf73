use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::Serialize;
use std::collections::HashMap;
use vercel_runtime::Error;

use crate::content_signals::{contains_cta, count_emoji, normalize_hashtag};
use crate::db::{fetch_recent_performance, merge_profile_txn};
use crate::profile::{
  HashtagScore, PerformanceBaseline, PlatformAggregates, TimeSlotScore, MAX_BEST_TIME_SLOTS,
  MAX_TOP_HASHTAGS,
};
use crate::types::{ContentType, PerformanceRecord, Platform};

pub const MIN_SLOT_SAMPLES: usize = 2;
pub const MIN_TYPE_SAMPLES: usize = 2;
pub const MIN_HASHTAG_USES: usize = 2;
pub const MIN_HASHTAG_TAGS: usize = 3;
pub const MIN_AUTHORSHIP_SAMPLES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightKind {
  Timing,
  ContentType,
  Length,
  Hashtags,
  Authorship,
}

/// One human-readable finding from a learning run. Confidence here is a
/// heuristic trust score derived from sample counts, not a statistical
/// confidence level.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningInsight {
  pub kind: InsightKind,
  pub summary: String,
  pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimingInsight {
  pub ranked_slots: Vec<TimeSlotScore>,
  pub best: TimeSlotScore,
  pub worst: TimeSlotScore,
  pub gap: f64,
  pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContentTypeInsight {
  pub performance: HashMap<ContentType, f64>,
  pub best: (ContentType, f64, usize),
  pub worst: (ContentType, f64, usize),
  pub best_to_worst_ratio: f64,
  pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LengthBucket {
  Short,
  Medium,
  Long,
  VeryLong,
}

impl LengthBucket {
  pub fn for_chars(chars: usize) -> LengthBucket {
    match chars {
      0..=99 => LengthBucket::Short,
      100..=299 => LengthBucket::Medium,
      300..=499 => LengthBucket::Long,
      _ => LengthBucket::VeryLong,
    }
  }

  pub fn label(&self) -> &'static str {
    match self {
      LengthBucket::Short => "under 100 characters",
      LengthBucket::Medium => "100-299 characters",
      LengthBucket::Long => "300-499 characters",
      LengthBucket::VeryLong => "500+ characters",
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LengthInsight {
  pub best_bucket: LengthBucket,
  pub avg_engagement: f64,
  pub sample_count: usize,
  pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HashtagInsight {
  pub top: Vec<HashtagScore>,
  pub bottom: Vec<HashtagScore>,
  pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthorshipInsight {
  pub ai_avg: f64,
  pub human_avg: f64,
  pub ai_count: usize,
  pub human_count: usize,
  pub ai_wins: bool,
  pub gap_pct: f64,
  pub confidence: f64,
}

fn mean(values: &[f64]) -> f64 {
  if values.is_empty() {
    return 0.0;
  }
  values.iter().sum::<f64>() / (values.len() as f64)
}

fn sort_desc_by_avg<T, F: Fn(&T) -> f64>(items: &mut [T], avg: F) {
  items.sort_by(|a, b| {
    avg(b)
      .partial_cmp(&avg(a))
      .unwrap_or(std::cmp::Ordering::Equal)
  });
}

/// Group by (day-of-week, hour) and rank the slots with enough samples.
pub fn reduce_timing(records: &[PerformanceRecord]) -> Option<TimingInsight> {
  let mut by_slot: HashMap<(u32, u32), Vec<f64>> = HashMap::new();
  for r in records {
    let key = (
      r.posted_at.weekday().num_days_from_monday(),
      r.posted_at.hour(),
    );
    by_slot.entry(key).or_default().push(r.engagement_rate);
  }

  let mut ranked: Vec<TimeSlotScore> = by_slot
    .into_iter()
    .filter(|(_, rates)| rates.len() >= MIN_SLOT_SAMPLES)
    .map(|((day_of_week, hour), rates)| TimeSlotScore {
      day_of_week,
      hour,
      avg_engagement: mean(&rates),
      sample_count: rates.len(),
    })
    .collect();

  if ranked.is_empty() {
    return None;
  }
  sort_desc_by_avg(&mut ranked, |s| s.avg_engagement);

  let best = ranked[0];
  let worst = ranked[ranked.len() - 1];
  let confidence = (0.5 + (best.sample_count as f64) * 0.1).min(0.9);

  Some(TimingInsight {
    gap: best.avg_engagement - worst.avg_engagement,
    best,
    worst,
    ranked_slots: ranked,
    confidence,
  })
}

/// Group by content type; needs at least two types that each have enough
/// samples before it has an opinion.
pub fn reduce_content_type(records: &[PerformanceRecord]) -> Option<ContentTypeInsight> {
  let mut by_type: HashMap<ContentType, Vec<f64>> = HashMap::new();
  for r in records {
    by_type.entry(r.content_type).or_default().push(r.engagement_rate);
  }

  let mut scored: Vec<(ContentType, f64, usize)> = by_type
    .iter()
    .filter(|(_, rates)| rates.len() >= MIN_TYPE_SAMPLES)
    .map(|(ct, rates)| (*ct, mean(rates), rates.len()))
    .collect();

  if scored.len() < 2 {
    return None;
  }
  sort_desc_by_avg(&mut scored, |(_, avg, _)| *avg);

  let best = scored[0];
  let worst = scored[scored.len() - 1];
  let ratio = if worst.1 > 0.0 { best.1 / worst.1 } else { best.1 };
  let confidence = (0.4 + ((best.2 + worst.2) as f64) * 0.05).min(0.85);

  Some(ContentTypeInsight {
    performance: scored.iter().map(|(ct, avg, _)| (*ct, *avg)).collect(),
    best,
    worst,
    best_to_worst_ratio: ratio,
    confidence,
  })
}

pub fn reduce_length(records: &[PerformanceRecord]) -> Option<LengthInsight> {
  let mut by_bucket: HashMap<LengthBucket, Vec<f64>> = HashMap::new();
  for r in records {
    let bucket = LengthBucket::for_chars(r.content.chars().count());
    by_bucket.entry(bucket).or_default().push(r.engagement_rate);
  }

  let mut scored: Vec<(LengthBucket, f64, usize)> = by_bucket
    .iter()
    .filter(|(_, rates)| rates.len() >= MIN_TYPE_SAMPLES)
    .map(|(bucket, rates)| (*bucket, mean(rates), rates.len()))
    .collect();

  if scored.is_empty() {
    return None;
  }
  sort_desc_by_avg(&mut scored, |(_, avg, _)| *avg);

  let (best_bucket, avg_engagement, sample_count) = scored[0];
  let confidence = (0.4 + (sample_count as f64) * 0.05).min(0.85);

  Some(LengthInsight {
    best_bucket,
    avg_engagement,
    sample_count,
    confidence,
  })
}

/// Normalize tags, group, and rank, dropping tags with fewer than
/// `MIN_HASHTAG_USES` uses.
fn ranked_hashtags(records: &[PerformanceRecord]) -> Vec<HashtagScore> {
  let mut by_tag: HashMap<String, Vec<f64>> = HashMap::new();
  for r in records {
    for tag in &r.hashtags {
      let normalized = normalize_hashtag(tag);
      if normalized.is_empty() {
        continue;
      }
      by_tag.entry(normalized).or_default().push(r.engagement_rate);
    }
  }

  let mut scored: Vec<HashtagScore> = by_tag
    .into_iter()
    .filter(|(_, rates)| rates.len() >= MIN_HASHTAG_USES)
    .map(|(tag, rates)| HashtagScore {
      tag,
      avg_engagement: mean(&rates),
      uses: rates.len(),
    })
    .collect();
  sort_desc_by_avg(&mut scored, |s| s.avg_engagement);
  scored
}

pub fn reduce_hashtags(records: &[PerformanceRecord]) -> Option<HashtagInsight> {
  let scored = ranked_hashtags(records);
  if scored.len() < MIN_HASHTAG_TAGS {
    return None;
  }

  let confidence = (0.5 + (scored.len() as f64) * 0.05).min(0.9);
  let top: Vec<HashtagScore> = scored.iter().take(5).cloned().collect();
  let bottom: Vec<HashtagScore> = scored.iter().rev().take(3).cloned().collect();

  Some(HashtagInsight {
    top,
    bottom,
    confidence,
  })
}

/// Partition by the AI-authorship flag; both sides need enough samples
/// for the comparison to mean anything.
pub fn reduce_authorship(records: &[PerformanceRecord]) -> Option<AuthorshipInsight> {
  let ai: Vec<f64> = records
    .iter()
    .filter(|r| r.was_ai_generated)
    .map(|r| r.engagement_rate)
    .collect();
  let human: Vec<f64> = records
    .iter()
    .filter(|r| !r.was_ai_generated)
    .map(|r| r.engagement_rate)
    .collect();

  if ai.len() < MIN_AUTHORSHIP_SAMPLES || human.len() < MIN_AUTHORSHIP_SAMPLES {
    return None;
  }

  let ai_avg = mean(&ai);
  let human_avg = mean(&human);
  let ai_wins = ai_avg > human_avg;
  let (winner, loser) = if ai_wins {
    (ai_avg, human_avg)
  } else {
    (human_avg, ai_avg)
  };
  let gap_pct = if loser > 0.0 {
    (winner / loser - 1.0) * 100.0
  } else if winner > 0.0 {
    100.0
  } else {
    0.0
  };

  let smaller_side = ai.len().min(human.len());
  let confidence = (0.5 + (smaller_side as f64) * 0.05).min(0.9);

  Some(AuthorshipInsight {
    ai_avg,
    human_avg,
    ai_count: ai.len(),
    human_count: human.len(),
    ai_wins,
    gap_pct,
    confidence,
  })
}

fn classify_tone(content: &str) -> &'static str {
  if content.contains('?') {
    "curious"
  } else if count_emoji(content) > 0 {
    "playful"
  } else if content.contains('!') || contains_cta(content) {
    "energetic"
  } else {
    "informative"
  }
}

fn tone_distribution(records: &[PerformanceRecord]) -> HashMap<String, f64> {
  let mut counts: HashMap<&'static str, usize> = HashMap::new();
  for r in records {
    *counts.entry(classify_tone(&r.content)).or_insert(0) += 1;
  }
  let total = records.len().max(1) as f64;
  counts
    .into_iter()
    .map(|(tone, n)| (tone.to_string(), (n as f64) / total))
    .collect()
}

/// Reduce one platform's records into the shape the profile stores.
pub fn build_platform_aggregates(
  records: &[PerformanceRecord],
  now: DateTime<Utc>,
) -> Option<PlatformAggregates> {
  if records.is_empty() {
    return None;
  }

  let best_time_slots = reduce_timing(records)
    .map(|t| t.ranked_slots.into_iter().take(MAX_BEST_TIME_SLOTS).collect())
    .unwrap_or_default();

  let top_hashtags: Vec<HashtagScore> = ranked_hashtags(records)
    .into_iter()
    .take(MAX_TOP_HASHTAGS)
    .collect();

  let content_type_performance = reduce_content_type(records)
    .map(|c| c.performance)
    .unwrap_or_default();

  let rates: Vec<f64> = records.iter().map(|r| r.engagement_rate).collect();
  let reaches: Vec<f64> = records.iter().map(|r| r.metrics.reach as f64).collect();
  let baseline = Some(PerformanceBaseline {
    avg_engagement_rate: mean(&rates),
    avg_reach: mean(&reaches),
    sample_count: records.len(),
    last_updated: now,
  });

  Some(PlatformAggregates {
    preferred_tones: tone_distribution(records),
    best_time_slots,
    top_hashtags,
    content_type_performance,
    baseline,
  })
}

const DAY_NAMES: [&str; 7] = [
  "Monday",
  "Tuesday",
  "Wednesday",
  "Thursday",
  "Friday",
  "Saturday",
  "Sunday",
];

pub fn day_name(day_of_week: u32) -> &'static str {
  DAY_NAMES
    .get(day_of_week as usize)
    .copied()
    .unwrap_or("Monday")
}

/// Run every reducer and describe whatever had enough signal. Reducers
/// with no opinion simply contribute nothing.
pub fn insights_from_records(records: &[PerformanceRecord]) -> Vec<LearningInsight> {
  let mut out = Vec::new();

  if let Some(t) = reduce_timing(records) {
    out.push(LearningInsight {
      kind: InsightKind::Timing,
      summary: format!(
        "Best slot: {} {:02}:00 at {:.2}% avg engagement ({} posts), {:.2} points above the weakest slot.",
        day_name(t.best.day_of_week),
        t.best.hour,
        t.best.avg_engagement,
        t.best.sample_count,
        t.gap
      ),
      confidence: t.confidence,
    });
  }

  if let Some(c) = reduce_content_type(records) {
    out.push(LearningInsight {
      kind: InsightKind::ContentType,
      summary: format!(
        "{} posts outperform {} posts {:.1}x ({:.2}% vs {:.2}% avg engagement).",
        c.best.0.as_str(),
        c.worst.0.as_str(),
        c.best_to_worst_ratio,
        c.best.1,
        c.worst.1
      ),
      confidence: c.confidence,
    });
  }

  if let Some(l) = reduce_length(records) {
    out.push(LearningInsight {
      kind: InsightKind::Length,
      summary: format!(
        "Posts of {} perform best: {:.2}% avg engagement over {} posts.",
        l.best_bucket.label(),
        l.avg_engagement,
        l.sample_count
      ),
      confidence: l.confidence,
    });
  }

  if let Some(h) = reduce_hashtags(records) {
    let top_tags: Vec<String> = h.top.iter().map(|s| format!("#{}", s.tag)).collect();
    out.push(LearningInsight {
      kind: InsightKind::Hashtags,
      summary: format!("Strongest hashtags: {}.", top_tags.join(", ")),
      confidence: h.confidence,
    });
  }

  if let Some(a) = reduce_authorship(records) {
    let (winner, winner_avg, loser_avg) = if a.ai_wins {
      ("AI-assisted", a.ai_avg, a.human_avg)
    } else {
      ("Hand-written", a.human_avg, a.ai_avg)
    };
    out.push(LearningInsight {
      kind: InsightKind::Authorship,
      summary: format!(
        "{} posts lead by {:.0}% ({:.2}% vs {:.2}% avg engagement).",
        winner, a.gap_pct, winner_avg, loser_avg
      ),
      confidence: a.confidence,
    });
  }

  out
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
  pub posts_analyzed: usize,
  pub insights: Vec<LearningInsight>,
  pub baseline: Option<PerformanceBaseline>,
}

fn require_user_id(user_id: &str) -> Result<(), Error> {
  if user_id.trim().is_empty() {
    return Err(Box::new(std::io::Error::other("user_id is required")) as Error);
  }
  Ok(())
}

/// Learn from the last `days_to_analyze` days of records and merge the
/// result into the stored profile. The merge runs as one transaction in
/// storage, so an aborted run leaves the stored profile untouched.
pub async fn run_learning(
  pool: &sqlx::MySqlPool,
  user_id: &str,
  platform: Option<Platform>,
  days_to_analyze: i64,
) -> Result<Vec<LearningInsight>, Error> {
  require_user_id(user_id)?;

  let since = Utc::now() - chrono::Duration::days(days_to_analyze.max(1));
  let records = fetch_recent_performance(pool, user_id, platform, Some(since), 500).await?;
  let insights = insights_from_records(&records);

  let now = Utc::now();
  let aggregates = platform.and_then(|_| build_platform_aggregates(&records, now));

  merge_profile_txn(
    pool,
    user_id,
    platform,
    aggregates.as_ref(),
    records.len(),
    now,
  )
  .await?;

  Ok(insights)
}

/// Read-only variant of a learning run: same reducers, no profile write.
pub async fn analyze(
  pool: &sqlx::MySqlPool,
  user_id: &str,
  platform: Option<Platform>,
) -> Result<AnalysisReport, Error> {
  require_user_id(user_id)?;

  let since = Utc::now() - chrono::Duration::days(90);
  let records = fetch_recent_performance(pool, user_id, platform, Some(since), 500).await?;
  let insights = insights_from_records(&records);
  let baseline = build_platform_aggregates(&records, Utc::now()).and_then(|a| a.baseline);

  Ok(AnalysisReport {
    posts_analyzed: records.len(),
    insights,
    baseline,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::PostMetrics;
  use chrono::TimeZone;

  fn record_at(
    hour: u32,
    day_offset: i64,
    engagement_pct: f64,
    content_type: ContentType,
    content: &str,
    hashtags: &[&str],
    ai: bool,
  ) -> PerformanceRecord {
    // Base date is a Monday.
    let posted_at = Utc
      .with_ymd_and_hms(2026, 3, 2, hour, 0, 0)
      .single()
      .unwrap()
      + chrono::Duration::days(day_offset);
    let reach = 1000i64;
    let likes = (engagement_pct * 10.0) as i64;
    PerformanceRecord::new(
      Platform::Instagram,
      content_type,
      content.to_string(),
      hashtags.iter().map(|s| s.to_string()).collect(),
      posted_at,
      PostMetrics {
        impressions: reach * 2,
        reach,
        likes,
        comments: 0,
        shares: 0,
        saves: 0,
        clicks: 0,
      },
      ai,
      true,
    )
  }

  #[test]
  fn timing_reducer_picks_high_engagement_slot_with_exact_confidence() {
    // Six posts: hour 9 averages 5%, hour 15 averages 1%.
    let records = vec![
      record_at(9, 0, 5.0, ContentType::Image, "a", &[], false),
      record_at(9, 0, 5.0, ContentType::Image, "b", &[], false),
      record_at(9, 0, 5.0, ContentType::Image, "c", &[], false),
      record_at(15, 0, 1.0, ContentType::Image, "d", &[], false),
      record_at(15, 0, 1.0, ContentType::Image, "e", &[], false),
      record_at(15, 0, 1.0, ContentType::Image, "f", &[], false),
    ];

    let insight = reduce_timing(&records).expect("expected timing insight");
    assert_eq!(insight.best.hour, 9);
    assert!((insight.best.avg_engagement - 5.0).abs() < 1e-9);
    let expected_confidence = (0.5 + (insight.best.sample_count as f64) * 0.1).min(0.9);
    assert!((insight.confidence - expected_confidence).abs() < 1e-9);
    assert!(insight.confidence < 0.9 + 1e-9);
  }

  #[test]
  fn timing_reducer_skips_slots_below_minimum_samples() {
    let records = vec![
      record_at(9, 0, 5.0, ContentType::Image, "a", &[], false),
      record_at(10, 0, 9.0, ContentType::Image, "lone spike", &[], false),
      record_at(9, 0, 3.0, ContentType::Image, "b", &[], false),
    ];

    let insight = reduce_timing(&records).expect("hour 9 qualifies");
    // The single 9% post at hour 10 must not be picked.
    assert_eq!(insight.best.hour, 9);
    assert_eq!(insight.ranked_slots.len(), 1);
  }

  #[test]
  fn timing_reducer_returns_none_without_any_qualifying_slot() {
    let records = vec![
      record_at(9, 0, 5.0, ContentType::Image, "a", &[], false),
      record_at(10, 1, 4.0, ContentType::Image, "b", &[], false),
    ];
    assert!(reduce_timing(&records).is_none());
  }

  #[test]
  fn content_type_reducer_needs_two_qualifying_types() {
    let records = vec![
      record_at(9, 0, 5.0, ContentType::Reel, "a", &[], false),
      record_at(9, 1, 4.0, ContentType::Reel, "b", &[], false),
      record_at(9, 2, 1.0, ContentType::Image, "c", &[], false),
    ];
    assert!(reduce_content_type(&records).is_none());

    let mut enough = records.clone();
    enough.push(record_at(9, 3, 2.0, ContentType::Image, "d", &[], false));
    let insight = reduce_content_type(&enough).expect("two types qualify");
    assert_eq!(insight.best.0, ContentType::Reel);
    assert!((insight.best_to_worst_ratio - 3.0).abs() < 1e-9);
  }

  #[test]
  fn hashtag_reducer_excludes_tags_below_min_uses() {
    let records = vec![
      record_at(9, 0, 4.0, ContentType::Image, "a", &["#growth"], false),
      record_at(9, 1, 4.0, ContentType::Image, "b", &["#Growth"], false),
      record_at(9, 2, 3.0, ContentType::Image, "c", &["#ai"], false),
      record_at(9, 3, 3.0, ContentType::Image, "d", &["#ai"], false),
      record_at(9, 4, 9.0, ContentType::Image, "e", &["#x"], false),
    ];

    // Only two tags qualify, below the three-tag minimum.
    assert!(reduce_hashtags(&records).is_none());

    let mut enough = records.clone();
    enough.push(record_at(10, 0, 2.0, ContentType::Image, "f", &["#b2b"], false));
    enough.push(record_at(10, 1, 2.0, ContentType::Image, "g", &["#b2b"], false));
    let insight = reduce_hashtags(&enough).expect("three tags qualify");
    assert!(insight.top.iter().all(|s| s.tag != "x"));
    assert!(insight.top.iter().any(|s| s.tag == "growth"));
    assert!(insight.top.iter().any(|s| s.tag == "ai"));
  }

  #[test]
  fn authorship_reducer_needs_three_samples_per_side() {
    let mut records = vec![
      record_at(9, 0, 5.0, ContentType::Image, "a", &[], true),
      record_at(9, 1, 5.0, ContentType::Image, "b", &[], true),
      record_at(9, 2, 5.0, ContentType::Image, "c", &[], true),
      record_at(9, 3, 2.0, ContentType::Image, "d", &[], false),
      record_at(9, 4, 2.0, ContentType::Image, "e", &[], false),
    ];
    assert!(reduce_authorship(&records).is_none());

    records.push(record_at(9, 5, 2.0, ContentType::Image, "f", &[], false));
    let insight = reduce_authorship(&records).expect("both sides qualify");
    assert!(insight.ai_wins);
    assert!((insight.gap_pct - 150.0).abs() < 1e-6);
  }

  #[test]
  fn reducers_are_order_independent() {
    let mut records = vec![
      record_at(9, 0, 5.0, ContentType::Image, "a", &["#growth"], false),
      record_at(9, 1, 1.0, ContentType::Image, "b", &["#growth"], false),
      record_at(15, 0, 3.0, ContentType::Video, "c", &["#ai"], true),
      record_at(15, 1, 3.0, ContentType::Video, "d", &["#ai"], true),
    ];
    let forward = reduce_timing(&records);
    records.reverse();
    let backward = reduce_timing(&records);
    assert_eq!(forward, backward);
  }

  #[test]
  fn aggregates_truncate_to_profile_limits() {
    let mut records = Vec::new();
    for hour in 0..12u32 {
      for _ in 0..2 {
        records.push(record_at(
          hour,
          0,
          hour as f64,
          ContentType::Image,
          "post",
          &[],
          false,
        ));
      }
    }

    let agg = build_platform_aggregates(&records, Utc::now()).expect("aggregates");
    assert_eq!(agg.best_time_slots.len(), MAX_BEST_TIME_SLOTS);
    assert_eq!(agg.best_time_slots[0].hour, 11);
    let baseline = agg.baseline.expect("baseline");
    assert_eq!(baseline.sample_count, records.len());
  }
}
