use chrono::{Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use vercel_runtime::Error;

use crate::db::{fetch_daily_engagement, fetch_recent_performance, get_profile};
use crate::learning_engine::day_name;
use crate::profile::MLProfile;
use crate::types::{round2, DailyEngagementRow, PerformanceRecord, Platform};

pub const MAX_RECOMMENDATIONS: usize = 8;

const TREND_WINDOW_ROWS: usize = 14;
const MIN_AUTHORSHIP_SIDE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
  High,
  Medium,
  Low,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
  pub priority: Priority,
  pub category: &'static str,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub suggested_action: Option<String>,
}

pub fn weekly_post_target(platform: Platform) -> usize {
  match platform {
    Platform::Instagram => 4,
    Platform::Facebook => 5,
    Platform::Twitter => 14,
    Platform::Linkedin => 3,
    Platform::Youtube => 2,
    Platform::Tiktok => 7,
  }
}

fn content_type_gap_rule(
  profile: Option<&MLProfile>,
  platform: Platform,
) -> Option<Recommendation> {
  let perf = &profile?.platform(platform)?.content_type_performance;
  if perf.len() < 2 {
    return None;
  }

  let mut scored: Vec<_> = perf.iter().collect();
  scored.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal));
  let (best_type, best) = scored[0];
  let (worst_type, worst) = scored[scored.len() - 1];

  let ratio = if *worst > 0.0 { best / worst } else { *best };
  if ratio <= 1.5 {
    return None;
  }

  Some(Recommendation {
    priority: Priority::High,
    category: "content_mix",
    message: format!(
      "Your {} posts earn {:.1}x the engagement of {} posts ({:.2}% vs {:.2}%).",
      best_type.as_str(),
      ratio,
      worst_type.as_str(),
      best,
      worst
    ),
    suggested_action: Some(format!(
      "Shift the content mix toward {} posts.",
      best_type.as_str()
    )),
  })
}

fn cadence_rule(records: &[PerformanceRecord], platform: Platform) -> Option<Recommendation> {
  let week_ago = Utc::now() - Duration::days(7);
  let posts_this_week = records.iter().filter(|r| r.posted_at >= week_ago).count();
  let target = weekly_post_target(platform);

  if (posts_this_week as f64) < (target as f64) * 0.5 {
    return Some(Recommendation {
      priority: Priority::High,
      category: "cadence",
      message: format!(
        "Only {} posts in the last 7 days; {} rewards about {} per week.",
        posts_this_week,
        platform.as_str(),
        target
      ),
      suggested_action: Some(format!("Schedule at least {} posts this week.", target)),
    });
  }

  if (posts_this_week as f64) > (target as f64) * 1.5 {
    return Some(Recommendation {
      priority: Priority::Low,
      category: "cadence",
      message: format!(
        "{} posts in the last 7 days is above the {} sweet spot for {}.",
        posts_this_week,
        target,
        platform.as_str()
      ),
      suggested_action: Some("Favor quality over quantity for the next week.".to_string()),
    });
  }

  None
}

fn best_slot_rule(profile: Option<&MLProfile>, platform: Platform) -> Option<Recommendation> {
  let platform_profile = profile?.platform(platform)?;
  let best = platform_profile.best_time_slots.first()?;
  let baseline = platform_profile
    .baseline
    .map(|b| b.avg_engagement_rate)
    .unwrap_or(0.0);
  let delta = best.avg_engagement - baseline;

  Some(Recommendation {
    priority: Priority::Medium,
    category: "timing",
    message: format!(
      "{} at {:02}:00 is your strongest slot: {:.2}% avg engagement ({:+.2} vs your baseline).",
      day_name(best.day_of_week),
      best.hour,
      best.avg_engagement,
      delta
    ),
    suggested_action: Some(format!(
      "Schedule the next post for {} {:02}:00.",
      day_name(best.day_of_week),
      best.hour
    )),
  })
}

fn top_hashtags_rule(profile: Option<&MLProfile>, platform: Platform) -> Option<Recommendation> {
  let platform_profile = profile?.platform(platform)?;
  if platform_profile.top_hashtags.is_empty() {
    return None;
  }

  let tags: Vec<String> = platform_profile
    .top_hashtags
    .iter()
    .take(5)
    .map(|t| format!("#{}", t.tag))
    .collect();

  Some(Recommendation {
    priority: Priority::Medium,
    category: "hashtags",
    message: format!("Your best-performing hashtags: {}.", tags.join(", ")),
    suggested_action: Some("Reuse these tags where they fit the topic.".to_string()),
  })
}

/// Split the most recent 14 daily rows into two halves and compare.
/// Fewer than 14 rows: no opinion.
fn trend_rule(trend: &[DailyEngagementRow]) -> Option<Recommendation> {
  if trend.len() < TREND_WINDOW_ROWS {
    return None;
  }

  let recent_window = &trend[trend.len() - TREND_WINDOW_ROWS..];
  let (prior, recent) = recent_window.split_at(TREND_WINDOW_ROWS / 2);
  let mean = |rows: &[DailyEngagementRow]| {
    rows.iter().map(|r| r.avg_engagement_rate).sum::<f64>() / (rows.len() as f64)
  };
  let prior_avg = mean(prior);
  let recent_avg = mean(recent);
  if prior_avg <= 0.0 {
    return None;
  }

  let ratio = recent_avg / prior_avg;
  if ratio < 0.8 {
    return Some(Recommendation {
      priority: Priority::High,
      category: "trend",
      message: format!(
        "Engagement is declining: {:.2}% avg this week vs {:.2}% the week before.",
        recent_avg, prior_avg
      ),
      suggested_action: Some(
        "Revisit what changed: posting times, content mix, or topics.".to_string(),
      ),
    });
  }
  if ratio > 1.2 {
    return Some(Recommendation {
      priority: Priority::Low,
      category: "trend",
      message: format!(
        "Momentum: engagement is up to {:.2}% avg from {:.2}% the week before.",
        recent_avg, prior_avg
      ),
      suggested_action: Some("Keep the current approach while it compounds.".to_string()),
    });
  }
  None
}

fn authorship_rule(records: &[PerformanceRecord]) -> Option<Recommendation> {
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

  if ai.len() < MIN_AUTHORSHIP_SIDE || human.len() < MIN_AUTHORSHIP_SIDE {
    return None;
  }

  let ai_avg = ai.iter().sum::<f64>() / (ai.len() as f64);
  let human_avg = human.iter().sum::<f64>() / (human.len() as f64);
  let (winner_label, winner_avg, loser_avg) = if ai_avg >= human_avg {
    ("AI-assisted", ai_avg, human_avg)
  } else {
    ("hand-written", human_avg, ai_avg)
  };
  if loser_avg <= 0.0 || winner_avg / loser_avg < 1.2 {
    return None;
  }

  Some(Recommendation {
    priority: Priority::Medium,
    category: "authorship",
    message: format!(
      "Your {} posts outperform the rest ({:.2}% vs {:.2}% avg engagement).",
      winner_label, winner_avg, loser_avg
    ),
    suggested_action: Some(format!("Lean into {} drafts.", winner_label)),
  })
}

/// Run every rule, sort by priority (stable within a priority), and cap
/// the list.
pub fn generate_recommendations(
  profile: Option<&MLProfile>,
  platform: Platform,
  records: &[PerformanceRecord],
  trend: &[DailyEngagementRow],
) -> Vec<Recommendation> {
  let mut out: Vec<Recommendation> = [
    content_type_gap_rule(profile, platform),
    cadence_rule(records, platform),
    best_slot_rule(profile, platform),
    top_hashtags_rule(profile, platform),
    trend_rule(trend),
    authorship_rule(records),
  ]
  .into_iter()
  .flatten()
  .collect();

  out.sort_by_key(|r| r.priority);
  out.truncate(MAX_RECOMMENDATIONS);
  out
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyPlanEntry {
  pub day: &'static str,
  pub hour: u32,
  pub note: String,
}

/// One suggested posting slot per target post this week, cycling the
/// learned best slots (or the platform peak hours when nothing is
/// learned yet).
pub fn build_weekly_plan(profile: Option<&MLProfile>, platform: Platform) -> Vec<WeeklyPlanEntry> {
  let target = weekly_post_target(platform);
  let learned: Vec<(u32, u32)> = profile
    .and_then(|p| p.platform(platform))
    .map(|p| {
      p.best_time_slots
        .iter()
        .map(|s| (s.day_of_week, s.hour))
        .collect()
    })
    .unwrap_or_default();

  let slots: Vec<(u32, u32)> = if learned.is_empty() {
    let hours = crate::prediction_engine::peak_hours(platform);
    (0..target)
      .map(|i| {
        let day = ((i * 7) / target.max(1)) as u32 % 7;
        (day, hours[i % hours.len()])
      })
      .collect()
  } else {
    (0..target).map(|i| learned[i % learned.len()]).collect()
  };

  slots
    .into_iter()
    .enumerate()
    .map(|(i, (day, hour))| WeeklyPlanEntry {
      day: day_name(day),
      hour,
      note: if i == 0 {
        "Strongest learned slot".to_string()
      } else {
        "Suggested slot".to_string()
      },
    })
    .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthScore {
  pub total: f64,
  pub cadence: f64,
  pub engagement: f64,
  pub data_coverage: f64,
  pub growth_trend: f64,
}

/// Four factors, 25 points each. Growth trend is the only factor that
/// defaults to a neutral midpoint when there is not enough data.
pub fn calculate_health_score(
  records: &[PerformanceRecord],
  trend: &[DailyEngagementRow],
  platform: Platform,
) -> HealthScore {
  let week_ago = Utc::now() - Duration::days(7);
  let posts_this_week = records.iter().filter(|r| r.posted_at >= week_ago).count();
  let target = weekly_post_target(platform).max(1);
  let cadence = ((posts_this_week as f64) / (target as f64) * 25.0).min(25.0);

  let engagement = if records.is_empty() {
    0.0
  } else {
    let avg = records.iter().map(|r| r.engagement_rate).sum::<f64>() / (records.len() as f64);
    (avg / 5.0 * 25.0).min(25.0)
  };

  let data_coverage = ((records.len() as f64) / 20.0 * 25.0).min(25.0);

  let growth_trend = if trend.len() >= TREND_WINDOW_ROWS {
    let window = &trend[trend.len() - TREND_WINDOW_ROWS..];
    let (prior, recent) = window.split_at(TREND_WINDOW_ROWS / 2);
    let mean = |rows: &[DailyEngagementRow]| {
      rows.iter().map(|r| r.avg_engagement_rate).sum::<f64>() / (rows.len() as f64)
    };
    let prior_avg = mean(prior);
    if prior_avg > 0.0 {
      (mean(recent) / prior_avg * 12.5).clamp(0.0, 25.0)
    } else {
      12.5
    }
  } else {
    12.5
  };

  HealthScore {
    total: round2(cadence + engagement + data_coverage + growth_trend),
    cadence: round2(cadence),
    engagement: round2(engagement),
    data_coverage: round2(data_coverage),
    growth_trend: round2(growth_trend),
  }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationReport {
  pub recommendations: Vec<Recommendation>,
  pub weekly_plan: Vec<WeeklyPlanEntry>,
  pub health_score: HealthScore,
}

fn dominant_platform(records: &[PerformanceRecord]) -> Option<Platform> {
  let mut counts: HashMap<Platform, usize> = HashMap::new();
  for r in records {
    *counts.entry(r.platform).or_insert(0) += 1;
  }
  counts.into_iter().max_by_key(|(_, n)| *n).map(|(p, _)| p)
}

/// Load the profile, recent records, and daily trend rows, then build
/// the full report.
pub async fn generate_for_user(
  pool: &sqlx::MySqlPool,
  user_id: &str,
  platform: Option<Platform>,
) -> Result<RecommendationReport, Error> {
  if user_id.trim().is_empty() {
    return Err(Box::new(std::io::Error::other("user_id is required")) as Error);
  }

  let profile = get_profile(pool, user_id).await?;
  let since = Utc::now() - Duration::days(30);
  let records = fetch_recent_performance(pool, user_id, platform, Some(since), 200).await?;
  let trend = fetch_daily_engagement(pool, user_id, platform, 28).await?;

  let platform = platform
    .or_else(|| dominant_platform(&records))
    .unwrap_or(Platform::Instagram);

  Ok(RecommendationReport {
    recommendations: generate_recommendations(profile.as_ref(), platform, &records, &trend),
    weekly_plan: build_weekly_plan(profile.as_ref(), platform),
    health_score: calculate_health_score(&records, &trend, platform),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::profile::{merge_aggregates, PlatformAggregates, TimeSlotScore};
  use crate::types::{ContentType, PostMetrics};
  use chrono::NaiveDate;

  fn recent_record(days_ago: i64, engagement_pct: f64, ai: bool) -> PerformanceRecord {
    let reach = 1000i64;
    PerformanceRecord::new(
      Platform::Instagram,
      ContentType::Image,
      "post".to_string(),
      vec![],
      Utc::now() - Duration::days(days_ago),
      PostMetrics {
        impressions: reach,
        reach,
        likes: (engagement_pct * 10.0) as i64,
        comments: 0,
        shares: 0,
        saves: 0,
        clicks: 0,
      },
      ai,
      true,
    )
  }

  fn trend_rows(values: &[f64]) -> Vec<DailyEngagementRow> {
    values
      .iter()
      .enumerate()
      .map(|(i, v)| DailyEngagementRow {
        dt: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap() + Duration::days(i as i64),
        avg_engagement_rate: *v,
        posts: 1,
      })
      .collect()
  }

  fn profile_with_gap() -> MLProfile {
    let mut profile = MLProfile::new();
    let aggregates = PlatformAggregates {
      preferred_tones: Default::default(),
      best_time_slots: vec![TimeSlotScore {
        day_of_week: 2,
        hour: 19,
        avg_engagement: 6.0,
        sample_count: 4,
      }],
      top_hashtags: vec![],
      content_type_performance: [(ContentType::Reel, 6.0), (ContentType::Image, 2.0)]
        .into_iter()
        .collect(),
      baseline: None,
    };
    merge_aggregates(
      &mut profile,
      Some(Platform::Instagram),
      Some(&aggregates),
      10,
      Utc::now(),
    );
    profile
  }

  #[test]
  fn content_type_gap_emits_high_priority() {
    let profile = profile_with_gap();
    let rec = content_type_gap_rule(Some(&profile), Platform::Instagram).unwrap();
    assert_eq!(rec.priority, Priority::High);
    assert!(rec.message.contains("reel"));
  }

  #[test]
  fn cadence_rule_flags_both_directions() {
    let under: Vec<PerformanceRecord> = vec![recent_record(2, 3.0, false)];
    let rec = cadence_rule(&under, Platform::Twitter).unwrap();
    assert_eq!(rec.priority, Priority::High);

    let over: Vec<PerformanceRecord> = (0..7).map(|_| recent_record(1, 3.0, false)).collect();
    let rec = cadence_rule(&over, Platform::Instagram).unwrap();
    assert_eq!(rec.priority, Priority::Low);

    let on_target: Vec<PerformanceRecord> =
      (0..4).map(|_| recent_record(1, 3.0, false)).collect();
    assert!(cadence_rule(&on_target, Platform::Instagram).is_none());
  }

  #[test]
  fn trend_rule_needs_fourteen_rows() {
    assert!(trend_rule(&trend_rows(&[1.0; 13])).is_none());

    let declining: Vec<f64> = [5.0; 7].into_iter().chain([2.0; 7]).collect();
    let rec = trend_rule(&trend_rows(&declining)).unwrap();
    assert_eq!(rec.priority, Priority::High);

    let rising: Vec<f64> = [2.0; 7].into_iter().chain([5.0; 7]).collect();
    let rec = trend_rule(&trend_rows(&rising)).unwrap();
    assert_eq!(rec.priority, Priority::Low);

    let flat: Vec<f64> = [3.0; 14].to_vec();
    assert!(trend_rule(&trend_rows(&flat)).is_none());
  }

  #[test]
  fn authorship_rule_needs_five_each_and_twenty_percent_gap() {
    let mut records: Vec<PerformanceRecord> =
      (0..5).map(|_| recent_record(3, 5.0, true)).collect();
    records.extend((0..4).map(|_| recent_record(3, 2.0, false)));
    assert!(authorship_rule(&records).is_none());

    records.push(recent_record(3, 2.0, false));
    let rec = authorship_rule(&records).unwrap();
    assert_eq!(rec.priority, Priority::Medium);
    assert!(rec.message.contains("AI-assisted"));
  }

  #[test]
  fn recommendations_sort_by_priority_and_cap_at_eight() {
    let profile = profile_with_gap();
    let records: Vec<PerformanceRecord> = (0..10)
      .map(|i| recent_record(if i < 5 { 2 } else { 20 }, 5.0, i % 2 == 0))
      .collect();
    let declining: Vec<f64> = [5.0; 7].into_iter().chain([2.0; 7]).collect();

    let recs = generate_recommendations(
      Some(&profile),
      Platform::Instagram,
      &records,
      &trend_rows(&declining),
    );

    assert!(recs.len() <= MAX_RECOMMENDATIONS);
    for pair in recs.windows(2) {
      assert!(pair[0].priority <= pair[1].priority);
    }
  }

  #[test]
  fn weekly_plan_uses_learned_slots_and_hits_target_count() {
    let profile = profile_with_gap();
    let plan = build_weekly_plan(Some(&profile), Platform::Instagram);
    assert_eq!(plan.len(), weekly_post_target(Platform::Instagram));
    assert_eq!(plan[0].day, "Wednesday");
    assert_eq!(plan[0].hour, 19);

    let cold_start = build_weekly_plan(None, Platform::Youtube);
    assert_eq!(cold_start.len(), weekly_post_target(Platform::Youtube));
  }

  #[test]
  fn health_score_growth_defaults_to_neutral_midpoint() {
    let score = calculate_health_score(&[], &[], Platform::Instagram);
    assert_eq!(score.growth_trend, 12.5);
    assert_eq!(score.cadence, 0.0);
    assert_eq!(score.engagement, 0.0);
    assert_eq!(score.data_coverage, 0.0);
    assert_eq!(score.total, 12.5);
  }

  #[test]
  fn health_score_stays_within_hundred() {
    let records: Vec<PerformanceRecord> =
      (0..30).map(|_| recent_record(1, 9.0, false)).collect();
    let rising: Vec<f64> = [2.0; 7].into_iter().chain([9.0; 7]).collect();
    let score = calculate_health_score(&records, &trend_rows(&rising), Platform::Instagram);
    assert!(score.total <= 100.0);
    assert_eq!(score.cadence, 25.0);
  }
}
