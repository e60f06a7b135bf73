use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{ContentType, Platform};

/// Bumped whenever the learning heuristics change shape, so stale
/// profiles can be identified and relearned.
pub const MODEL_VERSION: &str = "2.1.0";

pub const MAX_BEST_TIME_SLOTS: usize = 5;
pub const MAX_TOP_HASHTAGS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlotScore {
  /// 0 = Monday .. 6 = Sunday, matching chrono's num_days_from_monday.
  pub day_of_week: u32,
  pub hour: u32,
  pub avg_engagement: f64,
  pub sample_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashtagScore {
  pub tag: String,
  pub avg_engagement: f64,
  pub uses: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceBaseline {
  pub avg_engagement_rate: f64,
  pub avg_reach: f64,
  pub sample_count: usize,
  pub last_updated: DateTime<Utc>,
}

/// Everything learned about one user's posting on one platform. Each
/// learning run replaces the whole value for its platform key.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformProfile {
  #[serde(default)]
  pub preferred_tones: HashMap<String, f64>,
  #[serde(default)]
  pub best_time_slots: Vec<TimeSlotScore>,
  #[serde(default)]
  pub top_hashtags: Vec<HashtagScore>,
  #[serde(default)]
  pub content_type_performance: HashMap<ContentType, f64>,
  #[serde(default)]
  pub baseline: Option<PerformanceBaseline>,
}

/// The per-user learned profile, persisted as one JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MLProfile {
  #[serde(default)]
  pub platforms: HashMap<Platform, PlatformProfile>,
  #[serde(default)]
  pub total_posts_analyzed: i64,
  #[serde(default)]
  pub last_learning_run: Option<DateTime<Utc>>,
  pub model_version: String,
}

impl MLProfile {
  pub fn new() -> Self {
    Self {
      platforms: HashMap::new(),
      total_posts_analyzed: 0,
      last_learning_run: None,
      model_version: MODEL_VERSION.to_string(),
    }
  }

  pub fn platform(&self, platform: Platform) -> Option<&PlatformProfile> {
    self.platforms.get(&platform)
  }
}

impl Default for MLProfile {
  fn default() -> Self {
    Self::new()
  }
}

/// Aggregator output destined for the profile, already truncated to the
/// profile's top-N limits.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformAggregates {
  pub preferred_tones: HashMap<String, f64>,
  pub best_time_slots: Vec<TimeSlotScore>,
  pub top_hashtags: Vec<HashtagScore>,
  pub content_type_performance: HashMap<ContentType, f64>,
  pub baseline: Option<PerformanceBaseline>,
}

/// Merge one learning run into the profile.
///
/// An all-platforms run (`platform == None`) touches only the global
/// counters; a single-platform run replaces that platform's keys
/// wholesale and never reads or writes any other platform's entry. The
/// whole merge happens on an owned value, so a caller that aborts simply
/// drops the result and the stored profile is untouched.
pub fn merge_aggregates(
  profile: &mut MLProfile,
  platform: Option<Platform>,
  aggregates: Option<&PlatformAggregates>,
  posts_analyzed: usize,
  now: DateTime<Utc>,
) {
  profile.total_posts_analyzed += posts_analyzed as i64;
  profile.last_learning_run = Some(now);
  profile.model_version = MODEL_VERSION.to_string();

  let Some(platform) = platform else {
    return;
  };
  let Some(aggregates) = aggregates else {
    return;
  };

  profile.platforms.insert(
    platform,
    PlatformProfile {
      preferred_tones: aggregates.preferred_tones.clone(),
      best_time_slots: aggregates.best_time_slots.clone(),
      top_hashtags: aggregates.top_hashtags.clone(),
      content_type_performance: aggregates.content_type_performance.clone(),
      baseline: aggregates.baseline,
    },
  );
}
