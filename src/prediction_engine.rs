use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::Serialize;
use vercel_runtime::Error;

use crate::content_signals::{
  char_count, contains_cta, count_emoji, first_line, normalize_hashtag,
};
use crate::db::{fetch_recent_performance, get_profile};
use crate::profile::MLProfile;
use crate::types::{clamp, round2, ContentType, PerformanceRecord, Platform};

pub const MAX_HISTORY_RECORDS: usize = 50;

const BASE_SCORE: f64 = 50.0;
const BASE_CONFIDENCE: f64 = 0.5;
const HISTORY_CONFIDENCE_BONUS: f64 = 0.2;
const PROFILE_CONFIDENCE_BONUS: f64 = 0.15;

/// Inclusive character range that tends to perform best per platform.
pub fn optimal_length_range(platform: Platform) -> (usize, usize) {
  match platform {
    Platform::Instagram => (125, 300),
    Platform::Facebook => (40, 80),
    Platform::Twitter => (71, 100),
    Platform::Linkedin => (150, 300),
    Platform::Youtube => (100, 500),
    Platform::Tiktok => (100, 150),
  }
}

pub fn optimal_hashtag_range(platform: Platform) -> (usize, usize) {
  match platform {
    Platform::Instagram => (5, 10),
    Platform::Facebook => (1, 3),
    Platform::Twitter => (1, 2),
    Platform::Linkedin => (3, 5),
    Platform::Youtube => (3, 5),
    Platform::Tiktok => (3, 6),
  }
}

pub fn peak_hours(platform: Platform) -> &'static [u32] {
  match platform {
    Platform::Instagram => &[11, 12, 19, 20, 21],
    Platform::Facebook => &[9, 13, 15],
    Platform::Twitter => &[8, 9, 12, 17, 18],
    Platform::Linkedin => &[8, 9, 10, 12, 17],
    Platform::Youtube => &[15, 16, 17, 20],
    Platform::Tiktok => &[19, 20, 21, 22],
  }
}

fn weekend_adjustment(platform: Platform) -> f64 {
  match platform {
    Platform::Instagram => 3.0,
    Platform::Facebook => 2.0,
    Platform::Twitter => -3.0,
    Platform::Linkedin => -8.0,
    Platform::Youtube => 4.0,
    Platform::Tiktok => 5.0,
  }
}

pub fn default_reach(platform: Platform) -> f64 {
  match platform {
    Platform::Instagram => 1000.0,
    Platform::Facebook => 800.0,
    Platform::Twitter => 600.0,
    Platform::Linkedin => 500.0,
    Platform::Youtube => 1500.0,
    Platform::Tiktok => 2000.0,
  }
}

fn default_type_boost(platform: Platform, content_type: ContentType) -> f64 {
  use ContentType::*;
  match platform {
    Platform::Instagram => match content_type {
      Reel => 12.0,
      Carousel => 10.0,
      Video => 8.0,
      Image => 5.0,
      Story => 2.0,
      Text => -5.0,
    },
    Platform::Facebook => match content_type {
      Video => 10.0,
      Reel => 8.0,
      Image => 6.0,
      Carousel => 5.0,
      Text => 2.0,
      Story => 1.0,
    },
    Platform::Twitter => match content_type {
      Video => 10.0,
      Image => 8.0,
      Text => 6.0,
      Carousel => 4.0,
      Story | Reel => -5.0,
    },
    Platform::Linkedin => match content_type {
      Carousel => 12.0,
      Video => 10.0,
      Text => 8.0,
      Image => 6.0,
      Story | Reel => -5.0,
    },
    Platform::Youtube => match content_type {
      Video => 12.0,
      Reel => 10.0,
      Image => -3.0,
      Text | Carousel | Story => -5.0,
    },
    Platform::Tiktok => match content_type {
      Video => 12.0,
      Reel => 10.0,
      Image => -2.0,
      Text | Carousel | Story => -5.0,
    },
  }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionFactor {
  pub name: &'static str,
  pub score: f64,
  pub impact: &'static str,
}

impl PredictionFactor {
  fn new(name: &'static str, score: f64) -> Self {
    let impact = if score > 0.0 {
      "positive"
    } else if score < 0.0 {
      "negative"
    } else {
      "neutral"
    };
    Self {
      name,
      score,
      impact,
    }
  }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictedRange {
  pub min: f64,
  pub max: f64,
  pub expected: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResult {
  pub engagement: PredictedRange,
  pub reach: PredictedRange,
  pub confidence: f64,
  pub factors: Vec<PredictionFactor>,
  pub suggestions: Vec<String>,
  pub comparison_to_average: String,
}

pub struct PredictionInput<'a> {
  pub platform: Platform,
  pub content: &'a str,
  pub content_type: ContentType,
  pub hashtags: &'a [String],
  pub scheduled_at: Option<DateTime<Utc>>,
  pub profile: Option<&'a MLProfile>,
  pub history: &'a [PerformanceRecord],
}

fn length_factor(input: &PredictionInput<'_>, suggestions: &mut Vec<String>) -> f64 {
  let (min, max) = optimal_length_range(input.platform);
  let chars = char_count(input.content);
  if chars < min {
    suggestions.push(format!(
      "Content is short for {}: aim for {}-{} characters.",
      input.platform.as_str(),
      min,
      max
    ));
    -5.0
  } else if chars <= max {
    8.0
  } else {
    suggestions.push(format!(
      "Consider shortening: {} posts perform best at {}-{} characters.",
      input.platform.as_str(),
      min,
      max
    ));
    0.0
  }
}

fn content_type_factor(input: &PredictionInput<'_>) -> f64 {
  let profile_score = input
    .profile
    .and_then(|p| p.platform(input.platform))
    .and_then(|p| p.content_type_performance.get(&input.content_type).copied());

  match profile_score {
    Some(score) if score > 3.0 => 12.0,
    Some(score) if score > 1.0 => 6.0,
    Some(_) => -5.0,
    None => default_type_boost(input.platform, input.content_type),
  }
}

fn hashtag_factor(input: &PredictionInput<'_>, suggestions: &mut Vec<String>) -> f64 {
  let (min, max) = optimal_hashtag_range(input.platform);
  let count = input.hashtags.len();

  let mut score = if count == 0 {
    suggestions.push(format!(
      "Add {}-{} relevant hashtags to widen discovery.",
      min, max
    ));
    -5.0
  } else if count >= min && count <= max {
    8.0
  } else if count < min {
    2.0
  } else {
    suggestions.push(format!(
      "Trim hashtags to {}-{}; more reads as spam on {}.",
      min,
      max,
      input.platform.as_str()
    ));
    -3.0
  };

  if let Some(platform_profile) = input.profile.and_then(|p| p.platform(input.platform)) {
    for tag in input.hashtags {
      let normalized = normalize_hashtag(tag);
      if platform_profile
        .top_hashtags
        .iter()
        .any(|top| top.tag == normalized)
      {
        score += 2.0;
      }
    }
  }

  score
}

fn timing_factor(input: &PredictionInput<'_>, suggestions: &mut Vec<String>) -> Option<f64> {
  let scheduled_at = input.scheduled_at?;
  let hour = scheduled_at.hour();
  let is_weekend = matches!(
    scheduled_at.weekday(),
    chrono::Weekday::Sat | chrono::Weekday::Sun
  );

  let profile_best_hour = input
    .profile
    .and_then(|p| p.platform(input.platform))
    .map(|p| p.best_time_slots.iter().any(|slot| slot.hour == hour))
    .unwrap_or(false);

  // The user's own learned best hour outranks the generic peak list.
  let peak_component = if profile_best_hour {
    10.0
  } else if peak_hours(input.platform).contains(&hour) {
    8.0
  } else {
    suggestions.push(format!(
      "Hour {:02}:00 is off-peak for {}; peak hours: {}.",
      hour,
      input.platform.as_str(),
      peak_hours(input.platform)
        .iter()
        .map(|h| format!("{h:02}:00"))
        .collect::<Vec<_>>()
        .join(", ")
    ));
    0.0
  };

  let weekend_component = if is_weekend {
    weekend_adjustment(input.platform)
  } else {
    0.0
  };

  Some(peak_component + weekend_component)
}

fn quality_factor(input: &PredictionInput<'_>, suggestions: &mut Vec<String>) -> f64 {
  let mut score = 0.0;
  let content = input.content;

  if content.contains('?') {
    score += 5.0;
  } else {
    suggestions.push("Ask a question to invite replies.".to_string());
  }

  if contains_cta(content) {
    score += 5.0;
  }

  let emoji = count_emoji(content);
  if (1..=5).contains(&emoji) {
    score += 3.0;
  } else if emoji > 5 {
    score -= 2.0;
  }

  if content.contains('\n') {
    score += 2.0;
  }

  let opener_len = char_count(first_line(content));
  if (20..100).contains(&opener_len) {
    score += 2.0;
  }

  score
}

/// Score a draft against platform heuristics and the learned profile.
/// Pure over its inputs; the async wrapper below does the data loading.
pub fn predict(input: &PredictionInput<'_>) -> PredictionResult {
  let mut suggestions = Vec::new();
  let mut factors = Vec::new();
  let mut score = BASE_SCORE;
  let mut confidence = BASE_CONFIDENCE;

  let length = length_factor(input, &mut suggestions);
  factors.push(PredictionFactor::new("length", length));
  score += length;

  let content_type = content_type_factor(input);
  factors.push(PredictionFactor::new("contentType", content_type));
  score += content_type;

  let hashtags = hashtag_factor(input, &mut suggestions);
  factors.push(PredictionFactor::new("hashtags", hashtags));
  score += hashtags;

  if let Some(timing) = timing_factor(input, &mut suggestions) {
    factors.push(PredictionFactor::new("timing", timing));
    score += timing;
  }

  let quality = quality_factor(input, &mut suggestions);
  factors.push(PredictionFactor::new("contentQuality", quality));
  score += quality;

  let history_avg_engagement = if input.history.is_empty() {
    None
  } else {
    let sum: f64 = input.history.iter().map(|r| r.engagement_rate).sum();
    Some(sum / (input.history.len() as f64))
  };

  if let Some(avg) = history_avg_engagement {
    if avg > 3.0 {
      score += 10.0;
    } else if avg < 1.0 {
      score -= 10.0;
    }
    confidence += HISTORY_CONFIDENCE_BONUS;
  }

  if input.profile.is_some() {
    confidence += PROFILE_CONFIDENCE_BONUS;
  }
  confidence = clamp(confidence, 0.0, 1.0);

  let score = clamp(score, 0.0, 100.0);

  let spread = (100.0 - confidence * 100.0) * 0.3;
  let engagement = PredictedRange {
    min: round2(clamp(score - spread, 0.0, 100.0)),
    max: round2(clamp(score + spread, 0.0, 100.0)),
    expected: round2(score),
  };

  let baseline_reach = if input.history.is_empty() {
    default_reach(input.platform)
  } else {
    let sum: f64 = input.history.iter().map(|r| r.metrics.reach as f64).sum();
    sum / (input.history.len() as f64)
  };
  // score 50 => 1x baseline, 100 => 2x, 0 => 0x.
  let expected_reach = baseline_reach * (score / 50.0);
  let reach = PredictedRange {
    min: (expected_reach * 0.7).round().max(0.0),
    max: (expected_reach * 1.4).round(),
    expected: expected_reach.round().max(0.0),
  };

  let average = history_avg_engagement.unwrap_or(2.5);
  let comparison_to_average = if score > average * 1.2 {
    format!(
      "Predicted to outperform your average engagement ({:.2}%).",
      average
    )
  } else if score < average * 0.8 {
    format!(
      "Predicted below your average engagement ({:.2}%).",
      average
    )
  } else {
    format!("In line with your average engagement ({:.2}%).", average)
  };

  PredictionResult {
    engagement,
    reach,
    confidence: round2(confidence),
    factors,
    suggestions,
    comparison_to_average,
  }
}

/// Load the profile and recent same-platform history, then predict.
/// Input validation happens before any storage access.
pub async fn predict_for_user(
  pool: &sqlx::MySqlPool,
  user_id: &str,
  platform: Platform,
  content: &str,
  content_type: ContentType,
  hashtags: &[String],
  scheduled_at: Option<DateTime<Utc>>,
) -> Result<PredictionResult, Error> {
  if user_id.trim().is_empty() {
    return Err(Box::new(std::io::Error::other("user_id is required")) as Error);
  }
  if content.trim().is_empty() {
    return Err(Box::new(std::io::Error::other("content is required")) as Error);
  }

  let profile = get_profile(pool, user_id).await?;
  let history = fetch_recent_performance(
    pool,
    user_id,
    Some(platform),
    Some(Utc::now() - chrono::Duration::days(90)),
    MAX_HISTORY_RECORDS,
  )
  .await?;

  let input = PredictionInput {
    platform,
    content,
    content_type,
    hashtags,
    scheduled_at,
    profile: profile.as_ref(),
    history: &history,
  };
  Ok(predict(&input))
}
