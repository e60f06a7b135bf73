use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
  Instagram,
  Facebook,
  Twitter,
  Linkedin,
  Youtube,
  Tiktok,
}

impl Platform {
  pub const ALL: [Platform; 6] = [
    Platform::Instagram,
    Platform::Facebook,
    Platform::Twitter,
    Platform::Linkedin,
    Platform::Youtube,
    Platform::Tiktok,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Platform::Instagram => "instagram",
      Platform::Facebook => "facebook",
      Platform::Twitter => "twitter",
      Platform::Linkedin => "linkedin",
      Platform::Youtube => "youtube",
      Platform::Tiktok => "tiktok",
    }
  }

  pub fn parse(value: &str) -> Option<Platform> {
    match value.trim().to_ascii_lowercase().as_str() {
      "instagram" => Some(Platform::Instagram),
      "facebook" => Some(Platform::Facebook),
      "twitter" | "x" => Some(Platform::Twitter),
      "linkedin" => Some(Platform::Linkedin),
      "youtube" => Some(Platform::Youtube),
      "tiktok" => Some(Platform::Tiktok),
      _ => None,
    }
  }

  /// Hard character limit enforced when generating content for the platform.
  pub fn character_limit(&self) -> usize {
    match self {
      Platform::Instagram => 2200,
      Platform::Facebook => 63_206,
      Platform::Twitter => 280,
      Platform::Linkedin => 3000,
      Platform::Youtube => 5000,
      Platform::Tiktok => 2200,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
  Text,
  Image,
  Video,
  Carousel,
  Story,
  Reel,
}

impl ContentType {
  pub fn as_str(&self) -> &'static str {
    match self {
      ContentType::Text => "text",
      ContentType::Image => "image",
      ContentType::Video => "video",
      ContentType::Carousel => "carousel",
      ContentType::Story => "story",
      ContentType::Reel => "reel",
    }
  }

  pub fn parse(value: &str) -> Option<ContentType> {
    match value.trim().to_ascii_lowercase().as_str() {
      "text" => Some(ContentType::Text),
      "image" => Some(ContentType::Image),
      "video" => Some(ContentType::Video),
      "carousel" => Some(ContentType::Carousel),
      "story" => Some(ContentType::Story),
      "reel" => Some(ContentType::Reel),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantType {
  Content,
  Hook,
  Cta,
  Hashtags,
  Tone,
  Length,
  Emoji,
}

impl VariantType {
  pub fn as_str(&self) -> &'static str {
    match self {
      VariantType::Content => "content",
      VariantType::Hook => "hook",
      VariantType::Cta => "cta",
      VariantType::Hashtags => "hashtags",
      VariantType::Tone => "tone",
      VariantType::Length => "length",
      VariantType::Emoji => "emoji",
    }
  }

  pub fn parse(value: &str) -> Option<VariantType> {
    match value.trim().to_ascii_lowercase().as_str() {
      "content" => Some(VariantType::Content),
      "hook" => Some(VariantType::Hook),
      "cta" => Some(VariantType::Cta),
      "hashtags" => Some(VariantType::Hashtags),
      "tone" => Some(VariantType::Tone),
      "length" => Some(VariantType::Length),
      "emoji" => Some(VariantType::Emoji),
      _ => None,
    }
  }
}

/// Raw interaction counts for one published post. Mutable fields of a
/// record: later metric syncs replace these and the derived rates are
/// recomputed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMetrics {
  pub impressions: i64,
  pub reach: i64,
  pub likes: i64,
  pub comments: i64,
  pub shares: i64,
  pub saves: i64,
  pub clicks: i64,
}

impl PostMetrics {
  /// (likes + comments + shares + saves) / reach * 100. Zero when reach
  /// is zero so reducers never divide by a zero count.
  pub fn engagement_rate(&self) -> f64 {
    if self.reach <= 0 {
      return 0.0;
    }
    let interactions = (self.likes + self.comments + self.shares + self.saves) as f64;
    interactions / (self.reach as f64) * 100.0
  }

  /// shares / reach * 100, the narrower spread metric.
  pub fn virality_score(&self) -> f64 {
    if self.reach <= 0 {
      return 0.0;
    }
    (self.shares as f64) / (self.reach as f64) * 100.0
  }
}

/// One published post's outcome, read as a snapshot from storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceRecord {
  pub platform: Platform,
  pub content_type: ContentType,
  pub content: String,
  pub hashtags: Vec<String>,
  pub posted_at: DateTime<Utc>,
  pub metrics: PostMetrics,
  pub engagement_rate: f64,
  pub virality_score: f64,
  pub was_ai_generated: bool,
  pub user_approved: bool,
}

impl PerformanceRecord {
  pub fn new(
    platform: Platform,
    content_type: ContentType,
    content: String,
    hashtags: Vec<String>,
    posted_at: DateTime<Utc>,
    metrics: PostMetrics,
    was_ai_generated: bool,
    user_approved: bool,
  ) -> Self {
    let engagement_rate = metrics.engagement_rate();
    let virality_score = metrics.virality_score();
    Self {
      platform,
      content_type,
      content,
      hashtags,
      posted_at,
      metrics,
      engagement_rate,
      virality_score,
      was_ai_generated,
      user_approved,
    }
  }

  /// Replace the mutable metric fields and recompute the derived rates.
  pub fn apply_metrics(&mut self, metrics: PostMetrics) {
    self.metrics = metrics;
    self.engagement_rate = metrics.engagement_rate();
    self.virality_score = metrics.virality_score();
  }
}

/// One day of aggregated engagement, used by the trend rules.
#[derive(Debug, Clone, Copy)]
pub struct DailyEngagementRow {
  pub dt: chrono::NaiveDate,
  pub avg_engagement_rate: f64,
  pub posts: i64,
}

pub fn round2(v: f64) -> f64 {
  (v * 100.0).round() / 100.0
}

pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
  if value < min {
    min
  } else if value > max {
    max
  } else {
    value
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn engagement_rate_counts_all_interactions_against_reach() {
    let metrics = PostMetrics {
      impressions: 2000,
      reach: 1000,
      likes: 30,
      comments: 10,
      shares: 5,
      saves: 5,
      clicks: 40,
    };
    assert!((metrics.engagement_rate() - 5.0).abs() < 1e-9);
    assert!((metrics.virality_score() - 0.5).abs() < 1e-9);
  }

  #[test]
  fn zero_reach_yields_zero_rates() {
    let metrics = PostMetrics::default();
    assert_eq!(metrics.engagement_rate(), 0.0);
    assert_eq!(metrics.virality_score(), 0.0);
  }

  #[test]
  fn apply_metrics_recomputes_derived_rates() {
    let mut record = PerformanceRecord::new(
      Platform::Instagram,
      ContentType::Image,
      "hello".to_string(),
      vec![],
      Utc::now(),
      PostMetrics::default(),
      false,
      true,
    );
    assert_eq!(record.engagement_rate, 0.0);

    record.apply_metrics(PostMetrics {
      impressions: 100,
      reach: 100,
      likes: 4,
      comments: 0,
      shares: 0,
      saves: 0,
      clicks: 0,
    });
    assert!((record.engagement_rate - 4.0).abs() < 1e-9);
  }

  #[test]
  fn platform_parse_accepts_aliases() {
    assert_eq!(Platform::parse("X"), Some(Platform::Twitter));
    assert_eq!(Platform::parse(" instagram "), Some(Platform::Instagram));
    assert_eq!(Platform::parse("myspace"), None);
  }
}
