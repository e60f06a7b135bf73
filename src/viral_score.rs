use serde::{Deserialize, Serialize};

use crate::content_signals::{char_count, contains_cta, count_emoji, has_strong_hook};
use crate::prediction_engine::{default_reach, optimal_hashtag_range, optimal_length_range};
use crate::types::{clamp, ContentType, Platform};

/// Fallback results carry a fixed, deliberately lower confidence so
/// callers can tell a local estimate from a model-scored one.
pub const FALLBACK_CONFIDENCE: u32 = 60;

/// Weighted combination used by the local fallback. Must sum to 1.0.
pub const DIMENSION_WEIGHTS: [(ScoreDimension, f64); 8] = [
  (ScoreDimension::HookStrength, 0.20),
  (ScoreDimension::EmotionalResonance, 0.15),
  (ScoreDimension::Clarity, 0.10),
  (ScoreDimension::CallToAction, 0.15),
  (ScoreDimension::HashtagRelevance, 0.10),
  (ScoreDimension::LengthOptimization, 0.10),
  (ScoreDimension::TrendAlignment, 0.10),
  (ScoreDimension::PlatformFit, 0.10),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreDimension {
  HookStrength,
  EmotionalResonance,
  Clarity,
  CallToAction,
  HashtagRelevance,
  LengthOptimization,
  TrendAlignment,
  PlatformFit,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViralScoreBreakdown {
  pub hook_strength: u32,
  pub emotional_resonance: u32,
  pub clarity: u32,
  pub call_to_action: u32,
  pub hashtag_relevance: u32,
  pub length_optimization: u32,
  pub trend_alignment: u32,
  pub platform_fit: u32,
}

impl ViralScoreBreakdown {
  pub fn get(&self, dimension: ScoreDimension) -> u32 {
    match dimension {
      ScoreDimension::HookStrength => self.hook_strength,
      ScoreDimension::EmotionalResonance => self.emotional_resonance,
      ScoreDimension::Clarity => self.clarity,
      ScoreDimension::CallToAction => self.call_to_action,
      ScoreDimension::HashtagRelevance => self.hashtag_relevance,
      ScoreDimension::LengthOptimization => self.length_optimization,
      ScoreDimension::TrendAlignment => self.trend_alignment,
      ScoreDimension::PlatformFit => self.platform_fit,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementDisplay {
  pub likes: String,
  pub comments: String,
  pub shares: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViralScoreResult {
  pub overall_score: u32,
  pub confidence: u32,
  pub breakdown: ViralScoreBreakdown,
  pub suggestions: Vec<String>,
  pub predicted_engagement: EngagementDisplay,
}

/// Loose shape for whatever JSON the model returns; every field is
/// optional so a partially valid response still parses.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawModelScore {
  #[serde(default)]
  overall_score: Option<f64>,
  #[serde(default)]
  confidence: Option<f64>,
  #[serde(default)]
  breakdown: Option<RawBreakdown>,
  #[serde(default)]
  suggestions: Vec<String>,
  #[serde(default)]
  predicted_engagement: Option<RawEngagement>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBreakdown {
  #[serde(default)]
  hook_strength: Option<f64>,
  #[serde(default)]
  emotional_resonance: Option<f64>,
  #[serde(default)]
  clarity: Option<f64>,
  #[serde(default)]
  call_to_action: Option<f64>,
  #[serde(default)]
  hashtag_relevance: Option<f64>,
  #[serde(default)]
  length_optimization: Option<f64>,
  #[serde(default)]
  trend_alignment: Option<f64>,
  #[serde(default)]
  platform_fit: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEngagement {
  #[serde(default)]
  likes: Option<String>,
  #[serde(default)]
  comments: Option<String>,
  #[serde(default)]
  shares: Option<String>,
}

/// Never trust the model's bounds: clamp to [0,100] and round.
fn sanitize(value: Option<f64>, default: f64) -> u32 {
  let v = value.unwrap_or(default);
  let v = if v.is_finite() { v } else { default };
  clamp(v, 0.0, 100.0).round() as u32
}

pub fn format_compact(value: f64) -> String {
  let v = value.max(0.0);
  if v >= 1_000_000.0 {
    let m = v / 1_000_000.0;
    if (m - m.floor()).abs() < 0.05 {
      format!("{:.0}M", m)
    } else {
      format!("{:.1}M", m)
    }
  } else if v >= 1000.0 {
    let k = v / 1000.0;
    if (k - k.floor()).abs() < 0.05 {
      format!("{:.0}K", k)
    } else {
      format!("{:.1}K", k)
    }
  } else {
    format!("{:.0}", v)
  }
}

fn display_range(low: f64, high: f64) -> String {
  format!("{}-{}", format_compact(low), format_compact(high))
}

fn default_engagement_display(platform: Platform, overall_score: u32) -> EngagementDisplay {
  let reach = default_reach(platform) * (overall_score as f64) / 50.0;
  EngagementDisplay {
    likes: display_range(reach * 0.02, reach * 0.06),
    comments: display_range(reach * 0.002, reach * 0.008),
    shares: display_range(reach * 0.001, reach * 0.005),
  }
}

/// Parse a model response into a sanitized result. `Err` means the
/// caller should fall back to the local heuristics.
pub fn parse_model_response(
  raw: &str,
  platform: Platform,
) -> Result<ViralScoreResult, serde_json::Error> {
  let stripped = crate::providers::openai::strip_code_fences(raw);
  let parsed: RawModelScore = serde_json::from_str(stripped)?;

  let raw_breakdown = parsed.breakdown.unwrap_or_default();
  let breakdown = ViralScoreBreakdown {
    hook_strength: sanitize(raw_breakdown.hook_strength, 50.0),
    emotional_resonance: sanitize(raw_breakdown.emotional_resonance, 50.0),
    clarity: sanitize(raw_breakdown.clarity, 50.0),
    call_to_action: sanitize(raw_breakdown.call_to_action, 50.0),
    hashtag_relevance: sanitize(raw_breakdown.hashtag_relevance, 50.0),
    length_optimization: sanitize(raw_breakdown.length_optimization, 50.0),
    trend_alignment: sanitize(raw_breakdown.trend_alignment, 50.0),
    platform_fit: sanitize(raw_breakdown.platform_fit, 50.0),
  };

  let overall_score = sanitize(parsed.overall_score, 50.0);
  let confidence = sanitize(parsed.confidence, 70.0);

  let mut suggestions: Vec<String> = parsed
    .suggestions
    .into_iter()
    .filter(|s| !s.trim().is_empty())
    .take(4)
    .collect();
  if suggestions.is_empty() {
    suggestions = fallback_suggestions(&breakdown);
  }

  let predicted_engagement = match parsed.predicted_engagement {
    Some(raw) => {
      let defaults = default_engagement_display(platform, overall_score);
      EngagementDisplay {
        likes: raw.likes.unwrap_or(defaults.likes),
        comments: raw.comments.unwrap_or(defaults.comments),
        shares: raw.shares.unwrap_or(defaults.shares),
      }
    }
    None => default_engagement_display(platform, overall_score),
  };

  Ok(ViralScoreResult {
    overall_score,
    confidence,
    breakdown,
    suggestions,
    predicted_engagement,
  })
}

fn suggestion_for(dimension: ScoreDimension) -> &'static str {
  match dimension {
    ScoreDimension::HookStrength => "Open with a stronger hook: a bold claim, question, or emoji.",
    ScoreDimension::EmotionalResonance => "Add an emotional angle readers can relate to.",
    ScoreDimension::Clarity => "Shorten sentences; one idea per line reads faster.",
    ScoreDimension::CallToAction => "Close with a clear call to action (comment, share, save).",
    ScoreDimension::HashtagRelevance => "Adjust hashtag count toward the platform's sweet spot.",
    ScoreDimension::LengthOptimization => "Rework the length toward the platform's optimal range.",
    ScoreDimension::TrendAlignment => "Tie the post to a current topic or format.",
    ScoreDimension::PlatformFit => "Adapt the format to how this platform surfaces content.",
  }
}

/// 2-4 suggestions, weakest dimensions first.
fn fallback_suggestions(breakdown: &ViralScoreBreakdown) -> Vec<String> {
  let mut ranked: Vec<(ScoreDimension, u32)> = DIMENSION_WEIGHTS
    .iter()
    .map(|(dim, _)| (*dim, breakdown.get(*dim)))
    .collect();
  ranked.sort_by_key(|(_, score)| *score);

  let mut out: Vec<String> = ranked
    .iter()
    .filter(|(_, score)| *score < 75)
    .take(4)
    .map(|(dim, _)| suggestion_for(*dim).to_string())
    .collect();
  while out.len() < 2 {
    let (dim, _) = ranked[out.len()];
    let text = suggestion_for(dim).to_string();
    if !out.contains(&text) {
      out.push(text);
    } else {
      break;
    }
  }
  out
}

/// Deterministic local scorer used whenever the model path fails. Knows
/// nothing about the model path beyond sharing the result type.
pub fn fallback_score(
  content: &str,
  platform: Platform,
  _content_type: ContentType,
  hashtags: &[String],
) -> ViralScoreResult {
  let (min_len, max_len) = optimal_length_range(platform);
  let chars = char_count(content);
  let length_optimization = if chars >= min_len && chars <= max_len {
    95
  } else if chars < min_len {
    70
  } else {
    40
  };

  let (min_tags, max_tags) = optimal_hashtag_range(platform);
  let tag_count = hashtags.len();
  let hashtag_relevance = if tag_count == 0 {
    50
  } else if tag_count >= min_tags && tag_count <= max_tags {
    90
  } else if tag_count < min_tags {
    70
  } else {
    40
  };

  let hook_strength = if has_strong_hook(content) { 75 } else { 55 };
  let call_to_action = if contains_cta(content) { 80 } else { 50 };

  let emotional_resonance = if count_emoji(content) > 0 || content.contains('!') {
    70
  } else {
    55
  };

  let words = content.split_whitespace().count();
  let sentences = content
    .split(['.', '!', '?', '\n'])
    .filter(|s| !s.trim().is_empty())
    .count()
    .max(1);
  let clarity = if words == 0 || words / sentences <= 20 {
    75
  } else {
    55
  };

  let trend_alignment = 60;

  let breakdown = ViralScoreBreakdown {
    hook_strength,
    emotional_resonance,
    clarity,
    call_to_action,
    hashtag_relevance,
    length_optimization,
    trend_alignment,
    platform_fit: ((length_optimization + hashtag_relevance) as f64 / 2.0).round() as u32,
  };

  let overall: f64 = DIMENSION_WEIGHTS
    .iter()
    .map(|(dim, weight)| (breakdown.get(*dim) as f64) * weight)
    .sum();
  let overall_score = clamp(overall, 0.0, 100.0).round() as u32;

  ViralScoreResult {
    overall_score,
    confidence: FALLBACK_CONFIDENCE,
    suggestions: fallback_suggestions(&breakdown),
    predicted_engagement: default_engagement_display(platform, overall_score),
    breakdown,
  }
}

/// The two-tier contract: try the model output first, degrade to local
/// heuristics on any failure. This function must always return a score.
pub fn score_from_model_outcome(
  model_outcome: Result<String, vercel_runtime::Error>,
  content: &str,
  platform: Platform,
  content_type: ContentType,
  hashtags: &[String],
) -> ViralScoreResult {
  match model_outcome {
    Ok(raw) => match parse_model_response(&raw, platform) {
      Ok(result) => result,
      Err(_) => fallback_score(content, platform, content_type, hashtags),
    },
    Err(_) => fallback_score(content, platform, content_type, hashtags),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dimension_weights_sum_to_one() {
    let sum: f64 = DIMENSION_WEIGHTS.iter().map(|(_, w)| w).sum();
    assert!((sum - 1.0).abs() < 1e-9);
  }

  #[test]
  fn fallback_confidence_is_exactly_sixty() {
    let result = fallback_score("Hello there", Platform::Twitter, ContentType::Text, &[]);
    assert_eq!(result.confidence, FALLBACK_CONFIDENCE);
  }

  #[test]
  fn fallback_breakdown_stays_in_bounds() {
    let tags: Vec<String> = (0..40).map(|i| format!("t{i}")).collect();
    let result = fallback_score("x", Platform::Tiktok, ContentType::Video, &tags);
    for (dim, _) in DIMENSION_WEIGHTS {
      let v = result.breakdown.get(dim);
      assert!(v <= 100, "{v} out of range");
    }
    assert!(result.overall_score <= 100);
    assert!(result.suggestions.len() >= 2 && result.suggestions.len() <= 4);
  }

  #[test]
  fn model_failure_falls_back_deterministically() {
    let err: Result<String, vercel_runtime::Error> =
      Err(Box::new(std::io::Error::other("timeout")));
    let result = score_from_model_outcome(
      err,
      "Big launch today! Tag a friend 🚀",
      Platform::Instagram,
      ContentType::Image,
      &["#launch".to_string()],
    );
    assert_eq!(result.confidence, FALLBACK_CONFIDENCE);
    assert_eq!(result.breakdown.hook_strength, 75);
    assert_eq!(result.breakdown.call_to_action, 80);
  }

  #[test]
  fn unparseable_model_output_falls_back() {
    let result = score_from_model_outcome(
      Ok("I am not JSON at all".to_string()),
      "plain post",
      Platform::Twitter,
      ContentType::Text,
      &[],
    );
    assert_eq!(result.confidence, FALLBACK_CONFIDENCE);
  }

  #[test]
  fn model_response_is_clamped_and_rounded() {
    let raw = r#"```json
    {
      "overallScore": 250.7,
      "confidence": -12,
      "breakdown": {
        "hookStrength": 101,
        "emotionalResonance": 88.4,
        "clarity": -3,
        "callToAction": 70,
        "hashtagRelevance": 64,
        "lengthOptimization": 59,
        "trendAlignment": 66,
        "platformFit": 72
      },
      "suggestions": ["Do the thing", "Do the other thing"]
    }
    ```"#;

    let result = parse_model_response(raw, Platform::Instagram).unwrap();
    assert_eq!(result.overall_score, 100);
    assert_eq!(result.confidence, 0);
    assert_eq!(result.breakdown.hook_strength, 100);
    assert_eq!(result.breakdown.emotional_resonance, 88);
    assert_eq!(result.breakdown.clarity, 0);
    assert_eq!(result.suggestions.len(), 2);
  }

  #[test]
  fn compact_formatting_matches_display_convention() {
    assert_eq!(format_compact(500.0), "500");
    assert_eq!(format_compact(1500.0), "1.5K");
    assert_eq!(format_compact(2000.0), "2K");
    assert_eq!(format_compact(1_200_000.0), "1.2M");
  }
}
