use serde::{Deserialize, Serialize};

use crate::types::{round2, Platform, PostMetrics, VariantType};
use crate::viral_score::{fallback_score, ScoreDimension, ViralScoreResult};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.95;
pub const CONTROL_ID: &str = "control";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostVariant {
  pub id: String,
  pub name: String,
  pub content: String,
  pub variant_type: VariantType,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub viral_score: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantMetrics {
  pub variant_id: String,
  #[serde(flatten)]
  pub metrics: PostMetrics,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceInterval {
  pub lower: f64,
  pub upper: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantResult {
  pub variant_id: String,
  pub metrics: PostMetrics,
  pub engagement_rate: f64,
  pub click_through_rate: f64,
  pub is_winner: bool,
  pub improvement_over_control: f64,
  pub confidence_interval: ConfidenceInterval,
  pub is_significant: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ABTestResult {
  pub variants: Vec<VariantResult>,
  pub winner_id: Option<String>,
  pub test_passed: bool,
  pub confidence_threshold: f64,
  pub recommendation: String,
  pub insights: Vec<String>,
}

/// In A/B evaluation rates are per impression: the test allocates
/// impressions, so that is the denominator both sides share.
fn engagement_per_impression(m: &PostMetrics) -> f64 {
  if m.impressions <= 0 {
    return 0.0;
  }
  ((m.likes + m.comments + m.shares + m.saves) as f64) / (m.impressions as f64)
}

fn click_through(m: &PostMetrics) -> f64 {
  if m.impressions <= 0 {
    return 0.0;
  }
  (m.clicks as f64) / (m.impressions as f64)
}

fn critical_z(confidence_threshold: f64) -> f64 {
  if confidence_threshold >= 0.99 {
    2.576
  } else if confidence_threshold >= 0.95 {
    1.96
  } else if confidence_threshold >= 0.90 {
    1.645
  } else {
    1.282
  }
}

/// Two-proportion z-test of a variant's engagement proportion against
/// the control's. This is the one place confidence is a real statistical
/// quantity rather than a heuristic trust score.
fn is_significant_vs_control(
  variant: &PostMetrics,
  control: &PostMetrics,
  confidence_threshold: f64,
) -> bool {
  let n1 = variant.impressions as f64;
  let n2 = control.impressions as f64;
  if n1 <= 0.0 || n2 <= 0.0 {
    return false;
  }

  let x1 = (variant.likes + variant.comments + variant.shares + variant.saves) as f64;
  let x2 = (control.likes + control.comments + control.shares + control.saves) as f64;
  let p1 = x1 / n1;
  let p2 = x2 / n2;
  let pooled = (x1 + x2) / (n1 + n2);
  let se = (pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2)).sqrt();
  if se <= 0.0 {
    return false;
  }

  let z = (p1 - p2).abs() / se;
  z >= critical_z(confidence_threshold)
}

fn interval_for(m: &PostMetrics, confidence_threshold: f64) -> ConfidenceInterval {
  let n = m.impressions as f64;
  let p = engagement_per_impression(m);
  if n <= 0.0 {
    return ConfidenceInterval {
      lower: 0.0,
      upper: 0.0,
    };
  }
  let half_width = critical_z(confidence_threshold) * (p * (1.0 - p) / n).sqrt();
  ConfidenceInterval {
    lower: round2(((p - half_width).max(0.0)) * 100.0),
    upper: round2(((p + half_width).min(1.0)) * 100.0),
  }
}

/// Evaluate a finished (or simulated) test. The winner is the variant
/// with the strictly highest engagement rate; when the top rate is
/// shared there is no winner. The test passes only when the winner
/// itself clears the significance bar against the control.
pub fn evaluate_ab_test(
  metrics: &[VariantMetrics],
  control_id: &str,
  confidence_threshold: f64,
) -> Option<ABTestResult> {
  let control = metrics.iter().find(|m| m.variant_id == control_id)?;
  let control_rate = engagement_per_impression(&control.metrics);

  let top_rate = metrics
    .iter()
    .map(|m| engagement_per_impression(&m.metrics))
    .fold(f64::NEG_INFINITY, f64::max);
  let mut leaders = metrics
    .iter()
    .filter(|m| engagement_per_impression(&m.metrics) >= top_rate);
  let winner_id = match (leaders.next(), leaders.next()) {
    (Some(sole_leader), None) => Some(sole_leader.variant_id.clone()),
    _ => None,
  };

  let mut variants = Vec::with_capacity(metrics.len());
  for m in metrics {
    let rate = engagement_per_impression(&m.metrics);
    let is_control = m.variant_id == control_id;

    let improvement_over_control = if is_control {
      0.0
    } else if control_rate > 0.0 {
      round2((rate / control_rate - 1.0) * 100.0)
    } else if rate > 0.0 {
      100.0
    } else {
      0.0
    };

    let is_significant = !is_control
      && is_significant_vs_control(&m.metrics, &control.metrics, confidence_threshold);

    variants.push(VariantResult {
      variant_id: m.variant_id.clone(),
      metrics: m.metrics,
      engagement_rate: round2(rate * 100.0),
      click_through_rate: round2(click_through(&m.metrics) * 100.0),
      is_winner: winner_id.as_deref() == Some(m.variant_id.as_str()),
      improvement_over_control,
      confidence_interval: interval_for(&m.metrics, confidence_threshold),
      is_significant,
    });
  }

  let winner = variants.iter().find(|v| v.is_winner);
  let test_passed = winner
    .map(|v| v.variant_id != control_id && v.is_significant)
    .unwrap_or(false);

  let mut insights = Vec::new();
  match winner {
    Some(w) if w.variant_id == control_id => {
      insights.push("The original content held its own against every variant.".to_string());
    }
    Some(w) => {
      insights.push(format!(
        "Variant {} leads at {:.2}% engagement ({:+.1}% vs control).",
        w.variant_id, w.engagement_rate, w.improvement_over_control
      ));
      if !w.is_significant {
        insights.push(
          "The lead is not statistically significant yet; more impressions needed.".to_string(),
        );
      }
    }
    None => {
      insights.push("Engagement rates are tied at the top; no variant stands out.".to_string());
    }
  }

  let recommendation = match winner {
    Some(w) if test_passed => format!(
      "Adopt variant {}: its lead clears the {:.0}% confidence bar.",
      w.variant_id,
      confidence_threshold * 100.0
    ),
    Some(w) if w.variant_id != control_id => format!(
      "Variant {} looks promising but keep the test running before adopting it.",
      w.variant_id
    ),
    Some(_) => "Keep the original; no variant beat it.".to_string(),
    None => "No clear winner yet; keep the test running.".to_string(),
  };

  Some(ABTestResult {
    variants,
    winner_id,
    test_passed,
    confidence_threshold,
    recommendation,
    insights,
  })
}

fn fnv1a(input: &str) -> u64 {
  let mut hash: u64 = 0xcbf29ce484222325;
  for b in input.bytes() {
    hash ^= b as u64;
    hash = hash.wrapping_mul(0x100000001b3);
  }
  hash
}

/// Deterministic simulated metrics for a not-yet-run test, seeded by the
/// variant id so repeated calls agree.
pub fn simulate_metrics(variant_ids: &[String]) -> Vec<VariantMetrics> {
  variant_ids
    .iter()
    .map(|id| {
      let hash = fnv1a(id);
      let impressions = 5000 + (hash % 5000) as i64;
      let engagement_bps = 200 + ((hash >> 8) % 400) as i64; // 2.00%-5.99%
      let interactions = impressions * engagement_bps / 10_000;
      let likes = interactions * 7 / 10;
      let comments = interactions * 15 / 100;
      let shares = interactions * 10 / 100;
      let saves = interactions - likes - comments - shares;
      let clicks = impressions * (50 + ((hash >> 16) % 100) as i64) / 10_000;

      VariantMetrics {
        variant_id: id.clone(),
        metrics: PostMetrics {
          impressions,
          reach: impressions * 8 / 10,
          likes,
          comments,
          shares,
          saves,
          clicks,
        },
      }
    })
    .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVariant {
  #[serde(default)]
  variant_type: String,
  #[serde(default)]
  name: Option<String>,
  #[serde(default)]
  content: String,
  #[serde(default)]
  description: Option<String>,
}

fn variant_name(variant_type: VariantType) -> String {
  match variant_type {
    VariantType::Content => "Rewritten angle",
    VariantType::Hook => "Stronger hook",
    VariantType::Cta => "Added call to action",
    VariantType::Hashtags => "Tuned hashtags",
    VariantType::Tone => "Shifted tone",
    VariantType::Length => "Adjusted length",
    VariantType::Emoji => "Emoji emphasis",
  }
  .to_string()
}

/// Local stand-in when the model gives nothing usable for a requested
/// type. Applies a small deterministic edit so the variant still differs
/// from the original.
pub fn placeholder_variant(original: &str, variant_type: VariantType) -> PostVariant {
  let content = match variant_type {
    VariantType::Hook => format!("Stop scrolling: {original}"),
    VariantType::Cta => format!("{original}\n\nTell us what you think in the comments."),
    VariantType::Hashtags => format!("{original}\n\n#trending #community"),
    VariantType::Tone => format!("Here's the honest version: {original}"),
    VariantType::Length => {
      let short: String = original.chars().take(120).collect();
      if short.len() < original.len() {
        format!("{short}…")
      } else {
        format!("{original} (expanded take coming soon)")
      }
    }
    VariantType::Emoji => format!("✨ {original} 🚀"),
    VariantType::Content => format!("A different angle: {original}"),
  };

  PostVariant {
    id: format!("variant-{}", variant_type.as_str()),
    name: variant_name(variant_type),
    content,
    variant_type,
    description: Some("Locally synthesized variant".to_string()),
    viral_score: None,
  }
}

/// Parse model-authored variants. Rules per variant: it must differ from
/// the original and respect the platform's character limit; anything
/// invalid or missing is replaced by a synthesized placeholder so a bad
/// model response never fails the whole batch.
pub fn parse_variants_response(
  raw: &str,
  original: &str,
  platform: Platform,
  requested: &[VariantType],
) -> Vec<PostVariant> {
  let stripped = crate::providers::openai::strip_code_fences(raw);
  let parsed: Vec<RawVariant> = serde_json::from_str(stripped).unwrap_or_default();

  requested
    .iter()
    .map(|vtype| {
      let candidate = parsed.iter().find(|rv| {
        VariantType::parse(&rv.variant_type) == Some(*vtype)
          && !rv.content.trim().is_empty()
          && rv.content.trim() != original.trim()
          && rv.content.chars().count() <= platform.character_limit()
      });

      match candidate {
        Some(rv) => PostVariant {
          id: format!("variant-{}", vtype.as_str()),
          name: rv.name.clone().unwrap_or_else(|| variant_name(*vtype)),
          content: rv.content.trim().to_string(),
          variant_type: *vtype,
          description: rv.description.clone(),
          viral_score: None,
        },
        None => placeholder_variant(original, *vtype),
      }
    })
    .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ABTestAnalysis {
  pub viral: ViralScoreResult,
  pub recommended_variant_types: Vec<VariantType>,
  pub rationale: Vec<String>,
}

fn variant_type_for_dimension(dimension: ScoreDimension) -> Option<VariantType> {
  match dimension {
    ScoreDimension::HookStrength => Some(VariantType::Hook),
    ScoreDimension::CallToAction => Some(VariantType::Cta),
    ScoreDimension::HashtagRelevance => Some(VariantType::Hashtags),
    ScoreDimension::LengthOptimization => Some(VariantType::Length),
    ScoreDimension::EmotionalResonance => Some(VariantType::Tone),
    ScoreDimension::Clarity => Some(VariantType::Content),
    ScoreDimension::TrendAlignment | ScoreDimension::PlatformFit => None,
  }
}

/// Score the draft locally and recommend which variant types are worth
/// testing, weakest dimensions first.
pub fn analyze_for_ab_test(content: &str, platform: Platform) -> ABTestAnalysis {
  let viral = fallback_score(content, platform, crate::types::ContentType::Text, &[]);

  let mut scored: Vec<(ScoreDimension, u32)> = crate::viral_score::DIMENSION_WEIGHTS
    .iter()
    .map(|(dim, _)| (*dim, viral.breakdown.get(*dim)))
    .collect();
  scored.sort_by_key(|(_, score)| *score);

  let mut recommended = Vec::new();
  let mut rationale = Vec::new();
  for (dim, score) in &scored {
    if *score >= 80 || recommended.len() >= 3 {
      continue;
    }
    if let Some(vtype) = variant_type_for_dimension(*dim) {
      if !recommended.contains(&vtype) {
        rationale.push(format!(
          "{} scored {} of 100; a {} variant targets it directly.",
          vtype.as_str(),
          score,
          vtype.as_str()
        ));
        recommended.push(vtype);
      }
    }
  }

  if recommended.is_empty() {
    recommended.push(VariantType::Content);
    rationale.push("Content already scores well; test a fresh angle anyway.".to_string());
  }

  ABTestAnalysis {
    viral,
    recommended_variant_types: recommended,
    rationale,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn metrics(id: &str, impressions: i64, likes: i64, clicks: i64) -> VariantMetrics {
    VariantMetrics {
      variant_id: id.to_string(),
      metrics: PostMetrics {
        impressions,
        reach: impressions,
        likes,
        comments: 0,
        shares: 0,
        saves: 0,
        clicks,
      },
    }
  }

  #[test]
  fn winner_is_strictly_highest_engagement_rate() {
    let rows = vec![
      metrics(CONTROL_ID, 10_000, 200, 100),
      metrics("variant-hook", 10_000, 450, 100),
      metrics("variant-cta", 10_000, 300, 100),
    ];

    let result = evaluate_ab_test(&rows, CONTROL_ID, DEFAULT_CONFIDENCE_THRESHOLD).unwrap();
    assert_eq!(result.winner_id.as_deref(), Some("variant-hook"));
    let winner = result.variants.iter().find(|v| v.is_winner).unwrap();
    assert_eq!(winner.variant_id, "variant-hook");
  }

  #[test]
  fn tied_top_rates_produce_no_winner() {
    // All-zero engagement everywhere, the degenerate full tie.
    let rows = vec![
      metrics(CONTROL_ID, 1000, 0, 0),
      metrics("variant-hook", 1000, 0, 0),
      metrics("variant-cta", 1000, 0, 0),
    ];
    let result = evaluate_ab_test(&rows, CONTROL_ID, DEFAULT_CONFIDENCE_THRESHOLD).unwrap();
    assert_eq!(result.winner_id, None);
    assert!(!result.test_passed);
    assert!(result.variants.iter().all(|v| !v.is_winner));
    assert!(result.recommendation.contains("No clear winner"));

    // Two variants sharing the top rate while a third trails.
    let rows = vec![
      metrics(CONTROL_ID, 1000, 20, 10),
      metrics("variant-hook", 1000, 40, 10),
      metrics("variant-cta", 1000, 40, 10),
    ];
    let result = evaluate_ab_test(&rows, CONTROL_ID, DEFAULT_CONFIDENCE_THRESHOLD).unwrap();
    assert_eq!(result.winner_id, None);
    assert!(!result.test_passed);
  }

  #[test]
  fn control_improvement_is_always_zero() {
    let rows = vec![
      metrics(CONTROL_ID, 10_000, 200, 100),
      metrics("variant-hook", 10_000, 400, 100),
    ];
    let result = evaluate_ab_test(&rows, CONTROL_ID, DEFAULT_CONFIDENCE_THRESHOLD).unwrap();
    let control = result
      .variants
      .iter()
      .find(|v| v.variant_id == CONTROL_ID)
      .unwrap();
    assert_eq!(control.improvement_over_control, 0.0);

    let variant = result
      .variants
      .iter()
      .find(|v| v.variant_id == "variant-hook")
      .unwrap();
    assert!((variant.improvement_over_control - 100.0).abs() < 1e-9);
  }

  #[test]
  fn large_lead_is_significant_and_passes_test() {
    let rows = vec![
      metrics(CONTROL_ID, 20_000, 400, 100),
      metrics("variant-hook", 20_000, 900, 100),
    ];
    let result = evaluate_ab_test(&rows, CONTROL_ID, DEFAULT_CONFIDENCE_THRESHOLD).unwrap();
    assert!(result.test_passed);
  }

  #[test]
  fn tiny_lead_is_not_significant() {
    let rows = vec![
      metrics(CONTROL_ID, 1000, 30, 10),
      metrics("variant-hook", 1000, 32, 10),
    ];
    let result = evaluate_ab_test(&rows, CONTROL_ID, DEFAULT_CONFIDENCE_THRESHOLD).unwrap();
    assert!(!result.test_passed);
    let winner = result.variants.iter().find(|v| v.is_winner).unwrap();
    assert!(!winner.is_significant);
  }

  #[test]
  fn missing_control_yields_no_result() {
    let rows = vec![metrics("variant-hook", 1000, 30, 10)];
    assert!(evaluate_ab_test(&rows, CONTROL_ID, DEFAULT_CONFIDENCE_THRESHOLD).is_none());
  }

  #[test]
  fn simulated_metrics_are_deterministic() {
    let ids = vec![CONTROL_ID.to_string(), "variant-hook".to_string()];
    let a = simulate_metrics(&ids);
    let b = simulate_metrics(&ids);
    for (x, y) in a.iter().zip(b.iter()) {
      assert_eq!(x.metrics.impressions, y.metrics.impressions);
      assert_eq!(x.metrics.likes, y.metrics.likes);
    }
    assert!(a.iter().all(|m| m.metrics.impressions > 0));
  }

  #[test]
  fn variant_parsing_synthesizes_placeholders_on_garbage() {
    let requested = [VariantType::Hook, VariantType::Cta];
    let variants =
      parse_variants_response("not json", "My original post", Platform::Twitter, &requested);
    assert_eq!(variants.len(), 2);
    assert_eq!(variants[0].variant_type, VariantType::Hook);
    assert_ne!(variants[0].content, "My original post");
    assert_eq!(variants[1].variant_type, VariantType::Cta);
  }

  #[test]
  fn variant_parsing_rejects_copies_and_overlong_content() {
    let over_limit = "x".repeat(300);
    let raw = format!(
      r#"[
        {{"variantType": "hook", "content": "My original post"}},
        {{"variantType": "cta", "content": "{over_limit}"}}
      ]"#
    );
    let requested = [VariantType::Hook, VariantType::Cta];
    let variants =
      parse_variants_response(&raw, "My original post", Platform::Twitter, &requested);
    // Both were invalid, both replaced by placeholders.
    assert!(variants[0].description.as_deref() == Some("Locally synthesized variant"));
    assert!(variants[1].description.as_deref() == Some("Locally synthesized variant"));
  }

  #[test]
  fn variant_parsing_accepts_valid_model_output() {
    let raw = r#"```json
    [{"variantType": "hook", "name": "Bold opener", "content": "STOP. Read this twice."}]
    ```"#;
    let variants =
      parse_variants_response(raw, "My original post", Platform::Twitter, &[VariantType::Hook]);
    assert_eq!(variants[0].name, "Bold opener");
    assert_eq!(variants[0].content, "STOP. Read this twice.");
  }

  #[test]
  fn ab_analysis_recommends_weak_dimensions() {
    // No hook, no CTA, no hashtags: those types should surface.
    let analysis = analyze_for_ab_test("a quiet lowercase note", Platform::Instagram);
    assert!(!analysis.recommended_variant_types.is_empty());
    assert!(analysis
      .recommended_variant_types
      .contains(&VariantType::Cta));
  }
}
