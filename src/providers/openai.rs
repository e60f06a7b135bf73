use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
  ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
  ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessageArgs,
  ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest,
  CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use std::time::Duration;
use vercel_runtime::Error;

use crate::types::{ContentType, Platform, VariantType};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const COMPLETION_TIMEOUT: Duration = Duration::from_secs(20);

/// USD per 1M tokens, the unit provider price sheets quote in.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
  pub prompt_usd_per_m: f64,
  pub completion_usd_per_m: f64,
}

impl ModelPricing {
  /// Cost of one completion call, for the usage event a handler records
  /// after responding.
  pub fn cost_usd(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
    (prompt_tokens as f64 * self.prompt_usd_per_m
      + completion_tokens as f64 * self.completion_usd_per_m)
      / 1_000_000.0
  }
}

fn pricing_override() -> Option<ModelPricing> {
  let prompt = std::env::var("OPENAI_PRICE_PROMPT_USD_PER_M_TOKEN").ok()?;
  let completion = std::env::var("OPENAI_PRICE_COMPLETION_USD_PER_M_TOKEN").ok()?;
  Some(ModelPricing {
    prompt_usd_per_m: prompt.parse().ok()?,
    completion_usd_per_m: completion.parse().ok()?,
  })
}

/// Env override wins over the built-in table so a price change never
/// requires a deploy. Unknown models get no pricing and cost 0.
pub fn pricing_for_model(model: &str) -> Option<ModelPricing> {
  if let Some(pricing) = pricing_override() {
    return Some(pricing);
  }

  let (prompt_usd_per_m, completion_usd_per_m) = match model {
    "gpt-4o-mini" => (0.15, 0.60),
    "gpt-4o" => (5.0, 15.0),
    _ => return None,
  };
  Some(ModelPricing {
    prompt_usd_per_m,
    completion_usd_per_m,
  })
}

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
  pub api_key: String,
  pub model: String,
}

impl OpenAiSettings {
  pub fn from_env_optional() -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok().unwrap_or_default();
    if api_key.trim().is_empty() {
      return None;
    }

    let model = std::env::var("OPENAI_MODEL")
      .ok()
      .filter(|v| !v.trim().is_empty())
      .unwrap_or_else(|| DEFAULT_MODEL.to_string());

    Some(Self {
      api_key: api_key.trim().to_string(),
      model: model.trim().to_string(),
    })
  }
}

/// Models wrap JSON in markdown fences often enough that every response
/// goes through this before parsing.
pub fn strip_code_fences(raw: &str) -> &str {
  let trimmed = raw.trim();
  let Some(rest) = trimmed.strip_prefix("```") else {
    return trimmed;
  };
  let rest = rest.strip_prefix("json").unwrap_or(rest);
  let rest = rest.strip_suffix("```").unwrap_or(rest);
  rest.trim()
}

fn system_message(text: &str) -> Result<ChatCompletionRequestMessage, Error> {
  let msg = ChatCompletionRequestSystemMessageArgs::default()
    .content(ChatCompletionRequestSystemMessageContent::Text(text.to_string()))
    .build()
    .map_err(|e| -> Error { Box::new(std::io::Error::other(e.to_string())) })?;
  Ok(ChatCompletionRequestMessage::System(msg))
}

fn user_message(text: String) -> Result<ChatCompletionRequestMessage, Error> {
  let msg = ChatCompletionRequestUserMessageArgs::default()
    .content(ChatCompletionRequestUserMessageContent::Text(text))
    .build()
    .map_err(|e| -> Error { Box::new(std::io::Error::other(e.to_string())) })?;
  Ok(ChatCompletionRequestMessage::User(msg))
}

pub struct ViralScoreMessageArgs<'a> {
  pub content: &'a str,
  pub platform: Platform,
  pub content_type: ContentType,
  pub hashtags: &'a [String],
  pub optimal_length: (usize, usize),
  pub optimal_hashtags: (usize, usize),
}

pub fn build_viral_score_messages(
  args: ViralScoreMessageArgs<'_>,
) -> Result<Vec<ChatCompletionRequestMessage>, Error> {
  let system = r#"You are a social media content scoring engine.
Return STRICT JSON only (no markdown, no commentary) with:
{"overallScore":0-100,"confidence":0-100,
 "breakdown":{"hookStrength":0-100,"emotionalResonance":0-100,"clarity":0-100,
  "callToAction":0-100,"hashtagRelevance":0-100,"lengthOptimization":0-100,
  "trendAlignment":0-100,"platformFit":0-100},
 "suggestions":["..."] (2-4 items, most impactful first),
 "predictedEngagement":{"likes":"500-1.5K","comments":"20-80","shares":"10-50"}}"#;

  let user = format!(
    "Platform: {}\nContent type: {}\nCharacter count: {} (optimal {}-{})\nHashtag count: {} (optimal {}-{})\n\nContent:\n{}",
    args.platform.as_str(),
    args.content_type.as_str(),
    args.content.chars().count(),
    args.optimal_length.0,
    args.optimal_length.1,
    args.hashtags.len(),
    args.optimal_hashtags.0,
    args.optimal_hashtags.1,
    args.content
  );

  Ok(vec![system_message(system)?, user_message(user)?])
}

pub struct VariantMessageArgs<'a> {
  pub content: &'a str,
  pub platform: Platform,
  pub variant_types: &'a [VariantType],
}

pub fn build_variant_messages(
  args: VariantMessageArgs<'_>,
) -> Result<Vec<ChatCompletionRequestMessage>, Error> {
  let system = r#"You are a social media A/B test variant writer.
Return STRICT JSON only: an array of objects
[{"variantType":"...","name":"...","content":"...","description":"..."}].
Each variant must differ meaningfully from the original and stay within
the platform's character limit. Produce exactly one variant per requested
type."#;

  let types: Vec<&str> = args.variant_types.iter().map(|t| t.as_str()).collect();
  let user = format!(
    "Platform: {} (character limit {})\nRequested variant types: {}\n\nOriginal content:\n{}",
    args.platform.as_str(),
    args.platform.character_limit(),
    types.join(", "),
    args.content
  );

  Ok(vec![system_message(system)?, user_message(user)?])
}

pub struct ChatCompletionsPayloadArgs<'a> {
  pub model: &'a str,
  pub messages: Vec<ChatCompletionRequestMessage>,
  pub max_tokens: u32,
  pub temperature: f32,
}

pub fn build_chat_completions_request(
  args: ChatCompletionsPayloadArgs<'_>,
) -> Result<CreateChatCompletionRequest, Error> {
  CreateChatCompletionRequestArgs::default()
    .model(args.model)
    .messages(args.messages)
    .temperature(args.temperature)
    .max_completion_tokens(args.max_tokens)
    .build()
    .map_err(|e| -> Error { Box::new(std::io::Error::other(e.to_string())) })
}

pub fn openai_client(api_key: &str) -> Client<OpenAIConfig> {
  let config = OpenAIConfig::new().with_api_key(api_key);
  Client::with_config(config)
}

#[derive(Debug, Clone)]
pub struct CompletionOutput {
  pub text: String,
  pub prompt_tokens: u32,
  pub completion_tokens: u32,
}

/// One bounded completion call. A timeout is treated the same as any
/// other provider failure so callers fall back locally.
pub async fn complete(
  client: &Client<OpenAIConfig>,
  request: CreateChatCompletionRequest,
  timeout: Duration,
) -> Result<CompletionOutput, Error> {
  let response = tokio::time::timeout(timeout, client.chat().create(request))
    .await
    .map_err(|_| -> Error { Box::new(std::io::Error::other("completion timed out")) })?
    .map_err(|e| -> Error { Box::new(std::io::Error::other(e.to_string())) })?;

  let text = response
    .choices
    .first()
    .and_then(|choice| choice.message.content.clone())
    .unwrap_or_default();
  if text.trim().is_empty() {
    return Err(Box::new(std::io::Error::other("empty completion")) as Error);
  }

  let (prompt_tokens, completion_tokens) = response
    .usage
    .map(|u| (u.prompt_tokens, u.completion_tokens))
    .unwrap_or((0, 0));

  Ok(CompletionOutput {
    text,
    prompt_tokens,
    completion_tokens,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pricing_for_gpt_4o_mini_is_available() {
    let pricing = pricing_for_model("gpt-4o-mini").expect("expected pricing");
    assert!(pricing.prompt_usd_per_m > 0.0);
    assert!(pricing.completion_usd_per_m > 0.0);
    assert!(pricing_for_model("made-up-model").is_none());
  }

  #[test]
  fn cost_is_charged_per_million_tokens() {
    let pricing = ModelPricing {
      prompt_usd_per_m: 10.0,
      completion_usd_per_m: 20.0,
    };
    // 100k prompt tokens at $10/M plus 50k completion tokens at $20/M.
    let cost = pricing.cost_usd(100_000, 50_000);
    assert!((cost - 2.0).abs() < 1e-9);
    assert_eq!(pricing.cost_usd(0, 0), 0.0);
  }

  #[test]
  fn strip_code_fences_handles_fenced_and_plain() {
    assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
    assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
    assert_eq!(strip_code_fences("```\n[1,2]\n```"), "[1,2]");
    assert_eq!(strip_code_fences("  {\"a\":1}  "), "{\"a\":1}");
  }

  #[test]
  fn viral_score_messages_carry_platform_metadata() {
    let messages = build_viral_score_messages(ViralScoreMessageArgs {
      content: "Launch day!",
      platform: Platform::Twitter,
      content_type: ContentType::Text,
      hashtags: &["#launch".to_string()],
      optimal_length: (71, 100),
      optimal_hashtags: (1, 2),
    })
    .unwrap();
    assert_eq!(messages.len(), 2);

    let json = serde_json::to_value(&messages[1]).unwrap();
    let text = json["content"].as_str().unwrap();
    assert!(text.contains("twitter"));
    assert!(text.contains("optimal 71-100"));
  }

  #[test]
  fn variant_request_builds_for_requested_types() {
    let messages = build_variant_messages(VariantMessageArgs {
      content: "Original",
      platform: Platform::Instagram,
      variant_types: &[VariantType::Hook, VariantType::Cta],
    })
    .unwrap();
    let req = build_chat_completions_request(ChatCompletionsPayloadArgs {
      model: DEFAULT_MODEL,
      messages,
      max_tokens: 800,
      temperature: 0.7,
    })
    .unwrap();

    let json = serde_json::to_value(req).unwrap();
    assert_eq!(json["model"].as_str(), Some(DEFAULT_MODEL));
    assert!(json["messages"][1]["content"]
      .as_str()
      .unwrap()
      .contains("hook, cta"));
  }
}
