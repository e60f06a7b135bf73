use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use serde::Deserialize;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use pulsepost_rust::ab_testing::{analyze_for_ab_test, parse_variants_response};
use pulsepost_rust::db::{get_pool, insert_usage_event};
use pulsepost_rust::providers::openai::{
  build_chat_completions_request, build_variant_messages, complete, openai_client,
  pricing_for_model, ChatCompletionsPayloadArgs, OpenAiSettings, VariantMessageArgs,
  COMPLETION_TIMEOUT,
};
use pulsepost_rust::types::{Platform, VariantType};

fn bearer_token(header_value: Option<&str>) -> Option<&str> {
  let value = header_value?;
  value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))
}

fn json_response(status: StatusCode, value: serde_json::Value) -> Result<Response<ResponseBody>, Error> {
  Ok(
    Response::builder()
      .status(status)
      .header("content-type", "application/json; charset=utf-8")
      .body(ResponseBody::from(value))?,
  )
}

fn has_tidb_url() -> bool {
  std::env::var("TIDB_DATABASE_URL")
    .or_else(|_| std::env::var("DATABASE_URL"))
    .map(|v| !v.is_empty())
    .unwrap_or(false)
}

const DEFAULT_VARIANT_TYPES: [VariantType; 3] =
  [VariantType::Hook, VariantType::Cta, VariantType::Hashtags];

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VariantsRequest {
  #[serde(default)]
  user_id: Option<String>,
  content: String,
  platform: String,
  #[serde(default)]
  variant_types: Vec<String>,
  #[serde(default)]
  mode: Option<String>,
}

async fn handle_variants(
  method: &Method,
  headers: &HeaderMap,
  body: &[u8],
) -> Result<Response<ResponseBody>, Error> {
  if method != Method::POST {
    return json_response(
      StatusCode::METHOD_NOT_ALLOWED,
      serde_json::json!({"ok": false, "error": "method_not_allowed"}),
    );
  }

  let expected = std::env::var("RUST_INTERNAL_TOKEN").unwrap_or_default();
  let provided = bearer_token(headers.get("authorization").and_then(|v| v.to_str().ok())).unwrap_or("");
  if expected.is_empty() || provided != expected {
    return json_response(
      StatusCode::UNAUTHORIZED,
      serde_json::json!({"ok": false, "error": "unauthorized"}),
    );
  }

  let Ok(parsed) = serde_json::from_slice::<VariantsRequest>(body) else {
    return json_response(
      StatusCode::BAD_REQUEST,
      serde_json::json!({"ok": false, "error": "bad_request", "message": "invalid json body"}),
    );
  };

  if parsed.content.trim().is_empty() {
    return json_response(
      StatusCode::BAD_REQUEST,
      serde_json::json!({"ok": false, "error": "bad_request", "message": "content is required"}),
    );
  }

  let Some(platform) = Platform::parse(&parsed.platform) else {
    return json_response(
      StatusCode::BAD_REQUEST,
      serde_json::json!({"ok": false, "error": "bad_request", "message": format!("unknown platform: {}", parsed.platform)}),
    );
  };

  if parsed.mode.as_deref() == Some("analyze") {
    let analysis = analyze_for_ab_test(&parsed.content, platform);
    return json_response(
      StatusCode::OK,
      serde_json::json!({
        "ok": true,
        "platform": platform.as_str(),
        "viralScore": analysis.viral,
        "recommendedVariantTypes": analysis.recommended_variant_types,
        "rationale": analysis.rationale,
      }),
    );
  }

  let mut requested = Vec::new();
  for raw in &parsed.variant_types {
    let Some(vt) = VariantType::parse(raw) else {
      return json_response(
        StatusCode::BAD_REQUEST,
        serde_json::json!({"ok": false, "error": "bad_request", "message": format!("unknown variantType: {raw}")}),
      );
    };
    if !requested.contains(&vt) {
      requested.push(vt);
    }
  }
  if requested.is_empty() {
    requested.extend(DEFAULT_VARIANT_TYPES);
  }

  let settings = OpenAiSettings::from_env_optional();
  let mut usage: Option<(u32, u32)> = None;
  let raw_response = match &settings {
    Some(settings) => {
      let messages = build_variant_messages(VariantMessageArgs {
        content: &parsed.content,
        platform,
        variant_types: &requested,
      })?;
      let request = build_chat_completions_request(ChatCompletionsPayloadArgs {
        model: &settings.model,
        messages,
        max_tokens: 900,
        temperature: 0.7,
      })?;
      let client = openai_client(&settings.api_key);
      match complete(&client, request, COMPLETION_TIMEOUT).await {
        Ok(output) => {
          usage = Some((output.prompt_tokens, output.completion_tokens));
          output.text
        }
        Err(_) => String::new(),
      }
    }
    None => String::new(),
  };

  let variants = parse_variants_response(&raw_response, &parsed.content, platform, &requested);

  if let (Some(settings), Some((prompt_tokens, completion_tokens)), Some(user_id)) =
    (&settings, usage, parsed.user_id.as_deref().filter(|v| !v.trim().is_empty()))
  {
    if has_tidb_url() {
      if let Ok(pool) = get_pool().await {
        let cost_usd = pricing_for_model(&settings.model)
          .map(|pricing| pricing.cost_usd(prompt_tokens, completion_tokens))
          .unwrap_or(0.0);
        let _ = insert_usage_event(
          pool,
          user_id.trim(),
          "ab_variants",
          "openai",
          &settings.model,
          prompt_tokens,
          completion_tokens,
          cost_usd,
        )
        .await;
      }
    }
  }

  json_response(
    StatusCode::OK,
    serde_json::json!({
      "ok": true,
      "platform": platform.as_str(),
      "variants": variants,
    }),
  )
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_variants(&method, &headers, &bytes).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  run(service_fn(handler)).await
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn returns_unauthorized_when_missing_internal_token() {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");

    let headers = HeaderMap::new();
    let response = handle_variants(&Method::POST, &headers, b"{}").await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn analyze_mode_returns_recommended_variant_types() {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");

    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer secret".parse().unwrap());
    let body = br#"{"content":"plain update with no hook","platform":"instagram","mode":"analyze"}"#;
    let response = handle_variants(&Method::POST, &headers, body).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
  }

  #[tokio::test]
  async fn rejects_unknown_variant_type() {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");

    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer secret".parse().unwrap());
    let body = br#"{"content":"hello","platform":"twitter","variantTypes":["sparkle"]}"#;
    let response = handle_variants(&Method::POST, &headers, body).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  }
}
