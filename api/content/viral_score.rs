use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use serde::Deserialize;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use pulsepost_rust::db::{get_pool, insert_usage_event};
use pulsepost_rust::prediction_engine::{optimal_hashtag_range, optimal_length_range};
use pulsepost_rust::providers::openai::{
  build_chat_completions_request, build_viral_score_messages, complete, openai_client,
  pricing_for_model, ChatCompletionsPayloadArgs, OpenAiSettings, ViralScoreMessageArgs,
  COMPLETION_TIMEOUT,
};
use pulsepost_rust::types::{ContentType, Platform};
use pulsepost_rust::viral_score::score_from_model_outcome;

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

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ViralScoreRequest {
  #[serde(default)]
  user_id: Option<String>,
  content: String,
  platform: String,
  #[serde(default)]
  content_type: Option<String>,
  #[serde(default)]
  hashtags: Vec<String>,
}

async fn handle_viral_score(
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

  let Ok(parsed) = serde_json::from_slice::<ViralScoreRequest>(body) else {
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

  let content_type = parsed
    .content_type
    .as_deref()
    .and_then(ContentType::parse)
    .unwrap_or(ContentType::Text);

  let settings = OpenAiSettings::from_env_optional();
  let mut usage: Option<(u32, u32)> = None;
  let model_outcome: Result<String, Error> = match &settings {
    Some(settings) => {
      let messages = build_viral_score_messages(ViralScoreMessageArgs {
        content: &parsed.content,
        platform,
        content_type,
        hashtags: &parsed.hashtags,
        optimal_length: optimal_length_range(platform),
        optimal_hashtags: optimal_hashtag_range(platform),
      })?;
      let request = build_chat_completions_request(ChatCompletionsPayloadArgs {
        model: &settings.model,
        messages,
        max_tokens: 600,
        temperature: 0.3,
      })?;
      let client = openai_client(&settings.api_key);
      match complete(&client, request, COMPLETION_TIMEOUT).await {
        Ok(output) => {
          usage = Some((output.prompt_tokens, output.completion_tokens));
          Ok(output.text)
        }
        Err(e) => Err(e),
      }
    }
    None => Err(Box::new(std::io::Error::other("openai not configured")) as Error),
  };

  let result = score_from_model_outcome(
    model_outcome,
    &parsed.content,
    platform,
    content_type,
    &parsed.hashtags,
  );

  // Usage accounting is best effort; a failed insert never fails the request.
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
          "viral_score",
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
      "score": result,
    }),
  )
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_viral_score(&method, &headers, &bytes).await
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
    let response = handle_viral_score(&Method::POST, &headers, b"{}").await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn scores_with_heuristics_when_openai_is_not_configured() {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");
    std::env::remove_var("OPENAI_API_KEY");

    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer secret".parse().unwrap());
    let body = br#"{"content":"Why do most launches flop? A thread.","platform":"twitter"}"#;
    let response = handle_viral_score(&Method::POST, &headers, body).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
  }
}
