use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use serde::Deserialize;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use pulsepost_rust::db::{get_pool, upsert_performance_record};
use pulsepost_rust::types::{ContentType, Platform, PerformanceRecord, PostMetrics};

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
struct PerformanceRequest {
  user_id: String,
  post_id: String,
  platform: String,
  #[serde(default)]
  content_type: Option<String>,
  content: String,
  #[serde(default)]
  hashtags: Vec<String>,
  posted_at: DateTime<Utc>,
  #[serde(default)]
  metrics: PostMetrics,
  #[serde(default)]
  was_ai_generated: bool,
  #[serde(default)]
  user_approved: bool,
}

async fn handle_performance(
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

  if !has_tidb_url() {
    return json_response(
      StatusCode::NOT_IMPLEMENTED,
      serde_json::json!({"ok": false, "error": "not_configured", "message": "Missing TIDB_DATABASE_URL (or DATABASE_URL)"}),
    );
  }

  let Ok(parsed) = serde_json::from_slice::<PerformanceRequest>(body) else {
    return json_response(
      StatusCode::BAD_REQUEST,
      serde_json::json!({"ok": false, "error": "bad_request", "message": "invalid json body"}),
    );
  };

  if parsed.user_id.trim().is_empty() || parsed.post_id.trim().is_empty() {
    return json_response(
      StatusCode::BAD_REQUEST,
      serde_json::json!({"ok": false, "error": "bad_request", "message": "userId and postId are required"}),
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

  let record = PerformanceRecord::new(
    platform,
    content_type,
    parsed.content,
    parsed.hashtags,
    parsed.posted_at,
    parsed.metrics,
    parsed.was_ai_generated,
    parsed.user_approved,
  );

  let pool = get_pool().await?;
  upsert_performance_record(pool, parsed.user_id.trim(), parsed.post_id.trim(), &record).await?;

  json_response(
    StatusCode::OK,
    serde_json::json!({
      "ok": true,
      "postId": parsed.post_id.trim(),
      "engagementRate": record.engagement_rate,
      "viralityScore": record.virality_score,
    }),
  )
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_performance(&method, &headers, &bytes).await
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
    let response = handle_performance(&Method::POST, &headers, b"{}").await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn rejects_missing_post_id() {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");
    std::env::set_var("TIDB_DATABASE_URL", "mysql://test");

    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer secret".parse().unwrap());
    let body = br#"{"userId":"u1","postId":"","platform":"instagram","content":"hello","postedAt":"2026-03-02T09:00:00Z"}"#;
    let response = handle_performance(&Method::POST, &headers, body).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  }
}
