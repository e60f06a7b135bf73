use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use serde::Deserialize;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use pulsepost_rust::db::get_pool;
use pulsepost_rust::prediction_engine::predict_for_user;
use pulsepost_rust::types::{ContentType, Platform};

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
struct PredictRequest {
  user_id: String,
  platform: String,
  content: String,
  #[serde(default)]
  content_type: Option<String>,
  #[serde(default)]
  hashtags: Vec<String>,
  #[serde(default)]
  scheduled_at: Option<DateTime<Utc>>,
}

async fn handle_predict(
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

  let Ok(parsed) = serde_json::from_slice::<PredictRequest>(body) else {
    return json_response(
      StatusCode::BAD_REQUEST,
      serde_json::json!({"ok": false, "error": "bad_request", "message": "invalid json body"}),
    );
  };

  if parsed.user_id.trim().is_empty() || parsed.content.trim().is_empty() {
    return json_response(
      StatusCode::BAD_REQUEST,
      serde_json::json!({"ok": false, "error": "bad_request", "message": "userId and content are required"}),
    );
  }

  let Some(platform) = Platform::parse(&parsed.platform) else {
    return json_response(
      StatusCode::BAD_REQUEST,
      serde_json::json!({"ok": false, "error": "bad_request", "message": format!("unknown platform: {}", parsed.platform)}),
    );
  };

  let content_type = match parsed.content_type.as_deref() {
    None | Some("") => ContentType::Text,
    Some(raw) => match ContentType::parse(raw) {
      Some(ct) => ct,
      None => {
        return json_response(
          StatusCode::BAD_REQUEST,
          serde_json::json!({"ok": false, "error": "bad_request", "message": format!("unknown contentType: {raw}")}),
        );
      }
    },
  };

  let pool = get_pool().await?;
  let prediction = predict_for_user(
    pool,
    parsed.user_id.trim(),
    platform,
    &parsed.content,
    content_type,
    &parsed.hashtags,
    parsed.scheduled_at,
  )
  .await?;

  json_response(
    StatusCode::OK,
    serde_json::json!({
      "ok": true,
      "platform": platform.as_str(),
      "prediction": prediction,
    }),
  )
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_predict(&method, &headers, &bytes).await
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
    let response = handle_predict(&Method::POST, &headers, b"{}").await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn rejects_unknown_platform() {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");
    std::env::set_var("TIDB_DATABASE_URL", "mysql://test");

    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer secret".parse().unwrap());
    let body = br#"{"userId":"u1","platform":"myspace","content":"hello"}"#;
    let response = handle_predict(&Method::POST, &headers, body).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  }
}
