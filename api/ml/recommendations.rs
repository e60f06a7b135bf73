use hyper::{HeaderMap, Method, StatusCode};
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use pulsepost_rust::db::get_pool;
use pulsepost_rust::recommendation_engine::generate_for_user;
use pulsepost_rust::types::Platform;

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

fn query_param(query: Option<&str>, key: &str) -> Option<String> {
  let query = query?;
  for pair in query.split('&') {
    let mut parts = pair.splitn(2, '=');
    if parts.next() == Some(key) {
      return parts.next().map(|v| v.replace('+', " "));
    }
  }
  None
}

async fn handle_recommendations(
  method: &Method,
  headers: &HeaderMap,
  query: Option<&str>,
) -> Result<Response<ResponseBody>, Error> {
  if method != Method::GET {
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

  let Some(user_id) = query_param(query, "user_id").filter(|v| !v.trim().is_empty()) else {
    return json_response(
      StatusCode::BAD_REQUEST,
      serde_json::json!({"ok": false, "error": "bad_request", "message": "user_id query param is required"}),
    );
  };

  let platform = match query_param(query, "platform").as_deref() {
    None | Some("") => None,
    Some(raw) => match Platform::parse(raw) {
      Some(p) => Some(p),
      None => {
        return json_response(
          StatusCode::BAD_REQUEST,
          serde_json::json!({"ok": false, "error": "bad_request", "message": format!("unknown platform: {raw}")}),
        );
      }
    },
  };

  let pool = get_pool().await?;
  let report = generate_for_user(pool, user_id.trim(), platform).await?;

  json_response(
    StatusCode::OK,
    serde_json::json!({
      "ok": true,
      "platform": platform.map(|p| p.as_str()),
      "recommendations": report.recommendations,
      "weeklyPlan": report.weekly_plan,
      "healthScore": report.health_score,
    }),
  )
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let query = req.uri().query().map(|q| q.to_string());
  handle_recommendations(&method, &headers, query.as_deref()).await
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
    let response = handle_recommendations(&Method::GET, &headers, Some("user_id=u1"))
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn requires_user_id_query_param() {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");
    std::env::set_var("TIDB_DATABASE_URL", "mysql://test");

    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer secret".parse().unwrap());
    let response = handle_recommendations(&Method::GET, &headers, None).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  }

  #[test]
  fn query_param_extracts_values() {
    assert_eq!(
      query_param(Some("user_id=u1&platform=twitter"), "platform").as_deref(),
      Some("twitter")
    );
    assert_eq!(query_param(Some("user_id=u1"), "platform"), None);
  }
}
