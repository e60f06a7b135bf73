use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use serde::Deserialize;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use pulsepost_rust::ab_testing::{
  evaluate_ab_test, simulate_metrics, VariantMetrics, CONTROL_ID, DEFAULT_CONFIDENCE_THRESHOLD,
};

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

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateRequest {
  #[serde(default)]
  variants: Vec<VariantMetrics>,
  #[serde(default)]
  variant_ids: Vec<String>,
  #[serde(default)]
  control_id: Option<String>,
  #[serde(default)]
  confidence_threshold: Option<f64>,
}

async fn handle_evaluate(
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

  let Ok(parsed) = serde_json::from_slice::<EvaluateRequest>(body) else {
    return json_response(
      StatusCode::BAD_REQUEST,
      serde_json::json!({"ok": false, "error": "bad_request", "message": "invalid json body"}),
    );
  };

  let simulated = parsed.variants.is_empty();
  let metrics = if simulated {
    if parsed.variant_ids.len() < 2 {
      return json_response(
        StatusCode::BAD_REQUEST,
        serde_json::json!({"ok": false, "error": "bad_request", "message": "provide variants metrics or at least two variantIds"}),
      );
    }
    simulate_metrics(&parsed.variant_ids)
  } else {
    parsed.variants
  };

  let control_id = parsed.control_id.as_deref().unwrap_or(CONTROL_ID);
  let threshold = parsed
    .confidence_threshold
    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD)
    .clamp(0.5, 0.999);

  let Some(result) = evaluate_ab_test(&metrics, control_id, threshold) else {
    return json_response(
      StatusCode::BAD_REQUEST,
      serde_json::json!({"ok": false, "error": "bad_request", "message": format!("control variant '{control_id}' not found")}),
    );
  };

  json_response(
    StatusCode::OK,
    serde_json::json!({
      "ok": true,
      "simulated": simulated,
      "result": result,
    }),
  )
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_evaluate(&method, &headers, &bytes).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  run(service_fn(handler)).await
}

#[cfg(test)]
mod tests {
  use super::*;

  fn auth_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer secret".parse().unwrap());
    headers
  }

  #[tokio::test]
  async fn returns_unauthorized_when_missing_internal_token() {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");

    let headers = HeaderMap::new();
    let response = handle_evaluate(&Method::POST, &headers, b"{}").await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn simulates_metrics_from_variant_ids() {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");

    let body = br#"{"variantIds":["control","variant-a","variant-b"]}"#;
    let response = handle_evaluate(&Method::POST, &auth_headers(), body).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
  }

  #[tokio::test]
  async fn rejects_missing_control() {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");

    let body = br#"{"variantIds":["variant-a","variant-b"]}"#;
    let response = handle_evaluate(&Method::POST, &auth_headers(), body).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  }
}
