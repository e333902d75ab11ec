use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::github::webhook::{verify_signature, SIGNATURE_256_HEADER, SIGNATURE_HEADER};
use crate::github::SignatureError;
use crate::AppState;

const EVENT_HEADER: &str = "X-GitHub-Event";
const DELIVERY_HEADER: &str = "X-GitHub-Delivery";

/// Pick the signature header, preferring `X-Hub-Signature-256`.
fn signature_header(headers: &HeaderMap) -> Result<&str, SignatureError> {
    let value = headers
        .get(SIGNATURE_256_HEADER)
        .or_else(|| headers.get(SIGNATURE_HEADER))
        .ok_or(SignatureError::Missing)?;
    value.to_str().map_err(|_| SignatureError::MalformedHeader)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

pub async fn github_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    // The raw bytes are the signed payload; verify before parsing.
    let signature = signature_header(&headers)?;
    verify_signature(&body, signature, &state.webhook_secret)?;
    tracing::debug!("GitHub webhook signature verified");

    let payload: Value = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!("Failed to parse GitHub webhook payload: {}", e);
        ApiError::bad_request(format!("invalid webhook payload: {}", e))
    })?;

    let action = payload
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or("none");

    tracing::info!(
        event = header_str(&headers, EVENT_HEADER),
        delivery = header_str(&headers, DELIVERY_HEADER),
        action,
        "GitHub webhook received"
    );

    Ok(Json(json!({ "status": "received" })))
}
