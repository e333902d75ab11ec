//! Error types for GitHub App authentication, API dispatch and webhooks.

use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failure to produce an app assertion or an installation access token.
///
/// Never retried by the credential layer itself.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("failed to parse app private key: {0}")]
    KeyParseFailure(#[source] jsonwebtoken::errors::Error),

    #[error("failed to sign app assertion: {0}")]
    SigningFailure(#[source] jsonwebtoken::errors::Error),

    #[error("app {app_id} is not installed")]
    AppNotInstalled { app_id: i64 },

    /// Shared so every caller waiting on the same refresh gets the same failure.
    #[error("installation token could not be obtained: {0}")]
    Exchange(#[source] Arc<DispatchError>),

    #[error("no installation token source is configured")]
    NoTokenSource,
}

/// The error body GitHub returns alongside non-2xx responses.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RemoteError {
    pub message: String,
    #[serde(default)]
    pub documentation_url: Option<String>,
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.documentation_url {
            Some(url) => write!(f, "{} {}", self.message, url),
            None => write!(f, "{}", self.message),
        }
    }
}

fn github_said(remote: &Option<RemoteError>) -> String {
    remote
        .as_ref()
        .map(|r| format!(". github said: {}", r))
        .unwrap_or_default()
}

/// Failure of a dispatched API call.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The response status was classified as a failure by the call's status policy.
    #[error("{message} (status {status}){}", github_said(.remote))]
    Status {
        status: StatusCode,
        message: String,
        remote: Option<RemoteError>,
    },

    #[error("request to GitHub failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("request to GitHub timed out after {0:?}")]
    Timeout(Duration),

    /// A successful response carried a body that is not the expected JSON.
    #[error("failed to decode GitHub response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("request was cancelled")]
    Cancelled,

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl DispatchError {
    /// Whether another attempt may succeed (network failures and timeouts).
    pub fn is_transient(&self) -> bool {
        matches!(self, DispatchError::Transport(_) | DispatchError::Timeout(_))
    }

    /// The HTTP status behind a classified failure, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            DispatchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Webhook signature verification failure. Surfaced as 403, never retried.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing webhook signature header")]
    Missing,

    #[error("malformed webhook signature header")]
    MalformedHeader,

    #[error("webhook signature does not match")]
    Mismatch,
}
