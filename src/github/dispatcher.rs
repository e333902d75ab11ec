//! Authenticated, retrying request dispatch shared by every GitHub API call.
//!
//! A call is described by a [`RequestSpec`]: method, path, credential type,
//! optional JSON body and a [`StatusPolicy`] that classifies every response
//! status as success, retryable failure or terminal failure. The dispatcher
//! walks the [`RetrySchedule`], sleeping between failed attempts, and decodes
//! the body of the first successful response.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::error::{AuthError, DispatchError, RemoteError};
use super::jwt::AppIdentity;
use super::pagination::{Page, Pagination};

pub const GITHUB_ACCEPT: &str = "application/vnd.github+json";
pub const GITHUB_API_VERSION: &str = "2022-11-28";

/// Default deadline for a single attempt, from connect until the body is read.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

const GENERIC_FAILURE: &str = "an error has occurred";

/// `<product>/<version> Rust/<version> (<os>; <arch>)`
pub fn user_agent() -> String {
    format!(
        "{}/{} Rust/{} ({}; {})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        option_env!("GITHUB_RUNNER_RUSTC_VERSION").unwrap_or("unknown"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Delays slept between failed attempts. One attempt is made per entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule(Vec<Duration>);

impl RetrySchedule {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self(delays)
    }

    /// Number of attempts this schedule allows (at least one).
    pub fn attempts(&self) -> usize {
        self.0.len().max(1)
    }

    /// Delay to sleep after the given zero-based attempt.
    pub fn delay_after(&self, attempt: usize) -> Duration {
        self.0.get(attempt).copied().unwrap_or_default()
    }
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self(
            [1, 3, 10, 37, 101]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
        )
    }
}

/// What a response status means for a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusOutcome {
    Success,
    /// Failure that is retried per the schedule.
    Retry(String),
    /// Failure that ends the call immediately.
    Fail(String),
}

/// Maps response statuses to outcomes, with an explicit fallback entry.
#[derive(Debug, Clone, Default)]
pub struct StatusPolicy {
    codes: HashMap<StatusCode, StatusOutcome>,
    fallback: Option<StatusOutcome>,
}

impl StatusPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn success(mut self, status: StatusCode) -> Self {
        self.codes.insert(status, StatusOutcome::Success);
        self
    }

    pub fn retry(mut self, status: StatusCode, message: impl Into<String>) -> Self {
        self.codes
            .insert(status, StatusOutcome::Retry(message.into()));
        self
    }

    pub fn fail(mut self, status: StatusCode, message: impl Into<String>) -> Self {
        self.codes.insert(status, StatusOutcome::Fail(message.into()));
        self
    }

    /// Retryable failure for every status without its own entry.
    pub fn otherwise(mut self, message: impl Into<String>) -> Self {
        self.fallback = Some(StatusOutcome::Retry(message.into()));
        self
    }

    /// Look up `status`, then the fallback, then a generic retryable failure.
    pub fn classify(&self, status: StatusCode) -> StatusOutcome {
        self.codes
            .get(&status)
            .or(self.fallback.as_ref())
            .cloned()
            .unwrap_or_else(|| StatusOutcome::Retry(GENERIC_FAILURE.to_string()))
    }
}

/// Which bearer credential a call is authorized with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credential {
    /// A freshly signed app assertion.
    App,
    /// The cached installation access token.
    Installation,
}

/// Supplies installation access tokens to the dispatcher.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn installation_token(&self) -> Result<String, AuthError>;
}

/// Description of one API call.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    method: Method,
    path: String,
    credential: Credential,
    body: Option<Vec<u8>>,
    policy: StatusPolicy,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            credential: Credential::App,
            body: None,
            policy: StatusPolicy::default(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn credential(mut self, credential: Credential) -> Self {
        self.credential = credential;
        self
    }

    /// JSON-encode `body` once; every attempt resends the same bytes.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, DispatchError> {
        self.body = Some(serde_json::to_vec(body).map_err(DispatchError::Encode)?);
        Ok(self)
    }

    pub fn policy(mut self, policy: StatusPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct PageQuery {
    page: u32,
    per_page: u32,
}

/// Executes [`RequestSpec`]s against the GitHub API.
///
/// Stateless per call and cheap to clone. Cancelling the token passed at
/// construction aborts in-flight attempts and pending backoff sleeps.
#[derive(Clone)]
pub struct Dispatcher {
    http: reqwest::Client,
    base_url: String,
    identity: AppIdentity,
    schedule: RetrySchedule,
    attempt_timeout: Duration,
    tokens: Option<Arc<dyn TokenSource>>,
    cancel: CancellationToken,
    user_agent: String,
}

impl Dispatcher {
    pub fn new(
        base_url: impl Into<String>,
        identity: AppIdentity,
        cancel: CancellationToken,
    ) -> Result<Self, DispatchError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(DispatchError::Transport)?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            identity,
            schedule: RetrySchedule::default(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            tokens: None,
            cancel,
            user_agent: user_agent(),
        })
    }

    pub fn with_retry_schedule(mut self, schedule: RetrySchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Source of installation tokens for [`Credential::Installation`] calls.
    pub fn with_token_source(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Run a single (non-paginated) call and decode its JSON response.
    pub async fn execute<T: DeserializeOwned>(&self, spec: &RequestSpec) -> Result<T, DispatchError> {
        let body = self.dispatch(spec, None).await?;
        decode(&body)
    }

    /// Fetch pages sequentially, folding each into one result.
    ///
    /// Every page goes through the full retry cycle. A page with fewer items
    /// than `per_page` is the last one.
    pub async fn execute_paginated<T>(
        &self,
        spec: &RequestSpec,
        pagination: &Pagination<T>,
    ) -> Result<T, DispatchError>
    where
        T: DeserializeOwned + Page,
    {
        let mut accumulator = T::default();
        let mut page = pagination.start_page;

        loop {
            let query = PageQuery {
                page,
                per_page: pagination.per_page,
            };
            let body = self.dispatch(spec, Some(query)).await?;
            let items: T = decode(&body)?;
            let count = items.item_count();
            debug!(path = %spec.path, page, count, "Fetched page");

            accumulator = match (pagination.reducer)(accumulator, items) {
                ControlFlow::Continue(acc) => acc,
                ControlFlow::Break(acc) => return Ok(acc),
            };

            if count < pagination.per_page as usize {
                return Ok(accumulator);
            }
            page += 1;
        }
    }

    async fn dispatch(
        &self,
        spec: &RequestSpec,
        page: Option<PageQuery>,
    ) -> Result<Vec<u8>, DispatchError> {
        let attempts = self.schedule.attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(DispatchError::Cancelled),
                result = self.attempt(spec, page) => result,
            };

            let error = match result {
                Ok((status, body)) => match spec.policy.classify(status) {
                    StatusOutcome::Success => return Ok(body),
                    StatusOutcome::Fail(message) => {
                        let err = status_error(status, message, &body);
                        error!(method = %spec.method, path = %spec.path, error = %err, "GitHub request failed");
                        return Err(err);
                    }
                    StatusOutcome::Retry(message) => status_error(status, message, &body),
                },
                Err(err) if err.is_transient() => err,
                Err(err) => return Err(err),
            };

            if attempt >= attempts {
                error!(
                    method = %spec.method,
                    path = %spec.path,
                    attempts,
                    error = %error,
                    "GitHub request failed, retries exhausted"
                );
                return Err(error);
            }

            let delay = self.schedule.delay_after(attempt - 1);
            warn!(
                method = %spec.method,
                path = %spec.path,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "GitHub request failed, retrying"
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(DispatchError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt(
        &self,
        spec: &RequestSpec,
        page: Option<PageQuery>,
    ) -> Result<(StatusCode, Vec<u8>), DispatchError> {
        let bearer = self.bearer(spec.credential).await?;

        let mut request = self
            .http
            .request(spec.method.clone(), self.url(&spec.path))
            .timeout(self.attempt_timeout)
            .header(ACCEPT, GITHUB_ACCEPT)
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
            .header(USER_AGENT, self.user_agent.as_str())
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("bearer {}", bearer));

        if let Some(page) = page {
            request = request.query(&[("page", page.page), ("per_page", page.per_page)]);
        }
        if let Some(body) = &spec.body {
            request = request.body(body.clone());
        }

        let timeout = self.attempt_timeout;
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(e, timeout))?;

        Ok((status, body.to_vec()))
    }

    async fn bearer(&self, credential: Credential) -> Result<String, DispatchError> {
        match credential {
            Credential::App => Ok(self.identity.sign(Utc::now())?.value),
            Credential::Installation => match &self.tokens {
                Some(tokens) => Ok(tokens.installation_token().await?),
                None => Err(AuthError::NoTokenSource.into()),
            },
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> DispatchError {
    if err.is_timeout() {
        DispatchError::Timeout(timeout)
    } else {
        DispatchError::Transport(err)
    }
}

fn status_error(status: StatusCode, message: String, body: &[u8]) -> DispatchError {
    DispatchError::Status {
        status,
        message,
        remote: serde_json::from_slice::<RemoteError>(body).ok(),
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, DispatchError> {
    serde_json::from_slice(body).map_err(DispatchError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Instant;
    use tokio_test::{assert_err, assert_ok};
    use wiremock::matchers::{body_json, header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PRIVATE_KEY: &str = include_str!("testdata/app-private-key.pem");

    struct StaticToken(&'static str);

    #[async_trait]
    impl TokenSource for StaticToken {
        async fn installation_token(&self) -> Result<String, AuthError> {
            Ok(self.0.to_string())
        }
    }

    fn fast_schedule(attempts: usize) -> RetrySchedule {
        RetrySchedule::new(vec![Duration::from_millis(1); attempts])
    }

    fn dispatcher_with(server: &MockServer, cancel: CancellationToken) -> Dispatcher {
        Dispatcher::new(server.uri(), AppIdentity::new("Iv1.test", PRIVATE_KEY), cancel)
            .unwrap()
            .with_retry_schedule(fast_schedule(3))
    }

    fn dispatcher(server: &MockServer) -> Dispatcher {
        dispatcher_with(server, CancellationToken::new())
    }

    async fn request_count(server: &MockServer) -> usize {
        server.received_requests().await.unwrap().len()
    }

    fn ok_policy() -> StatusPolicy {
        StatusPolicy::new()
            .success(StatusCode::OK)
            .otherwise("listing failed")
    }

    #[test]
    fn test_classify_prefers_exact_entry_then_fallback() {
        let policy = StatusPolicy::new()
            .success(StatusCode::CREATED)
            .fail(StatusCode::NOT_FOUND, "missing")
            .otherwise("token could not be fetched");

        assert_eq!(policy.classify(StatusCode::CREATED), StatusOutcome::Success);
        assert_eq!(
            policy.classify(StatusCode::NOT_FOUND),
            StatusOutcome::Fail("missing".to_string())
        );
        assert_eq!(
            policy.classify(StatusCode::OK),
            StatusOutcome::Retry("token could not be fetched".to_string())
        );
    }

    #[test]
    fn test_classify_without_fallback_is_generic_retry() {
        let policy = StatusPolicy::new().success(StatusCode::OK);
        assert_eq!(
            policy.classify(StatusCode::INTERNAL_SERVER_ERROR),
            StatusOutcome::Retry("an error has occurred".to_string())
        );
    }

    #[test]
    fn test_default_retry_schedule() {
        let schedule = RetrySchedule::default();
        assert_eq!(schedule.attempts(), 5);
        assert_eq!(schedule.delay_after(0), Duration::from_secs(1));
        assert_eq!(schedule.delay_after(4), Duration::from_secs(101));
        assert_eq!(RetrySchedule::new(Vec::new()).attempts(), 1);
    }

    #[test]
    fn test_user_agent_format() {
        let agent = user_agent();
        assert!(agent.starts_with("github-runner/0.1.0 Rust/"));
        // The compiler version, not the minimum supported one.
        if let Some(rustc) = option_env!("GITHUB_RUNNER_RUSTC_VERSION") {
            assert!(agent.contains(&format!("Rust/{} (", rustc)));
        }
        assert!(!agent.contains(&format!("Rust/{} (", env!("CARGO_PKG_RUST_VERSION"))));
        assert!(agent.contains(&format!(
            "({}; {})",
            std::env::consts::OS,
            std::env::consts::ARCH
        )));
    }

    #[tokio::test]
    async fn test_sends_github_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/app"))
            .and(header("accept", GITHUB_ACCEPT))
            .and(header("x-github-api-version", GITHUB_API_VERSION))
            .and(header("content-type", "application/json"))
            .and(header_exists("user-agent"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
            .mount(&server)
            .await;

        let spec = RequestSpec::get("/app").policy(ok_policy());
        let value: serde_json::Value = assert_ok!(dispatcher(&server).execute(&spec).await);
        assert_eq!(value["id"], 1);

        let requests = server.received_requests().await.unwrap();
        let authorization = requests[0].headers.get("authorization").unwrap();
        assert!(authorization.to_str().unwrap().starts_with("bearer ey"));
    }

    #[tokio::test]
    async fn test_fallback_failure_retries_whole_schedule() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/app/installations"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let spec = RequestSpec::get("/app/installations").policy(ok_policy());
        let err = assert_err!(dispatcher(&server).execute::<serde_json::Value>(&spec).await);

        match err {
            DispatchError::Status { status, message, .. } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(message, "listing failed");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(request_count(&server).await, 3);
    }

    #[tokio::test]
    async fn test_unlisted_status_without_fallback_uses_generic_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let spec = RequestSpec::get("/app").policy(StatusPolicy::new().success(StatusCode::OK));
        let err = assert_err!(dispatcher(&server).execute::<serde_json::Value>(&spec).await);

        assert!(err.to_string().starts_with("an error has occurred"));
        assert_eq!(request_count(&server).await, 3);
    }

    #[tokio::test]
    async fn test_fail_outcome_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "message": "Not Found",
                "documentation_url": "https://docs.github.com/rest"
            })))
            .mount(&server)
            .await;

        let spec = RequestSpec::get("/users/nobody/repos").policy(
            ok_policy().fail(StatusCode::NOT_FOUND, "user repositories could not be listed"),
        );
        let err = assert_err!(dispatcher(&server).execute::<serde_json::Value>(&spec).await);

        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert!(err.to_string().contains("github said: Not Found"));
        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 9})))
            .mount(&server)
            .await;

        let spec = RequestSpec::get("/app").policy(ok_policy());
        let value: serde_json::Value = assert_ok!(dispatcher(&server).execute(&spec).await);

        assert_eq!(value["id"], 9);
        assert_eq!(request_count(&server).await, 3);
    }

    #[tokio::test]
    async fn test_slow_attempts_time_out_and_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let dispatcher = dispatcher(&server).with_attempt_timeout(Duration::from_millis(100));
        let spec = RequestSpec::get("/app").policy(ok_policy());
        let err = assert_err!(dispatcher.execute::<serde_json::Value>(&spec).await);

        match err {
            DispatchError::Timeout(after) => assert_eq!(after, Duration::from_millis(100)),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(request_count(&server).await, 3);
    }

    #[tokio::test]
    async fn test_recovers_after_timed_out_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": 1}))
                    .set_delay(Duration::from_millis(500)),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 2})))
            .mount(&server)
            .await;

        let dispatcher = dispatcher(&server).with_attempt_timeout(Duration::from_millis(100));
        let spec = RequestSpec::get("/app").policy(ok_policy());
        let value: serde_json::Value = assert_ok!(dispatcher.execute(&spec).await);

        assert_eq!(value["id"], 2);
        assert_eq!(request_count(&server).await, 2);
    }

    #[tokio::test]
    async fn test_decode_failure_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let spec = RequestSpec::get("/app").policy(ok_policy());
        let err = assert_err!(dispatcher(&server).execute::<serde_json::Value>(&spec).await);

        assert!(matches!(err, DispatchError::Decode(_)));
        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_posts_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/app/installations/7/access_tokens"))
            .and(body_json(json!({"repositories": ["runner-images"]})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"token": "t"})))
            .mount(&server)
            .await;

        let spec = RequestSpec::post("/app/installations/7/access_tokens")
            .json(&json!({"repositories": ["runner-images"]}))
            .unwrap()
            .policy(StatusPolicy::new().success(StatusCode::CREATED));
        let value: serde_json::Value = assert_ok!(dispatcher(&server).execute(&spec).await);
        assert_eq!(value["token"], "t");
    }

    #[tokio::test]
    async fn test_paginates_until_short_page() {
        let server = MockServer::start().await;
        for (page, items) in [
            ("1", json!([1, 2, 3, 4, 5])),
            ("2", json!([6, 7, 8, 9, 10])),
            ("3", json!([11, 12])),
        ] {
            Mock::given(method("GET"))
                .and(path("/items"))
                .and(query_param("page", page))
                .and(query_param("per_page", "5"))
                .respond_with(ResponseTemplate::new(200).set_body_json(items))
                .mount(&server)
                .await;
        }

        let spec = RequestSpec::get("/items").policy(ok_policy());
        let items: Vec<u32> = assert_ok!(
            dispatcher(&server)
                .execute_paginated(&spec, &Pagination::new(5))
                .await
        );

        assert_eq!(items, (1..=12).collect::<Vec<_>>());
        assert_eq!(request_count(&server).await, 3);
    }

    #[tokio::test]
    async fn test_empty_page_ends_pagination() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([1, 2])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let spec = RequestSpec::get("/items").policy(ok_policy());
        let items: Vec<u32> = assert_ok!(
            dispatcher(&server)
                .execute_paginated(&spec, &Pagination::new(2))
                .await
        );

        assert_eq!(items, vec![1, 2]);
        assert_eq!(request_count(&server).await, 2);
    }

    #[tokio::test]
    async fn test_each_page_is_retried_independently() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([1, 2])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([3])))
            .mount(&server)
            .await;

        let spec = RequestSpec::get("/items").policy(ok_policy());
        let items: Vec<u32> = assert_ok!(
            dispatcher(&server)
                .execute_paginated(&spec, &Pagination::new(2))
                .await
        );

        assert_eq!(items, vec![1, 2, 3]);
        assert_eq!(request_count(&server).await, 3);
    }

    #[tokio::test]
    async fn test_installation_credential_uses_token_source() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "bearer ghs_static"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let dispatcher = dispatcher(&server).with_token_source(Arc::new(StaticToken("ghs_static")));
        let spec = RequestSpec::get("/repos/octo/hello/actions/runners")
            .credential(Credential::Installation)
            .policy(ok_policy());

        assert_ok!(dispatcher.execute::<serde_json::Value>(&spec).await);
    }

    #[tokio::test]
    async fn test_installation_credential_without_source_fails() {
        let server = MockServer::start().await;
        let spec = RequestSpec::get("/repos/octo/hello/actions/runners")
            .credential(Credential::Installation)
            .policy(ok_policy());

        let err = assert_err!(dispatcher(&server).execute::<serde_json::Value>(&spec).await);
        assert!(matches!(err, DispatchError::Auth(AuthError::NoTokenSource)));
        assert_eq!(request_count(&server).await, 0);
    }

    #[tokio::test]
    async fn test_unparsable_key_is_not_retried() {
        let server = MockServer::start().await;
        let dispatcher = Dispatcher::new(
            server.uri(),
            AppIdentity::new("Iv1.test", "not-a-key"),
            CancellationToken::new(),
        )
        .unwrap();

        let spec = RequestSpec::get("/app").policy(ok_policy());
        let err = assert_err!(dispatcher.execute::<serde_json::Value>(&spec).await);
        assert!(matches!(
            err,
            DispatchError::Auth(AuthError::KeyParseFailure(_))
        ));
        assert_eq!(request_count(&server).await, 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let server = MockServer::start().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let spec = RequestSpec::get("/app").policy(ok_policy());
        let err = assert_err!(
            dispatcher_with(&server, cancel)
                .execute::<serde_json::Value>(&spec)
                .await
        );
        assert!(matches!(err, DispatchError::Cancelled));
        assert_eq!(request_count(&server).await, 0);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_in_flight_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let dispatcher = dispatcher_with(&server, cancel.clone());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let started = Instant::now();
        let spec = RequestSpec::get("/app").policy(ok_policy());
        let err = assert_err!(dispatcher.execute::<serde_json::Value>(&spec).await);

        assert!(matches!(err, DispatchError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let dispatcher = dispatcher_with(&server, cancel.clone())
            .with_retry_schedule(RetrySchedule::new(vec![Duration::from_secs(30); 3]));
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });

        let started = Instant::now();
        let spec = RequestSpec::get("/app").policy(ok_policy());
        let err = assert_err!(dispatcher.execute::<serde_json::Value>(&spec).await);

        assert!(matches!(err, DispatchError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(request_count(&server).await, 1);
    }
}
