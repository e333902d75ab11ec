//! GitHub API client for the app, installation and runner endpoints.
//!
//! Each operation is a thin typed caller: it names the endpoint, picks the
//! credential and declares how response statuses are classified. Everything
//! else (headers, retries, pagination) is handled by the [`Dispatcher`].

use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::dispatcher::{Credential, Dispatcher, RequestSpec, StatusPolicy};
use super::error::DispatchError;
use super::jwt::AppIdentity;
use super::pagination::Pagination;
use super::token_manager::{CredentialManager, InstallationApi};
use super::types::{
    AccessTokenRequest, AccessTokenResponse, AppInfo, Installation, RegistrationToken,
    Repository, RunnerList,
};
use crate::config::{ConfigError, GitHubConfig};

const INSTALLATIONS_PER_PAGE: u32 = 10;
const RUNNERS_PER_PAGE: u32 = 5;
const REPOSITORIES_PER_PAGE: u32 = 30;

/// Build the status policy shared by every operation.
///
/// Bad credentials, unknown resources and rejected requests end the call at
/// once; every other non-success status is retried.
fn policy(success: StatusCode, message: &str) -> StatusPolicy {
    StatusPolicy::new()
        .success(success)
        .fail(StatusCode::UNAUTHORIZED, message)
        .fail(StatusCode::NOT_FOUND, message)
        .fail(StatusCode::UNPROCESSABLE_ENTITY, message)
        .otherwise(message)
}

/// Everything needed to talk to GitHub as the app.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub app_id: i64,
    pub identity: AppIdentity,
    /// Repository set requested for installation tokens.
    pub repositories: Vec<String>,
}

impl ClientSettings {
    pub fn from_config(config: &GitHubConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: config.api_url.clone(),
            app_id: config.app_id()?,
            identity: AppIdentity::new(config.client_id()?, config.private_key()?),
            repositories: config.repositories.clone(),
        })
    }
}

/// Calls authenticated with a freshly signed app assertion.
#[derive(Clone)]
pub struct AppClient {
    dispatcher: Dispatcher,
}

impl AppClient {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Get the authenticated app.
    pub async fn get_app(&self) -> Result<AppInfo, DispatchError> {
        let spec = RequestSpec::get("/app")
            .policy(policy(StatusCode::OK, "authenticated app could not be fetched"));
        self.dispatcher.execute(&spec).await
    }

    /// Get a single installation of the app.
    pub async fn get_installation(&self, installation_id: i64) -> Result<Installation, DispatchError> {
        let spec = RequestSpec::get(format!("/app/installations/{}", installation_id))
            .policy(policy(StatusCode::OK, "app installation could not be fetched"));
        self.dispatcher.execute(&spec).await
    }
}

#[async_trait]
impl InstallationApi for AppClient {
    /// List every installation of the authenticated app.
    async fn list_installations(&self) -> Result<Vec<Installation>, DispatchError> {
        let spec = RequestSpec::get("/app/installations")
            .policy(policy(StatusCode::OK, "app installations could not be listed"));
        self.dispatcher
            .execute_paginated(&spec, &Pagination::new(INSTALLATIONS_PER_PAGE))
            .await
    }

    /// Exchange an app assertion for an installation access token.
    async fn create_installation_token(
        &self,
        installation_id: i64,
        request: &AccessTokenRequest,
    ) -> Result<AccessTokenResponse, DispatchError> {
        let spec = RequestSpec::post(format!(
            "/app/installations/{}/access_tokens",
            installation_id
        ))
        .json(request)?
        .policy(policy(
            StatusCode::CREATED,
            "installation token could not be fetched",
        ));
        self.dispatcher.execute(&spec).await
    }
}

/// GitHub API client for installation-scoped operations.
///
/// Owns the app client, the credential manager built on it, and a dispatcher
/// that draws installation tokens from that manager.
pub struct GitHubClient {
    app: AppClient,
    credentials: Arc<CredentialManager>,
    dispatcher: Dispatcher,
}

impl GitHubClient {
    pub fn new(settings: ClientSettings, cancel: CancellationToken) -> Result<Self, DispatchError> {
        let dispatcher = Dispatcher::new(settings.base_url, settings.identity, cancel)?;
        Ok(Self::from_dispatcher(
            dispatcher,
            settings.app_id,
            settings.repositories,
        ))
    }

    /// Wire a client around an existing dispatcher.
    pub fn from_dispatcher(dispatcher: Dispatcher, app_id: i64, repositories: Vec<String>) -> Self {
        let app = AppClient::new(dispatcher.clone());
        let credentials = Arc::new(CredentialManager::new(
            Arc::new(app.clone()),
            app_id,
            repositories,
        ));
        let dispatcher = dispatcher.with_token_source(credentials.clone());

        Self {
            app,
            credentials,
            dispatcher,
        }
    }

    pub fn app(&self) -> &AppClient {
        &self.app
    }

    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    /// List self-hosted runners registered against a repository.
    ///
    /// # Arguments
    /// * `owner` - Repository owner (user or org)
    /// * `repo` - Repository name
    pub async fn list_runners(&self, owner: &str, repo: &str) -> Result<RunnerList, DispatchError> {
        let spec = RequestSpec::get(format!("/repos/{}/{}/actions/runners", owner, repo))
            .credential(Credential::Installation)
            .policy(policy(StatusCode::OK, "self-hosted runners could not be listed"));
        self.dispatcher
            .execute_paginated(&spec, &Pagination::new(RUNNERS_PER_PAGE))
            .await
    }

    /// Fetch a token for registering a new self-hosted runner.
    pub async fn create_registration_token(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<RegistrationToken, DispatchError> {
        let spec = RequestSpec::post(format!(
            "/repos/{}/{}/actions/runners/registration-token",
            owner, repo
        ))
        .credential(Credential::Installation)
        .policy(policy(
            StatusCode::CREATED,
            "runner registration token could not be fetched",
        ));
        self.dispatcher.execute(&spec).await
    }

    /// List public repositories of a user.
    pub async fn list_user_repos(&self, user: &str) -> Result<Vec<Repository>, DispatchError> {
        let spec = RequestSpec::get(format!("/users/{}/repos", user))
            .credential(Credential::Installation)
            .policy(policy(StatusCode::OK, "user repositories could not be listed"));
        self.dispatcher
            .execute_paginated(&spec, &Pagination::new(REPOSITORIES_PER_PAGE))
            .await
    }
}
