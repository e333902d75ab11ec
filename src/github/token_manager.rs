//! Installation access token management.
//!
//! GitHub Apps use two types of authentication:
//! 1. App assertion - Short-lived JWT signed with the app's private key (app-level operations)
//! 2. Installation access token - Token for a specific installation (repo operations)
//!
//! [`CredentialManager`] owns the second kind. It resolves the app's
//! installation once, exchanges assertions for installation tokens and caches
//! the result until it is close to expiry.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::dispatcher::TokenSource;
use super::error::{AuthError, DispatchError};
use super::types::{AccessTokenRequest, AccessTokenResponse, Installation, Permissions};

/// Tokens this close to expiry are treated as expired.
pub const REFRESH_MARGIN_SECS: i64 = 60;

/// A cached installation access token.
#[derive(Clone)]
pub struct InstallationToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
    pub permissions: Permissions,
    pub repository_selection: Option<String>,
}

impl InstallationToken {
    /// Whether the token is still usable at `now`, including the safety margin.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

impl From<AccessTokenResponse> for InstallationToken {
    fn from(response: AccessTokenResponse) -> Self {
        Self {
            value: response.token,
            expires_at: response.expires_at,
            permissions: response.permissions,
            repository_selection: response.repository_selection,
        }
    }
}

impl std::fmt::Debug for InstallationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationToken")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("permissions", &self.permissions)
            .field("repository_selection", &self.repository_selection)
            .finish()
    }
}

/// The app-authenticated calls the credential manager depends on.
#[async_trait]
pub trait InstallationApi: Send + Sync {
    async fn list_installations(&self) -> Result<Vec<Installation>, DispatchError>;

    async fn create_installation_token(
        &self,
        installation_id: i64,
        request: &AccessTokenRequest,
    ) -> Result<AccessTokenResponse, DispatchError>;
}

#[derive(Debug, Clone)]
struct ResolvedInstallation {
    id: i64,
    permissions: Permissions,
}

/// Why the last refresh failed, kept for callers that queued behind it.
#[derive(Debug, Clone)]
enum RefreshFailure {
    NotInstalled { app_id: i64 },
    Exchange(Arc<DispatchError>),
}

impl From<RefreshFailure> for AuthError {
    fn from(failure: RefreshFailure) -> Self {
        match failure {
            RefreshFailure::NotInstalled { app_id } => AuthError::AppNotInstalled { app_id },
            RefreshFailure::Exchange(e) => AuthError::Exchange(e),
        }
    }
}

#[derive(Default)]
struct CredentialState {
    installation: Option<ResolvedInstallation>,
    token: Option<InstallationToken>,
    last_failure: Option<RefreshFailure>,
}

/// Caches the installation access token for one app.
///
/// The state lock is held for the whole refresh, so concurrent callers wait
/// for a single exchange and then read its result. That holds for failures
/// too: callers that queued behind a failed refresh get its error instead of
/// starting their own.
pub struct CredentialManager {
    api: Arc<dyn InstallationApi>,
    app_id: i64,
    repositories: Vec<String>,
    state: Mutex<CredentialState>,
    /// Completed refresh attempts. Only bumped while `state` is locked.
    refreshes: AtomicU64,
}

impl CredentialManager {
    pub fn new(api: Arc<dyn InstallationApi>, app_id: i64, repositories: Vec<String>) -> Self {
        Self {
            api,
            app_id,
            repositories,
            state: Mutex::new(CredentialState::default()),
            refreshes: AtomicU64::new(0),
        }
    }

    pub fn app_id(&self) -> i64 {
        self.app_id
    }

    /// Id of the resolved installation, if it has been looked up yet.
    pub async fn installation_id(&self) -> Option<i64> {
        self.state
            .lock()
            .await
            .installation
            .as_ref()
            .map(|installation| installation.id)
    }

    /// Return the cached token, refreshing it first when it is missing or stale.
    pub async fn ensure_valid_token(&self) -> Result<InstallationToken, AuthError> {
        let observed = self.refreshes.load(Ordering::Acquire);
        let mut state = self.state.lock().await;

        if let Some(token) = &state.token {
            if token.is_fresh(Utc::now()) {
                return Ok(token.clone());
            }
        }

        // A refresh finished while this caller waited for the lock.
        if self.refreshes.load(Ordering::Acquire) != observed {
            if let Some(failure) = &state.last_failure {
                debug!(app_id = self.app_id, "Reusing the failure of the refresh just completed");
                return Err(failure.clone().into());
            }
        }

        let outcome = self.refresh(&mut state).await;
        self.refreshes.fetch_add(1, Ordering::Release);

        match outcome {
            Ok(token) => {
                state.token = Some(token.clone());
                state.last_failure = None;
                Ok(token)
            }
            Err(failure) => {
                state.last_failure = Some(failure.clone());
                Err(failure.into())
            }
        }
    }

    async fn refresh(&self, state: &mut CredentialState) -> Result<InstallationToken, RefreshFailure> {
        let installation = match &state.installation {
            Some(installation) => installation.clone(),
            None => {
                let installation = self.resolve_installation().await?;
                state.installation = Some(installation.clone());
                installation
            }
        };

        info!(
            app_id = self.app_id,
            installation_id = installation.id,
            "Refreshing installation access token"
        );

        let request = AccessTokenRequest {
            repositories: self.repositories.clone(),
            permissions: installation.permissions,
        };
        let token: InstallationToken = self
            .api
            .create_installation_token(installation.id, &request)
            .await
            .map_err(|e| RefreshFailure::Exchange(Arc::new(e)))?
            .into();

        debug!(expires_at = %token.expires_at, "Installation access token refreshed");
        Ok(token)
    }

    async fn resolve_installation(&self) -> Result<ResolvedInstallation, RefreshFailure> {
        let installations = self
            .api
            .list_installations()
            .await
            .map_err(|e| RefreshFailure::Exchange(Arc::new(e)))?;

        let installation = installations
            .into_iter()
            .find(|installation| installation.app_id == self.app_id)
            .ok_or(RefreshFailure::NotInstalled {
                app_id: self.app_id,
            })?;

        debug!(installation_id = installation.id, "Resolved app installation");
        Ok(ResolvedInstallation {
            id: installation.id,
            permissions: installation.permissions,
        })
    }
}

#[async_trait]
impl TokenSource for CredentialManager {
    async fn installation_token(&self) -> Result<String, AuthError> {
        self.ensure_valid_token().await.map(|token| token.value)
    }
}
