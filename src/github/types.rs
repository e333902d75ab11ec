//! Wire types for the GitHub REST endpoints this service calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::pagination::Page;

/// Permission scope → access level, e.g. `administration` → `write`.
pub type Permissions = BTreeMap<String, String>;

// App types

/// GitHub App information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppInfo {
    pub id: i64,
    pub slug: Option<String>,
    pub name: String,
    pub owner: Option<Account>,
    pub description: Option<String>,
    pub external_url: Option<String>,
    pub html_url: String,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default)]
    pub events: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user or organization account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub login: String,
    pub id: i64,
    #[serde(rename = "type")]
    pub account_type: Option<String>,
    pub avatar_url: Option<String>,
}

/// A GitHub App installation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Installation {
    pub id: i64,
    pub app_id: i64,
    pub account: Option<Account>,
    pub app_slug: Option<String>,
    pub target_id: Option<i64>,
    pub target_type: Option<String>,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default)]
    pub events: Vec<String>,
    pub repository_selection: Option<String>,
    pub access_tokens_url: Option<String>,
    pub repositories_url: Option<String>,
    pub html_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub suspended_at: Option<DateTime<Utc>>,
}

// Token types

/// Body of `POST /app/installations/{id}/access_tokens`.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct AccessTokenRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub repositories: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub permissions: Permissions,
}

/// Response from GitHub's installation access token endpoint.
#[derive(Clone, Deserialize)]
pub struct AccessTokenResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub permissions: Permissions,
    pub repository_selection: Option<String>,
    #[serde(default)]
    pub repositories: Vec<Repository>,
}

impl std::fmt::Debug for AccessTokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenResponse")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("permissions", &self.permissions)
            .field("repository_selection", &self.repository_selection)
            .finish()
    }
}

/// A token used to register a self-hosted runner against a repository.
#[derive(Clone, Serialize, Deserialize)]
pub struct RegistrationToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for RegistrationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationToken")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// Runner types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerLabel {
    pub id: Option<i64>,
    pub name: String,
    #[serde(rename = "type")]
    pub label_type: Option<String>,
}

/// A self-hosted runner registered against a repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runner {
    pub id: i64,
    pub name: String,
    pub os: String,
    pub status: String,
    pub busy: bool,
    #[serde(default)]
    pub labels: Vec<RunnerLabel>,
}

/// Response of `GET /repos/{owner}/{repo}/actions/runners`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerList {
    pub total_count: u64,
    #[serde(default)]
    pub runners: Vec<Runner>,
}

impl Page for RunnerList {
    fn item_count(&self) -> usize {
        self.runners.len()
    }

    fn merge(&mut self, page: Self) {
        self.total_count = self.total_count.max(page.total_count);
        self.runners.extend(page.runners);
    }
}

// Repository types

/// A GitHub repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    pub description: Option<String>,
    pub html_url: String,
    pub clone_url: Option<String>,
    pub ssh_url: Option<String>,
    pub default_branch: Option<String>,
    pub private: bool,
    #[serde(default)]
    pub fork: bool,
    #[serde(default)]
    pub archived: bool,
    pub owner: Account,
}
