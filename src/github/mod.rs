//! GitHub integration module for GitHub App support.
//!
//! This module provides:
//! - App assertion signing and installation access token management
//! - A retrying, paginating request dispatcher for the REST API
//! - Typed API operations for installations, runners and repositories
//! - Webhook signature verification

pub mod api_client;
pub mod dispatcher;
pub mod error;
pub mod jwt;
pub mod pagination;
pub mod token_manager;
pub mod types;
pub mod webhook;

pub use api_client::{AppClient, ClientSettings, GitHubClient};
pub use dispatcher::{Dispatcher, RetrySchedule, StatusPolicy};
pub use error::{AuthError, DispatchError, SignatureError};
pub use jwt::{sign_assertion, AppIdentity};
pub use token_manager::{CredentialManager, InstallationToken};
pub use webhook::verify_signature;
