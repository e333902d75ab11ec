pub mod api;
pub mod cli;
pub mod config;
pub mod github;

/// Shared state of the HTTP surface.
pub struct AppState {
    /// Shared secret for verifying webhook signatures
    pub webhook_secret: String,
}

impl AppState {
    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self {
            webhook_secret: webhook_secret.into(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("webhook_secret", &"[REDACTED]")
            .finish()
    }
}
