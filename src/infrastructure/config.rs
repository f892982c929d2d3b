//! Worker configuration
//!
//! All tunables live in one serde-backed struct with working defaults, loaded
//! from an optional JSON file. Credentials are deliberately separate: they are
//! read from the process environment only and never serialized or logged.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;

use crate::domain::schedule::WorkingHours;
use crate::infrastructure::logging::LoggingConfig;

/// Document collection names in the backing store.
pub mod collections {
    pub const TICKETS: &str = "tickets";
    pub const IGNORED_TICKETS: &str = "ignored_tickets";
    pub const SUBSCRIBERS: &str = "subscribers";
    pub const NOTIFICATION_QUEUE: &str = "notification_queue";
}

/// Ticket documents are keyed by this prefix plus the ticket number.
pub const TICKET_KEY_PREFIX: &str = "ticket_";

/// Environment variable names for the portal credentials.
pub const EMAIL_ENV_VAR: &str = "DESKWATCH_EMAIL";
pub const PASSWORD_ENV_VAR: &str = "DESKWATCH_PASSWORD";

/// Addresses and identity facts about the external portal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    /// Entry URL; doubles as the ticket list view once authenticated.
    pub list_url: String,
    /// Base URL for a ticket's detail page; the ticket number is appended.
    pub ticket_url_base: String,
    /// Host that proves we are on the portal (login succeeded).
    pub portal_host: String,
    /// Host of the identity provider (login still pending).
    pub identity_host: String,
    /// Free-text token that restricts list rows to new tickets.
    pub filter_token: String,
    /// Column header label used for descending sort on the open date.
    pub sort_column_label: String,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            list_url: "https://servicedesk.unesp.br/atendimento".to_string(),
            ticket_url_base: "https://servicedesk.unesp.br/atendimento/".to_string(),
            portal_host: "servicedesk.unesp.br".to_string(),
            identity_host: "auth.unesp.br".to_string(),
            filter_token: "Nova".to_string(),
            sort_column_label: "Abertura".to_string(),
        }
    }
}

impl PortalConfig {
    pub fn ticket_url(&self, number: &str) -> String {
        format!("{}{}", self.ticket_url_base, number)
    }
}

/// Cycle cadence and the generous waits the slow external portal requires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Sleep between successful cycles, in seconds.
    pub poll_interval_secs: u64,
    /// Backoff after a failed login attempt.
    pub login_retry_secs: u64,
    /// Backoff after an unexpected cycle failure and full reset.
    pub error_backoff_secs: u64,
    /// Refresh the list view and reapply filters every N cycles.
    pub refresh_every_cycles: u64,
    /// Navigation timeout per remote-session call.
    pub navigation_timeout_secs: u64,
    /// Timeout when waiting for a selector to appear.
    pub selector_timeout_secs: u64,
    /// Settle pause after navigations, in milliseconds.
    pub settle_wait_ms: u64,
    /// Extra pause after submitting the login form.
    pub post_login_wait_ms: u64,
    /// Emit a full status line only every N cycles; the rest log at debug.
    pub status_log_every_cycles: u64,
    /// Re-check cadence while outside working hours, in seconds.
    pub off_hours_poll_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            login_retry_secs: 30,
            error_backoff_secs: 30,
            refresh_every_cycles: 1,
            navigation_timeout_secs: 60,
            selector_timeout_secs: 15,
            settle_wait_ms: 2000,
            post_login_wait_ms: 3000,
            status_log_every_cycles: 15,
            off_hours_poll_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub database_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://data/deskwatch.db".to_string(),
        }
    }
}

/// Endpoint of the WebDriver-compatible browser the session adapter drives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebDriverConfig {
    pub endpoint: String,
    pub headless: bool,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9515".to_string(),
            headless: true,
        }
    }
}

/// Complete worker configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub portal: PortalConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub schedule: WorkingHours,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub webdriver: WebDriverConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl WorkerConfig {
    /// Load configuration from a JSON file, falling back to defaults when the
    /// file does not exist.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }
}

/// Portal credentials, environment-only. The `Debug` impl redacts both values
/// so they cannot leak through error chains or logs.
#[derive(Clone)]
pub struct Credentials {
    email: String,
    password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    /// Read credentials from `DESKWATCH_EMAIL` / `DESKWATCH_PASSWORD`.
    pub fn from_env() -> Result<Self> {
        let email = std::env::var(EMAIL_ENV_VAR)
            .with_context(|| format!("Missing environment variable {EMAIL_ENV_VAR}"))?;
        let password = std::env::var(PASSWORD_ENV_VAR)
            .with_context(|| format!("Missing environment variable {PASSWORD_ENV_VAR}"))?;
        Ok(Self { email, password })
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &"<redacted>")
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = WorkerConfig::default();
        assert!(config.timing.poll_interval_secs >= 10);
        assert!(config.timing.navigation_timeout_secs >= 30);
        assert_eq!(config.portal.filter_token, "Nova");
        assert_eq!(
            config.portal.ticket_url("555"),
            "https://servicedesk.unesp.br/atendimento/555"
        );
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = Credentials::new("user@example.com", "hunter2");
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("user@example.com"));
    }

    #[test]
    fn partial_config_file_fills_in_defaults() {
        let parsed: WorkerConfig =
            serde_json::from_str(r#"{"timing": {"poll_interval_secs": 45, "login_retry_secs": 30, "error_backoff_secs": 30, "refresh_every_cycles": 2, "navigation_timeout_secs": 60, "selector_timeout_secs": 15, "settle_wait_ms": 2000, "post_login_wait_ms": 3000, "status_log_every_cycles": 15, "off_hours_poll_secs": 60}}"#)
                .unwrap();
        assert_eq!(parsed.timing.poll_interval_secs, 45);
        assert_eq!(parsed.portal.portal_host, "servicedesk.unesp.br");
    }
}
