//! Portal authentication state machine.
//!
//! Two states: unauthenticated and authenticated. Login is proven by where the
//! browser ends up, never assumed: success means the current URL belongs to
//! the portal host and not the identity provider. Any failure keeps the state
//! unauthenticated and surfaces as a retryable error to the worker loop.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use tracing::{debug, info, warn};

use crate::domain::ports::RemoteSession;
use crate::infrastructure::config::{Credentials, PortalConfig, TimingConfig};

/// Stable element ids on the identity provider's login form.
const EMAIL_INPUT: &str = "#input_0";
const PASSWORD_INPUT: &str = "#input_1";
/// The submit button is type="button"; tried in order.
const SUBMIT_SELECTORS: [&str; 2] = [
    "button[name='button_entrar']",
    "button[aria-label='Entrar']",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticated,
}

/// Owns the authentication state for one remote session.
pub struct SessionManager {
    state: AuthState,
    portal: PortalConfig,
    timing: TimingConfig,
    credentials: Credentials,
}

impl SessionManager {
    pub fn new(portal: PortalConfig, timing: TimingConfig, credentials: Credentials) -> Self {
        Self {
            state: AuthState::Unauthenticated,
            portal,
            timing,
            credentials,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == AuthState::Authenticated
    }

    /// Force the state back to unauthenticated. Called reactively whenever a
    /// downstream step observes identity-provider content or loses the session.
    pub fn reset(&mut self) {
        if self.state == AuthState::Authenticated {
            info!("Session marked unauthenticated, will re-login next cycle");
        }
        self.state = AuthState::Unauthenticated;
    }

    /// Drive the session to an authenticated state, logging in if the portal
    /// redirects us to the identity provider.
    pub async fn ensure_authenticated(&mut self, session: &dyn RemoteSession) -> Result<()> {
        if self.is_authenticated() {
            return Ok(());
        }

        info!("Navigating to portal entry: {}", self.portal.list_url);
        session
            .navigate(&self.portal.list_url)
            .await
            .map_err(|e| anyhow!("Portal navigation failed: {e}"))?;
        session
            .wait(Duration::from_millis(self.timing.settle_wait_ms))
            .await;

        let url = session
            .current_url()
            .await
            .map_err(|e| anyhow!("Could not read current URL: {e}"))?;

        if url.contains(&self.portal.identity_host) {
            self.submit_login_form(session).await?;
        }

        let url = session
            .current_url()
            .await
            .map_err(|e| anyhow!("Could not read current URL after login: {e}"))?;

        if url.contains(&self.portal.portal_host) && !url.contains(&self.portal.identity_host) {
            self.state = AuthState::Authenticated;
            info!("Successfully logged in to the portal");
            Ok(())
        } else {
            self.state = AuthState::Unauthenticated;
            bail!("Login did not reach the portal (stuck on: {url})");
        }
    }

    async fn submit_login_form(&self, session: &dyn RemoteSession) -> Result<()> {
        info!("On identity provider, entering credentials");

        let selector_timeout = Duration::from_secs(self.timing.selector_timeout_secs);
        session
            .wait_for_selector(EMAIL_INPUT, selector_timeout)
            .await
            .map_err(|e| anyhow!("Login form never appeared: {e}"))?;

        session
            .fill(EMAIL_INPUT, self.credentials.email())
            .await
            .map_err(|e| anyhow!("Could not fill email field: {e}"))?;
        session
            .fill(PASSWORD_INPUT, self.credentials.password())
            .await
            .map_err(|e| anyhow!("Could not fill password field: {e}"))?;
        session.wait(Duration::from_millis(500)).await;

        let mut clicked = false;
        for selector in SUBMIT_SELECTORS {
            match session.click(selector).await {
                Ok(()) => {
                    clicked = true;
                    break;
                }
                Err(e) => debug!("Submit selector {selector} not clickable: {e}"),
            }
        }
        if !clicked {
            bail!("No login submit button found");
        }

        self.wait_for_navigation_off_identity(session).await;
        session
            .wait(Duration::from_millis(self.timing.post_login_wait_ms))
            .await;
        Ok(())
    }

    /// Poll until the browser leaves the identity provider or the navigation
    /// timeout elapses. Timing out is not an error here; the caller re-checks
    /// the final URL either way.
    async fn wait_for_navigation_off_identity(&self, session: &dyn RemoteSession) {
        let deadline = self.timing.navigation_timeout_secs.max(1);
        for _ in 0..deadline {
            match session.current_url().await {
                Ok(url) if !url.contains(&self.portal.identity_host) => return,
                Ok(_) => {}
                Err(e) => {
                    warn!("URL poll during login navigation failed: {e}");
                    return;
                }
            }
            session.wait(Duration::from_secs(1)).await;
        }
    }
}
