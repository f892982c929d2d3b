//! W3C WebDriver adapter for the remote session port.
//!
//! Speaks the WebDriver wire protocol directly over HTTP, so any compliant
//! driver endpoint (chromedriver, geckodriver, a Selenium grid) can supply the
//! browser. Keeping to the raw protocol avoids tying the engine to one
//! automation library; everything above this module only sees
//! [`RemoteSession`].

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::domain::ports::{RemoteSession, SessionError, SessionFactory};
use crate::infrastructure::config::{TimingConfig, WebDriverConfig};

/// W3C element identifier key in element responses.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct WebDriverSession {
    http: Client,
    endpoint: String,
    session_id: String,
}

impl WebDriverSession {
    /// Start a new browser session against a WebDriver endpoint.
    pub async fn create(
        config: &WebDriverConfig,
        navigation_timeout: Duration,
    ) -> Result<Self, SessionError> {
        let http = Client::builder()
            .timeout(navigation_timeout + Duration::from_secs(10))
            .build()
            .map_err(|e| SessionError::Protocol(format!("HTTP client build failed: {e}")))?;

        let mut args = vec![
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-gpu".to_string(),
            "--window-size=1280,800".to_string(),
        ];
        if config.headless {
            args.push("--headless=new".to_string());
        }

        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args }
                }
            }
        });

        let response: Value = http
            .post(format!("{}/session", config.endpoint.trim_end_matches('/')))
            .json(&capabilities)
            .send()
            .await
            .map_err(|e| SessionError::Protocol(format!("Session create failed: {e}")))?
            .json()
            .await
            .map_err(|e| SessionError::Protocol(format!("Bad session response: {e}")))?;

        let session_id = response["value"]["sessionId"]
            .as_str()
            .ok_or_else(|| {
                SessionError::Protocol(format!("No sessionId in response: {response}"))
            })?
            .to_string();

        let session = Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            session_id,
        };

        // The portal is slow, so give page loads the full navigation timeout.
        let _ = session
            .command(
                reqwest::Method::POST,
                "timeouts",
                Some(json!({ "pageLoad": navigation_timeout.as_millis() as u64 })),
            )
            .await;

        debug!("WebDriver session {} created", session.session_id);
        Ok(session)
    }

    fn session_url(&self, path: &str) -> String {
        if path.is_empty() {
            format!("{}/session/{}", self.endpoint, self.session_id)
        } else {
            format!("{}/session/{}/{}", self.endpoint, self.session_id, path)
        }
    }

    /// Issue one WebDriver command and unwrap the `value` envelope.
    async fn command(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, SessionError> {
        let mut request = self.http.request(method, self.session_url(path));
        if let Some(body) = body {
            request = request.json(&body);
        } else {
            // Element interaction commands require a JSON body, even if empty.
            request = request.json(&json!({}));
        }

        let response = request
            .send()
            .await
            .map_err(|e| SessionError::Protocol(format!("WebDriver request failed: {e}")))?;
        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| SessionError::Protocol(format!("Bad WebDriver response: {e}")))?;

        if !status.is_success() {
            return Err(map_driver_error(&payload));
        }
        Ok(payload["value"].clone())
    }

    async fn find_element(&self, selector: &str) -> Result<String, SessionError> {
        let value = self
            .command(
                reqwest::Method::POST,
                "element",
                Some(json!({ "using": "css selector", "value": selector })),
            )
            .await
            .map_err(|e| match e {
                SessionError::SelectorNotFound(_) => {
                    SessionError::SelectorNotFound(selector.to_string())
                }
                other => other,
            })?;

        value[ELEMENT_KEY]
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| SessionError::SelectorNotFound(selector.to_string()))
    }
}

fn map_driver_error(payload: &Value) -> SessionError {
    let error = payload["value"]["error"].as_str().unwrap_or("unknown");
    let message = payload["value"]["message"].as_str().unwrap_or("");
    match error {
        "no such element" | "stale element reference" => {
            SessionError::SelectorNotFound(message.to_string())
        }
        "invalid session id" => SessionError::Gone(message.to_string()),
        "timeout" | "script timeout" => SessionError::Navigation(message.to_string()),
        other => SessionError::Protocol(format!("{other}: {message}")),
    }
}

#[async_trait]
impl RemoteSession for WebDriverSession {
    async fn navigate(&self, url: &str) -> Result<(), SessionError> {
        self.command(reqwest::Method::POST, "url", Some(json!({ "url": url })))
            .await
            .map_err(|e| SessionError::Navigation(e.to_string()))?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, SessionError> {
        let value = self.command(reqwest::Method::GET, "url", None).await?;
        value
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| SessionError::Protocol("Current URL is not a string".to_string()))
    }

    async fn page_html(&self) -> Result<String, SessionError> {
        let value = self.command(reqwest::Method::GET, "source", None).await?;
        value
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| SessionError::Protocol("Page source is not a string".to_string()))
    }

    async fn fill(&self, selector: &str, text: &str) -> Result<(), SessionError> {
        let element = self.find_element(selector).await?;
        self.command(
            reqwest::Method::POST,
            &format!("element/{element}/clear"),
            None,
        )
        .await?;
        self.command(
            reqwest::Method::POST,
            &format!("element/{element}/value"),
            Some(json!({ "text": text })),
        )
        .await?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), SessionError> {
        let element = self.find_element(selector).await?;
        self.command(
            reqwest::Method::POST,
            &format!("element/{element}/click"),
            None,
        )
        .await?;
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.find_element(selector).await {
                Ok(_) => return Ok(()),
                Err(SessionError::SelectorNotFound(_)) if Instant::now() < deadline => {
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(SessionError::SelectorNotFound(_)) => {
                    return Err(SessionError::Timeout {
                        selector: selector.to_string(),
                        timeout,
                    });
                }
                Err(other) => return Err(other),
            }
        }
    }

    async fn close(&self) {
        let result = self
            .http
            .delete(self.session_url(""))
            .send()
            .await;
        if let Err(e) = result {
            warn!("WebDriver session close failed: {e}");
        }
    }
}

/// Creates fresh WebDriver sessions for the worker loop.
pub struct WebDriverSessionFactory {
    config: WebDriverConfig,
    navigation_timeout: Duration,
}

impl WebDriverSessionFactory {
    pub fn new(config: WebDriverConfig, timing: &TimingConfig) -> Self {
        Self {
            config,
            navigation_timeout: Duration::from_secs(timing.navigation_timeout_secs),
        }
    }
}

#[async_trait]
impl SessionFactory for WebDriverSessionFactory {
    async fn create(&self) -> Result<Box<dyn RemoteSession>, SessionError> {
        let session = WebDriverSession::create(&self.config, self.navigation_timeout).await?;
        Ok(Box::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_errors_map_to_session_errors() {
        let payload = json!({"value": {"error": "no such element", "message": "css selector .x"}});
        assert!(matches!(
            map_driver_error(&payload),
            SessionError::SelectorNotFound(_)
        ));

        let payload = json!({"value": {"error": "invalid session id", "message": "gone"}});
        assert!(matches!(map_driver_error(&payload), SessionError::Gone(_)));

        let payload = json!({"value": {"error": "unexpected alert open", "message": "boom"}});
        assert!(matches!(map_driver_error(&payload), SessionError::Protocol(_)));
    }
}
