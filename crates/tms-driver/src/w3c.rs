//! W3C WebDriver HTTP adapter.
//!
//! Talks to a running chromedriver (or any W3C-compliant endpoint) over its
//! REST protocol. Only the handful of commands the bot needs are wired up.
//!
//! Error mapping follows the W3C error codes:
//! - `no such element` -> `NotFound`
//! - `stale element reference` -> `Stale`
//! - `invalid session id`, `no such window`, connection refused -> `Unavailable`
//! - `timeout`, `script timeout`, HTTP timeouts -> `Timeout`
//! - everything else -> `Protocol`

use std::time::Duration;

use parking_lot::Mutex;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::driver::{BoxFuture, Locator, UiDriver};
use crate::error::{DriverError, DriverResult};

/// W3C element reference key.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
/// Presence poll period for `is_element_present`.
const PRESENCE_POLL: Duration = Duration::from_millis(50);

fn default_webdriver_url() -> String {
    "http://127.0.0.1:9515".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_headless() -> bool {
    false
}

/// Browser session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct W3cConfig {
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    /// Chrome profile directory, so cookies survive restarts.
    #[serde(default)]
    pub user_data_dir: Option<String>,
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for W3cConfig {
    fn default() -> Self {
        Self {
            webdriver_url: default_webdriver_url(),
            user_data_dir: None,
            headless: default_headless(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl W3cConfig {
    fn capabilities(&self) -> Value {
        let mut args = vec![
            "--disable-extensions".to_string(),
            "--disable-notifications".to_string(),
            "--start-maximized".to_string(),
        ];
        if self.headless {
            args.push("--headless=new".to_string());
        }
        if let Some(dir) = &self.user_data_dir {
            args.push(format!("--user-data-dir={dir}"));
        }
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "pageLoadStrategy": "eager",
                    "goog:chromeOptions": { "args": args }
                }
            }
        })
    }
}

/// W3C error payload (`{"value": {"error": ..., "message": ...}}`).
#[derive(Debug, Deserialize)]
struct W3cErrorBody {
    error: String,
    #[serde(default)]
    message: String,
}

fn map_w3c_error(body: W3cErrorBody) -> DriverError {
    let detail = if body.message.is_empty() {
        body.error.clone()
    } else {
        format!("{}: {}", body.error, body.message)
    };
    match body.error.as_str() {
        "no such element" => DriverError::NotFound(detail),
        "stale element reference" => DriverError::Stale(detail),
        "invalid session id" | "no such window" | "session not created" => {
            DriverError::Unavailable(detail)
        }
        "timeout" | "script timeout" => DriverError::Timeout(detail),
        _ => DriverError::Protocol(detail),
    }
}

fn map_http_error(e: reqwest::Error) -> DriverError {
    if e.is_timeout() {
        DriverError::Timeout(e.to_string())
    } else if e.is_connect() {
        DriverError::Unavailable(e.to_string())
    } else {
        DriverError::Protocol(e.to_string())
    }
}

/// `UiDriver` over the W3C WebDriver protocol.
pub struct W3cDriver {
    client: Client,
    config: W3cConfig,
    session_id: Mutex<Option<String>>,
}

impl W3cDriver {
    /// Connect to the WebDriver endpoint and open a browser session.
    pub async fn connect(config: W3cConfig) -> DriverResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| DriverError::Protocol(format!("Failed to create HTTP client: {e}")))?;

        let driver = Self {
            client,
            config,
            session_id: Mutex::new(None),
        };
        driver.new_session().await?;
        Ok(driver)
    }

    async fn new_session(&self) -> DriverResult<()> {
        let value = self
            .raw(Method::POST, "/session".to_string(), Some(self.config.capabilities()))
            .await?;
        let id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::Protocol("new session response without sessionId".into()))?
            .to_string();
        info!(session_id = %id, url = %self.config.webdriver_url, "WebDriver session created");
        *self.session_id.lock() = Some(id);
        Ok(())
    }

    fn session_path(&self, suffix: &str) -> DriverResult<String> {
        let guard = self.session_id.lock();
        let id = guard
            .as_deref()
            .ok_or_else(|| DriverError::Unavailable("no active WebDriver session".into()))?;
        Ok(format!("/session/{id}{suffix}"))
    }

    /// Send one command and unwrap the `value` envelope.
    async fn raw(&self, method: Method, path: String, body: Option<Value>) -> DriverResult<Value> {
        let url = format!("{}{}", self.config.webdriver_url, path);
        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(map_http_error)?;
        let status = response.status();
        let mut payload: Value = response.json().await.map_err(map_http_error)?;
        let value = payload.get_mut("value").map(Value::take).unwrap_or(Value::Null);

        if status.is_success() {
            return Ok(value);
        }
        match serde_json::from_value::<W3cErrorBody>(value) {
            Ok(body) => Err(map_w3c_error(body)),
            Err(_) => Err(DriverError::Protocol(format!("HTTP {status}"))),
        }
    }

    async fn command(&self, method: Method, suffix: &str, body: Option<Value>) -> DriverResult<Value> {
        let path = self.session_path(suffix)?;
        self.raw(method, path, body).await
    }

    async fn find_all(&self, locator: &Locator) -> DriverResult<Vec<String>> {
        let value = self
            .command(
                Method::POST,
                "/elements",
                Some(json!({ "using": locator.strategy.as_w3c(), "value": locator.value })),
            )
            .await?;
        Ok(value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get(ELEMENT_KEY).and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find(&self, locator: &Locator) -> DriverResult<String> {
        let value = self
            .command(
                Method::POST,
                "/element",
                Some(json!({ "using": locator.strategy.as_w3c(), "value": locator.value })),
            )
            .await?;
        value
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| DriverError::NotFound(locator.value.clone()))
    }
}

impl UiDriver for W3cDriver {
    fn navigate<'a>(&'a self, url: &'a str) -> BoxFuture<'a, DriverResult<()>> {
        Box::pin(async move {
            debug!(url, "Navigating");
            self.command(Method::POST, "/url", Some(json!({ "url": url })))
                .await
                .map(|_| ())
        })
    }

    fn is_element_present<'a>(
        &'a self,
        locator: &'a Locator,
        timeout: Duration,
    ) -> BoxFuture<'a, DriverResult<bool>> {
        Box::pin(async move {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                match self.find_all(locator).await {
                    Ok(found) if !found.is_empty() => return Ok(true),
                    Ok(_) => {}
                    Err(e) if e.is_transient() => {}
                    Err(e) => return Err(e),
                }
                let now = tokio::time::Instant::now();
                if now >= deadline {
                    return Ok(false);
                }
                tokio::time::sleep(PRESENCE_POLL.min(deadline - now)).await;
            }
        })
    }

    fn click_element<'a>(&'a self, locator: &'a Locator) -> BoxFuture<'a, DriverResult<()>> {
        Box::pin(async move {
            let element = self.find(locator).await?;
            // Script click: not blocked by overlays the way a native click is.
            self.command(
                Method::POST,
                "/execute/sync",
                Some(json!({
                    "script": "arguments[0].click();",
                    "args": [{ ELEMENT_KEY: element }]
                })),
            )
            .await
            .map(|_| ())
        })
    }

    fn set_field_value<'a>(
        &'a self,
        locator: &'a Locator,
        text: &'a str,
    ) -> BoxFuture<'a, DriverResult<()>> {
        Box::pin(async move {
            let element = self.find(locator).await?;
            self.command(Method::POST, &format!("/element/{element}/clear"), Some(json!({})))
                .await?;
            self.command(
                Method::POST,
                &format!("/element/{element}/value"),
                Some(json!({ "text": text })),
            )
            .await
            .map(|_| ())
        })
    }

    fn read_text<'a>(&'a self, locator: &'a Locator) -> BoxFuture<'a, DriverResult<String>> {
        Box::pin(async move {
            let element = self.find(locator).await?;
            let value = self
                .command(Method::GET, &format!("/element/{element}/text"), None)
                .await?;
            Ok(value.as_str().unwrap_or_default().to_string())
        })
    }

    fn refresh_page(&self) -> BoxFuture<'_, DriverResult<()>> {
        Box::pin(async move {
            self.command(Method::POST, "/refresh", Some(json!({})))
                .await
                .map(|_| ())
        })
    }

    fn recreate_session(&self) -> BoxFuture<'_, DriverResult<()>> {
        Box::pin(async move {
            if let Err(e) = self.quit().await {
                debug!(error = %e, "Old session cleanup failed");
            }
            self.new_session().await
        })
    }

    fn screenshot(&self) -> BoxFuture<'_, DriverResult<String>> {
        Box::pin(async move {
            let value = self.command(Method::GET, "/screenshot", None).await?;
            value
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| DriverError::Protocol("screenshot payload not a string".into()))
        })
    }

    fn element_screenshot<'a>(
        &'a self,
        locator: &'a Locator,
    ) -> BoxFuture<'a, DriverResult<String>> {
        Box::pin(async move {
            let element = self.find(locator).await?;
            let value = self
                .command(Method::GET, &format!("/element/{element}/screenshot"), None)
                .await?;
            value
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| DriverError::Protocol("screenshot payload not a string".into()))
        })
    }

    fn quit(&self) -> BoxFuture<'_, DriverResult<()>> {
        Box::pin(async move {
            let Some(id) = self.session_id.lock().take() else {
                return Ok(());
            };
            match self
                .raw(Method::DELETE, format!("/session/{id}"), None)
                .await
            {
                Ok(_) => {
                    info!(session_id = %id, "WebDriver session closed");
                    Ok(())
                }
                Err(e) => {
                    warn!(session_id = %id, error = %e, "WebDriver session close failed");
                    Err(e)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_body(error: &str) -> W3cErrorBody {
        W3cErrorBody {
            error: error.to_string(),
            message: "detail".to_string(),
        }
    }

    #[test]
    fn test_w3c_error_mapping() {
        assert!(matches!(
            map_w3c_error(error_body("no such element")),
            DriverError::NotFound(_)
        ));
        assert!(matches!(
            map_w3c_error(error_body("stale element reference")),
            DriverError::Stale(_)
        ));
        assert!(map_w3c_error(error_body("invalid session id")).is_unavailable());
        assert!(matches!(
            map_w3c_error(error_body("script timeout")),
            DriverError::Timeout(_)
        ));
        assert!(matches!(
            map_w3c_error(error_body("element click intercepted")),
            DriverError::Protocol(_)
        ));
    }

    #[test]
    fn test_capabilities_include_profile_dir() {
        let config = W3cConfig {
            user_data_dir: Some("/tmp/tms-profile".to_string()),
            headless: true,
            ..W3cConfig::default()
        };
        let caps = config.capabilities();
        let args = caps["capabilities"]["alwaysMatch"]["goog:chromeOptions"]["args"]
            .as_array()
            .unwrap();
        assert!(args.iter().any(|a| a == "--user-data-dir=/tmp/tms-profile"));
        assert!(args.iter().any(|a| a == "--headless=new"));
    }

    #[tokio::test]
    async fn test_connect_refused_is_unavailable() {
        let config = W3cConfig {
            webdriver_url: "http://127.0.0.1:1".to_string(),
            request_timeout_ms: 500,
            ..W3cConfig::default()
        };
        let err = W3cDriver::connect(config).await.err().unwrap();
        assert!(err.is_unavailable() || matches!(err, DriverError::Timeout(_)));
    }
}
