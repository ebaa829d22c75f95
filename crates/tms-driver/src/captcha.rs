//! Automatic captcha solving.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::driver::BoxFuture;
use crate::error::{AuthError, AuthResult};

/// Turns a captcha image into its answer.
pub trait CaptchaSolver: Send + Sync {
    /// `image_b64` is a base64 PNG of the captcha element.
    fn solve<'a>(&'a self, image_b64: &'a str) -> BoxFuture<'a, AuthResult<String>>;
}

const DEFAULT_BASE_URL: &str = "http://2captcha.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// 2Captcha response envelope (`json=1`).
#[derive(Debug, Deserialize)]
struct TwoCaptchaResponse {
    status: u8,
    request: String,
}

/// Solver backed by the 2Captcha HTTP API.
pub struct TwoCaptchaSolver {
    client: Client,
    base_url: String,
    api_key: String,
    poll_interval: Duration,
    max_wait: Duration,
}

impl TwoCaptchaSolver {
    pub fn new(api_key: impl Into<String>) -> AuthResult<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Solver(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            poll_interval: Duration::from_secs(5),
            max_wait: Duration::from_secs(60),
        })
    }

    /// Solver from `TWO_CAPTCHA_API_KEY`, if set.
    pub fn from_env() -> Option<AuthResult<Self>> {
        std::env::var("TWO_CAPTCHA_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .map(Self::new)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn submit(&self, image_b64: &str) -> AuthResult<String> {
        let response: TwoCaptchaResponse = self
            .client
            .post(format!("{}/in.php", self.base_url))
            .form(&[
                ("key", self.api_key.as_str()),
                ("method", "base64"),
                ("body", image_b64),
                ("json", "1"),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Solver(format!("submit failed: {e}")))?
            .json()
            .await
            .map_err(|e| AuthError::Solver(format!("bad submit response: {e}")))?;

        if response.status != 1 {
            return Err(AuthError::Solver(format!("submit rejected: {}", response.request)));
        }
        Ok(response.request)
    }

    async fn poll(&self, id: &str) -> AuthResult<Option<String>> {
        let response: TwoCaptchaResponse = self
            .client
            .get(format!("{}/res.php", self.base_url))
            .query(&[
                ("key", self.api_key.as_str()),
                ("action", "get"),
                ("id", id),
                ("json", "1"),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Solver(format!("poll failed: {e}")))?
            .json()
            .await
            .map_err(|e| AuthError::Solver(format!("bad poll response: {e}")))?;

        match (response.status, response.request.as_str()) {
            (1, _) => Ok(Some(response.request)),
            (_, "CAPCHA_NOT_READY") => Ok(None),
            (_, other) => Err(AuthError::Solver(format!("solve failed: {other}"))),
        }
    }
}

impl CaptchaSolver for TwoCaptchaSolver {
    fn solve<'a>(&'a self, image_b64: &'a str) -> BoxFuture<'a, AuthResult<String>> {
        Box::pin(async move {
            let id = self.submit(image_b64).await?;
            debug!(id = %id, "Captcha submitted to 2Captcha");

            let deadline = tokio::time::Instant::now() + self.max_wait;
            while tokio::time::Instant::now() < deadline {
                tokio::time::sleep(self.poll_interval).await;
                if let Some(answer) = self.poll(&id).await? {
                    info!("Captcha solved by 2Captcha");
                    return Ok(answer);
                }
            }
            Err(AuthError::Solver(format!(
                "no answer within {}s",
                self.max_wait.as_secs()
            )))
        })
    }
}
