//! Login and captcha handling.
//!
//! `FormLogin` fills the login form and then resolves the captcha one of two
//! ways:
//! - `Manual`: a human types the captcha and submits; we wait (bounded,
//!   cancellable) for the dashboard marker.
//! - `Auto`: an injected `CaptchaSolver` answers it; if that fails, or the
//!   answer is rejected, fall back to the manual wait.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::captcha::CaptchaSolver;
use crate::diagnostics::Diagnostics;
use crate::driver::{wait_for_element, BoxFuture, Locator, UiDriver};
use crate::error::{AuthError, AuthResult};

/// Poll period while waiting for the dashboard.
const CAPTCHA_POLL: Duration = Duration::from_millis(200);
/// How long to look for the captcha field after filling credentials.
const CAPTCHA_PROBE: Duration = Duration::from_secs(2);
/// Dashboard wait after an automatic submit, before falling back to manual.
const AUTO_SUBMIT_WAIT: Duration = Duration::from_secs(5);

/// Performs a login on the shared browser session.
pub trait Authenticator: Send + Sync {
    /// Log in, leaving the browser on the dashboard.
    fn login<'a>(
        &'a self,
        driver: &'a dyn UiDriver,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, AuthResult<()>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptchaMode {
    #[default]
    Manual,
    Auto,
}

/// Login credentials. The password never appears in `Debug` output.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Read `TMS_USERNAME` and `TMS_PASSWORD`.
    pub fn from_env() -> Option<Self> {
        let username = std::env::var("TMS_USERNAME").ok()?;
        let password = std::env::var("TMS_PASSWORD").ok()?;
        Some(Self::new(username, password))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Login page elements.
#[derive(Debug, Clone)]
pub struct LoginLocators {
    /// Present only in an authenticated session.
    pub dashboard: Locator,
    pub username: Locator,
    pub password: Locator,
    pub submit: Locator,
    pub captcha_input: Locator,
    pub captcha_image: Locator,
}

impl Default for LoginLocators {
    fn default() -> Self {
        Self {
            dashboard: Locator::xpath("//span[contains(text(), 'Dashboard')]"),
            username: Locator::xpath("//input[contains(@placeholder, 'User') or @id='username']"),
            password: Locator::xpath("//input[@type='password']"),
            submit: Locator::xpath(
                "//button[@type='submit' or contains(text(), 'Login') or contains(text(), 'Sign')]",
            ),
            captcha_input: Locator::xpath(
                "//input[contains(@placeholder, 'Captcha') or @formcontrolname='captcha']",
            ),
            captcha_image: Locator::xpath("//img[@alt='Captcha']"),
        }
    }
}

/// Username/password form login with manual or automatic captcha.
pub struct FormLogin {
    login_url: String,
    locators: LoginLocators,
    credentials: Credentials,
    mode: CaptchaMode,
    solver: Option<Arc<dyn CaptchaSolver>>,
    captcha_wait: Duration,
    probe_timeout: Duration,
    diagnostics: Arc<dyn Diagnostics>,
}

impl FormLogin {
    pub fn new(
        login_url: impl Into<String>,
        locators: LoginLocators,
        credentials: Credentials,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Self {
        Self {
            login_url: login_url.into(),
            locators,
            credentials,
            mode: CaptchaMode::Manual,
            solver: None,
            captcha_wait: Duration::from_secs(180),
            probe_timeout: Duration::from_millis(500),
            diagnostics,
        }
    }

    /// Select the captcha mode. `Auto` without a solver behaves as `Manual`.
    pub fn with_captcha(mut self, mode: CaptchaMode, solver: Option<Arc<dyn CaptchaSolver>>) -> Self {
        self.mode = mode;
        self.solver = solver;
        self
    }

    pub fn with_captcha_wait(mut self, wait: Duration) -> Self {
        self.captcha_wait = wait;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Wait up to `timeout` for the dashboard marker.
    ///
    /// Polls every 200 ms. Returns `Ok(false)` on timeout or cancellation;
    /// only a lost browser is an error.
    pub async fn wait_for_captcha_resolution(
        &self,
        driver: &dyn UiDriver,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> AuthResult<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut next_report = Duration::from_secs(10);
        let started = tokio::time::Instant::now();

        loop {
            match driver
                .is_element_present(&self.locators.dashboard, Duration::ZERO)
                .await
            {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) if e.is_unavailable() => return Err(e.into()),
                Err(e) => warn!(error = %e, "Dashboard probe failed during captcha wait"),
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            if now - started >= next_report {
                info!(waited_secs = next_report.as_secs(), "Still waiting for captcha entry");
                next_report += Duration::from_secs(10);
            }

            let step = CAPTCHA_POLL.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return Ok(false),
                _ = tokio::time::sleep(step) => {}
            }
        }
    }

    async fn manual_captcha(&self, driver: &dyn UiDriver, cancel: &CancellationToken) -> AuthResult<()> {
        info!(
            wait_secs = self.captcha_wait.as_secs(),
            "Captcha detected. Solve it in the browser and submit the form"
        );
        self.diagnostics
            .capture_screenshot(driver, "captcha_required")
            .await;

        if self
            .wait_for_captcha_resolution(driver, self.captcha_wait, cancel)
            .await?
        {
            info!("Captcha filled and login successful");
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(AuthError::Cancelled);
        }
        Err(AuthError::CaptchaTimeout(self.captcha_wait.as_secs()))
    }

    async fn auto_captcha(
        &self,
        driver: &dyn UiDriver,
        solver: &dyn CaptchaSolver,
        cancel: &CancellationToken,
    ) -> AuthResult<bool> {
        let image = driver.element_screenshot(&self.locators.captcha_image).await?;
        let answer = tokio::select! {
            _ = cancel.cancelled() => return Err(AuthError::Cancelled),
            answer = solver.solve(&image) => answer?,
        };
        driver
            .set_field_value(&self.locators.captcha_input, &answer)
            .await?;
        driver.click_element(&self.locators.submit).await?;
        info!("Captcha filled automatically");

        self.wait_for_captcha_resolution(driver, AUTO_SUBMIT_WAIT, cancel)
            .await
    }

    async fn wait_for(
        &self,
        driver: &dyn UiDriver,
        locator: &Locator,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> AuthResult<bool> {
        wait_for_element(driver, locator, timeout, cancel)
            .await?
            .ok_or(AuthError::Cancelled)
    }

    async fn run_login(&self, driver: &dyn UiDriver, cancel: &CancellationToken) -> AuthResult<()> {
        info!(url = %self.login_url, "Navigating to login page");
        driver.navigate(&self.login_url).await?;

        if self
            .wait_for(driver, &self.locators.dashboard, self.probe_timeout, cancel)
            .await?
        {
            info!("Already logged in");
            return Ok(());
        }

        driver
            .set_field_value(&self.locators.username, &self.credentials.username)
            .await?;
        driver
            .set_field_value(&self.locators.password, &self.credentials.password)
            .await?;

        if self
            .wait_for(driver, &self.locators.captcha_input, CAPTCHA_PROBE, cancel)
            .await?
        {
            if let (CaptchaMode::Auto, Some(solver)) = (self.mode, self.solver.as_deref()) {
                match self.auto_captcha(driver, solver, cancel).await {
                    Ok(true) => {
                        info!("Login successful (auto captcha)");
                        return Ok(());
                    }
                    Ok(false) if cancel.is_cancelled() => return Err(AuthError::Cancelled),
                    Ok(false) => warn!("Auto captcha answer not accepted, falling back to manual entry"),
                    Err(AuthError::Cancelled) => return Err(AuthError::Cancelled),
                    Err(AuthError::Driver(e)) if e.is_unavailable() => return Err(e.into()),
                    Err(e) => warn!(error = %e, "Auto captcha failed, falling back to manual entry"),
                }
            }
            return self.manual_captcha(driver, cancel).await;
        }

        driver.click_element(&self.locators.submit).await?;
        if self
            .wait_for_captcha_resolution(driver, AUTO_SUBMIT_WAIT, cancel)
            .await?
        {
            info!("Login successful");
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(AuthError::Cancelled);
        }
        Err(AuthError::LoginFailed("dashboard not shown after submit".to_string()))
    }
}

impl Authenticator for FormLogin {
    fn login<'a>(
        &'a self,
        driver: &'a dyn UiDriver,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, AuthResult<()>> {
        Box::pin(async move {
            let result = self.run_login(driver, cancel).await;
            if let Err(e) = &result {
                if !matches!(e, AuthError::Cancelled) {
                    warn!(error = %e, "Login failed");
                    self.diagnostics.capture_screenshot(driver, "login_error").await;
                }
            }
            result
        })
    }
}
