//! Application configuration.
//!
//! Loaded once from TOML at startup and passed down by reference. Every
//! section has serde defaults, so an empty file is a valid configuration.
//! Credentials never live here; they come from `TMS_USERNAME` and
//! `TMS_PASSWORD`.

use std::path::Path;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tms_core::{Quantity, SessionConfig};
use tms_driver::{CaptchaMode, Locator, LoginLocators, W3cConfig};
use tms_executor::{
    DispatchConfig, OrderLocators, PriceConfig, RecoveryConfig, SchedulerConfig, SessionMarkers,
};

use crate::error::{AppError, AppResult};

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Longest coarse wait step a boundary wait may take.
const MAX_COARSE_STEP_MS: u64 = 200;

/// The order to place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderConfig {
    pub symbol: String,
    pub quantity: Quantity,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            symbol: "NABIL".to_string(),
            quantity: Quantity::new(Decimal::TEN),
        }
    }
}

fn default_captcha_wait_secs() -> u64 {
    180
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub captcha_mode: CaptchaMode,
    /// Bound on the captcha wait during (re-)authentication.
    #[serde(default = "default_captcha_wait_secs")]
    pub captcha_wait_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            captcha_mode: CaptchaMode::default(),
            captcha_wait_secs: default_captcha_wait_secs(),
        }
    }
}

/// What a refresh request does besides refreshing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    /// In trading hours, place an order right after the refresh.
    #[default]
    TriggersAction,
    RefreshOnly,
}

fn default_idle_poll_ms() -> u64 {
    1_000
}

fn default_duration_hours() -> f64 {
    6.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    #[serde(default)]
    pub refresh_mode: RefreshMode,
    /// Outside trading hours, fill the form without submitting.
    #[serde(default)]
    pub form_filling: bool,
    /// Pause between back-to-back orders.
    #[serde(default)]
    pub next_order_wait_ms: u64,
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
    #[serde(default = "default_duration_hours")]
    pub duration_hours: f64,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            refresh_mode: RefreshMode::default(),
            form_filling: false,
            next_order_wait_ms: 0,
            idle_poll_ms: default_idle_poll_ms(),
            duration_hours: default_duration_hours(),
        }
    }
}

impl AutomationConfig {
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn next_order_wait(&self) -> Duration {
        Duration::from_millis(self.next_order_wait_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    pub state_dir: String,
    pub order_log_dir: String,
    pub latency_log_dir: String,
    pub screenshot_dir: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            state_dir: "./data/state".to_string(),
            order_log_dir: "./data/orders".to_string(),
            latency_log_dir: "./data/latency".to_string(),
            screenshot_dir: "./data/screenshots".to_string(),
        }
    }
}

fn default_login_url() -> String {
    "https://tms18.nepsetms.com.np/".to_string()
}

fn default_order_url() -> String {
    "https://tms18.nepsetms.com.np/tms/me/memberclientorderentry".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(default = "default_login_url")]
    pub login_url: String,
    #[serde(default = "default_order_url")]
    pub order_url: String,
    #[serde(flatten)]
    pub webdriver: W3cConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            login_url: default_login_url(),
            order_url: default_order_url(),
            webdriver: W3cConfig::default(),
        }
    }
}

/// Page XPaths. The TMS front end changes now and then, so every locator
/// can be overridden without a rebuild.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    pub session_marker: String,
    pub order_page_marker: String,
    pub username: String,
    pub password: String,
    pub login_submit: String,
    pub captcha_input: String,
    pub captcha_image: String,
    pub order_management: String,
    pub buy_sell_tab: String,
    pub buy_sell_link: String,
    pub buy_toggle: String,
    pub symbol: String,
    pub symbol_suggestion: String,
    pub body: String,
    pub quantity: String,
    pub price: String,
    pub buy_button: String,
    pub pre_close: String,
    pub high: String,
    pub success_markers: Vec<String>,
    pub dialog_buttons: Vec<String>,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        let login = LoginLocators::default();
        let order = OrderLocators::default();
        let values = |ls: &[Locator]| ls.iter().map(|l| l.value.clone()).collect();
        Self {
            session_marker: login.dashboard.value,
            order_page_marker: order.symbol.value.clone(),
            username: login.username.value,
            password: login.password.value,
            login_submit: login.submit.value,
            captcha_input: login.captcha_input.value,
            captcha_image: login.captcha_image.value,
            order_management: order.order_management.value,
            buy_sell_tab: order.buy_sell_tab.value,
            buy_sell_link: order.buy_sell_link.value,
            buy_toggle: order.buy_toggle.value,
            symbol: order.symbol.value,
            symbol_suggestion: order.suggestion_template,
            body: order.body.value,
            quantity: order.quantity.value,
            price: order.price.value,
            buy_button: order.buy_button.value,
            pre_close: order.pre_close.value,
            high: order.high.value,
            success_markers: values(&order.success_markers),
            dialog_buttons: values(&order.dialog_buttons),
        }
    }
}

impl LocatorConfig {
    pub fn login_locators(&self) -> LoginLocators {
        LoginLocators {
            dashboard: Locator::xpath(&self.session_marker),
            username: Locator::xpath(&self.username),
            password: Locator::xpath(&self.password),
            submit: Locator::xpath(&self.login_submit),
            captcha_input: Locator::xpath(&self.captcha_input),
            captcha_image: Locator::xpath(&self.captcha_image),
        }
    }

    pub fn order_locators(&self) -> OrderLocators {
        OrderLocators {
            order_management: Locator::xpath(&self.order_management),
            buy_sell_tab: Locator::xpath(&self.buy_sell_tab),
            buy_sell_link: Locator::xpath(&self.buy_sell_link),
            buy_toggle: Locator::xpath(&self.buy_toggle),
            symbol: Locator::xpath(&self.symbol),
            suggestion_template: self.symbol_suggestion.clone(),
            body: Locator::xpath(&self.body),
            quantity: Locator::xpath(&self.quantity),
            price: Locator::xpath(&self.price),
            buy_button: Locator::xpath(&self.buy_button),
            pre_close: Locator::xpath(&self.pre_close),
            high: Locator::xpath(&self.high),
            success_markers: self.success_markers.iter().map(Locator::xpath).collect(),
            dialog_buttons: self.dialog_buttons.iter().map(Locator::xpath).collect(),
        }
    }

    pub fn session_markers(&self) -> SessionMarkers {
        SessionMarkers {
            session: Locator::xpath(&self.session_marker),
            order_page: Locator::xpath(&self.order_page_marker),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub order: OrderConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub pricing: PriceConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub automation: AutomationConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub locators: LocatorConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load from `path`. `None` when the file does not exist.
    pub fn load(path: &str) -> AppResult<Option<Self>> {
        if Path::new(path).exists() {
            Self::from_file(path).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content).map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Reject configurations the bot cannot run safely with.
    pub fn validate(&self) -> AppResult<()> {
        self.session
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))?;

        if self.order.symbol.trim().is_empty() {
            return Err(AppError::Config("order.symbol is empty".to_string()));
        }
        if !self.order.quantity.is_positive() {
            return Err(AppError::Config(format!(
                "order.quantity must be positive, got {}",
                self.order.quantity
            )));
        }
        if self.pricing.circuit_pct <= Decimal::ZERO {
            return Err(AppError::Config(format!(
                "pricing.circuit_pct must be positive, got {}",
                self.pricing.circuit_pct
            )));
        }
        if self.dispatch.interval_us == 0 {
            return Err(AppError::Config("dispatch.interval_us must be non-zero".to_string()));
        }
        if self.dispatch.max_attempts == 0 {
            return Err(AppError::Config("dispatch.max_attempts must be non-zero".to_string()));
        }
        if self.scheduler.coarse_step_ms > MAX_COARSE_STEP_MS {
            return Err(AppError::Config(format!(
                "scheduler.coarse_step_ms must be at most {MAX_COARSE_STEP_MS} ms"
            )));
        }
        if !self.automation.duration_hours.is_finite() || self.automation.duration_hours <= 0.0 {
            return Err(AppError::Config("automation.duration_hours must be positive".to_string()));
        }
        if !self.locators.symbol_suggestion.contains("{symbol}") {
            return Err(AppError::Config(
                "locators.symbol_suggestion needs a {symbol} placeholder".to_string(),
            ));
        }
        Ok(())
    }
}
