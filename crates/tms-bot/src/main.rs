//! TMS boundary order bot - entry point.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use rust_decimal::Decimal;
use tms_core::Quantity;
use tracing::{info, warn};

use tms_bot::config::DEFAULT_CONFIG_PATH;
use tms_bot::{listener, AppConfig, Application, AutomationExit, RefreshMode};

/// Places a buy order on the TMS order page at the session boundaries.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via TMS_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Run duration in hours
    #[arg(short, long)]
    duration: Option<f64>,

    /// Stock symbol
    #[arg(short, long)]
    symbol: Option<String>,

    /// Order quantity
    #[arg(short, long)]
    quantity: Option<Decimal>,

    /// Circuit limit percentage above the previous close
    #[arg(long)]
    circuit_limit: Option<Decimal>,

    /// Fill the order form outside trading hours without submitting
    #[arg(long)]
    form_mode: bool,

    /// Captcha wait in seconds
    #[arg(long)]
    captcha_wait: Option<u64>,

    /// Refresh requests only refresh, never place an order
    #[arg(long)]
    refresh_only: bool,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(hours) = self.duration {
            config.automation.duration_hours = hours;
        }
        if let Some(symbol) = &self.symbol {
            config.order.symbol = symbol.to_uppercase();
        }
        if let Some(quantity) = self.quantity {
            config.order.quantity = Quantity::new(quantity);
        }
        if let Some(pct) = self.circuit_limit {
            config.pricing.circuit_pct = pct;
        }
        if self.form_mode {
            config.automation.form_filling = true;
        }
        if let Some(secs) = self.captcha_wait {
            config.auth.captcha_wait_secs = secs;
        }
        if self.refresh_only {
            config.automation.refresh_mode = RefreshMode::RefreshOnly;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Determine config path: CLI arg > TMS_CONFIG env var > default
    let config_path = args
        .config
        .clone()
        .or_else(|| std::env::var("TMS_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let loaded = AppConfig::load(&config_path)?;
    let found = loaded.is_some();
    let mut config = loaded.unwrap_or_default();
    args.apply(&mut config);

    tms_telemetry::init_logging(&config.telemetry.log_level)?;
    info!("Starting TMS bot v{}", env!("CARGO_PKG_VERSION"));
    if found {
        info!(config_path = %config_path, "Configuration loaded");
    } else {
        warn!(config_path = %config_path, "Config file not found, using defaults");
    }
    config.validate()?;

    let duration = Duration::from_secs_f64(config.automation.duration_hours * 3600.0);
    let mut app = Application::connect(config).await?;
    listener::spawn_interrupt_listener(app.signals());

    match app.run_automation(duration).await? {
        AutomationExit::Completed => info!("Run duration reached, exiting"),
        AutomationExit::Stopped => info!("Stopped by operator, exiting"),
    }
    Ok(())
}
