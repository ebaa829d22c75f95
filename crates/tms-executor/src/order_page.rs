//! The buy order entry page.
//!
//! Prepares the form (symbol, quantity, buy side), fills the price, reads
//! the market values the price engine needs and acts as the dispatch loop's
//! target: a buy click, a success probe and dialog dismissal.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tms_core::{Price, Quantity};
use tms_driver::{BoxFuture, DriverError, DriverResult, Locator, UiDriver};
use tracing::{debug, info};

use crate::dispatch::DispatchTarget;
use crate::error::{PricingError, PricingResult};
use crate::pricing::MarketReader;

/// Probe timeout for elements that are either there or not.
const FAST_PROBE: Duration = Duration::from_millis(250);

/// Placeholder in [`OrderLocators::suggestion_template`].
pub const SYMBOL_PLACEHOLDER: &str = "{symbol}";

#[derive(Debug, Clone)]
pub struct OrderLocators {
    pub order_management: Locator,
    /// Visible once the Buy/Sell form is open.
    pub buy_sell_tab: Locator,
    pub buy_sell_link: Locator,
    pub buy_toggle: Locator,
    pub symbol: Locator,
    /// XPath with a `{symbol}` placeholder.
    pub suggestion_template: String,
    pub body: Locator,
    pub quantity: Locator,
    pub price: Locator,
    pub buy_button: Locator,
    pub pre_close: Locator,
    pub high: Locator,
    pub success_markers: Vec<Locator>,
    pub dialog_buttons: Vec<Locator>,
}

impl Default for OrderLocators {
    fn default() -> Self {
        Self {
            order_management: Locator::xpath("//span[text()='Order Management']"),
            buy_sell_tab: Locator::xpath("//span[text()='Buy/Sell']"),
            buy_sell_link: Locator::xpath("//span[normalize-space(text())='Buy/Sell']"),
            buy_toggle: Locator::xpath(
                "(//input[@type='radio' and contains(@class, 'xtoggler-radio')])[3]",
            ),
            symbol: Locator::xpath("//input[@formcontrolname='symbol']"),
            suggestion_template: "//div[contains(@class, 'suggestion') or contains(@class, 'dropdown')]//div[contains(text(), '{symbol}')]".to_string(),
            body: Locator::xpath("//body"),
            quantity: Locator::xpath("//input[@formcontrolname='quantity']"),
            price: Locator::xpath("//input[@formcontrolname='price']"),
            buy_button: Locator::xpath(
                "//button[text()='BUY' and @type='submit' and not(@disabled)]",
            ),
            pre_close: Locator::xpath("//div[label[text()='Pre Close']]/b"),
            high: Locator::xpath("//div[label[text()='High']]/b"),
            success_markers: vec![
                Locator::xpath("//div[contains(@class,'alert-success')]"),
                Locator::xpath("//div[contains(text(),'Order placed successfully')]"),
                Locator::xpath("//div[contains(text(),'successful')]"),
            ],
            dialog_buttons: vec![
                Locator::xpath("//button[contains(text(), 'OK')]"),
                Locator::xpath("//button[contains(text(), 'Confirm')]"),
                Locator::xpath("//button[contains(text(), 'Yes')]"),
                Locator::xpath("//div[contains(@class, 'modal')]//button[contains(@class, 'btn-primary')]"),
            ],
        }
    }
}

impl OrderLocators {
    pub fn suggestion_for(&self, symbol: &str) -> Locator {
        Locator::xpath(self.suggestion_template.replace(SYMBOL_PLACEHOLDER, symbol))
    }
}

pub struct OrderPage {
    driver: Arc<dyn UiDriver>,
    locators: OrderLocators,
    symbol: String,
    quantity: Quantity,
    /// Pre-close does not move during the day.
    pre_close: Mutex<Option<Price>>,
}

impl OrderPage {
    pub fn new(
        driver: Arc<dyn UiDriver>,
        locators: OrderLocators,
        symbol: impl Into<String>,
        quantity: Quantity,
    ) -> Self {
        Self {
            driver,
            locators,
            symbol: symbol.into(),
            quantity,
            pre_close: Mutex::new(None),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn quantity(&self) -> Quantity {
        self.quantity
    }

    pub fn locators(&self) -> &OrderLocators {
        &self.locators
    }

    /// Forget cached market values (new trading day).
    pub fn clear_market_cache(&self) {
        *self.pre_close.lock() = None;
    }

    /// Open the Buy/Sell form and fill everything but the price.
    pub async fn prepare_form(&self) -> DriverResult<()> {
        let driver = self.driver.as_ref();
        let l = &self.locators;

        if !driver.is_element_present(&l.buy_sell_tab, FAST_PROBE).await? {
            debug!("Opening Buy/Sell form from the menu");
            driver.click_element(&l.order_management).await?;
            driver.click_element(&l.buy_sell_link).await?;
        }

        driver.set_field_value(&l.symbol, &self.symbol).await?;
        let suggestion = l.suggestion_for(&self.symbol);
        if driver.is_element_present(&suggestion, FAST_PROBE).await? {
            driver.click_element(&suggestion).await?;
        } else if let Err(e) = driver.click_element(&l.body).await {
            // Only closes the dropdown.
            debug!(error = %e, "Body click failed");
        }

        driver
            .set_field_value(&l.quantity, &self.quantity.to_string())
            .await?;
        driver.click_element(&l.buy_toggle).await?;

        if !driver.is_element_present(&l.price, FAST_PROBE).await? {
            return Err(DriverError::NotFound(l.price.value.clone()));
        }
        info!(symbol = %self.symbol, quantity = %self.quantity, "Order form prepared");
        Ok(())
    }

    pub async fn fill_price(&self, price: Price) -> DriverResult<()> {
        self.driver
            .set_field_value(&self.locators.price, &price.to_string())
            .await?;
        debug!(price = %price, "Price filled");
        Ok(())
    }

    async fn read_price(&self, locator: &Locator, what: &str) -> PricingResult<Price> {
        let text = self
            .driver
            .read_text(locator)
            .await
            .map_err(|e| PricingError::MarketData(format!("{what}: {e}")))?;
        let price = Price::parse_display(&text)?;
        if !price.is_positive() {
            return Err(PricingError::MarketData(format!("{what} not positive: {text:?}")));
        }
        Ok(price)
    }
}

impl MarketReader for OrderPage {
    fn pre_close(&self) -> BoxFuture<'_, PricingResult<Price>> {
        Box::pin(async move {
            let cached = *self.pre_close.lock();
            if let Some(price) = cached {
                return Ok(price);
            }
            let price = self.read_price(&self.locators.pre_close, "pre-close").await?;
            *self.pre_close.lock() = Some(price);
            Ok(price)
        })
    }

    fn session_high(&self) -> BoxFuture<'_, PricingResult<Price>> {
        Box::pin(async move { self.read_price(&self.locators.high, "high").await })
    }
}

impl DispatchTarget for OrderPage {
    fn attempt(&self) -> BoxFuture<'_, DriverResult<()>> {
        Box::pin(async move { self.driver.click_element(&self.locators.buy_button).await })
    }

    fn confirmed(&self, timeout: Duration) -> BoxFuture<'_, DriverResult<bool>> {
        Box::pin(async move {
            let mut wait = timeout;
            for marker in &self.locators.success_markers {
                if self.driver.is_element_present(marker, wait).await? {
                    return Ok(true);
                }
                // The first probe already waited.
                wait = Duration::ZERO;
            }
            Ok(false)
        })
    }

    fn dismiss_dialogs(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            for button in &self.locators.dialog_buttons {
                if let Ok(true) = self.driver.is_element_present(button, Duration::ZERO).await {
                    if let Err(e) = self.driver.click_element(button).await {
                        debug!(error = %e, "Dialog dismissal failed");
                    }
                    return;
                }
            }
        })
    }
}
