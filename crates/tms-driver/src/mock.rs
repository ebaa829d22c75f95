//! Scripted in-memory driver for tests.
//!
//! Elements are identified by locator value. The page is a set of present
//! locators plus text and field maps; scripts reveal elements on navigation
//! or after a number of clicks, which is enough to drive login, form
//! preparation and dispatch end to end.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::driver::{BoxFuture, Locator, UiDriver};
use crate::error::{DriverError, DriverResult};

/// Base64 of "mock".
const MOCK_PNG_B64: &str = "bW9jaw==";

#[derive(Debug)]
struct RevealRule {
    on_click: String,
    reveal: String,
    after: u32,
    seen: u32,
}

#[derive(Debug, Default)]
pub struct MockDriver {
    present: Mutex<HashSet<String>>,
    texts: Mutex<HashMap<String, String>>,
    fields: Mutex<HashMap<String, String>>,
    clicks: Mutex<Vec<String>>,
    navigations: Mutex<Vec<String>>,
    reads: Mutex<HashMap<String, u32>>,
    on_navigate: Mutex<HashMap<String, Vec<String>>>,
    reveal_rules: Mutex<Vec<RevealRule>>,
    failing_clicks: Mutex<HashMap<String, u32>>,
    refreshes: AtomicU32,
    recreations: AtomicU32,
    quits: AtomicU32,
    unavailable: AtomicBool,
    slow_presence: AtomicBool,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark elements present.
    pub fn with_present(self, locators: &[&str]) -> Self {
        for l in locators {
            self.show(l);
        }
        self
    }

    pub fn show(&self, locator: &str) {
        self.present.lock().insert(locator.to_string());
    }

    pub fn hide(&self, locator: &str) {
        self.present.lock().remove(locator);
    }

    /// Make `locator` present with `text`.
    pub fn set_text(&self, locator: &str, text: &str) {
        self.show(locator);
        self.texts.lock().insert(locator.to_string(), text.to_string());
    }

    /// Navigating to `url` makes `reveal` present.
    pub fn on_navigate(&self, url: &str, reveal: &[&str]) {
        self.on_navigate
            .lock()
            .entry(url.to_string())
            .or_default()
            .extend(reveal.iter().map(|s| s.to_string()));
    }

    /// The `n`-th click on `on_click` (counting from 1) makes `reveal` present.
    pub fn reveal_after_clicks(&self, on_click: &str, reveal: &str, n: u32) {
        self.reveal_rules.lock().push(RevealRule {
            on_click: on_click.to_string(),
            reveal: reveal.to_string(),
            after: n,
            seen: 0,
        });
    }

    /// The next `n` clicks on `locator` fail with `Stale`.
    pub fn fail_clicks(&self, locator: &str, n: u32) {
        self.failing_clicks.lock().insert(locator.to_string(), n);
    }

    /// While set, every operation except `recreate_session` and `quit` fails
    /// with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// While set, a presence check for a missing element takes its whole
    /// timeout before answering, like a page that never finishes loading.
    pub fn set_slow_presence(&self, slow: bool) {
        self.slow_presence.store(slow, Ordering::SeqCst);
    }

    pub fn is_present(&self, locator: &str) -> bool {
        self.present.lock().contains(locator)
    }

    pub fn field_value(&self, locator: &str) -> Option<String> {
        self.fields.lock().get(locator).cloned()
    }

    /// Successful clicks on `locator`.
    pub fn click_count(&self, locator: &str) -> usize {
        self.clicks.lock().iter().filter(|c| *c == locator).count()
    }

    pub fn clicks(&self) -> Vec<String> {
        self.clicks.lock().clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().clone()
    }

    pub fn read_count(&self, locator: &str) -> u32 {
        self.reads.lock().get(locator).copied().unwrap_or(0)
    }

    pub fn refresh_count(&self) -> u32 {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn recreate_count(&self) -> u32 {
        self.recreations.load(Ordering::SeqCst)
    }

    pub fn quit_count(&self) -> u32 {
        self.quits.load(Ordering::SeqCst)
    }

    fn check(&self) -> DriverResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(DriverError::Unavailable("mock browser closed".to_string()))
        } else {
            Ok(())
        }
    }

    fn require(&self, locator: &Locator) -> DriverResult<()> {
        if self.present.lock().contains(&locator.value) {
            Ok(())
        } else {
            Err(DriverError::NotFound(locator.value.clone()))
        }
    }

    fn do_click(&self, locator: &Locator) -> DriverResult<()> {
        self.check()?;
        self.require(locator)?;

        {
            let mut failing = self.failing_clicks.lock();
            if let Some(remaining) = failing.get_mut(&locator.value) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(DriverError::Stale(locator.value.clone()));
                }
            }
        }

        self.clicks.lock().push(locator.value.clone());

        let mut revealed = Vec::new();
        for rule in self.reveal_rules.lock().iter_mut() {
            if rule.on_click == locator.value {
                rule.seen += 1;
                if rule.seen == rule.after {
                    revealed.push(rule.reveal.clone());
                }
            }
        }
        self.present.lock().extend(revealed);
        Ok(())
    }
}

impl UiDriver for MockDriver {
    fn navigate<'a>(&'a self, url: &'a str) -> BoxFuture<'a, DriverResult<()>> {
        Box::pin(async move {
            self.check()?;
            self.navigations.lock().push(url.to_string());
            if let Some(reveal) = self.on_navigate.lock().get(url) {
                self.present.lock().extend(reveal.iter().cloned());
            }
            Ok(())
        })
    }

    fn is_element_present<'a>(
        &'a self,
        locator: &'a Locator,
        timeout: Duration,
    ) -> BoxFuture<'a, DriverResult<bool>> {
        Box::pin(async move {
            self.check()?;
            let present = self.present.lock().contains(&locator.value);
            if present || timeout.is_zero() || !self.slow_presence.load(Ordering::SeqCst) {
                return Ok(present);
            }
            tokio::time::sleep(timeout).await;
            self.check()?;
            Ok(self.present.lock().contains(&locator.value))
        })
    }

    fn click_element<'a>(&'a self, locator: &'a Locator) -> BoxFuture<'a, DriverResult<()>> {
        Box::pin(async move { self.do_click(locator) })
    }

    fn set_field_value<'a>(
        &'a self,
        locator: &'a Locator,
        text: &'a str,
    ) -> BoxFuture<'a, DriverResult<()>> {
        Box::pin(async move {
            self.check()?;
            self.require(locator)?;
            self.fields
                .lock()
                .insert(locator.value.clone(), text.to_string());
            Ok(())
        })
    }

    fn read_text<'a>(&'a self, locator: &'a Locator) -> BoxFuture<'a, DriverResult<String>> {
        Box::pin(async move {
            self.check()?;
            *self.reads.lock().entry(locator.value.clone()).or_default() += 1;
            self.require(locator)?;
            Ok(self
                .texts
                .lock()
                .get(&locator.value)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn refresh_page(&self) -> BoxFuture<'_, DriverResult<()>> {
        Box::pin(async move {
            self.check()?;
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn recreate_session(&self) -> BoxFuture<'_, DriverResult<()>> {
        Box::pin(async move {
            self.recreations.fetch_add(1, Ordering::SeqCst);
            self.unavailable.store(false, Ordering::SeqCst);
            // A fresh browser has nothing loaded.
            self.present.lock().clear();
            Ok(())
        })
    }

    fn screenshot(&self) -> BoxFuture<'_, DriverResult<String>> {
        Box::pin(async move {
            self.check()?;
            Ok(MOCK_PNG_B64.to_string())
        })
    }

    fn element_screenshot<'a>(
        &'a self,
        locator: &'a Locator,
    ) -> BoxFuture<'a, DriverResult<String>> {
        Box::pin(async move {
            self.check()?;
            self.require(locator)?;
            Ok(MOCK_PNG_B64.to_string())
        })
    }

    fn quit(&self) -> BoxFuture<'_, DriverResult<()>> {
        Box::pin(async move {
            self.quits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reveal_after_clicks() {
        let driver = MockDriver::new().with_present(&["buy"]);
        driver.reveal_after_clicks("buy", "success", 3);
        let buy = Locator::xpath("buy");
        let success = Locator::xpath("success");

        for _ in 0..2 {
            driver.click_element(&buy).await.unwrap();
        }
        assert!(!driver
            .is_element_present(&success, Duration::ZERO)
            .await
            .unwrap());

        driver.click_element(&buy).await.unwrap();
        assert!(driver
            .is_element_present(&success, Duration::ZERO)
            .await
            .unwrap());
        assert_eq!(driver.click_count("buy"), 3);
    }

    #[tokio::test]
    async fn test_missing_element_and_stale_clicks() {
        let driver = MockDriver::new();
        let buy = Locator::xpath("buy");
        assert!(matches!(
            driver.click_element(&buy).await,
            Err(DriverError::NotFound(_))
        ));

        driver.show("buy");
        driver.fail_clicks("buy", 1);
        assert!(matches!(
            driver.click_element(&buy).await,
            Err(DriverError::Stale(_))
        ));
        driver.click_element(&buy).await.unwrap();
        assert_eq!(driver.click_count("buy"), 1);
    }

    #[tokio::test]
    async fn test_unavailable_until_recreated() {
        let driver = MockDriver::new().with_present(&["dashboard"]);
        driver.set_unavailable(true);
        assert!(driver.refresh_page().await.unwrap_err().is_unavailable());

        driver.recreate_session().await.unwrap();
        assert_eq!(driver.recreate_count(), 1);
        assert!(!driver.is_present("dashboard"));
        driver.refresh_page().await.unwrap();
    }

    #[tokio::test]
    async fn test_navigation_reveals_and_fields_record() {
        let driver = MockDriver::new();
        driver.on_navigate("https://tms/order", &["order-page", "price"]);
        driver.navigate("https://tms/order").await.unwrap();
        assert!(driver.is_present("order-page"));

        driver
            .set_field_value(&Locator::xpath("price"), "110.1")
            .await
            .unwrap();
        assert_eq!(driver.field_value("price").as_deref(), Some("110.1"));
        assert_eq!(driver.navigations(), vec!["https://tms/order".to_string()]);
    }
}
