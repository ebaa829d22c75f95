//! UI automation driver contract.

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::DriverResult;

/// Longest single presence probe issued by [`wait_for_element`].
pub const PRESENCE_SLICE: Duration = Duration::from_millis(200);

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Element lookup strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocatorStrategy {
    XPath,
    Css,
}

impl LocatorStrategy {
    /// W3C `using` value.
    #[must_use]
    pub fn as_w3c(&self) -> &'static str {
        match self {
            Self::XPath => "xpath",
            Self::Css => "css selector",
        }
    }
}

/// How to find an element on the page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    pub strategy: LocatorStrategy,
    pub value: String,
}

impl Locator {
    pub fn xpath(value: impl Into<String>) -> Self {
        Self {
            strategy: LocatorStrategy::XPath,
            value: value.into(),
        }
    }

    pub fn css(value: impl Into<String>) -> Self {
        Self {
            strategy: LocatorStrategy::Css,
            value: value.into(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Browser automation primitives.
///
/// Implementations are used from one logical task at a time; `Send + Sync`
/// only lets them live behind an `Arc`.
pub trait UiDriver: Send + Sync {
    fn navigate<'a>(&'a self, url: &'a str) -> BoxFuture<'a, DriverResult<()>>;

    /// Whether the element appears within `timeout`. A zero timeout checks once.
    /// Absence is `Ok(false)`, never `NotFound`.
    fn is_element_present<'a>(
        &'a self,
        locator: &'a Locator,
        timeout: Duration,
    ) -> BoxFuture<'a, DriverResult<bool>>;

    fn click_element<'a>(&'a self, locator: &'a Locator) -> BoxFuture<'a, DriverResult<()>>;

    /// Clear the field and type `text`.
    fn set_field_value<'a>(
        &'a self,
        locator: &'a Locator,
        text: &'a str,
    ) -> BoxFuture<'a, DriverResult<()>>;

    fn read_text<'a>(&'a self, locator: &'a Locator) -> BoxFuture<'a, DriverResult<String>>;

    fn refresh_page(&self) -> BoxFuture<'_, DriverResult<()>>;

    /// Drop the current browser session and start a fresh one.
    fn recreate_session(&self) -> BoxFuture<'_, DriverResult<()>>;

    /// Base64 PNG of the viewport.
    fn screenshot(&self) -> BoxFuture<'_, DriverResult<String>>;

    /// Base64 PNG of one element.
    fn element_screenshot<'a>(&'a self, locator: &'a Locator)
        -> BoxFuture<'a, DriverResult<String>>;

    /// End the browser session. Safe to call more than once.
    fn quit(&self) -> BoxFuture<'_, DriverResult<()>>;
}

/// Wait up to `timeout` for `locator`, probing in slices of at most
/// [`PRESENCE_SLICE`] so that `cancel` is seen promptly however long the
/// wait.
///
/// `Ok(None)` means `cancel` fired first.
pub async fn wait_for_element(
    driver: &dyn UiDriver,
    locator: &Locator,
    timeout: Duration,
    cancel: &CancellationToken,
) -> DriverResult<Option<bool>> {
    let deadline = Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let slice_end = (Instant::now() + PRESENCE_SLICE).min(deadline);
        let slice = slice_end.saturating_duration_since(Instant::now());

        tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            found = driver.is_element_present(locator, slice) => {
                if found? {
                    return Ok(Some(true));
                }
            }
        }
        if slice_end >= deadline {
            return Ok(Some(false));
        }
        // Drivers may answer early; keep the slice cadence either way.
        tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            _ = tokio::time::sleep_until(slice_end) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDriver;

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_element_sees_late_element() {
        let driver = std::sync::Arc::new(MockDriver::new());
        let revealer = {
            let driver = driver.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(450)).await;
                driver.show("order-page");
            })
        };

        let found = wait_for_element(
            driver.as_ref(),
            &Locator::xpath("order-page"),
            Duration::from_secs(2),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(found, Some(true));
        revealer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_element_times_out() {
        let driver = MockDriver::new();
        let started = Instant::now();
        let found = wait_for_element(
            &driver,
            &Locator::xpath("order-page"),
            Duration::from_millis(500),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(found, Some(false));
        assert_eq!(started.elapsed(), Duration::from_millis(500));

        let once = wait_for_element(
            &driver,
            &Locator::xpath("order-page"),
            Duration::ZERO,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(once, Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_element_cancelled_mid_wait() {
        let driver = MockDriver::new();
        driver.set_slow_presence(true);
        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(700)).await;
                cancel.cancel();
            })
        };

        let started = Instant::now();
        let found = wait_for_element(
            &driver,
            &Locator::xpath("order-page"),
            Duration::from_secs(10),
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(found, None);
        assert!(started.elapsed() <= PRESENCE_SLICE * 4);
        canceller.await.unwrap();
    }
}
