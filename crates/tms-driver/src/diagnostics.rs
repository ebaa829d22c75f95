//! Fire-and-forget diagnostic capture.

use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{info, warn};

use crate::driver::{BoxFuture, UiDriver};

/// Screenshot sink. Never fails and never affects control flow.
pub trait Diagnostics: Send + Sync {
    fn capture_screenshot<'a>(&'a self, driver: &'a dyn UiDriver, label: &'a str)
        -> BoxFuture<'a, ()>;
}

/// Writes `<label>_<YYYYmmdd_HHMMSS>.png.b64` files holding the driver's
/// base64 PNG payload.
#[derive(Debug, Clone)]
pub struct FileDiagnostics {
    dir: PathBuf,
}

impl FileDiagnostics {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!(?e, dir = %dir.display(), "Failed to create screenshot directory");
        }
        Self { dir }
    }

    fn file_name(label: &str) -> String {
        let safe: String = label
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        format!("{}_{}.png.b64", safe, Local::now().format("%Y%m%d_%H%M%S"))
    }
}

impl Diagnostics for FileDiagnostics {
    fn capture_screenshot<'a>(
        &'a self,
        driver: &'a dyn UiDriver,
        label: &'a str,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let payload = match driver.screenshot().await {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, label, "Screenshot failed");
                    return;
                }
            };
            let path = self.dir.join(Self::file_name(label));
            match tokio::fs::write(&path, payload).await {
                Ok(()) => info!(path = %path.display(), "Screenshot saved"),
                Err(e) => warn!(?e, path = %path.display(), "Failed to write screenshot"),
            }
        })
    }
}

/// Discards every capture.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDiagnostics;

impl Diagnostics for NullDiagnostics {
    fn capture_screenshot<'a>(&'a self, _: &'a dyn UiDriver, _: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}
