//! Browser automation for the TMS bot.
//!
//! The core never talks to a browser directly. It depends on the contracts
//! defined here:
//! - `UiDriver`: navigation, element queries, clicks and field entry
//! - `Authenticator`: login, including the captcha step
//! - `CaptchaSolver`: optional automatic captcha answers
//! - `Diagnostics`: fire-and-forget screenshots
//!
//! `W3cDriver` implements `UiDriver` over the W3C WebDriver HTTP protocol
//! (chromedriver); `MockDriver` is a scripted in-memory page for tests.

pub mod auth;
pub mod captcha;
pub mod diagnostics;
pub mod driver;
pub mod error;
pub mod mock;
pub mod w3c;

pub use auth::{Authenticator, CaptchaMode, Credentials, FormLogin, LoginLocators};
pub use captcha::{CaptchaSolver, TwoCaptchaSolver};
pub use diagnostics::{Diagnostics, FileDiagnostics, NullDiagnostics};
pub use driver::{wait_for_element, BoxFuture, Locator, UiDriver, PRESENCE_SLICE};
pub use error::{AuthError, AuthResult, DriverError, DriverResult};
pub use mock::MockDriver;
pub use w3c::{W3cConfig, W3cDriver};
