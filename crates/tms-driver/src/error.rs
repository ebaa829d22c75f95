//! Driver and authentication error types.

use thiserror::Error;

/// Failure of a single driver operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// Element not on the page.
    #[error("Element not found: {0}")]
    NotFound(String),

    /// Element reference went stale between lookup and use.
    #[error("Stale element: {0}")]
    Stale(String),

    /// Browser or session is gone; the session must be recreated.
    #[error("Driver unavailable: {0}")]
    Unavailable(String),

    #[error("Driver timeout: {0}")]
    Timeout(String),

    /// Anything else the remote end reported.
    #[error("Driver protocol error: {0}")]
    Protocol(String),
}

impl DriverError {
    /// Whether retrying the same operation may succeed without recovery.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Stale(_) | Self::Timeout(_))
    }

    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Login failure.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Driver error during login: {0}")]
    Driver(#[from] DriverError),

    #[error("Captcha not resolved within {0}s")]
    CaptchaTimeout(u64),

    #[error("Captcha solver failed: {0}")]
    Solver(String),

    #[error("Login did not reach the dashboard: {0}")]
    LoginFailed(String),

    #[error("Login cancelled")]
    Cancelled,
}

pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DriverError::NotFound("x".into()).is_transient());
        assert!(DriverError::Stale("x".into()).is_transient());
        assert!(DriverError::Timeout("x".into()).is_transient());
        assert!(!DriverError::Unavailable("x".into()).is_transient());
        assert!(!DriverError::Protocol("x".into()).is_transient());
        assert!(DriverError::Unavailable("x".into()).is_unavailable());
    }
}
