//! Error types for CampusClock.

use thiserror::Error;

/// All failure kinds the check-in pipeline can surface.
///
/// The benign window outcomes (`NotYetOpen`, `WindowExpired`) are NOT errors;
/// see [`crate::types::ClockOutcome`]. Everything here propagates to the job
/// executor, which owns the translation into a terminal attempt status.
#[derive(Debug, Error)]
pub enum ClockError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("captcha required for '{0}', cannot log in unattended")]
    CaptchaRequired(String),

    #[error("login failed: {0}")]
    LoginFailed(String),

    #[error("logout failed: {0}")]
    LogoutFailed(String),

    #[error("no open check-in business")]
    NoOpenBusiness,

    #[error("check-in forbidden: {0}")]
    ClockForbidden(String),

    #[error("submission did not stick: {0}")]
    ClockValidationFailed(String),

    #[error("unexpected portal response: {0}")]
    Portal(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("notify error: {0}")]
    Notify(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClockError>;
