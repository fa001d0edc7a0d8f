//! # CampusClock Core
//! Shared configuration, error types, and the user/attempt data model.

pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{ClockError, Result};
pub use types::{Attempt, AttemptStatus, ClockOutcome, User};
