//! The user/attempt data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One portal account registered with CampusClock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Time-ordered UUID, assigned lazily (first persisted login or first
    /// dispatch), then stable forever.
    pub id: Option<String>,
    /// Portal login name (student id).
    pub username: String,
    /// Encrypted password, base64. Decrypted only inside `login()`.
    pub password: String,
    /// Notification target.
    pub email: Option<String>,
    /// Opt-in flag for the daily scheduler.
    pub auto_clock: bool,
    /// Opaque serialized cookie-jar snapshot from the most recent
    /// authenticated session. Overwritten whole, never merged.
    pub cookie: Option<String>,
}

/// One scheduled check-in execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    /// Time-ordered UUID, assigned at creation.
    pub id: String,
    /// Owning user's id.
    pub user_id: String,
    pub status: AttemptStatus,
    /// Jittered target time chosen at dispatch.
    pub scheduled_at: DateTime<Utc>,
    /// Set exactly when the status turns terminal.
    pub executed_at: Option<DateTime<Utc>>,
    /// Human-readable outcome line. Always present on failure.
    pub message: Option<String>,
}

/// Attempt lifecycle. Transitions exactly once, from `Pending` to one of the
/// terminal values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Pending,
    Success,
    /// The window was not open (not yet, or already past); nothing to do.
    Skipped,
    Failed,
}

impl AttemptStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Pending => "pending",
            AttemptStatus::Success => "success",
            AttemptStatus::Skipped => "skipped",
            AttemptStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AttemptStatus::Pending),
            "success" => Some(AttemptStatus::Success),
            "skipped" => Some(AttemptStatus::Skipped),
            "failed" => Some(AttemptStatus::Failed),
            _ => None,
        }
    }
}

/// Non-error result of one workflow pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOutcome {
    /// Submitted and the echoed values verified.
    Submitted,
    /// Owner window has not opened yet. Benign; nothing was submitted.
    NotYetOpen,
    /// Deadline already passed. Benign; nothing was submitted.
    WindowExpired,
}

impl ClockOutcome {
    /// Human-readable line for the attempt record / notification.
    pub fn message(&self) -> &'static str {
        match self {
            ClockOutcome::Submitted => "check-in submitted and verified",
            ClockOutcome::NotYetOpen => "check-in window not yet open",
            ClockOutcome::WindowExpired => "check-in window already closed",
        }
    }
}
