//! Attempt execution — one login + one workflow pass, one terminal
//! transition, one notification fan-out.
//!
//! This is the single place that translates workflow results into attempt
//! state. Benign window outcomes become `skipped`; every error becomes
//! `failed` with the error's message. No retries.

use std::sync::Arc;

use chrono::Utc;

use campusclock_core::config::AppConfig;
use campusclock_core::error::{ClockError, Result};
use campusclock_core::types::{AttemptStatus, ClockOutcome, User};
use campusclock_notify::Notifier;
use campusclock_security::Vault;
use campusclock_session::SessionClient;
use campusclock_store::ClockStore;
use campusclock_workflow::ClockWorkflow;

/// Execute one due attempt for its owning user.
///
/// The returned error covers store-level problems only; check-in failures
/// are consumed into the attempt record and notified, not propagated.
pub async fn execute_attempt(
    store: &Arc<ClockStore>,
    notifiers: &[Box<dyn Notifier>],
    config: &AppConfig,
    user: &User,
    attempt_id: &str,
) -> Result<()> {
    let result = run_check_in(store, config, user).await;

    let (status, message) = match &result {
        Ok(ClockOutcome::Submitted) => {
            (AttemptStatus::Success, ClockOutcome::Submitted.message().to_string())
        }
        Ok(outcome) => (AttemptStatus::Skipped, outcome.message().to_string()),
        Err(e) => (AttemptStatus::Failed, e.to_string()),
    };

    let committed = store.finish_attempt(attempt_id, status, &message, Utc::now())?;
    if !committed {
        // A duplicate/overlapping job already drove this attempt terminal.
        tracing::warn!("attempt {attempt_id} was already terminal, not overwriting");
        return Ok(());
    }

    match status {
        AttemptStatus::Failed => {
            tracing::error!("❌ attempt {attempt_id} for {}: {message}", user.username)
        }
        _ => tracing::info!(
            "attempt {attempt_id} for {} finished {}: {message}",
            user.username,
            status.as_str()
        ),
    }

    let Some(attempt) = store.get_attempt(attempt_id)? else {
        return Err(ClockError::Store(format!(
            "attempt {attempt_id} vanished after transition"
        )));
    };
    for notifier in notifiers {
        if let Err(e) = notifier.notify(user, &attempt).await {
            tracing::warn!(
                "⚠️ notifier '{}' failed for attempt {}: {e}",
                notifier.name(),
                attempt.id
            );
        }
    }
    Ok(())
}

/// Login + workflow for one user, in persisted mode.
async fn run_check_in(
    store: &Arc<ClockStore>,
    config: &AppConfig,
    user: &User,
) -> Result<ClockOutcome> {
    // Re-read the row so this job starts from the freshest cookie snapshot.
    let user = store
        .get_user(&user.username)?
        .ok_or_else(|| ClockError::Store(format!("user {} no longer exists", user.username)))?;

    let vault = Vault::new(config.security.encrypt);
    let mut session = SessionClient::new(user, config.portal.clone(), vault, Some(store.clone()))?;
    session.login(false).await?;

    ClockWorkflow::new(&session).clock().await
}
