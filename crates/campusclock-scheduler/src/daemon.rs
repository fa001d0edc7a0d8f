//! The long-running daemon: fire once a day, fan out, park delayed jobs.

use std::sync::Arc;

use chrono::Utc;

use campusclock_core::config::AppConfig;
use campusclock_core::error::Result;
use campusclock_notify::Notifier;
use campusclock_store::ClockStore;

use crate::{daily, dispatch, executor};

/// Run the daily scheduler forever.
///
/// Each fan-out spawns one detached task per attempt; tasks sleep until
/// their jittered due time, then run to a terminal outcome. Nothing is
/// cancelled mid-flight.
pub async fn run_daemon(
    store: Arc<ClockStore>,
    notifiers: Arc<Vec<Box<dyn Notifier>>>,
    config: Arc<AppConfig>,
) -> Result<()> {
    tracing::info!(
        "⏰ daily dispatcher started (fires at {} portal time)",
        config.schedule.daily_at
    );

    loop {
        let now = Utc::now();
        let fire_at = daily::next_daily_fire(
            &config.schedule.daily_at,
            now,
            config.portal.utc_offset_hours,
        )?;
        tracing::info!("next fan-out at {fire_at}");
        tokio::time::sleep((fire_at - now).to_std().unwrap_or_default()).await;

        let users = store.opted_in_users()?;
        let created =
            dispatch::dispatch_daily(&store, &users, Utc::now(), &mut rand::thread_rng())?;
        tracing::info!("📅 dispatched {} attempt(s)", created.len());

        for (user, attempt) in created {
            let store = store.clone();
            let notifiers = notifiers.clone();
            let config = config.clone();
            tokio::spawn(async move {
                let delay = (attempt.scheduled_at - Utc::now())
                    .to_std()
                    .unwrap_or_default();
                tokio::time::sleep(delay).await;
                if let Err(e) =
                    executor::execute_attempt(&store, &notifiers, &config, &user, &attempt.id)
                        .await
                {
                    tracing::error!("attempt {} bookkeeping error: {e}", attempt.id);
                }
            });
        }
    }
}
