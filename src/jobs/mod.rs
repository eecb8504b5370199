//! Background jobs — Gmail watch renewal and message retention.
//!
//! Both jobs are independent tokio tasks with shutdown flags, in the shape of
//! the poller tasks elsewhere in this codebase: a `JoinHandle` plus an
//! `AtomicBool` the caller can flip to stop the loop.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{RetentionConfig, WatchConfig};
use crate::gmail::GmailApi;
use crate::store::MailStore;

/// Spawn the watch-renewal job.
///
/// Gmail watches expire after about seven days; the scheduling itself is
/// delegated to the `cron` crate. Renews once at startup, then at each fire
/// of the configured schedule.
pub fn spawn_watch_renewal(
    gmail: Arc<dyn GmailApi>,
    store: Arc<dyn MailStore>,
    config: WatchConfig,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        // Validated at config load; a failure here means the config type
        // was constructed by hand with a bad expression.
        let Ok(schedule) = cron::Schedule::from_str(&config.schedule) else {
            error!(schedule = %config.schedule, "Invalid watch schedule, job disabled");
            return;
        };

        info!(
            mailbox = %config.mailbox,
            schedule = %config.schedule,
            "Watch renewal job started"
        );

        // Renew immediately so a fresh deployment has an active watch.
        renew_watch(&*gmail, &*store, &config).await;

        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                warn!("Watch schedule has no upcoming fire times, job stopping");
                return;
            };
            let wait = (next - Utc::now())
                .to_std()
                .unwrap_or(Duration::from_secs(1));
            tokio::time::sleep(wait).await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Watch renewal job shutting down");
                return;
            }

            renew_watch(&*gmail, &*store, &config).await;
        }
    });

    (handle, shutdown_flag)
}

/// Re-register the watch and record what Gmail returned.
async fn renew_watch(gmail: &dyn GmailApi, store: &dyn MailStore, config: &WatchConfig) {
    match gmail
        .watch(&config.mailbox, &config.topic, &config.label_ids)
        .await
    {
        Ok(response) => {
            // A mailbox we've never seen gets its cursor from the watch
            // response; for known mailboxes this is a no-op.
            if let Err(e) = store.seed_mailbox(&config.mailbox, response.history_id).await {
                warn!(error = %e, "Failed to seed mailbox from watch response");
            }

            if let Some(ms) = response.expiration {
                if let Some(expires_at) = chrono::DateTime::from_timestamp_millis(ms as i64) {
                    if let Err(e) = store.set_watch_expiration(&config.mailbox, expires_at).await {
                        warn!(error = %e, "Failed to record watch expiration");
                    }
                }
            }

            info!(
                mailbox = %config.mailbox,
                history_id = response.history_id,
                "Gmail watch renewed"
            );
        }
        Err(e) => {
            // Retried at the next fire; webhook handling is unaffected.
            error!(mailbox = %config.mailbox, error = %e, "Gmail watch renewal failed");
        }
    }
}

/// Spawn the retention sweep: periodically deletes messages older than the
/// configured horizon. `keep_days = 0` disables the job entirely.
pub fn spawn_retention_sweep(
    store: Arc<dyn MailStore>,
    config: RetentionConfig,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        if config.keep_days == 0 {
            info!("Retention sweep disabled (keep_days = 0)");
            return;
        }

        info!(
            keep_days = config.keep_days,
            interval_secs = config.sweep_interval.as_secs(),
            "Retention sweep started"
        );

        let mut tick = tokio::time::interval(config.sweep_interval);
        // Skip the immediate first tick.
        tick.tick().await;

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Retention sweep shutting down");
                return;
            }

            match store.prune_messages(config.keep_days).await {
                Ok(0) => debug!("Retention sweep found nothing to prune"),
                Ok(count) => info!(count, "Retention sweep pruned messages"),
                Err(e) => error!(error = %e, "Retention sweep failed"),
            }
        }
    });

    (handle, shutdown_flag)
}
