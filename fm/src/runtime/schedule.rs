//! Schedule loops for the dispatcher tick and the daily groom
//!
//! Both loops run the body inline, so a slow run can never overlap the next
//! one; missed interval ticks are skipped rather than bursted.

use std::future::Future;
use std::time::Duration;

use chrono::{NaiveTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Drive `body` every `period` until shutdown flips to true
///
/// Overlap policy is skip: the body is awaited inline and missed ticks are
/// dropped. Body errors are logged and never end the schedule.
pub async fn run_interval<F, Fut>(
    name: &str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut body: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = eyre::Result<()>>,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(schedule = name, ?period, "Schedule started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = body().await {
                    warn!(schedule = name, error = %e, "Scheduled run failed");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!(schedule = name, "Schedule stopped");
                    return;
                }
            }
        }
    }
}

/// Drive `body` once per day at the given UTC time until shutdown
pub async fn run_daily<F, Fut>(
    name: &str,
    at: NaiveTime,
    mut shutdown: watch::Receiver<bool>,
    mut body: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = eyre::Result<()>>,
{
    info!(schedule = name, %at, "Daily schedule started");

    loop {
        let now = Utc::now();
        let mut next = now.date_naive().and_time(at).and_utc();
        if next <= now {
            next += chrono::Duration::days(1);
        }
        let sleep = (next - now).to_std().unwrap_or(Duration::ZERO);
        debug!(schedule = name, ?sleep, "Sleeping until next daily run");

        tokio::select! {
            _ = tokio::time::sleep(sleep) => {
                if let Err(e) = body().await {
                    warn!(schedule = name, error = %e, "Daily run failed");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!(schedule = name, "Daily schedule stopped");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_interval_runs_and_stops() {
        let (tx, rx) = watch::channel(false);
        let count = Arc::new(AtomicU32::new(0));

        let handle = {
            let count = Arc::clone(&count);
            tokio::spawn(async move {
                run_interval("test", Duration::from_millis(10), rx, move || {
                    let count = Arc::clone(&count);
                    async move {
                        count.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .await;
            })
        };

        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(count.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_interval_survives_body_errors() {
        let (tx, rx) = watch::channel(false);
        let count = Arc::new(AtomicU32::new(0));

        let handle = {
            let count = Arc::clone(&count);
            tokio::spawn(async move {
                run_interval("failing", Duration::from_millis(10), rx, move || {
                    let count = Arc::clone(&count);
                    async move {
                        count.fetch_add(1, Ordering::SeqCst);
                        Err(eyre::eyre!("tick failed"))
                    }
                })
                .await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(count.load(Ordering::SeqCst) >= 2);
    }
}
