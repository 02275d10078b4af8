use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{Duration as ChronoDuration, NaiveDateTime};
use sqlx::{Pool, Sqlite};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::differ::store_and_diff;
use crate::fetch::SlotFetcher;
use crate::models::{PassResult, RawSlot};
use crate::notification::{notify, Senders};
use crate::scheduler::{self, due_targets, ensure_targets, mark_scraped, prune_stale, DueTarget};

#[derive(Clone, Debug)]
pub struct RunnerConfig {
    pub horizon_days: i64,
    pub cutoff_hour: u32,
    pub max_concurrent_fetches: usize,
    pub fetch_stagger_ms: u64,
    pub failure_alert_threshold: f64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            horizon_days: scheduler::DEFAULT_HORIZON_DAYS,
            cutoff_hour: scheduler::DEFAULT_CUTOFF_HOUR,
            max_concurrent_fetches: 4,
            fetch_stagger_ms: 150,
            failure_alert_threshold: 0.5,
        }
    }
}

/// Advisory operator hook, invoked when the failure rate of a pass exceeds
/// the configured threshold. Must never fail the pass.
pub trait FailureAlert: Send + Sync {
    fn alert(&self, result: &PassResult);
}

pub struct LogAlert;

impl FailureAlert for LogAlert {
    fn alert(&self, result: &PassResult) {
        error!(
            fetched = result.fetched,
            failed = result.failed,
            "fetch failure rate above threshold"
        );
    }
}

/// Executes one scheduling pass: ensure targets over the horizon, fetch all
/// due targets concurrently, reschedule every one of them with the
/// pass-start time, diff the successful observations in one batch, dispatch
/// the resulting changes and prune past-dated targets.
pub async fn run_pass(
    db: &Pool<Sqlite>,
    fetcher: Arc<dyn SlotFetcher>,
    senders: &Senders,
    alert: &dyn FailureAlert,
    config: &RunnerConfig,
    now: NaiveDateTime,
) -> Result<PassResult> {
    let venue_slugs: Vec<(String,)> = sqlx::query_as("SELECT slug FROM venues")
        .fetch_all(db)
        .await?;
    let venue_slugs: Vec<String> = venue_slugs.into_iter().map(|(s,)| s).collect();

    let dates: Vec<_> = (0..config.horizon_days)
        .map(|i| now.date() + ChronoDuration::days(i))
        .collect();
    ensure_targets(db, &venue_slugs, &dates, now).await?;

    let due = due_targets(db, now, config.cutoff_hour).await?;
    let settled = fetch_all(&due, fetcher, config).await;

    let mut result = PassResult::default();
    let mut raw_slots: Vec<RawSlot> = Vec::new();

    for (target, outcome) in settled {
        // Failed targets are rescheduled too; a broken venue keeps its
        // cadence instead of hammering the host.
        mark_scraped(db, &target.venue_slug, target.date, now, config.cutoff_hour).await?;

        match outcome {
            Ok(slots) => {
                result.fetched += 1;
                raw_slots.extend(slots);
            }
            Err(err) => {
                result.failed += 1;
                warn!(venue = %target.venue_slug, date = %target.date, %err, "fetch failed");
            }
        }
    }

    let changes = store_and_diff(db, &raw_slots, now).await?;
    result.changes = changes.len();
    result.notified = notify(db, senders, &changes, now).await?;

    prune_stale(db, now.date()).await?;

    let total = result.fetched + result.failed;
    if total > 0 && result.failed as f64 / total as f64 > config.failure_alert_threshold {
        alert.alert(&result);
    }

    info!(
        fetched = result.fetched,
        failed = result.failed,
        changes = result.changes,
        notified = result.notified,
        "pass complete"
    );

    Ok(result)
}

/// Fetches every due target in parallel under a bounded semaphore, with a
/// short staggered start per task to avoid stampeding a single host. Each
/// fetch settles independently; a failure never cancels its siblings.
async fn fetch_all(
    due: &[DueTarget],
    fetcher: Arc<dyn SlotFetcher>,
    config: &RunnerConfig,
) -> Vec<(DueTarget, Result<Vec<RawSlot>>)> {
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_fetches.max(1)));
    let mut tasks = JoinSet::new();

    for (i, target) in due.iter().cloned().enumerate() {
        let fetcher = Arc::clone(&fetcher);
        let semaphore = Arc::clone(&semaphore);
        let stagger = Duration::from_millis(config.fetch_stagger_ms * i as u64);

        tasks.spawn(async move {
            tokio::time::sleep(stagger).await;
            let permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(err) => return (target, Err(err.into())),
            };
            let outcome = fetcher.fetch(&target.venue_slug, target.date).await;
            drop(permit);
            (target, outcome)
        });
    }

    let mut settled = Vec::with_capacity(due.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(entry) => settled.push(entry),
            Err(err) => warn!(%err, "fetch task panicked"),
        }
    }
    settled
}
