use anyhow::Result;
use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use sqlx::{Pool, Sqlite};

use crate::models::ScrapeTarget;

pub const DEFAULT_HORIZON_DAYS: i64 = 8;
pub const DEFAULT_CUTOFF_HOUR: u32 = 18;

/// A tracked (venue, date) pair that is due for a fetch, annotated with
/// its position in the cadence table.
#[derive(Clone, Debug, PartialEq)]
pub struct DueTarget {
    pub venue_slug: String,
    pub date: NaiveDate,
    pub day_offset: i64,
    pub interval_min: i64,
}

/// Re-check interval in minutes for a target `day_offset` whole days ahead
/// of today. Near-term dates churn fastest and are polled most often;
/// today's slots stop being bookable at `cutoff_hour`, after which rapid
/// polling of a non-actionable date would be wasted.
pub fn interval_minutes(day_offset: i64, local_hour: u32, cutoff_hour: u32) -> i64 {
    match day_offset {
        0 if local_hour >= cutoff_hour => 240,
        0 => 10,
        1 => 10,
        2 => 20,
        3 => 40,
        4..=7 => 60,
        _ => 60,
    }
}

/// Creates a target row for every (venue, date) pair not yet tracked, due
/// immediately. Idempotent.
pub async fn ensure_targets(
    db: &Pool<Sqlite>,
    venue_slugs: &[String],
    dates: &[NaiveDate],
    now: NaiveDateTime,
) -> Result<()> {
    for slug in venue_slugs {
        for date in dates {
            sqlx::query(
                r#"
                INSERT INTO scrape_targets (venue_slug, date, next_scrape_at)
                VALUES (?, ?, ?)
                ON CONFLICT (venue_slug, date) DO NOTHING
                "#,
            )
            .bind(slug)
            .bind(date)
            .bind(now)
            .execute(db)
            .await?;
        }
    }

    Ok(())
}

/// Returns every target whose `next_scrape_at` is unset or has passed.
/// Targets for past dates are excluded; they are removed by
/// [`prune_stale`] at the end of the pass.
pub async fn due_targets(
    db: &Pool<Sqlite>,
    now: NaiveDateTime,
    cutoff_hour: u32,
) -> Result<Vec<DueTarget>> {
    let rows: Vec<ScrapeTarget> = sqlx::query_as(
        r#"
        SELECT venue_slug, date, last_scraped_at, next_scrape_at
        FROM scrape_targets
        WHERE next_scrape_at IS NULL OR next_scrape_at <= ?
        ORDER BY date, venue_slug
        "#,
    )
    .bind(now)
    .fetch_all(db)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|t| {
            let day_offset = (t.date - now.date()).num_days();
            if day_offset < 0 {
                return None;
            }
            Some(DueTarget {
                venue_slug: t.venue_slug,
                date: t.date,
                day_offset,
                interval_min: interval_minutes(day_offset, now.hour(), cutoff_hour),
            })
        })
        .collect())
}

/// Records a scrape attempt and schedules the next one. Called for failed
/// fetches too, so a broken target keeps the same cadence as a healthy one
/// instead of retrying in a tight loop.
pub async fn mark_scraped(
    db: &Pool<Sqlite>,
    venue_slug: &str,
    date: NaiveDate,
    now: NaiveDateTime,
    cutoff_hour: u32,
) -> Result<()> {
    let day_offset = (date - now.date()).num_days();
    let interval = interval_minutes(day_offset, now.hour(), cutoff_hour);
    let next = now + Duration::minutes(interval);

    sqlx::query(
        r#"
        UPDATE scrape_targets
        SET last_scraped_at = ?, next_scrape_at = ?
        WHERE venue_slug = ? AND date = ?
        "#,
    )
    .bind(now)
    .bind(next)
    .bind(venue_slug)
    .bind(date)
    .execute(db)
    .await?;

    Ok(())
}

/// Deletes all targets dated strictly before `today`.
pub async fn prune_stale(db: &Pool<Sqlite>, today: NaiveDate) -> Result<()> {
    sqlx::query("DELETE FROM scrape_targets WHERE date < ?")
        .bind(today)
        .execute(db)
        .await?;

    Ok(())
}
