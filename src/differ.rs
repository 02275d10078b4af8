use std::collections::HashMap;

use anyhow::Result;
use chrono::NaiveDateTime;
use sqlx::{Pool, Sqlite};
use tracing::warn;

use crate::models::{RawSlot, SlotChange, SlotStatus};

/// Applies a batch of raw observations to the slot table and returns the
/// newly-available transitions.
///
/// A transition is strictly "was known and unavailable, now available". A
/// slot observed as available on its very first observation produces no
/// change: there is no prior unavailable baseline, and reporting it would
/// flood every watcher on the first scrape of a new date.
pub async fn store_and_diff(
    db: &Pool<Sqlite>,
    batch: &[RawSlot],
    now: NaiveDateTime,
) -> Result<Vec<SlotChange>> {
    let venues: Vec<(i64, String, String)> = sqlx::query_as("SELECT id, slug, name FROM venues")
        .fetch_all(db)
        .await?;
    let venues: HashMap<String, (i64, String)> = venues
        .into_iter()
        .map(|(id, slug, name)| (slug, (id, name)))
        .collect();

    let mut changes = Vec::new();

    for raw in batch {
        let Some((venue_id, venue_name)) = venues.get(&raw.venue_slug) else {
            warn!(venue = %raw.venue_slug, "skipping slot for unknown venue");
            continue;
        };

        let old_status: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT status
            FROM slots
            WHERE venue_id = ? AND date = ? AND time_label = ? AND court = ?
            "#,
        )
        .bind(venue_id)
        .bind(raw.date)
        .bind(&raw.time_label)
        .bind(&raw.court)
        .fetch_optional(db)
        .await?;

        if let Some((old,)) = &old_status {
            let old = SlotStatus::parse(old)?;
            if old != SlotStatus::Available && raw.status == SlotStatus::Available {
                changes.push(SlotChange {
                    venue_id: *venue_id,
                    venue_slug: raw.venue_slug.clone(),
                    venue_name: venue_name.clone(),
                    date: raw.date,
                    time_label: raw.time_label.clone(),
                    court: raw.court.clone(),
                    price: raw.price.clone(),
                });
            }
        }

        sqlx::query(
            r#"
            INSERT INTO slots (venue_id, date, time_label, court, status, price, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (venue_id, date, time_label, court)
            DO UPDATE SET status = excluded.status,
                          price = excluded.price,
                          updated_at = excluded.updated_at
            "#,
        )
        .bind(venue_id)
        .bind(raw.date)
        .bind(&raw.time_label)
        .bind(&raw.court)
        .bind(raw.status.as_str())
        .bind(&raw.price)
        .bind(now)
        .execute(db)
        .await?;
    }

    Ok(changes)
}
