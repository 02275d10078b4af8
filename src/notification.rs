use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{Datelike, NaiveDateTime};
use sqlx::{Pool, Sqlite};
use tracing::{error, warn};

use crate::channel::ChannelSender;
use crate::models::{canonical_day_times, day_name, ChannelKind, NotificationChannel, SlotChange, Watch};

/// Registry of one sender per channel kind. Channels whose kind has no
/// registered sender are skipped at dispatch time.
#[derive(Default)]
pub struct Senders {
    senders: HashMap<ChannelKind, Arc<dyn ChannelSender>>,
}

impl Senders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: ChannelKind, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders.insert(kind, sender);
        self
    }

    fn get(&self, kind: ChannelKind) -> Option<&Arc<dyn ChannelSender>> {
        self.senders.get(&kind)
    }
}

fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase()
}

/// A watch matches a change when its venue filter (if any) matches and the
/// change's time label appears verbatim in the watch's list for that day of
/// the week. Labels are compared case-insensitively with surrounding
/// whitespace stripped; there is no range or fuzzy matching.
pub fn watch_matches(watch: &Watch, change: &SlotChange) -> bool {
    if let Some(venue_id) = watch.venue_id {
        if venue_id != change.venue_id {
            return false;
        }
    }

    let day = day_name(change.date.weekday());
    let Some(times) = watch.day_times.get(day) else {
        return false;
    };

    let wanted = normalize_label(&change.time_label);
    times.iter().any(|t| normalize_label(t) == wanted)
}

async fn active_watches(db: &Pool<Sqlite>) -> Result<Vec<Watch>> {
    let rows: Vec<(i64, i64, Option<i64>, Option<String>, Option<String>, Option<String>)> =
        sqlx::query_as(
            r#"
            SELECT id, user_id, venue_id, day_times, weekday_times, weekend_times
            FROM watches
            WHERE active = true
            "#,
        )
        .fetch_all(db)
        .await?;

    let mut watches = Vec::with_capacity(rows.len());
    for (id, user_id, venue_id, day_times, weekday_times, weekend_times) in rows {
        match canonical_day_times(
            day_times.as_deref(),
            weekday_times.as_deref(),
            weekend_times.as_deref(),
        ) {
            Ok(day_times) => watches.push(Watch {
                id,
                user_id,
                venue_id,
                day_times,
            }),
            Err(err) => warn!(watch = id, %err, "skipping watch with malformed time preferences"),
        }
    }

    Ok(watches)
}

async fn active_channels(db: &Pool<Sqlite>, user_id: i64) -> Result<Vec<NotificationChannel>> {
    Ok(sqlx::query_as(
        r#"
        SELECT id, user_id, kind, destination
        FROM notification_channels
        WHERE user_id = ? AND active = true
        "#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await?)
}

async fn already_sent(db: &Pool<Sqlite>, channel_id: i64, slot_key: &str) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT 1
        FROM notification_log
        WHERE channel_id = ? AND slot_key = ?
        "#,
    )
    .bind(channel_id)
    .bind(slot_key)
    .fetch_optional(db)
    .await?;

    Ok(row.is_some())
}

async fn record_sent(
    db: &Pool<Sqlite>,
    channel_id: i64,
    slot_key: &str,
    now: NaiveDateTime,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO notification_log (channel_id, slot_key, sent_at)
        VALUES (?, ?, ?)
        ON CONFLICT (channel_id, slot_key) DO NOTHING
        "#,
    )
    .bind(channel_id)
    .bind(slot_key)
    .bind(now)
    .execute(db)
    .await?;

    Ok(())
}

fn render_message(changes: &[&SlotChange]) -> String {
    let mut lines = vec![format!(
        "{} slot{} just became available:",
        changes.len(),
        if changes.len() == 1 { "" } else { "s" }
    )];
    for change in changes {
        let price = change
            .price
            .as_deref()
            .map(|p| format!(" ({})", p))
            .unwrap_or_default();
        lines.push(format!(
            "{}: {} {} {}{}",
            change.venue_name, change.date, change.time_label, change.court, price
        ));
    }
    lines.join("\n")
}

/// Routes changes to every matching (watch, channel) pair, at most once per
/// channel and slot. One batched message goes out per channel; the dedup
/// log entry is written only after the send succeeded, so a failed channel
/// is retried on the next pass. Returns the number of messages delivered.
pub async fn notify(
    db: &Pool<Sqlite>,
    senders: &Senders,
    changes: &[SlotChange],
    now: NaiveDateTime,
) -> Result<usize> {
    if changes.is_empty() {
        return Ok(0);
    }

    let mut notified = 0;

    for watch in active_watches(db).await? {
        let matching: Vec<&SlotChange> = changes
            .iter()
            .filter(|c| watch_matches(&watch, c))
            .collect();
        if matching.is_empty() {
            continue;
        }

        for channel in active_channels(db, watch.user_id).await? {
            let Some(kind) = ChannelKind::parse(&channel.kind) else {
                error!(channel = channel.id, kind = %channel.kind, "unknown channel kind");
                continue;
            };
            let Some(sender) = senders.get(kind) else {
                error!(channel = channel.id, kind = %channel.kind, "no sender registered for channel kind");
                continue;
            };

            let mut surviving = Vec::new();
            for change in &matching {
                if !already_sent(db, channel.id, &change.slot_key()).await? {
                    surviving.push(*change);
                }
            }
            if surviving.is_empty() {
                continue;
            }

            let message = render_message(&surviving);
            match sender.send(&channel.destination, &message).await {
                Ok(()) => {
                    for change in &surviving {
                        record_sent(db, channel.id, &change.slot_key(), now).await?;
                    }
                    notified += 1;
                }
                Err(err) => {
                    warn!(channel = channel.id, watch = watch.id, %err, "channel send failed");
                }
            }
        }
    }

    Ok(notified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::get_db_pool;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use tokio::sync::Mutex;

    struct RecordingSender {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingSender {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChannelSender for RecordingSender {
        async fn send(&self, destination: &str, message: &str) -> Result<()> {
            self.sent
                .lock()
                .await
                .push((destination.to_string(), message.to_string()));
            Ok(())
        }
    }

    struct FailingSender;

    #[async_trait]
    impl ChannelSender for FailingSender {
        async fn send(&self, _destination: &str, _message: &str) -> Result<()> {
            Err(anyhow!("delivery refused"))
        }
    }

    // 2025-06-09 is a Monday.
    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 9).unwrap()
    }

    fn change(date: NaiveDate, time_label: &str) -> SlotChange {
        SlotChange {
            venue_id: 1,
            venue_slug: "v1".to_string(),
            venue_name: "Venue One".to_string(),
            date,
            time_label: time_label.to_string(),
            court: "Court 1".to_string(),
            price: None,
        }
    }

    fn watch(venue_id: Option<i64>, day: &str, times: &[&str]) -> Watch {
        let mut day_times = HashMap::new();
        day_times.insert(day.to_string(), times.iter().map(|t| t.to_string()).collect());
        Watch {
            id: 1,
            user_id: 1,
            venue_id,
            day_times,
        }
    }

    #[test]
    fn matches_on_day_and_time_label() {
        let w = watch(None, "monday", &["6pm"]);
        assert!(watch_matches(&w, &change(monday(), "6pm")));
        assert!(watch_matches(&w, &change(monday(), "  6PM ")));
        assert!(!watch_matches(&w, &change(monday(), "7pm")));
        // Tuesday
        assert!(!watch_matches(&w, &change(monday().succ_opt().unwrap(), "6pm")));
    }

    #[test]
    fn venue_filter_must_match_when_set() {
        let any_venue = watch(None, "monday", &["6pm"]);
        let this_venue = watch(Some(1), "monday", &["6pm"]);
        let other_venue = watch(Some(2), "monday", &["6pm"]);
        let c = change(monday(), "6pm");
        assert!(watch_matches(&any_venue, &c));
        assert!(watch_matches(&this_venue, &c));
        assert!(!watch_matches(&other_venue, &c));
    }

    async fn seed(db: &Pool<Sqlite>) {
        sqlx::query("INSERT INTO venues (slug, name, url) VALUES ('v1', 'Venue One', 'http://v1')")
            .execute(db)
            .await
            .unwrap();
        sqlx::query("INSERT INTO users (name) VALUES ('alice')")
            .execute(db)
            .await
            .unwrap();
        sqlx::query(
            r#"INSERT INTO watches (user_id, venue_id, day_times, active)
               VALUES (1, NULL, '{"monday": ["6pm"]}', true)"#,
        )
        .execute(db)
        .await
        .unwrap();
    }

    async fn seed_channel(db: &Pool<Sqlite>, kind: &str, destination: &str) -> i64 {
        sqlx::query("INSERT INTO notification_channels (user_id, kind, destination, active) VALUES (1, ?, ?, true)")
            .bind(kind)
            .bind(destination)
            .execute(db)
            .await
            .unwrap()
            .last_insert_rowid()
    }

    fn now() -> NaiveDateTime {
        monday().and_hms_opt(9, 0, 0).unwrap()
    }

    async fn log_count(db: &Pool<Sqlite>) -> i64 {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notification_log")
            .fetch_one(db)
            .await
            .unwrap();
        count
    }

    #[tokio::test]
    async fn second_notify_is_deduplicated() {
        let db = get_db_pool("sqlite::memory:").await.unwrap();
        seed(&db).await;
        seed_channel(&db, "chat", "https://chat.example/hook").await;

        let sender = RecordingSender::new();
        let senders = Senders::new().with(ChannelKind::Chat, sender.clone());
        let changes = vec![change(monday(), "6pm")];

        assert_eq!(notify(&db, &senders, &changes, now()).await.unwrap(), 1);
        assert_eq!(notify(&db, &senders, &changes, now()).await.unwrap(), 0);

        assert_eq!(sender.sent.lock().await.len(), 1);
        assert_eq!(log_count(&db).await, 1);
    }

    #[tokio::test]
    async fn simultaneous_changes_are_batched_into_one_message() {
        let db = get_db_pool("sqlite::memory:").await.unwrap();
        seed(&db).await;
        sqlx::query(
            r#"UPDATE watches SET day_times = '{"monday": ["6pm", "7pm"]}'"#,
        )
        .execute(&db)
        .await
        .unwrap();
        seed_channel(&db, "chat", "https://chat.example/hook").await;

        let sender = RecordingSender::new();
        let senders = Senders::new().with(ChannelKind::Chat, sender.clone());
        let changes = vec![change(monday(), "6pm"), change(monday(), "7pm")];

        assert_eq!(notify(&db, &senders, &changes, now()).await.unwrap(), 1);

        let sent = sender.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("6pm"));
        assert!(sent[0].1.contains("7pm"));
        assert_eq!(log_count(&db).await, 2);
    }

    #[tokio::test]
    async fn send_failure_leaves_other_channels_working_and_enables_retry() {
        let db = get_db_pool("sqlite::memory:").await.unwrap();
        seed(&db).await;
        let failing_id = seed_channel(&db, "email", "alice@example.com").await;
        seed_channel(&db, "chat", "https://chat.example/hook").await;

        let recording = RecordingSender::new();
        let senders = Senders::new()
            .with(ChannelKind::Email, Arc::new(FailingSender))
            .with(ChannelKind::Chat, recording.clone());
        let changes = vec![change(monday(), "6pm")];

        assert_eq!(notify(&db, &senders, &changes, now()).await.unwrap(), 1);
        assert_eq!(recording.sent.lock().await.len(), 1);

        // No log entry for the failed channel, so it is retried next pass.
        assert_eq!(log_count(&db).await, 1);
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM notification_log WHERE channel_id = ?")
                .bind(failing_id)
                .fetch_one(&db)
                .await
                .unwrap();
        assert_eq!(count, 0);

        let senders = Senders::new()
            .with(ChannelKind::Email, RecordingSender::new())
            .with(ChannelKind::Chat, recording.clone());
        assert_eq!(notify(&db, &senders, &changes, now()).await.unwrap(), 1);
        assert_eq!(log_count(&db).await, 2);
        // The chat channel was not re-sent.
        assert_eq!(recording.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn unknown_channel_kind_is_skipped() {
        let db = get_db_pool("sqlite::memory:").await.unwrap();
        seed(&db).await;
        seed_channel(&db, "pigeon", "rooftop").await;

        let senders = Senders::new();
        let changes = vec![change(monday(), "6pm")];

        assert_eq!(notify(&db, &senders, &changes, now()).await.unwrap(), 0);
        assert_eq!(log_count(&db).await, 0);
    }

    #[tokio::test]
    async fn inactive_watch_never_notifies() {
        let db = get_db_pool("sqlite::memory:").await.unwrap();
        seed(&db).await;
        sqlx::query("UPDATE watches SET active = false")
            .execute(&db)
            .await
            .unwrap();
        seed_channel(&db, "chat", "https://chat.example/hook").await;

        let sender = RecordingSender::new();
        let senders = Senders::new().with(ChannelKind::Chat, sender.clone());
        let changes = vec![change(monday(), "6pm")];

        assert_eq!(notify(&db, &senders, &changes, now()).await.unwrap(), 0);
        assert!(sender.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn legacy_weekday_preferences_match_after_expansion() {
        let db = get_db_pool("sqlite::memory:").await.unwrap();
        seed(&db).await;
        sqlx::query(
            r#"UPDATE watches SET day_times = NULL, weekday_times = '["6pm"]'"#,
        )
        .execute(&db)
        .await
        .unwrap();
        seed_channel(&db, "chat", "https://chat.example/hook").await;

        let sender = RecordingSender::new();
        let senders = Senders::new().with(ChannelKind::Chat, sender.clone());
        let changes = vec![change(monday(), "6pm")];

        assert_eq!(notify(&db, &senders, &changes, now()).await.unwrap(), 1);
    }
}
