use std::collections::HashMap;

use anyhow::{anyhow, Result};
use chrono::{NaiveDate, NaiveDateTime, Weekday};
use serde::Deserialize;
use sqlx::FromRow;

/// Last-observed bookability of a slot, as reported by the venue platforms.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Available,
    Booked,
    Closed,
    Coaching,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Available => "available",
            SlotStatus::Booked => "booked",
            SlotStatus::Closed => "closed",
            SlotStatus::Coaching => "coaching",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "available" => Ok(SlotStatus::Available),
            "booked" => Ok(SlotStatus::Booked),
            "closed" => Ok(SlotStatus::Closed),
            "coaching" => Ok(SlotStatus::Coaching),
            other => Err(anyhow!("unknown slot status: '{}'", other)),
        }
    }
}

/// One slot observation as returned by a fetch strategy.
#[derive(Clone, Debug, Deserialize)]
pub struct RawSlot {
    pub venue_slug: String,
    pub date: NaiveDate,
    pub time_label: String,
    pub court: String,
    pub status: SlotStatus,
    pub price: Option<String>,
}

/// A detected transition of a slot from unavailable to available.
/// Lives only for the duration of one pass.
#[derive(Clone, Debug, PartialEq)]
pub struct SlotChange {
    pub venue_id: i64,
    pub venue_slug: String,
    pub venue_name: String,
    pub date: NaiveDate,
    pub time_label: String,
    pub court: String,
    pub price: Option<String>,
}

impl SlotChange {
    pub fn slot_key(&self) -> String {
        slot_key(&self.venue_slug, self.date, &self.time_label, &self.court)
    }
}

/// Deduplication key for the notification log.
pub fn slot_key(venue_slug: &str, date: NaiveDate, time_label: &str, court: &str) -> String {
    format!("{}:{}:{}:{}", venue_slug, date, time_label, court)
}

#[derive(Debug, FromRow, PartialEq)]
pub struct ScrapeTarget {
    pub venue_slug: String,
    pub date: NaiveDate,
    pub last_scraped_at: Option<NaiveDateTime>,
    pub next_scrape_at: Option<NaiveDateTime>,
}

/// A user's standing subscription, with the legacy weekday/weekend lists
/// already expanded into the canonical per-day map.
#[derive(Clone, Debug)]
pub struct Watch {
    pub id: i64,
    pub user_id: i64,
    pub venue_id: Option<i64>,
    pub day_times: HashMap<String, Vec<String>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Email,
    Chat,
}

impl ChannelKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email" => Some(ChannelKind::Email),
            "chat" => Some(ChannelKind::Chat),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, FromRow)]
pub struct NotificationChannel {
    pub id: i64,
    pub user_id: i64,
    pub kind: String,
    pub destination: String,
}

/// Counters for one orchestration pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassResult {
    pub fetched: usize,
    pub failed: usize,
    pub changes: usize,
    pub notified: usize,
}

pub fn day_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// Builds the canonical per-day map from the stored JSON columns. The
/// legacy representation keeps two flat lists instead of a per-day map;
/// when only those are present, the weekday list is replicated across
/// Mon-Fri and the weekend list across Sat-Sun.
pub fn canonical_day_times(
    day_times: Option<&str>,
    weekday_times: Option<&str>,
    weekend_times: Option<&str>,
) -> Result<HashMap<String, Vec<String>>> {
    if let Some(json) = day_times {
        return Ok(serde_json::from_str(json)?);
    }

    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    if let Some(json) = weekday_times {
        let times: Vec<String> = serde_json::from_str(json)?;
        if !times.is_empty() {
            for day in ["monday", "tuesday", "wednesday", "thursday", "friday"] {
                map.insert(day.to_string(), times.clone());
            }
        }
    }
    if let Some(json) = weekend_times {
        let times: Vec<String> = serde_json::from_str(json)?;
        if !times.is_empty() {
            for day in ["saturday", "sunday"] {
                map.insert(day.to_string(), times.clone());
            }
        }
    }

    Ok(map)
}
