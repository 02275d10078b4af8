use core::fmt::Debug;
use std::collections::HashMap;
use std::fmt;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::config::VenueConfig;
use crate::models::RawSlot;

/// One scraping strategy. Implementations own everything platform-specific
/// (endpoints, parsing, proxies); the orchestrator only sees slots or an
/// error per (venue, date) target.
#[async_trait]
pub trait SlotFetcher: Send + Sync + 'static {
    async fn fetch(&self, venue_slug: &str, date: NaiveDate) -> Result<Vec<RawSlot>>;
}

impl Debug for dyn SlotFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot fetcher")
    }
}

/// Fetches a JSON array of raw slots from each venue's configured endpoint.
#[derive(Debug, Clone)]
pub struct HttpJsonFetcher {
    client: reqwest::Client,
    venue_urls: HashMap<String, String>,
}

impl HttpJsonFetcher {
    pub fn new(venues: &[VenueConfig]) -> Self {
        Self {
            client: reqwest::Client::new(),
            venue_urls: venues
                .iter()
                .map(|v| (v.slug.clone(), v.url.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl SlotFetcher for HttpJsonFetcher {
    async fn fetch(&self, venue_slug: &str, date: NaiveDate) -> Result<Vec<RawSlot>> {
        let url = self
            .venue_urls
            .get(venue_slug)
            .ok_or_else(|| anyhow!("no fetch url configured for venue '{}'", venue_slug))?;

        let response = self
            .client
            .get(url)
            .query(&[("date", date.to_string())])
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }
}
