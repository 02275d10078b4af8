use std::fs::File;
use std::io::Read;

use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub venues: Vec<VenueConfig>,
    pub db_path: Option<String>,
    pub poll_sleep_secs: Option<u64>,
    pub horizon_days: Option<i64>,
    pub cutoff_hour: Option<u32>,
    pub max_concurrent_fetches: Option<usize>,
    pub fetch_stagger_ms: Option<u64>,
    pub failure_alert_threshold: Option<f64>,
    pub mail_api_url: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct VenueConfig {
    pub slug: String,
    pub name: String,
    pub url: String,
}

pub async fn read_config_file(path: String) -> Result<Config> {
    let mut config_file = File::open(path)?;
    let mut config_string = String::new();

    config_file.read_to_string(&mut config_string)?;

    Ok(toml::from_str(&config_string)?)
}
