use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use sqlx::{Pool, Sqlite};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use courtcruncher::prelude::*;

#[derive(Parser, Debug)]
#[command(version)]
struct Opts {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "courtcruncher.toml")]
    config: String,

    /// Log notifications instead of delivering them
    #[arg(long)]
    dry_run: bool,
}

async fn upsert_venues(db: &Pool<Sqlite>, venues: &[VenueConfig]) -> Result<()> {
    for venue in venues {
        sqlx::query(
            r#"
            INSERT INTO venues (slug, name, url)
            VALUES (?, ?, ?)
            ON CONFLICT (slug) DO UPDATE SET name = excluded.name, url = excluded.url
            "#,
        )
        .bind(&venue.slug)
        .bind(&venue.name)
        .bind(&venue.url)
        .execute(db)
        .await?;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let opts = Opts::parse();
    let config = read_config_file(opts.config).await?;

    let db_path = std::env::var("DATABASE_URL").unwrap_or_else(|_| {
        config
            .db_path
            .clone()
            .unwrap_or_else(|| "courtcruncher.sqlite3".to_string())
    });
    let db = get_db_pool(&db_path).await?;

    upsert_venues(&db, &config.venues).await?;
    info!(venues = config.venues.len(), "tracking venues");

    let fetcher: Arc<dyn SlotFetcher> = Arc::new(HttpJsonFetcher::new(&config.venues));
    let senders = if opts.dry_run {
        Senders::new()
            .with(ChannelKind::Chat, Arc::new(NoopSender))
            .with(ChannelKind::Email, Arc::new(NoopSender))
    } else {
        let mut senders = Senders::new().with(ChannelKind::Chat, Arc::new(WebhookSender::new()));
        if let Some(mail_api_url) = config.mail_api_url.clone() {
            senders =
                senders.with(ChannelKind::Email, Arc::new(MailApiSender::new(mail_api_url)));
        }
        senders
    };

    let runner_config = RunnerConfig {
        horizon_days: config.horizon_days.unwrap_or(8),
        cutoff_hour: config.cutoff_hour.unwrap_or(18),
        max_concurrent_fetches: config.max_concurrent_fetches.unwrap_or(4),
        fetch_stagger_ms: config.fetch_stagger_ms.unwrap_or(150),
        failure_alert_threshold: config.failure_alert_threshold.unwrap_or(0.5),
    };
    let poll_sleep = Duration::from_secs(config.poll_sleep_secs.unwrap_or(600));

    loop {
        let now = Local::now().naive_local();
        match run_pass(&db, Arc::clone(&fetcher), &senders, &LogAlert, &runner_config, now).await {
            Ok(result) => info!(?result, "pass finished"),
            Err(err) => error!(%err, "pass aborted"),
        }

        tokio::time::sleep(poll_sleep).await;
    }
}
