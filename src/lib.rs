pub mod channel;
pub mod config;
pub mod database;
pub mod differ;
pub mod fetch;
pub mod models;
pub mod notification;
pub mod runner;
pub mod scheduler;

pub mod prelude {
    pub use crate::channel::{ChannelSender, MailApiSender, NoopSender, WebhookSender};
    pub use crate::config::{read_config_file, Config, VenueConfig};
    pub use crate::database::get_db_pool;
    pub use crate::differ::store_and_diff;
    pub use crate::fetch::{HttpJsonFetcher, SlotFetcher};
    pub use crate::models::{
        day_name, slot_key, ChannelKind, NotificationChannel, PassResult, RawSlot, ScrapeTarget,
        SlotChange, SlotStatus, Watch,
    };
    pub use crate::notification::{notify, Senders};
    pub use crate::runner::{run_pass, FailureAlert, LogAlert, RunnerConfig};
    pub use crate::scheduler::{
        due_targets, ensure_targets, interval_minutes, mark_scraped, prune_stale, DueTarget,
    };
}
