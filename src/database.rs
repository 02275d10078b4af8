use std::str::FromStr;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};

pub async fn get_db_pool(db_path: &str) -> Result<Pool<Sqlite>> {
    // Create the database if it doesn't exist
    // https://www.sqlite.org/c3ref/open.html
    let options = SqliteConnectOptions::from_str(db_path)?.create_if_missing(true);

    // A single connection keeps passes serialized and makes
    // `sqlite::memory:` pools behave as one database in tests.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}
