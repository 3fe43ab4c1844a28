pub mod models;
pub mod store_error;
pub mod test_utils;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use std::path::Path;
use tracing::debug;
use util::config::AppConfig;

/// Opens the configured database.
///
/// `DATABASE_PATH` may be a full DSN or a plain SQLite file path; for a file
/// path the parent directory is created and the file is opened in create mode.
pub async fn connect() -> Result<DatabaseConnection, DbErr> {
    let path_or_url = AppConfig::global().database_path.clone();
    let url = database_url(&path_or_url)?;

    debug!(sqlite = url.starts_with("sqlite:"), "Connecting to database");
    let mut options = ConnectOptions::new(url);
    options.sqlx_logging(false);
    Database::connect(options).await
}

/// Resolves `DATABASE_PATH` into a connection URL, creating the parent
/// directory of a SQLite file path.
pub fn database_url(path_or_url: &str) -> Result<String, DbErr> {
    if path_or_url.starts_with("sqlite:") || path_or_url.starts_with("postgres://") {
        return Ok(path_or_url.to_owned());
    }

    // SQLite won't create intermediate dirs.
    if let Some(parent) = Path::new(path_or_url).parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            DbErr::Custom(format!(
                "Failed to create database directory {}: {e}",
                parent.display()
            ))
        })?;
    }
    Ok(format!("sqlite://{path_or_url}?mode=rwc"))
}
