//! Periodic sweep releasing attendance keys that expired longer ago than the
//! configured grace period. Pass `--once` to run a single sweep and exit.

use std::{env, time::Duration};

use common::logger::init_logging;
use services::attendance_service::AttendanceService;
use tracing::{error, info};
use util::config::AppConfig;

#[tokio::main]
async fn main() {
    let config = AppConfig::global().clone();
    let _log_guard = init_logging(
        "logs",
        &config.log_file,
        &config.log_level,
        config.log_to_stdout,
    );

    let db = match db::connect().await {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "Failed to connect to {}", config.database_path);
            std::process::exit(1);
        }
    };

    let service = match AttendanceService::from_config(db) {
        Ok(service) => service,
        Err(e) => {
            error!(error = %e, "Invalid attendance configuration");
            std::process::exit(1);
        }
    };

    if env::args().any(|arg| arg == "--once") {
        if let Err(e) = service.clean().await {
            error!(error = %e, "Key cleanup failed");
            std::process::exit(1);
        }
        return;
    }

    let period = Duration::from_secs(config.key_cleanup_interval_minutes.max(1) * 60);
    info!(
        project = %config.project_name,
        env = %config.env,
        interval_minutes = config.key_cleanup_interval_minutes,
        "Starting attendance key cleanup loop"
    );

    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Failures are logged by the service; the next tick tries again.
                let _ = service.clean().await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down attendance key cleanup loop");
                break;
            }
        }
    }
}
