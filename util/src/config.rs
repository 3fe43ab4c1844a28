//! Global application configuration manager.
//!
//! `AppConfig` is a lazily initialized, globally accessible singleton containing
//! runtime configuration values loaded from environment variables. It provides
//! thread-safe access and mutation for testing or overrides in runtime environments.

use std::env;
use std::str::FromStr;
use std::sync::{OnceLock, RwLock};

/// Represents the complete application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: String,
    pub project_name: String,
    pub log_level: String,
    pub log_file: String,
    pub log_to_stdout: bool,
    pub database_path: String,
    /// Number of random symbols in an attendance key (header excluded).
    pub attendance_key_length: usize,
    pub attendance_key_lifetime_hours: i64,
    /// Constant prefix shown in front of every attendance key.
    pub attendance_key_header: String,
    /// Upper bound on key issuance attempts when generated keys collide.
    pub key_retry_max_attempts: u32,
    /// Cooldown after expiry before a key is released by the cleanup sweep.
    pub key_cleanup_grace_days: i64,
    pub key_cleanup_interval_minutes: u64,
}

/// Lazily-initialized, thread-safe singleton instance of `AppConfig`.
static CONFIG_INSTANCE: OnceLock<RwLock<AppConfig>> = OnceLock::new();

/// Reads `key` and parses it, falling back to `default` when unset or malformed.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    /// Loads the configuration from `.env` and environment variables.
    ///
    /// Every value has a default, so a bare environment yields a usable
    /// development configuration backed by `data/attendance.db`.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            env: env::var("APP_ENV").unwrap_or_else(|_| "development".into()),
            project_name: env::var("PROJECT_NAME").unwrap_or_else(|_| "attendance-core".into()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "services=info".into()),
            log_file: env::var("LOG_FILE").unwrap_or_else(|_| "attendance.log".into()),
            log_to_stdout: env::var("LOG_TO_STDOUT").unwrap_or_else(|_| "false".into()) == "true",
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "data/attendance.db".into()),
            attendance_key_length: env_or("ATTENDANCE_KEY_LENGTH", 8),
            attendance_key_lifetime_hours: env_or("ATTENDANCE_KEY_LIFETIME_HOURS", 24),
            attendance_key_header: env::var("ATTENDANCE_KEY_HEADER")
                .unwrap_or_else(|_| "LARP".into()),
            key_retry_max_attempts: env_or("KEY_RETRY_MAX_ATTEMPTS", 5),
            key_cleanup_grace_days: env_or("KEY_CLEANUP_GRACE_DAYS", 5),
            key_cleanup_interval_minutes: env_or("KEY_CLEANUP_INTERVAL_MINUTES", 60),
        }
    }

    /// Returns a shared reference to the global configuration.
    ///
    /// # Panics
    /// Panics if the lock cannot be acquired.
    pub fn global() -> std::sync::RwLockReadGuard<'static, AppConfig> {
        CONFIG_INSTANCE
            .get_or_init(|| RwLock::new(AppConfig::from_env()))
            .read()
            .expect("Failed to acquire AppConfig read lock")
    }

    /// Resets the configuration by reloading from environment variables.
    ///
    /// Useful in tests to clear overrides.
    pub fn reset() {
        if let Some(lock) = CONFIG_INSTANCE.get() {
            let mut guard = lock.write().expect("Failed to acquire AppConfig write lock");
            *guard = AppConfig::from_env();
        }
    }

    /// Generic internal setter for any field in the config.
    ///
    /// Used by public per-field setter methods.
    fn set_field<F>(setter: F)
    where
        F: FnOnce(&mut AppConfig),
    {
        let lock = CONFIG_INSTANCE.get_or_init(|| RwLock::new(AppConfig::from_env()));
        let mut guard = lock
            .write()
            .expect("Failed to acquire AppConfig write lock");
        setter(&mut guard);
    }

    // --- Per-field setters below ---

    pub fn set_log_level(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.log_level = value.into());
    }

    pub fn set_log_to_stdout(value: bool) {
        AppConfig::set_field(|cfg| cfg.log_to_stdout = value);
    }

    pub fn set_database_path(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.database_path = value.into());
    }

    pub fn set_attendance_key_length(value: usize) {
        AppConfig::set_field(|cfg| cfg.attendance_key_length = value);
    }

    pub fn set_attendance_key_lifetime_hours(value: i64) {
        AppConfig::set_field(|cfg| cfg.attendance_key_lifetime_hours = value);
    }

    pub fn set_attendance_key_header(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.attendance_key_header = value.into());
    }

    pub fn set_key_retry_max_attempts(value: u32) {
        AppConfig::set_field(|cfg| cfg.key_retry_max_attempts = value);
    }

    pub fn set_key_cleanup_grace_days(value: i64) {
        AppConfig::set_field(|cfg| cfg.key_cleanup_grace_days = value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn defaults_apply_when_unset() {
        unsafe {
            env::remove_var("ATTENDANCE_KEY_LENGTH");
            env::remove_var("KEY_RETRY_MAX_ATTEMPTS");
        }
        let cfg = AppConfig::from_env();
        assert_eq!(cfg.attendance_key_length, 8);
        assert_eq!(cfg.key_retry_max_attempts, 5);
    }

    #[test]
    #[serial]
    fn malformed_numbers_fall_back_to_defaults() {
        unsafe {
            env::set_var("ATTENDANCE_KEY_LIFETIME_HOURS", "soon");
            env::set_var("KEY_CLEANUP_GRACE_DAYS", " 7 ");
        }
        let cfg = AppConfig::from_env();
        assert_eq!(cfg.attendance_key_lifetime_hours, 24);
        assert_eq!(cfg.key_cleanup_grace_days, 7);
        unsafe {
            env::remove_var("ATTENDANCE_KEY_LIFETIME_HOURS");
            env::remove_var("KEY_CLEANUP_GRACE_DAYS");
        }
    }

    #[test]
    #[serial]
    fn setters_override_global() {
        AppConfig::set_attendance_key_header("TEST");
        assert_eq!(AppConfig::global().attendance_key_header, "TEST");
        AppConfig::reset();
    }
}
