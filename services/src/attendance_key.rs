//! Attendance key generation.
//!
//! A key is a constant header followed by `key_length` symbols drawn uniformly
//! from [`KEY_ALPHABET`]. Collisions are rare but possible, so issuance wraps
//! generation in a [`crate::retry::RetryPolicy`].

use chrono::{DateTime, Duration, Utc};
use db::models::attendance::AttendanceKey;
use rand::{thread_rng, Rng};
use util::config::AppConfig;

use crate::error::ServiceError;

/// Upper-case letters and digits without the look-alikes `I`, `O` and `0`.
pub const KEY_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ123456789";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceKeyOptions {
    pub key_length: usize,
    pub lifetime: Duration,
    pub header: String,
}

impl Default for AttendanceKeyOptions {
    fn default() -> Self {
        Self {
            key_length: 8,
            lifetime: Duration::hours(24),
            header: "LARP".into(),
        }
    }
}

impl AttendanceKeyOptions {
    pub fn new(
        key_length: usize,
        lifetime_hours: i64,
        header: impl Into<String>,
    ) -> Result<Self, ServiceError> {
        if key_length == 0 {
            return Err(ServiceError::BadRequest(
                "Attendance key length must be positive".into(),
            ));
        }
        if lifetime_hours <= 0 {
            return Err(ServiceError::BadRequest(
                "Attendance key lifetime must be positive".into(),
            ));
        }

        Ok(Self {
            key_length,
            lifetime: Duration::hours(lifetime_hours),
            header: header.into(),
        })
    }

    pub fn from_config() -> Result<Self, ServiceError> {
        let config = AppConfig::global();
        Self::new(
            config.attendance_key_length,
            config.attendance_key_lifetime_hours,
            config.attendance_key_header.clone(),
        )
    }

    /// Length of a complete key, header included.
    pub fn full_key_length(&self) -> usize {
        self.header.chars().count() + self.key_length
    }
}

/// Source of candidate keys for issuance.
pub trait KeyGenerator: Send + Sync {
    fn generate(&self, now: DateTime<Utc>) -> AttendanceKey;
}

#[derive(Debug, Clone, Default)]
pub struct RandomKeyGenerator {
    options: AttendanceKeyOptions,
}

impl RandomKeyGenerator {
    pub fn new(options: AttendanceKeyOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &AttendanceKeyOptions {
        &self.options
    }
}

impl KeyGenerator for RandomKeyGenerator {
    fn generate(&self, now: DateTime<Utc>) -> AttendanceKey {
        let mut rng = thread_rng();
        let mut code = String::with_capacity(self.options.full_key_length());
        code.push_str(&self.options.header);
        code.extend(
            (0..self.options.key_length)
                .map(|_| KEY_ALPHABET[rng.gen_range(0..KEY_ALPHABET.len())] as char),
        );

        AttendanceKey {
            qr_code_key: code,
            key_invalid_at: now + self.options.lifetime,
        }
    }
}
