use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use db::models::attendance::AttendanceKey;
use services::attendance_key::KeyGenerator;

/// Hands out queued codes in order, then falls back to numbered codes so a
/// test only has to script the candidates it cares about.
pub struct ScriptedKeys {
    queue: Mutex<VecDeque<String>>,
    issued: Mutex<u32>,
    lifetime: Duration,
}

impl ScriptedKeys {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            issued: Mutex::new(0),
            lifetime,
        }
    }

    pub fn push<I, S>(&self, codes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queue
            .lock()
            .unwrap()
            .extend(codes.into_iter().map(Into::into));
    }

    /// Number of candidates generated so far.
    pub fn issued(&self) -> u32 {
        *self.issued.lock().unwrap()
    }
}

impl KeyGenerator for ScriptedKeys {
    fn generate(&self, now: DateTime<Utc>) -> AttendanceKey {
        let n = {
            let mut issued = self.issued.lock().unwrap();
            *issued += 1;
            *issued
        };
        let code = self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| format!("LARPAUTO{n:04}"));

        AttendanceKey {
            qr_code_key: code,
            key_invalid_at: now + self.lifetime,
        }
    }
}
