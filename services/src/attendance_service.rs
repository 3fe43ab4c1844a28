//! Attendance keys and completions.
//!
//! An attendee asks for a key for an event they are enrolled in, a different
//! user (the signer) redeems it, and the redeem creates the durable
//! [`completion`] record linked back to the attendance row. Each mutating call
//! is one transaction; key issuance is one atomic upsert per attempt so that no
//! lock is held across retries.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use db::models::{
    attendance::{self, AttendanceKey, QR_CODE_KEY_COLUMN},
    completion, group_member,
    program_event::NULL_EVENT_ID,
};
use sea_orm::{DatabaseConnection, DatabaseTransaction, EntityTrait, TransactionTrait};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use util::config::AppConfig;
use uuid::Uuid;

use crate::attendance_key::{AttendanceKeyOptions, KeyGenerator, RandomKeyGenerator};
use crate::error::ServiceError;
use crate::retry::{RetryError, RetryPolicy};

pub use db::models::attendance::Model as Attendance;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// A completion created by a redeem, with the attendance it was linked to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendedCreated {
    pub completion_id: Uuid,
    pub user_id: Uuid,
    pub event_id: i64,
}

/// Successful result of a redeem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CompletionOutcome {
    Created(AttendedCreated),
    /// The attendance was already linked; carries the existing completion id.
    AlreadyCompleted(Uuid),
}

impl CompletionOutcome {
    pub fn completion_id(&self) -> Uuid {
        match self {
            CompletionOutcome::Created(created) => created.completion_id,
            CompletionOutcome::AlreadyCompleted(id) => *id,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            CompletionOutcome::Created(_) => 201,
            CompletionOutcome::AlreadyCompleted(_) => 200,
        }
    }
}

#[derive(Clone)]
pub struct AttendanceService {
    db: DatabaseConnection,
    keys: Arc<dyn KeyGenerator>,
    retry: RetryPolicy,
    cleanup_grace: Duration,
    clock: Clock,
}

fn log_fatal(operation: &'static str) -> impl Fn(&ServiceError) {
    move |err: &ServiceError| {
        if let ServiceError::Database(e) = err {
            error!(operation, error = %e, "Attendance store failure");
        }
    }
}

fn require_user(id: Uuid, what: &str) -> Result<(), ServiceError> {
    if id.is_nil() {
        return Err(ServiceError::BadRequest(format!("{what} id is required")));
    }
    Ok(())
}

fn require_event(event_id: i64) -> Result<(), ServiceError> {
    if event_id == NULL_EVENT_ID {
        return Err(ServiceError::BadRequest("Event id is required".into()));
    }
    Ok(())
}

impl AttendanceService {
    pub fn new(db: DatabaseConnection, options: AttendanceKeyOptions, retry: RetryPolicy) -> Self {
        Self {
            db,
            keys: Arc::new(RandomKeyGenerator::new(options)),
            retry,
            cleanup_grace: Duration::days(5),
            clock: Arc::new(Utc::now),
        }
    }

    pub fn from_config(db: DatabaseConnection) -> Result<Self, ServiceError> {
        let options = AttendanceKeyOptions::from_config()?;
        let retry = RetryPolicy::from_config()?;
        let grace = Duration::days(AppConfig::global().key_cleanup_grace_days);
        Ok(Self::new(db, options, retry).with_cleanup_grace(grace))
    }

    pub fn with_key_generator(mut self, keys: Arc<dyn KeyGenerator>) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_cleanup_grace(mut self, grace: Duration) -> Self {
        self.cleanup_grace = grace;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    // ↓↓↓ KEY ISSUANCE ↓↓↓

    /// Issues a key for the (user, event) pair, creating the pending attendance
    /// on first use and rotating its key on every later call.
    ///
    /// Fails with `BadRequest` when the user is not enrolled in the event's
    /// program (or the event is cancelled) and when the attendance is already
    /// completed. Key collisions are retried up to the policy bound, after which
    /// the call fails with `Conflict` and may be repeated as is.
    pub async fn request_key(
        &self,
        user_id: Uuid,
        event_id: i64,
    ) -> Result<AttendanceKey, ServiceError> {
        require_user(user_id, "User")?;
        require_event(event_id)?;

        let issued = self
            .retry
            .run(QR_CODE_KEY_COLUMN, |attempt| {
                self.try_issue_key(user_id, event_id, attempt)
            })
            .await;

        match issued {
            Ok(key) => {
                info!(%user_id, event_id, invalid_at = %key.key_invalid_at, "Attendance key issued");
                Ok(key)
            }
            Err(RetryError::Exhausted { attempts }) => {
                warn!(%user_id, event_id, attempts, "Attendance key generation gave up");
                Err(ServiceError::Conflict(
                    "Key generation failed, retry with same parameters.".into(),
                ))
            }
            Err(RetryError::Failed(err)) => {
                log_fatal("request_key")(&err);
                Err(err)
            }
        }
    }

    /// One issuance attempt. The upsert is a single statement, so it commits or
    /// aborts on its own and never upgrades a read lock to a write lock.
    async fn try_issue_key(
        &self,
        user_id: Uuid,
        event_id: i64,
        attempt: u32,
    ) -> Result<AttendanceKey, ServiceError> {
        let now = self.now();

        if !group_member::Model::is_enrolled_for_event(&self.db, user_id, event_id).await? {
            return Err(ServiceError::BadRequest(
                "User is not enrolled in the program of this event".into(),
            ));
        }

        let candidate = self.keys.generate(now);
        debug!(%user_id, event_id, attempt, "Trying attendance key candidate");

        attendance::Model::upsert_key(&self.db, user_id, event_id, &candidate, now)
            .await?
            .ok_or_else(|| ServiceError::BadRequest("Attendance is already completed".into()))
    }

    // ↓↓↓ COMPLETION ↓↓↓

    /// Redeems `key` on behalf of `signer_id`.
    ///
    /// A matching live key is burned whatever happens next. Unknown, expired and
    /// already burned keys as well as the signer's own key all fail with the
    /// same `NotFound`.
    pub async fn complete_by_key(
        &self,
        key: &str,
        signer_id: Uuid,
        completed_at: DateTime<Utc>,
    ) -> Result<CompletionOutcome, ServiceError> {
        if key.trim().is_empty() {
            return Err(ServiceError::BadRequest("Attendance key is required".into()));
        }
        require_user(signer_id, "Signer")?;

        self.redeem_key(key, signer_id, completed_at)
            .await
            .inspect_err(log_fatal("complete_by_key"))
    }

    async fn redeem_key(
        &self,
        key: &str,
        signer_id: Uuid,
        completed_at: DateTime<Utc>,
    ) -> Result<CompletionOutcome, ServiceError> {
        let now = self.now();
        let txn = self.db.begin().await?;

        let Some(burned) = attendance::Model::burn_key(&txn, key, signer_id, now).await? else {
            debug!(%signer_id, "Attendance key redeem rejected");
            return Err(ServiceError::NotFound(
                "Attendance key not found or expired".into(),
            ));
        };

        if let Some(existing) = burned.completion_id {
            txn.commit().await?;
            info!(
                user_id = %burned.user_id,
                event_id = burned.program_event_id,
                completion_id = %existing,
                "Attendance already completed"
            );
            return Ok(CompletionOutcome::AlreadyCompleted(existing));
        }

        let outcome = self
            .create_and_link(
                &txn,
                burned.user_id,
                burned.program_event_id,
                signer_id,
                completed_at,
                now,
            )
            .await?;
        txn.commit().await?;

        info!(
            user_id = %burned.user_id,
            event_id = burned.program_event_id,
            %signer_id,
            completion_id = %outcome.completion_id(),
            "Attendance completed by key"
        );
        Ok(outcome)
    }

    /// Completes the (user, event) attendance without a presented key.
    ///
    /// Any key the attendance still carries is invalidated as part of the link.
    pub async fn complete_direct(
        &self,
        user_id: Uuid,
        event_id: i64,
        signer_id: Uuid,
        completed_at: DateTime<Utc>,
    ) -> Result<CompletionOutcome, ServiceError> {
        require_user(user_id, "User")?;
        require_event(event_id)?;
        require_user(signer_id, "Signer")?;
        if signer_id == user_id {
            return Err(ServiceError::BadRequest(
                "Signer cannot complete their own attendance".into(),
            ));
        }

        self.redeem_direct(user_id, event_id, signer_id, completed_at)
            .await
            .inspect_err(log_fatal("complete_direct"))
    }

    async fn redeem_direct(
        &self,
        user_id: Uuid,
        event_id: i64,
        signer_id: Uuid,
        completed_at: DateTime<Utc>,
    ) -> Result<CompletionOutcome, ServiceError> {
        let now = self.now();
        let txn = self.db.begin().await?;

        let Some(existing) = attendance::Model::find_by_pair(&txn, user_id, event_id).await? else {
            return Err(ServiceError::NotFound("Attendance not found".into()));
        };

        if let Some(completion_id) = existing.completion_id {
            info!(%user_id, event_id, %completion_id, "Attendance already completed");
            return Ok(CompletionOutcome::AlreadyCompleted(completion_id));
        }

        let outcome = self
            .create_and_link(&txn, user_id, event_id, signer_id, completed_at, now)
            .await?;
        txn.commit().await?;

        info!(
            %user_id,
            event_id,
            %signer_id,
            completion_id = %outcome.completion_id(),
            "Attendance completed directly"
        );
        Ok(outcome)
    }

    /// Creates the completion and links it to the pending attendance. If the
    /// attendance got linked in the meantime, the new completion is dropped and
    /// the existing one is reported instead.
    async fn create_and_link(
        &self,
        txn: &DatabaseTransaction,
        user_id: Uuid,
        event_id: i64,
        signer_id: Uuid,
        completed_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<CompletionOutcome, ServiceError> {
        let created =
            completion::Model::create_for_signer(txn, Uuid::now_v7(), signer_id, completed_at, now)
                .await?;

        if attendance::Model::link_completion(txn, user_id, event_id, created.id, now).await? {
            return Ok(CompletionOutcome::Created(AttendedCreated {
                completion_id: created.id,
                user_id,
                event_id,
            }));
        }

        completion::Entity::delete_by_id(created.id).exec(txn).await?;
        match attendance::Model::find_by_pair(txn, user_id, event_id)
            .await?
            .and_then(|a| a.completion_id)
        {
            Some(existing) => Ok(CompletionOutcome::AlreadyCompleted(existing)),
            None => Err(ServiceError::NotFound("Attendance not found".into())),
        }
    }

    /// Deletes the completion of the (user, event) attendance and returns it to
    /// the pending state. The burned key is not restored. Returns the number of
    /// completions removed.
    pub async fn uncomplete(&self, user_id: Uuid, event_id: i64) -> Result<u64, ServiceError> {
        require_user(user_id, "User")?;
        require_event(event_id)?;

        self.remove_completion(user_id, event_id)
            .await
            .inspect_err(log_fatal("uncomplete"))
    }

    async fn remove_completion(&self, user_id: Uuid, event_id: i64) -> Result<u64, ServiceError> {
        let now = self.now();
        let txn = self.db.begin().await?;
        let removed = completion::Model::delete_for_attendance(&txn, user_id, event_id, now).await?;
        txn.commit().await?;

        info!(%user_id, event_id, removed, "Attendance uncompleted");
        Ok(removed)
    }

    // ↓↓↓ HOUSEKEEPING ↓↓↓

    /// Neutralises keys whose expiry lies further back than the cleanup grace.
    /// Returns the number of keys released.
    pub async fn clean(&self) -> Result<u64, ServiceError> {
        let cutoff = self.now() - self.cleanup_grace;
        let released = attendance::Model::release_expired_keys(&self.db, cutoff)
            .await
            .map_err(ServiceError::from)
            .inspect_err(log_fatal("clean"))?;

        info!(released, %cutoff, "Expired attendance keys released");
        Ok(released)
    }

    pub async fn get(
        &self,
        user_id: Uuid,
        event_id: i64,
    ) -> Result<Option<Attendance>, ServiceError> {
        attendance::Model::find_by_pair(&self.db, user_id, event_id)
            .await
            .map_err(ServiceError::from)
            .inspect_err(log_fatal("get"))
    }
}
