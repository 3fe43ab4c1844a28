use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use db::models::{
    attendance, completion, group, group_member, program, program_event, program_section,
    signature, user,
};
use db::test_utils::setup_test_db;
use sea_orm::{DatabaseConnection, EntityTrait};
use services::{
    attendance_key::AttendanceKeyOptions, attendance_service::AttendanceService,
    retry::RetryPolicy,
};

use super::keys::ScriptedKeys;

pub struct TestCtx {
    pub db: DatabaseConnection,
    pub service: AttendanceService,
    pub keys: Arc<ScriptedKeys>,
    clock: Arc<Mutex<DateTime<Utc>>>,
    pub attendee: user::Model,
    pub other_attendee: user::Model,
    pub signer: user::Model,
    pub outsider: user::Model,
    pub event: program_event::Model,
    pub signature: signature::Model,
}

impl TestCtx {
    pub fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 1, 12, 0, 0).unwrap()
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.clock.lock().unwrap()
    }

    pub fn advance(&self, by: Duration) -> DateTime<Utc> {
        let mut clock = self.clock.lock().unwrap();
        *clock += by;
        *clock
    }

    pub async fn attendance(&self, user_id: uuid::Uuid) -> Option<attendance::Model> {
        attendance::Model::find_by_pair(&self.db, user_id, self.event.id)
            .await
            .unwrap()
    }

    pub async fn completion_count(&self) -> usize {
        completion::Entity::find().all(&self.db).await.unwrap().len()
    }
}

pub async fn setup(retry_budget: u32) -> TestCtx {
    setup_on(setup_test_db().await, retry_budget).await
}

/// Seeds one program with a single event; `attendee` and `other_attendee` are
/// enrolled through a group, `signer` and `outsider` are not. The signer has
/// one signature on file.
pub async fn setup_on(db: DatabaseConnection, retry_budget: u32) -> TestCtx {

    let attendee = user::Model::create(&db, "attendee").await.unwrap();
    let other_attendee = user::Model::create(&db, "other_attendee").await.unwrap();
    let signer = user::Model::create(&db, "signer").await.unwrap();
    let outsider = user::Model::create(&db, "outsider").await.unwrap();

    let program = program::Model::create(&db, "Freshman year", Some(2025))
        .await
        .unwrap();
    let section = program_section::Model::create(&db, program.id, "Orientation", 1)
        .await
        .unwrap();
    let event = program_event::Model::create(&db, section.id, "Campus tour", 10)
        .await
        .unwrap();
    let group = group::Model::create(&db, program.id, "Tutor group 7")
        .await
        .unwrap();
    group_member::Model::add(&db, group.id, attendee.id)
        .await
        .unwrap();
    group_member::Model::add(&db, group.id, other_attendee.id)
        .await
        .unwrap();

    let signature = signature::Model::create(&db, signer.id, "M 0 0 L 12 8 L 20 2")
        .await
        .unwrap();

    let keys = Arc::new(ScriptedKeys::new(Duration::hours(24)));
    let clock = Arc::new(Mutex::new(TestCtx::start()));
    let clock_handle = clock.clone();

    let service = AttendanceService::new(
        db.clone(),
        AttendanceKeyOptions::default(),
        RetryPolicy::new(retry_budget).unwrap(),
    )
    .with_key_generator(keys.clone())
    .with_clock(move || *clock_handle.lock().unwrap());

    TestCtx {
        db,
        service,
        keys,
        clock,
        attendee,
        other_attendee,
        signer,
        outsider,
        event,
        signature,
    }
}
