use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::{Expr, OnConflict, Query};
use sea_orm::FromQueryResult;
use serde::{Deserialize, Serialize};

use crate::store_error::UniqueColumn;

/// The globally unique key column. Unique violations reported on this column
/// mean a freshly generated key collided with a live one.
pub const QR_CODE_KEY_COLUMN: UniqueColumn = UniqueColumn::new("attendances", "qr_code_key");

/// Tracks one user's presence at one event.
///
/// A row is created lazily the first time the user asks for a key and stays
/// pending until a signer redeems the key (`completion_id` is then set and the
/// key is burned by moving `key_invalid_at` to the redeem instant).
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "attendances")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: Uuid,
    #[sea_orm(primary_key, auto_increment = false)]
    pub program_event_id: i64,
    #[sea_orm(unique)]
    pub completion_id: Option<Uuid>,
    #[sea_orm(unique)]
    pub qr_code_key: Option<String>,
    pub key_invalid_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    User,
    #[sea_orm(
        belongs_to = "super::program_event::Entity",
        from = "Column::ProgramEventId",
        to = "super::program_event::Column::Id",
        on_delete = "Cascade"
    )]
    Event,
    #[sea_orm(
        belongs_to = "super::completion::Entity",
        from = "Column::CompletionId",
        to = "super::completion::Column::Id",
        on_delete = "SetNull"
    )]
    Completion,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::program_event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Event.def()
    }
}

impl Related<super::completion::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Completion.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// A key as handed to the attendee: the code and the instant it stops being redeemable.
#[derive(Clone, Debug, PartialEq, Eq, FromQueryResult, Serialize, Deserialize)]
pub struct AttendanceKey {
    pub qr_code_key: String,
    pub key_invalid_at: DateTime<Utc>,
}

/// The row matched (and burned) by a keyed redeem.
#[derive(Clone, Debug, PartialEq, Eq, FromQueryResult)]
pub struct BurnedKey {
    pub user_id: Uuid,
    pub program_event_id: i64,
    pub completion_id: Option<Uuid>,
}

impl Model {
    pub fn is_completed(&self) -> bool {
        self.completion_id.is_some()
    }

    /// Whether the row carries a key that can still be redeemed at `now`.
    pub fn has_live_key(&self, now: DateTime<Utc>) -> bool {
        self.qr_code_key.is_some() && self.key_invalid_at > now
    }

    pub async fn find_by_pair<C>(
        db: &C,
        user_id: Uuid,
        event_id: i64,
    ) -> Result<Option<Self>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find_by_id((user_id, event_id)).one(db).await
    }

    /// Inserts a pending attendance carrying `key`, or rotates the key of the
    /// existing row for the (user, event) pair.
    ///
    /// Only `qr_code_key`, `key_invalid_at` and `updated_at` change on an
    /// existing row, and only while it is still pending: a completed row is left
    /// untouched and `None` is returned.
    ///
    /// A collision with another row's key surfaces as a unique violation on
    /// [`QR_CODE_KEY_COLUMN`].
    pub async fn upsert_key<C>(
        db: &C,
        user_id: Uuid,
        event_id: i64,
        key: &AttendanceKey,
        now: DateTime<Utc>,
    ) -> Result<Option<AttendanceKey>, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut insert = Query::insert();
        insert
            .into_table(Entity)
            .columns([
                Column::UserId,
                Column::ProgramEventId,
                Column::CompletionId,
                Column::QrCodeKey,
                Column::KeyInvalidAt,
                Column::CreatedAt,
                Column::UpdatedAt,
            ])
            .values([
                user_id.into(),
                event_id.into(),
                Option::<Uuid>::None.into(),
                key.qr_code_key.clone().into(),
                key.key_invalid_at.into(),
                now.into(),
                now.into(),
            ])
            .map_err(|e| DbErr::Custom(format!("Failed to build attendance upsert: {e}")))?
            .on_conflict(
                OnConflict::columns([Column::UserId, Column::ProgramEventId])
                    .update_columns([Column::QrCodeKey, Column::KeyInvalidAt, Column::UpdatedAt])
                    .action_and_where(Column::CompletionId.is_null())
                    .to_owned(),
            )
            .returning(Query::returning().columns([Column::QrCodeKey, Column::KeyInvalidAt]));

        AttendanceKey::find_by_statement(db.get_database_backend().build(&insert))
            .one(db)
            .await
    }

    /// Matches a live key not owned by `signer_id` and burns it in the same
    /// statement, returning the matched row.
    ///
    /// Unknown keys, expired keys and the signer's own key all produce `None`.
    /// Because the match and the burn are one statement, two concurrent
    /// redeemers can never both observe the key as live.
    pub async fn burn_key<C>(
        db: &C,
        key: &str,
        signer_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<BurnedKey>, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut update = Query::update();
        update
            .table(Entity)
            .values([(Column::KeyInvalidAt, now.into()), (Column::UpdatedAt, now.into())])
            .and_where(Column::QrCodeKey.eq(key))
            .and_where(Column::KeyInvalidAt.gt(now))
            .and_where(Column::UserId.ne(signer_id))
            .returning(Query::returning().columns([
                Column::UserId,
                Column::ProgramEventId,
                Column::CompletionId,
            ]));

        BurnedKey::find_by_statement(db.get_database_backend().build(&update))
            .one(db)
            .await
    }

    /// Links `completion_id` to the pending attendance of the pair and
    /// invalidates any key it still carries.
    ///
    /// Returns `false` when the pair is missing or already linked, in which case
    /// nothing was written.
    pub async fn link_completion<C>(
        db: &C,
        user_id: Uuid,
        event_id: i64,
        completion_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, DbErr>
    where
        C: ConnectionTrait,
    {
        let res = Entity::update_many()
            .col_expr(Column::CompletionId, Expr::value(completion_id))
            .col_expr(Column::KeyInvalidAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::UserId.eq(user_id))
            .filter(Column::ProgramEventId.eq(event_id))
            .filter(Column::CompletionId.is_null())
            .exec(db)
            .await?;

        Ok(res.rows_affected == 1)
    }

    /// Returns the attendance owning `completion_id` to the pending state.
    /// The burned key is not restored.
    pub async fn clear_completion<C>(
        db: &C,
        completion_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, DbErr>
    where
        C: ConnectionTrait,
    {
        let res = Entity::update_many()
            .col_expr(Column::CompletionId, Expr::value(Option::<Uuid>::None))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::CompletionId.eq(completion_id))
            .exec(db)
            .await?;

        Ok(res.rows_affected)
    }

    /// Releases every key that expired before `cutoff` by clearing the code.
    /// Completion state and timestamps are left as they are.
    pub async fn release_expired_keys<C>(db: &C, cutoff: DateTime<Utc>) -> Result<u64, DbErr>
    where
        C: ConnectionTrait,
    {
        let res = Entity::update_many()
            .col_expr(Column::QrCodeKey, Expr::value(Option::<String>::None))
            .filter(Column::QrCodeKey.is_not_null())
            .filter(Column::KeyInvalidAt.lt(cutoff))
            .exec(db)
            .await?;

        Ok(res.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        group, group_member, program, program_event, program_section, user,
    };
    use crate::test_utils::setup_test_db;
    use chrono::Duration;

    async fn seed_pair(db: &DatabaseConnection) -> (user::Model, program_event::Model) {
        let attendee = user::Model::create(db, "attendee").await.unwrap();
        let program = program::Model::create(db, "Autumn", Some(2025)).await.unwrap();
        let section = program_section::Model::create(db, program.id, "Week 1", 0)
            .await
            .unwrap();
        let event = program_event::Model::create(db, section.id, "Sauna", 5)
            .await
            .unwrap();
        let group = group::Model::create(db, program.id, "Group A").await.unwrap();
        group_member::Model::add(db, group.id, attendee.id).await.unwrap();
        (attendee, event)
    }

    fn key(code: &str, invalid_at: DateTime<Utc>) -> AttendanceKey {
        AttendanceKey {
            qr_code_key: code.to_owned(),
            key_invalid_at: invalid_at,
        }
    }

    #[tokio::test]
    async fn test_upsert_inserts_then_rotates() {
        let db = setup_test_db().await;
        let (attendee, event) = seed_pair(&db).await;
        let now = Utc::now();

        let first = Model::upsert_key(&db, attendee.id, event.id, &key("LARPAAAA", now + Duration::hours(1)), now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.qr_code_key, "LARPAAAA");

        let later = now + Duration::minutes(5);
        let second = Model::upsert_key(&db, attendee.id, event.id, &key("LARPBBBB", later + Duration::hours(1)), later)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.qr_code_key, "LARPBBBB");

        let rows = Entity::find().all(&db).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].qr_code_key.as_deref(), Some("LARPBBBB"));
        assert!(rows[0].updated_at > rows[0].created_at);
    }

    #[tokio::test]
    async fn test_upsert_reports_key_collision() {
        let db = setup_test_db().await;
        let (attendee, event) = seed_pair(&db).await;
        let other = user::Model::create(&db, "other").await.unwrap();
        let now = Utc::now();

        Model::upsert_key(&db, attendee.id, event.id, &key("LARPDUPE", now + Duration::hours(1)), now)
            .await
            .unwrap();
        let err = Model::upsert_key(&db, other.id, event.id, &key("LARPDUPE", now + Duration::hours(1)), now)
            .await
            .unwrap_err();

        let class = crate::store_error::ClassifyError::classify(&err);
        assert!(class.is_unique_violation_on(QR_CODE_KEY_COLUMN));
    }

    #[tokio::test]
    async fn test_burn_key_is_single_use_and_excludes_owner() {
        let db = setup_test_db().await;
        let (attendee, event) = seed_pair(&db).await;
        let signer = user::Model::create(&db, "signer").await.unwrap();
        let now = Utc::now();

        Model::upsert_key(&db, attendee.id, event.id, &key("LARPBURN", now + Duration::hours(1)), now)
            .await
            .unwrap();

        let own = Model::burn_key(&db, "LARPBURN", attendee.id, now).await.unwrap();
        assert!(own.is_none());

        let burned = Model::burn_key(&db, "LARPBURN", signer.id, now).await.unwrap().unwrap();
        assert_eq!(burned.user_id, attendee.id);
        assert_eq!(burned.program_event_id, event.id);
        assert_eq!(burned.completion_id, None);

        let again = Model::burn_key(&db, "LARPBURN", signer.id, now).await.unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn test_release_expired_keys_respects_cutoff() {
        let db = setup_test_db().await;
        let (attendee, event) = seed_pair(&db).await;
        let now = Utc::now();

        Model::upsert_key(&db, attendee.id, event.id, &key("LARPOLD1", now - Duration::days(6)), now)
            .await
            .unwrap();

        let none = Model::release_expired_keys(&db, now - Duration::days(7)).await.unwrap();
        assert_eq!(none, 0);

        let released = Model::release_expired_keys(&db, now - Duration::days(5)).await.unwrap();
        assert_eq!(released, 1);

        let row = Model::find_by_pair(&db, attendee.id, event.id).await.unwrap().unwrap();
        assert_eq!(row.qr_code_key, None);
        assert!(!row.is_completed());
    }
}
