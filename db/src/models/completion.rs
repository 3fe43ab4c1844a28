use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::{Expr, Order, Query, SimpleExpr, SubQueryStatement};
use serde::{Deserialize, Serialize};

use super::{attendance, signature};

/// Durable proof that an attendance key (or an administrator) signed off an
/// attendance. Owned by at most one `attendances` row via `completion_id`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "completions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub signer_id: Uuid,
    /// One of the signer's signatures, sampled at completion time.
    pub signature_id: Option<Uuid>,
    pub completed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::SignerId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    Signer,
    #[sea_orm(
        belongs_to = "super::signature::Entity",
        from = "Column::SignatureId",
        to = "super::signature::Column::Id",
        on_delete = "SetNull"
    )]
    Signature,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Signer.def()
    }
}

impl Related<super::signature::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Signature.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Inserts a completion signed by `signer_id`.
    ///
    /// The signature reference is picked inside the insert itself by sampling a
    /// single random row from the signer's own signatures; it stays `NULL` when
    /// the signer has none.
    pub async fn create_for_signer<C>(
        db: &C,
        id: Uuid,
        signer_id: Uuid,
        completed_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let random_signature = Query::select()
            .column(signature::Column::Id)
            .from(signature::Entity)
            .and_where(signature::Column::UserId.eq(signer_id))
            .order_by_expr(Expr::cust("RANDOM()"), Order::Asc)
            .limit(1)
            .to_owned();

        let mut insert = Query::insert();
        insert
            .into_table(Entity)
            .columns([
                Column::Id,
                Column::SignerId,
                Column::SignatureId,
                Column::CompletedAt,
                Column::CreatedAt,
                Column::UpdatedAt,
            ])
            .values([
                id.into(),
                signer_id.into(),
                SimpleExpr::SubQuery(
                    None,
                    Box::new(SubQueryStatement::SelectStatement(random_signature)),
                ),
                completed_at.into(),
                now.into(),
                now.into(),
            ])
            .map_err(|e| DbErr::Custom(format!("Failed to build completion insert: {e}")))?;

        db.execute(db.get_database_backend().build(&insert)).await?;

        Entity::find_by_id(id)
            .one(db)
            .await?
            .ok_or(DbErr::RecordNotInserted)
    }

    /// Deletes the completion linked to the (user, event) attendance and clears
    /// the back-link. Returns the number of completions removed (0 or 1).
    ///
    /// Callers run this inside a transaction so the unlink and the delete are
    /// observed together.
    pub async fn delete_for_attendance<C>(
        db: &C,
        user_id: Uuid,
        event_id: i64,
        now: DateTime<Utc>,
    ) -> Result<u64, DbErr>
    where
        C: ConnectionTrait,
    {
        let Some(completion_id) = attendance::Model::find_by_pair(db, user_id, event_id)
            .await?
            .and_then(|a| a.completion_id)
        else {
            return Ok(0);
        };

        attendance::Model::clear_completion(db, completion_id, now).await?;
        let res = Entity::delete_by_id(completion_id).exec(db).await?;
        Ok(res.rows_affected)
    }
}
