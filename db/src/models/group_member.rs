use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::{Expr, Query};
use sea_orm::Set;
use serde::{Deserialize, Serialize};

use super::{group, program_event, program_section};

/// Membership of a user in a group. Membership is what makes a user eligible
/// to attend the events of the group's program.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "group_members")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub group_id: i64,
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: Uuid,
    pub joined_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::group::Entity",
        from = "Column::GroupId",
        to = "super::group::Column::Id",
        on_delete = "Cascade"
    )]
    Group,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    User,
}

impl Related<super::group::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Group.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub async fn add<C>(db: &C, group_id: i64, user_id: Uuid) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        ActiveModel {
            group_id: Set(group_id),
            user_id: Set(user_id),
            joined_at: Set(Utc::now()),
        }
        .insert(db)
        .await
    }

    /// Whether `user_id` belongs to a group enrolled in the program that owns
    /// `event_id`. Cancelled events have no eligible attendees.
    pub async fn is_enrolled_for_event<C>(
        db: &C,
        user_id: Uuid,
        event_id: i64,
    ) -> Result<bool, DbErr>
    where
        C: ConnectionTrait,
    {
        let query = Query::select()
            .expr(Expr::val(1))
            .from(program_event::Entity)
            .inner_join(
                program_section::Entity,
                Expr::col((program_section::Entity, program_section::Column::Id))
                    .equals((program_event::Entity, program_event::Column::ProgramSectionId)),
            )
            .inner_join(
                group::Entity,
                Expr::col((group::Entity, group::Column::ProgramId))
                    .equals((program_section::Entity, program_section::Column::ProgramId)),
            )
            .inner_join(
                Entity,
                Expr::col((Entity, Column::GroupId)).equals((group::Entity, group::Column::Id)),
            )
            .and_where(program_event::Column::Id.eq(event_id))
            .and_where(program_event::Column::CancelledAt.is_null())
            .and_where(Column::UserId.eq(user_id))
            .limit(1)
            .to_owned();

        let row = db
            .query_one(db.get_database_backend().build(&query))
            .await?;
        Ok(row.is_some())
    }
}
