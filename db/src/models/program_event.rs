use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

/// Id used by callers for "no event"; never a valid primary key.
pub const NULL_EVENT_ID: i64 = -1;

/// A single event inside a program section. Attendances are tracked per event.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "program_events")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub program_section_id: i64,
    pub title: String,
    pub points: i32,
    /// Cancelled events accept no new attendance keys.
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::program_section::Entity",
        from = "Column::ProgramSectionId",
        to = "super::program_section::Column::Id",
        on_delete = "Cascade"
    )]
    Section,
}

impl Related<super::program_section::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Section.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub async fn create<C>(
        db: &C,
        program_section_id: i64,
        title: &str,
        points: i32,
    ) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let now = Utc::now();
        ActiveModel {
            program_section_id: Set(program_section_id),
            title: Set(title.to_owned()),
            points: Set(points),
            cancelled_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    pub async fn cancel<C>(db: &C, id: i64, at: DateTime<Utc>) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let event = Entity::find_by_id(id)
            .one(db)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("Event ID {id} not found")))?;

        let mut active: ActiveModel = event.into();
        active.cancelled_at = Set(Some(at));
        active.updated_at = Set(at);
        active.update(db).await
    }
}
