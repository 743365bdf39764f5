use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "folders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub account_id: Uuid,
    #[sea_orm(column_type = "Text")]
    pub name: String,
    /// Canonical role such as "inbox", "all", "trash" or "spam"; `None`
    /// for plain user folders.
    pub canonical_role: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::account::Entity",
        from = "Column::AccountId",
        to = "super::account::Column::Id"
    )]
    Account,
    #[sea_orm(has_many = "super::uid_record::Entity")]
    UidRecords,
    #[sea_orm(has_one = "super::folder_sync_status::Entity")]
    SyncStatus,
    #[sea_orm(has_one = "super::folder_imap_info::Entity")]
    ImapInfo,
}

impl Related<super::account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Account.def()
    }
}

impl Related<super::uid_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UidRecords.def()
    }
}

impl Related<super::folder_sync_status::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SyncStatus.def()
    }
}

impl Related<super::folder_imap_info::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ImapInfo.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
