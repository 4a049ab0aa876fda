use sea_orm::entity::prelude::*;

/// Append-only audit trail. The autoincrement primary key doubles as the
/// monotonic sequence number.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "audit_log")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub seq: i64,
    pub timestamp: DateTimeWithTimeZone,
    pub action: String,
    pub command: String,
    pub result: String,
    pub success: bool,
    pub user_approved: bool,
    pub conversation_id: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
