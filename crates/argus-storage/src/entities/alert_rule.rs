use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "alert_rules")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    #[sea_orm(unique)]
    pub name: String,
    /// JSON array of matched event kinds.
    pub event_kinds: String,
    pub signal: Option<String>,
    pub min_severity: String,
    pub max_severity: Option<String>,
    pub cooldown_secs: i64,
    pub investigate_cooldown_secs: i64,
    pub auto_investigate: bool,
    pub muted_until: Option<DateTimeWithTimeZone>,
    pub channel: String,
    pub enabled: bool,
    pub source: String,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
