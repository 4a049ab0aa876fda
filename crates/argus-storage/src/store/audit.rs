use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ActiveValue::Set, EntityTrait, Order, PaginatorTrait,
    QueryOrder, QuerySelect,
};
use serde::{Deserialize, Serialize};

use crate::entities::audit_entry::{self, Column, Entity};
use crate::store::CatalogStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRow {
    pub seq: i64,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub command: String,
    pub result: String,
    pub success: bool,
    pub user_approved: bool,
    pub conversation_id: String,
}

fn to_row(m: audit_entry::Model) -> AuditRow {
    AuditRow {
        seq: m.seq,
        timestamp: m.timestamp.with_timezone(&Utc),
        action: m.action,
        command: m.command,
        result: m.result,
        success: m.success,
        user_approved: m.user_approved,
        conversation_id: m.conversation_id,
    }
}

impl CatalogStore {
    /// Append an audit entry. Returns the assigned sequence number.
    pub async fn append_audit(
        &self,
        action: &str,
        command: &str,
        result: &str,
        success: bool,
        user_approved: bool,
        conversation_id: &str,
    ) -> Result<i64> {
        let am = audit_entry::ActiveModel {
            seq: NotSet,
            timestamp: Set(Utc::now().fixed_offset()),
            action: Set(action.to_string()),
            command: Set(command.to_string()),
            result: Set(result.to_string()),
            success: Set(success),
            user_approved: Set(user_approved),
            conversation_id: Set(conversation_id.to_string()),
        };
        let model = am.insert(self.db()).await?;
        Ok(model.seq)
    }

    pub async fn list_audit(&self, limit: usize, offset: usize) -> Result<Vec<AuditRow>> {
        let rows = Entity::find()
            .order_by(Column::Seq, Order::Desc)
            .limit(limit as u64)
            .offset(offset as u64)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_row).collect())
    }

    pub async fn count_audit(&self) -> Result<u64> {
        Ok(Entity::find().count(self.db()).await?)
    }
}
