use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryOrder, QuerySelect,
};
use serde::{Deserialize, Serialize};

use crate::entities::investigation::{self, Column, Entity};
use crate::store::CatalogStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigationRow {
    pub id: String,
    pub alert_id: String,
    pub trigger: String,
    pub status: String,
    pub summary: String,
    pub tokens_used: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

fn to_row(m: investigation::Model) -> InvestigationRow {
    InvestigationRow {
        id: m.id,
        alert_id: m.alert_id,
        trigger: m.trigger,
        status: m.status,
        summary: m.summary,
        tokens_used: m.tokens_used,
        started_at: m.started_at.with_timezone(&Utc),
        completed_at: m.completed_at.map(|t| t.with_timezone(&Utc)),
    }
}

impl CatalogStore {
    pub async fn insert_investigation(&self, row: &InvestigationRow) -> Result<InvestigationRow> {
        let now = Utc::now().fixed_offset();
        let am = investigation::ActiveModel {
            id: Set(row.id.clone()),
            alert_id: Set(row.alert_id.clone()),
            trigger: Set(row.trigger.clone()),
            status: Set(row.status.clone()),
            summary: Set(row.summary.clone()),
            tokens_used: Set(row.tokens_used),
            started_at: Set(row.started_at.fixed_offset()),
            completed_at: Set(row.completed_at.map(|t| t.fixed_offset())),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am.insert(self.db()).await?;
        Ok(to_row(model))
    }

    pub async fn complete_investigation(
        &self,
        id: &str,
        status: &str,
        summary: &str,
        tokens_used: i64,
    ) -> Result<Option<InvestigationRow>> {
        let Some(model) = Entity::find_by_id(id).one(self.db()).await? else {
            return Ok(None);
        };
        let now = Utc::now().fixed_offset();
        let mut am: investigation::ActiveModel = model.into();
        am.status = Set(status.to_string());
        am.summary = Set(summary.to_string());
        am.tokens_used = Set(tokens_used);
        am.completed_at = Set(Some(now));
        am.updated_at = Set(now);
        let updated = am.update(self.db()).await?;
        Ok(Some(to_row(updated)))
    }

    pub async fn get_investigation(&self, id: &str) -> Result<Option<InvestigationRow>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        Ok(model.map(to_row))
    }

    pub async fn list_investigations(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<InvestigationRow>> {
        let rows = Entity::find()
            .order_by(Column::StartedAt, Order::Desc)
            .limit(limit as u64)
            .offset(offset as u64)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_row).collect())
    }

    pub async fn count_investigations(&self) -> Result<u64> {
        Ok(Entity::find().count(self.db()).await?)
    }
}
