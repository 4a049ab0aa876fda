use anyhow::Result;
use argus_common::types::{Alert, AlertStatus, Severity};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect,
};
use serde::{Deserialize, Serialize};

use crate::entities::alert::{self, Column, Entity};
use crate::store::CatalogStore;

/// Alert row (from the `alerts` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRow {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub severity: Severity,
    pub title: String,
    pub summary: String,
    pub source: String,
    pub dedup_key: String,
    pub status: AlertStatus,
    pub timestamp: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: String,
    pub resolved_at: Option<DateTime<Utc>>,
    pub investigation_id: Option<String>,
}

impl From<&Alert> for AlertRow {
    fn from(a: &Alert) -> Self {
        Self {
            id: a.id.clone(),
            rule_id: a.rule_id.clone(),
            rule_name: a.rule_name.clone(),
            severity: a.severity,
            title: a.title.clone(),
            summary: a.summary.clone(),
            source: a.source.clone(),
            dedup_key: a.dedup_key.clone(),
            status: a.status,
            timestamp: a.timestamp,
            acknowledged_at: a.acknowledged_at,
            acknowledged_by: a.acknowledged_by.clone(),
            resolved_at: a.resolved_at,
            investigation_id: a.investigation_id.clone(),
        }
    }
}

/// List filter for the alerts catalog surface.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub status: Option<AlertStatus>,
    pub severity: Option<Severity>,
}

fn to_row(m: alert::Model) -> AlertRow {
    AlertRow {
        id: m.id,
        rule_id: m.rule_id,
        rule_name: m.rule_name,
        severity: m.severity.parse().unwrap_or(Severity::Notable),
        title: m.title,
        summary: m.summary,
        source: m.source,
        dedup_key: m.dedup_key,
        status: m.status.parse().unwrap_or(AlertStatus::Active),
        timestamp: m.timestamp.with_timezone(&Utc),
        acknowledged_at: m.acknowledged_at.map(|t| t.with_timezone(&Utc)),
        acknowledged_by: m.acknowledged_by,
        resolved_at: m.resolved_at.map(|t| t.with_timezone(&Utc)),
        investigation_id: m.investigation_id,
    }
}

impl CatalogStore {
    pub async fn insert_alert(&self, row: &AlertRow) -> Result<AlertRow> {
        let now = Utc::now().fixed_offset();
        let am = alert::ActiveModel {
            id: Set(row.id.clone()),
            rule_id: Set(row.rule_id.clone()),
            rule_name: Set(row.rule_name.clone()),
            severity: Set(row.severity.to_string()),
            title: Set(row.title.clone()),
            summary: Set(row.summary.clone()),
            source: Set(row.source.clone()),
            dedup_key: Set(row.dedup_key.clone()),
            status: Set(row.status.to_string()),
            timestamp: Set(row.timestamp.fixed_offset()),
            acknowledged_at: Set(row.acknowledged_at.map(|t| t.fixed_offset())),
            acknowledged_by: Set(row.acknowledged_by.clone()),
            resolved_at: Set(row.resolved_at.map(|t| t.fixed_offset())),
            investigation_id: Set(row.investigation_id.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am.insert(self.db()).await?;
        Ok(to_row(model))
    }

    pub async fn get_alert(&self, id: &str) -> Result<Option<AlertRow>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        Ok(model.map(to_row))
    }

    pub async fn list_alerts(
        &self,
        filter: &AlertFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AlertRow>> {
        let mut q = Entity::find();
        if let Some(status) = filter.status {
            q = q.filter(Column::Status.eq(status.to_string()));
        }
        if let Some(severity) = filter.severity {
            q = q.filter(Column::Severity.eq(severity.to_string()));
        }
        let rows = q
            .order_by(Column::Timestamp, Order::Desc)
            .limit(limit as u64)
            .offset(offset as u64)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_row).collect())
    }

    pub async fn count_alerts(&self, filter: &AlertFilter) -> Result<u64> {
        let mut q = Entity::find();
        if let Some(status) = filter.status {
            q = q.filter(Column::Status.eq(status.to_string()));
        }
        if let Some(severity) = filter.severity {
            q = q.filter(Column::Severity.eq(severity.to_string()));
        }
        Ok(q.count(self.db()).await?)
    }

    /// Persist an alert status transition. The caller (the alert engine)
    /// validates transition legality; this only records it.
    pub async fn update_alert_status(
        &self,
        id: &str,
        status: AlertStatus,
        acknowledged_by: Option<&str>,
    ) -> Result<Option<AlertRow>> {
        let Some(model) = Entity::find_by_id(id).one(self.db()).await? else {
            return Ok(None);
        };
        let now = Utc::now().fixed_offset();
        let mut am: alert::ActiveModel = model.into();
        am.status = Set(status.to_string());
        match status {
            AlertStatus::Acknowledged => {
                am.acknowledged_at = Set(Some(now));
                if let Some(by) = acknowledged_by {
                    am.acknowledged_by = Set(by.to_string());
                }
            }
            AlertStatus::Resolved => {
                am.resolved_at = Set(Some(now));
            }
            AlertStatus::Active => {}
        }
        am.updated_at = Set(now);
        let updated = am.update(self.db()).await?;
        Ok(Some(to_row(updated)))
    }

    pub async fn set_alert_investigation(
        &self,
        id: &str,
        investigation_id: &str,
    ) -> Result<Option<AlertRow>> {
        let Some(model) = Entity::find_by_id(id).one(self.db()).await? else {
            return Ok(None);
        };
        let mut am: alert::ActiveModel = model.into();
        am.investigation_id = Set(Some(investigation_id.to_string()));
        am.updated_at = Set(Utc::now().fixed_offset());
        let updated = am.update(self.db()).await?;
        Ok(Some(to_row(updated)))
    }
}
