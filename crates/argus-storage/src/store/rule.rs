use anyhow::Result;
use argus_common::types::{EventKind, Severity};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect,
};
use serde::{Deserialize, Serialize};

use crate::entities::alert_rule::{self, Column, Entity};
use crate::store::CatalogStore;

/// Alert rule row (from the `alert_rules` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRuleRow {
    pub id: String,
    pub name: String,
    pub event_kinds: Vec<EventKind>,
    /// Optional glob over the event's signal name (metric name, SDK event
    /// type, security check id). `None` matches any signal.
    pub signal: Option<String>,
    pub min_severity: Severity,
    pub max_severity: Option<Severity>,
    pub cooldown_secs: i64,
    pub investigate_cooldown_secs: i64,
    pub auto_investigate: bool,
    pub muted_until: Option<DateTime<Utc>>,
    pub channel: String,
    pub enabled: bool,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AlertRuleRow {
    /// Whether the rule is muted at `now` (expired mutes count as unmuted).
    pub fn is_muted(&self, now: DateTime<Utc>) -> bool {
        self.muted_until.is_some_and(|until| now < until)
    }

    /// Whether the rule's kind set and severity window cover the event.
    pub fn matches(&self, kind: EventKind, severity: Severity) -> bool {
        if !self.event_kinds.contains(&kind) {
            return false;
        }
        if severity < self.min_severity {
            return false;
        }
        if let Some(max) = self.max_severity {
            if severity > max {
                return false;
            }
        }
        true
    }
}

/// Partial update applied through the operator endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertRuleUpdate {
    pub name: Option<String>,
    pub min_severity: Option<Severity>,
    pub max_severity: Option<Option<Severity>>,
    pub cooldown_secs: Option<i64>,
    pub auto_investigate: Option<bool>,
    pub channel: Option<String>,
    pub enabled: Option<bool>,
}

fn to_row(m: alert_rule::Model) -> AlertRuleRow {
    let event_kinds: Vec<EventKind> = serde_json::from_str(&m.event_kinds).unwrap_or_default();
    AlertRuleRow {
        id: m.id,
        name: m.name,
        event_kinds,
        signal: m.signal,
        min_severity: m.min_severity.parse().unwrap_or(Severity::Notable),
        max_severity: m.max_severity.and_then(|s| s.parse().ok()),
        cooldown_secs: m.cooldown_secs,
        investigate_cooldown_secs: m.investigate_cooldown_secs,
        auto_investigate: m.auto_investigate,
        muted_until: m.muted_until.map(|t| t.with_timezone(&Utc)),
        channel: m.channel,
        enabled: m.enabled,
        source: m.source,
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    }
}

impl CatalogStore {
    pub async fn insert_alert_rule(&self, row: &AlertRuleRow) -> Result<AlertRuleRow> {
        let now = Utc::now().fixed_offset();
        let am = alert_rule::ActiveModel {
            id: Set(row.id.clone()),
            name: Set(row.name.clone()),
            event_kinds: Set(serde_json::to_string(&row.event_kinds)?),
            signal: Set(row.signal.clone()),
            min_severity: Set(row.min_severity.to_string()),
            max_severity: Set(row.max_severity.map(|s| s.to_string())),
            cooldown_secs: Set(row.cooldown_secs),
            investigate_cooldown_secs: Set(row.investigate_cooldown_secs),
            auto_investigate: Set(row.auto_investigate),
            muted_until: Set(row.muted_until.map(|t| t.fixed_offset())),
            channel: Set(row.channel.clone()),
            enabled: Set(row.enabled),
            source: Set(row.source.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am.insert(self.db()).await?;
        Ok(to_row(model))
    }

    pub async fn get_alert_rule(&self, id: &str) -> Result<Option<AlertRuleRow>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        Ok(model.map(to_row))
    }

    pub async fn list_alert_rules(&self, enabled: Option<bool>) -> Result<Vec<AlertRuleRow>> {
        let mut q = Entity::find();
        if let Some(en) = enabled {
            q = q.filter(Column::Enabled.eq(en));
        }
        let rows = q
            .order_by(Column::CreatedAt, Order::Asc)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_row).collect())
    }

    pub async fn list_alert_rules_paginated(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AlertRuleRow>> {
        let rows = Entity::find()
            .order_by(Column::CreatedAt, Order::Asc)
            .limit(limit as u64)
            .offset(offset as u64)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_row).collect())
    }

    pub async fn count_alert_rules(&self) -> Result<u64> {
        Ok(Entity::find().count(self.db()).await?)
    }

    pub async fn update_alert_rule(
        &self,
        id: &str,
        update: &AlertRuleUpdate,
    ) -> Result<Option<AlertRuleRow>> {
        let Some(model) = Entity::find_by_id(id).one(self.db()).await? else {
            return Ok(None);
        };
        let mut am: alert_rule::ActiveModel = model.into();
        if let Some(name) = &update.name {
            am.name = Set(name.clone());
        }
        if let Some(min) = update.min_severity {
            am.min_severity = Set(min.to_string());
        }
        if let Some(max) = &update.max_severity {
            am.max_severity = Set(max.map(|s| s.to_string()));
        }
        if let Some(cooldown) = update.cooldown_secs {
            am.cooldown_secs = Set(cooldown);
        }
        if let Some(auto) = update.auto_investigate {
            am.auto_investigate = Set(auto);
        }
        if let Some(channel) = &update.channel {
            am.channel = Set(channel.clone());
        }
        if let Some(enabled) = update.enabled {
            am.enabled = Set(enabled);
        }
        am.updated_at = Set(Utc::now().fixed_offset());
        let updated = am.update(self.db()).await?;
        Ok(Some(to_row(updated)))
    }

    /// Persist a rule's mute expiry. `None` unmutes.
    pub async fn set_rule_muted_until(
        &self,
        id: &str,
        muted_until: Option<DateTime<Utc>>,
    ) -> Result<Option<AlertRuleRow>> {
        let Some(model) = Entity::find_by_id(id).one(self.db()).await? else {
            return Ok(None);
        };
        let mut am: alert_rule::ActiveModel = model.into();
        am.muted_until = Set(muted_until.map(|t| t.fixed_offset()));
        am.updated_at = Set(Utc::now().fixed_offset());
        let updated = am.update(self.db()).await?;
        Ok(Some(to_row(updated)))
    }
}
