use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, EntityTrait, Order, QueryOrder};
use serde::{Deserialize, Serialize};

use crate::entities::system_config::{self, Column, Entity};
use crate::store::CatalogStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfigRow {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

fn to_row(m: system_config::Model) -> SystemConfigRow {
    SystemConfigRow {
        key: m.key,
        value: m.value,
        updated_at: m.updated_at.with_timezone(&Utc),
    }
}

impl CatalogStore {
    pub async fn get_config(&self, key: &str) -> Result<Option<String>> {
        let model = Entity::find_by_id(key).one(self.db()).await?;
        Ok(model.map(|m| m.value))
    }

    pub async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        let now = Utc::now().fixed_offset();
        let existing = Entity::find_by_id(key).one(self.db()).await?;
        match existing {
            Some(model) => {
                let mut am: system_config::ActiveModel = model.into();
                am.value = Set(value.to_string());
                am.updated_at = Set(now);
                am.update(self.db()).await?;
            }
            None => {
                let am = system_config::ActiveModel {
                    key: Set(key.to_string()),
                    value: Set(value.to_string()),
                    updated_at: Set(now),
                };
                am.insert(self.db()).await?;
            }
        }
        Ok(())
    }

    pub async fn list_configs(&self) -> Result<Vec<SystemConfigRow>> {
        let rows = Entity::find()
            .order_by(Column::Key, Order::Asc)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_row).collect())
    }
}
