use anyhow::Result;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection};
use std::path::Path;

pub mod alert;
pub mod audit;
pub mod config;
pub mod investigation;
pub mod rule;

pub use alert::{AlertFilter, AlertRow};
pub use audit::AuditRow;
pub use config::SystemConfigRow;
pub use investigation::InvestigationRow;
pub use rule::{AlertRuleRow, AlertRuleUpdate};

/// Unified access layer for the catalog database (`catalog.db`).
///
/// All methods are `async fn` backed by SeaORM + SQLite. Telemetry is
/// stored separately by the partitioned
/// [`crate::engine::SqliteTimeSeriesEngine`].
pub struct CatalogStore {
    pub(crate) db: DatabaseConnection,
}

impl CatalogStore {
    /// Connect to and initialize the catalog database, running pending
    /// `sea-orm-migration` migrations.
    pub async fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("catalog.db");
        let url = format!(
            "sqlite://{}?mode=rwc",
            db_path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("non-UTF-8 data_dir path"))?
        );
        Self::connect(&url).await
    }

    /// Connect with an explicit SQLite URL (used by tests with `sqlite::memory:`).
    pub async fn connect(url: &str) -> Result<Self> {
        let db = Database::connect(url).await?;
        db.execute_unprepared("PRAGMA journal_mode=WAL;").await?;
        Migrator::up(&db, None).await?;
        Ok(Self { db })
    }

    pub(crate) fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}
