use serde::Deserialize;
use std::path::Path;

/// Root server configuration, loaded from `argus.toml`. Every key has a
/// default so a missing file yields a runnable dev configuration.
#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub budget: BudgetSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub cors: CorsSection,
    #[serde(default)]
    pub collectors: CollectorsSection,
    #[serde(default)]
    pub notification: NotificationSection,
    /// Externally reachable base URL, used in operator-facing links.
    #[serde(default)]
    pub public_url: String,
}

#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Opaque ingest API key; empty disables ingest authentication.
    #[serde(default)]
    pub api_key: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: String::new(),
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BudgetSection {
    #[serde(default = "default_hourly_limit")]
    pub hourly_limit: u64,
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u64,
}

impl Default for BudgetSection {
    fn default() -> Self {
        Self {
            hourly_limit: default_hourly_limit(),
            daily_limit: default_daily_limit(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            retention_days: default_retention_days(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CorsSection {
    #[serde(default)]
    pub origins: Vec<String>,
}

impl Default for CorsSection {
    fn default() -> Self {
        Self {
            origins: Vec::new(),
        }
    }
}

/// Host collectors run outside the core; these keys are accepted so a
/// shared config file round-trips cleanly.
#[derive(Debug, Deserialize)]
pub struct CollectorsSection {
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_s: u64,
    #[serde(default)]
    pub log_paths: Vec<String>,
}

impl Default for CollectorsSection {
    fn default() -> Self {
        Self {
            metrics_interval_s: default_metrics_interval(),
            log_paths: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct NotificationSection {
    #[serde(default)]
    pub channels: Vec<ChannelSection>,
}

#[derive(Debug, Deserialize)]
pub struct ChannelSection {
    pub id: String,
    #[serde(rename = "type")]
    pub channel_type: String,
    #[serde(default = "default_min_severity")]
    pub min_severity: String,
    pub url: Option<String>,
    pub body_template: Option<String>,
}

impl ServerConfig {
    /// Load from a TOML file; a missing file yields defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7600
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_max_tokens() -> u64 {
    4096
}

fn default_temperature() -> f32 {
    0.1
}

fn default_hourly_limit() -> u64 {
    500_000
}

fn default_daily_limit() -> u64 {
    5_000_000
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_retention_days() -> u32 {
    30
}

fn default_metrics_interval() -> u64 {
    15
}

fn default_min_severity() -> String {
    "NOTABLE".to_string()
}
