//! Notification sink interface and the reference webhook channel.
//!
//! The core only defines the sink contract and routes fired alerts to
//! configured channel instances by severity; delivery details beyond the
//! webhook reference implementation live outside the core.

pub mod manager;
pub mod plugin;
pub mod webhook;

pub use manager::NotificationManager;
pub use plugin::{ChannelPlugin, ChannelRegistry};

use anyhow::Result;
use argus_common::types::Alert;
use async_trait::async_trait;

/// A delivery channel for fired alerts.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Deliver one alert. Failures are logged by the manager, never
    /// propagated into the alert path.
    async fn send(&self, alert: &Alert) -> Result<()>;
}
