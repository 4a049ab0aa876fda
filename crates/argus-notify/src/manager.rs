use crate::plugin::ChannelRegistry;
use crate::NotificationChannel;
use argus_common::types::{Alert, Severity};
use serde_json::Value;
use tracing;

struct ChannelInstance {
    id: String,
    channel_type: String,
    channel: Box<dyn NotificationChannel>,
    min_severity: Severity,
}

/// Routes fired alerts to configured channel instances. Channel failures
/// are logged and swallowed so the alert path never blocks on delivery.
pub struct NotificationManager {
    instances: Vec<ChannelInstance>,
}

/// One configured channel: (id, type, min severity, type-specific config).
pub struct ChannelConfig {
    pub id: String,
    pub channel_type: String,
    pub min_severity: Severity,
    pub config: Value,
}

impl NotificationManager {
    /// Build-then-swap: instantiate every configured channel, skipping
    /// (and logging) the ones that fail to construct.
    pub fn from_configs(registry: &ChannelRegistry, configs: Vec<ChannelConfig>) -> Self {
        let mut instances = Vec::new();
        for cfg in configs {
            match registry.create_channel(&cfg.channel_type, &cfg.id, &cfg.config) {
                Ok(channel) => {
                    tracing::info!(
                        channel_id = %cfg.id,
                        channel_type = %cfg.channel_type,
                        "Loaded notification channel"
                    );
                    instances.push(ChannelInstance {
                        id: cfg.id,
                        channel_type: cfg.channel_type,
                        channel,
                        min_severity: cfg.min_severity,
                    });
                }
                Err(err) => {
                    tracing::error!(
                        channel_id = %cfg.id,
                        channel_type = %cfg.channel_type,
                        error = %err,
                        "Failed to create notification channel, skipping"
                    );
                }
            }
        }
        Self { instances }
    }

    pub fn channel_count(&self) -> usize {
        self.instances.len()
    }

    /// Deliver an alert to the channels its rule selects. `selector` is
    /// the rule's channel field: `none`, `all`, or a channel type.
    pub async fn notify(&self, alert: &Alert, selector: &str) {
        if selector == "none" {
            return;
        }
        for instance in &self.instances {
            if alert.severity < instance.min_severity {
                continue;
            }
            if selector != "all" && selector != instance.channel_type && selector != instance.id {
                continue;
            }
            if let Err(err) = instance.channel.send(alert).await {
                tracing::error!(
                    channel_id = %instance.id,
                    alert_id = %alert.id,
                    error = %err,
                    "Notification channel error"
                );
            }
        }
    }
}
