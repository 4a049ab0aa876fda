use crate::plugin::ChannelPlugin;
use crate::NotificationChannel;
use anyhow::Result;
use argus_common::types::Alert;
use async_trait::async_trait;
use serde_json::Value;
use tracing;

pub struct WebhookChannel {
    instance_id: String,
    url: String,
    client: reqwest::Client,
    body_template: Option<String>,
}

impl WebhookChannel {
    pub fn new(instance_id: &str, url: String, body_template: Option<String>) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            url,
            client: reqwest::Client::new(),
            body_template,
        }
    }

    fn render_body(&self, alert: &Alert) -> String {
        if let Some(template) = &self.body_template {
            template
                .replace("{{alert_id}}", &alert.id)
                .replace("{{rule_id}}", &alert.rule_id)
                .replace("{{rule_name}}", &alert.rule_name)
                .replace("{{severity}}", &alert.severity.to_string())
                .replace("{{title}}", &alert.title)
                .replace("{{summary}}", &alert.summary)
                .replace("{{source}}", &alert.source)
                .replace("{{timestamp}}", &alert.timestamp.to_rfc3339())
        } else {
            serde_json::json!({
                "alert_id": alert.id,
                "rule_id": alert.rule_id,
                "rule_name": alert.rule_name,
                "severity": alert.severity.to_string(),
                "title": alert.title,
                "summary": alert.summary,
                "source": alert.source,
                "timestamp": alert.timestamp.to_rfc3339(),
                "status": alert.status.to_string(),
            })
            .to_string()
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn send(&self, alert: &Alert) -> Result<()> {
        let body = self.render_body(alert);
        let response = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("webhook {} returned {status}", self.instance_id);
        }
        tracing::debug!(
            channel_id = %self.instance_id,
            alert_id = %alert.id,
            "Webhook delivered"
        );
        Ok(())
    }
}

pub struct WebhookPlugin;

impl ChannelPlugin for WebhookPlugin {
    fn name(&self) -> &str {
        "webhook"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        let url = config.get("url").and_then(|v| v.as_str()).unwrap_or("");
        if url.is_empty() {
            anyhow::bail!("webhook channel requires a url");
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            anyhow::bail!("webhook url must be http(s): {url}");
        }
        Ok(())
    }

    fn create_channel(
        &self,
        instance_id: &str,
        config: &Value,
    ) -> Result<Box<dyn NotificationChannel>> {
        let url = config
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("webhook channel requires a url"))?
            .to_string();
        let body_template = config
            .get("body_template")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Ok(Box::new(WebhookChannel::new(instance_id, url, body_template)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_common::types::{AlertStatus, Severity};
    use chrono::Utc;

    fn alert() -> Alert {
        Alert {
            id: "a1".to_string(),
            rule_id: "cpu_critical".to_string(),
            rule_name: "CPU Critical".to_string(),
            severity: Severity::Urgent,
            title: "CPU Critical".to_string(),
            summary: "cpu_percent at 97".to_string(),
            source: "web-01".to_string(),
            dedup_key: "web-01:cpu_critical".to_string(),
            timestamp: Utc::now(),
            status: AlertStatus::Active,
            acknowledged_at: None,
            acknowledged_by: String::new(),
            resolved_at: None,
            investigation_id: None,
        }
    }

    #[test]
    fn template_substitution() {
        let channel = WebhookChannel::new(
            "wh-1",
            "https://hooks.example.com/x".to_string(),
            Some("{{severity}}: {{title}} on {{source}}".to_string()),
        );
        assert_eq!(channel.render_body(&alert()), "URGENT: CPU Critical on web-01");
    }

    #[test]
    fn default_body_is_json() {
        let channel = WebhookChannel::new("wh-1", "https://hooks.example.com/x".to_string(), None);
        let body: Value = serde_json::from_str(&channel.render_body(&alert())).unwrap();
        assert_eq!(body["rule_id"], "cpu_critical");
        assert_eq!(body["severity"], "URGENT");
    }

    #[test]
    fn plugin_validates_url() {
        let plugin = WebhookPlugin;
        assert!(plugin.validate_config(&serde_json::json!({})).is_err());
        assert!(plugin
            .validate_config(&serde_json::json!({"url": "ftp://x"}))
            .is_err());
        assert!(plugin
            .validate_config(&serde_json::json!({"url": "https://hooks.example.com/x"}))
            .is_ok());
    }
}
