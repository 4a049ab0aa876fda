//! Background tasks wiring the bus stages together: raw telemetry →
//! classifier → alert engine → persistence / notification / investigation.

use crate::state::AppState;
use argus_agent::InvestigationRequest;
use argus_bus::{BusMessage, Topic};
use argus_classify::Classifier;
use chrono::Utc;
use tracing;

/// Classifier stage: tags raw events with a severity and republishes on
/// `events.classified`.
pub fn spawn_classifier(state: &AppState) -> tokio::task::JoinHandle<()> {
    let sub = state.bus.subscribe(&[Topic::TelemetryRaw], 4096);
    let bus = state.bus.clone();
    tokio::spawn(async move {
        let mut classifier = Classifier::new();
        let mut since_gc: u32 = 0;
        loop {
            let msg = sub.recv().await;
            let BusMessage::TelemetryRaw(mut event) = msg else {
                continue;
            };
            event.severity = classifier.classify(&event);
            bus.publish(BusMessage::EventClassified(event));

            since_gc += 1;
            if since_gc >= 10_000 {
                classifier.gc(Utc::now());
                since_gc = 0;
            }
        }
    })
}

/// Alert stage: evaluates classified events against the rule set, then
/// persists, notifies, and schedules auto-investigations for each firing.
pub fn spawn_alert_pipeline(state: AppState) -> tokio::task::JoinHandle<()> {
    let sub = state.bus.subscribe(&[Topic::EventsClassified], 4096);
    tokio::spawn(async move {
        loop {
            let msg = sub.recv().await;
            let BusMessage::EventClassified(event) = msg else {
                continue;
            };
            let now = Utc::now();

            let fired = {
                let mut engine = state
                    .alert_engine
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                engine.handle_event(&event, now)
            };

            for firing in fired {
                let alert = firing.alert;

                if let Err(err) = state.catalog.insert_alert(&(&alert).into()).await {
                    tracing::error!(alert_id = %alert.id, error = %err, "Failed to persist alert");
                }

                state.bus.publish(BusMessage::AlertFired(alert.clone()));

                if firing.channel != "none" {
                    state.notifier.notify(&alert, &firing.channel).await;
                }

                if firing.wants_investigation {
                    if let Some(investigator) = &state.investigator {
                        let status = investigator
                            .enqueue(InvestigationRequest {
                                alert: alert.clone(),
                            })
                            .await;
                        if status == argus_agent::InvestigationStatus::Queued {
                            let mut engine = state
                                .alert_engine
                                .lock()
                                .unwrap_or_else(|poisoned| poisoned.into_inner());
                            engine.mark_investigated(&alert.dedup_key, now);
                        }
                    }
                }
            }
        }
    })
}

/// Periodic system-status publication for push clients.
pub fn spawn_status_ticker(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(30));
        loop {
            ticker.tick().await;
            state
                .bus
                .publish(BusMessage::SystemStatus(state.status_snapshot()));
        }
    })
}
