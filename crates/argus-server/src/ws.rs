//! Realtime push session: the `/ws` endpoint.
//!
//! Each connection owns its outbound queue and a writer task; run output
//! reaches every connection through the bus fan-out, so multiple UIs see
//! the same stream. User chat runs are session-scoped and cancelled on
//! disconnect; auto-investigations are not.

use crate::push::PushConnection;
use crate::state::AppState;
use argus_actions::ApprovalDecision;
use argus_agent::{ConversationMemory, RunParams};
use argus_common::protocol::{ClientBody, ClientMessage, ServerBody, ServerMessage};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

struct RunningChat {
    run_id: String,
    cancel: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn = state.connections.register();
    let (mut sender, mut receiver) = socket.split();

    conn.queue.push(ServerMessage::new(ServerBody::Connected {
        message: "Connected to Argus agent".to_string(),
    }));
    conn.queue.push(ServerMessage::new(ServerBody::SystemStatus {
        status: state.status_snapshot(),
    }));

    // Writer: drains the outbound queue, enforces the heartbeat, and
    // honors backpressure close requests.
    let writer_conn = conn.clone();
    let writer = tokio::spawn(async move {
        let mut watchdog = tokio::time::interval(std::time::Duration::from_secs(1));
        watchdog.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                msg = writer_conn.queue.pop() => {
                    let text = match serde_json::to_string(&msg) {
                        Ok(text) => text,
                        Err(err) => {
                            tracing::error!(error = %err, "Failed to encode push message");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = watchdog.tick() => {
                    if writer_conn.heartbeat_expired(Utc::now()) {
                        tracing::info!(
                            connection_id = %writer_conn.id,
                            "Closing connection (missed heartbeats)"
                        );
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                }
                _ = writer_conn.closed() => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    // Per-connection conversation memory; the chat run borrows it.
    let memory = Arc::new(tokio::sync::Mutex::new(ConversationMemory::new(
        argus_agent::prompt::CHAT_SYSTEM_PROMPT,
    )));
    let running: Arc<Mutex<Option<RunningChat>>> = Arc::new(Mutex::new(None));

    while let Some(message) = receiver.next().await {
        let message = match message {
            Ok(message) => message,
            Err(_) => break,
        };
        match message {
            Message::Text(text) => {
                let parsed: Result<ClientMessage, _> = serde_json::from_str(text.as_str());
                match parsed {
                    Ok(msg) => {
                        handle_client_message(&state, &conn, &memory, &running, msg).await;
                    }
                    Err(_) => {
                        conn.queue.push(ServerMessage::new(ServerBody::Error {
                            code: "validation".to_string(),
                            message: "invalid message format".to_string(),
                            correlation_id: None,
                        }));
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Session teardown: chat runs are tied to this session.
    let active = {
        let mut slot = running.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.take()
    };
    if let Some(run) = active {
        // Cancel and detach: the loop settles its budget and tears down
        // within the bounded window on its own.
        let _ = run.cancel.send(true);
        drop(run.handle);
    }
    state.connections.remove(&conn.id);
    writer.abort();
}

async fn handle_client_message(
    state: &AppState,
    conn: &Arc<PushConnection>,
    memory: &Arc<tokio::sync::Mutex<ConversationMemory>>,
    running: &Arc<Mutex<Option<RunningChat>>>,
    msg: ClientMessage,
) {
    match msg.body {
        ClientBody::Ping => {
            conn.record_ping();
            conn.queue.push(ServerMessage::new(ServerBody::Pong));
        }
        ClientBody::UserMessage { content } => {
            if content.is_empty() {
                return;
            }
            let Some(react) = state.react.clone() else {
                push_unconfigured_notice(conn);
                return;
            };

            let busy = {
                let slot = running.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                slot.as_ref().is_some_and(|run| !run.handle.is_finished())
            };
            if busy {
                conn.queue.push(ServerMessage::new(ServerBody::Error {
                    code: "conflict".to_string(),
                    message: "agent is busy, please wait".to_string(),
                    correlation_id: None,
                }));
                return;
            }

            let run_id = argus_common::id::next_id();
            let (cancel_tx, cancel_rx) = watch::channel(false);
            let memory = memory.clone();
            let params = RunParams::chat(run_id.clone());
            // Run in the background so this loop stays free to receive
            // action_response and cancel messages.
            let handle = tokio::spawn(async move {
                let mut memory = memory.lock().await;
                let result = react.run(&mut memory, &content, params, cancel_rx).await;
                tracing::info!(
                    run_id = %result.run_id,
                    termination = %result.termination,
                    tokens = result.usage.total(),
                    "Chat run finished"
                );
            });
            let mut slot = running.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            *slot = Some(RunningChat {
                run_id,
                cancel: cancel_tx,
                handle,
            });
        }
        ClientBody::ActionResponse {
            action_id,
            approved,
            user,
            authorization,
        } => {
            state.actions.handle_response(
                &action_id,
                ApprovalDecision {
                    approved,
                    user,
                    authorization,
                },
            );
        }
        ClientBody::Cancel { run_id } => {
            let slot = running.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            match slot.as_ref() {
                Some(run) if run.run_id == run_id => {
                    tracing::info!(run_id = %run_id, "Cancel requested");
                    let _ = run.cancel.send(true);
                }
                _ => {
                    tracing::debug!(run_id = %run_id, "Cancel for unknown run ignored");
                }
            }
        }
    }
}

fn push_unconfigured_notice(conn: &Arc<PushConnection>) {
    let run_id = argus_common::id::next_id();
    conn.queue
        .push(ServerMessage::new(ServerBody::AssistantMessageStart {
            run_id: run_id.clone(),
            conversation_id: String::new(),
        }));
    conn.queue
        .push(ServerMessage::new(ServerBody::AssistantMessageDelta {
            run_id: run_id.clone(),
            content: "LLM provider not configured. Set llm.api_key in argus.toml and \
                      restart the server."
                .to_string(),
        }));
    conn.queue
        .push(ServerMessage::new(ServerBody::AssistantMessageEnd { run_id }));
}
