//! Push channel.
//!
//! One socket is one channel. The client sends `register {jobId}` and gets
//! `registered` back; when the job finishes the worker pushes
//! `scriptResult` through the shared registry. A client that registers after
//! the job finished is sent the stored result straight away.

use std::sync::atomic::{AtomicI64, Ordering};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use scriptgen_models::{ClientMessage, WsMessage};
use scriptgen_worker::ChannelHandle;

use crate::metrics;
use crate::state::AppState;

/// Global counter for active WebSocket connections.
static ACTIVE_WS_CONNECTIONS: AtomicI64 = AtomicI64::new(0);

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let count = ACTIVE_WS_CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
    metrics::set_ws_active_connections(count);
    metrics::record_ws_connection();

    ws.on_upgrade(|socket| async move {
        handle_socket(socket, state).await;
        let count = ACTIVE_WS_CONNECTIONS.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_ws_active_connections(count);
    })
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let handle = ChannelHandle::new(tx);
    let channel_id = handle.id().clone();
    debug!(channel = %channel_id, "Channel opened");

    // Everything bound for this socket, registry pushes included, goes through here
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to serialize push message: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json)).await.is_err() {
                break;
            }
            metrics::record_ws_message_sent(msg.message_type().as_str());
        }
        let _ = ws_sender.close().await;
    });

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => handle_client_frame(&state, &handle, &text).await,
            Ok(Message::Close(_)) => break,
            // Ping/pong is answered by axum
            Ok(_) => {}
            Err(e) => {
                debug!(channel = %channel_id, "Socket error: {}", e);
                break;
            }
        }
    }

    if let Some(job_id) = state.registry.on_channel_closed(&channel_id).await {
        info!(channel = %channel_id, job_id = %job_id, "Channel closed while bound");
    }
    drop(handle);
    send_task.abort();
}

fn client_message_type(msg: &ClientMessage) -> &'static str {
    match msg {
        ClientMessage::Register { .. } => "register",
        ClientMessage::Unregister { .. } => "unregister",
        ClientMessage::HeartbeatAck => "heartbeat_ack",
    }
}

/// Apply one client frame. Replies go out through `handle`.
pub(crate) async fn handle_client_frame(state: &AppState, handle: &ChannelHandle, text: &str) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            metrics::record_ws_message_received("invalid");
            let _ = handle.send(WsMessage::error(format!("Invalid message: {}", e)));
            return;
        }
    };
    metrics::record_ws_message_received(client_message_type(&message));

    match message {
        ClientMessage::Register { job_id } => {
            match state.registry.register(&job_id, handle.clone()).await {
                Ok(ack) => {
                    let _ = handle.send(ack.to_message());
                    // The job may already be done
                    match state.delivery.push_stored(&job_id).await {
                        Ok(true) => info!(job_id = %job_id, "Sent stored result on registration"),
                        Ok(false) => {}
                        Err(e) => warn!(job_id = %job_id, "Failed to load stored result: {}", e),
                    }
                }
                Err(e) => {
                    let _ = handle.send(WsMessage::error(e.to_string()));
                }
            }
        }
        ClientMessage::Unregister { job_id } => {
            // Only the bound channel may release a job
            let bound_here = state
                .registry
                .lookup(&job_id)
                .await
                .is_some_and(|bound| bound.id() == handle.id());
            if bound_here {
                state.registry.unregister(&job_id).await;
            } else {
                debug!(job_id = %job_id, channel = %handle.id(), "Ignoring unregister from unbound channel");
            }
        }
        ClientMessage::HeartbeatAck => {
            state.registry.heartbeat_ack(handle.id()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptgen_models::{JobId, JobResult, ScriptId, ScriptPayload, ScriptStatus};
    use scriptgen_store::DocumentStore;

    use crate::testing::{memory_state, seed_job};

    fn channel() -> (ChannelHandle, mpsc::UnboundedReceiver<WsMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelHandle::new(tx), rx)
    }

    #[tokio::test]
    async fn test_register_acknowledges_and_binds() {
        let (state, _) = memory_state();
        let (handle, mut rx) = channel();

        handle_client_frame(&state, &handle, r#"{"event":"register","jobId":"J1"}"#).await;

        match rx.recv().await.unwrap() {
            WsMessage::Registered {
                status,
                job_id,
                channel,
                ..
            } => {
                assert_eq!(status, "ok");
                assert_eq!(job_id, JobId::from("J1"));
                assert_eq!(&channel, handle.id());
            }
            other => panic!("expected registered, got {:?}", other),
        }
        assert_eq!(
            state.registry.lookup(&JobId::from("J1")).await.map(|h| h.id().clone()),
            Some(handle.id().clone())
        );
    }

    #[tokio::test]
    async fn test_late_registration_receives_stored_result() {
        let (state, store) = memory_state();
        seed_job(&store, "J1").await;
        let result = JobResult::success(
            JobId::from("J1"),
            ScriptPayload {
                script_id: ScriptId::from("s1"),
                topic: "photosynthesis".into(),
                title: String::new(),
                description: String::new(),
                script: "Plants eat light.".into(),
                status: ScriptStatus::Generated,
                segment_count: 2,
                fanout: None,
            },
        );
        store.save_result(&result).await.unwrap();

        let (handle, mut rx) = channel();
        handle_client_frame(&state, &handle, r#"{"event":"register","jobId":"J1"}"#).await;

        assert!(matches!(rx.recv().await, Some(WsMessage::Registered { .. })));
        assert_eq!(rx.recv().await.unwrap(), WsMessage::ScriptResult(result));
    }

    #[tokio::test]
    async fn test_blank_job_id_is_refused() {
        let (state, _) = memory_state();
        let (handle, mut rx) = channel();

        handle_client_frame(&state, &handle, r#"{"event":"register","jobId":"  "}"#).await;

        assert!(matches!(rx.recv().await, Some(WsMessage::Error { .. })));
        assert!(state.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_unregister_only_from_bound_channel() {
        let (state, _) = memory_state();
        let (owner, _owner_rx) = channel();
        let (other, _other_rx) = channel();

        handle_client_frame(&state, &owner, r#"{"event":"register","jobId":"J1"}"#).await;
        handle_client_frame(&state, &other, r#"{"event":"unregister","jobId":"J1"}"#).await;
        assert!(state.registry.lookup(&JobId::from("J1")).await.is_some());

        handle_client_frame(&state, &owner, r#"{"event":"unregister","jobId":"J1"}"#).await;
        assert!(state.registry.lookup(&JobId::from("J1")).await.is_none());
    }

    #[tokio::test]
    async fn test_garbage_frame_gets_error_reply() {
        let (state, _) = memory_state();
        let (handle, mut rx) = channel();

        handle_client_frame(&state, &handle, "not json").await;

        match rx.recv().await.unwrap() {
            WsMessage::Error { message, .. } => assert!(message.starts_with("Invalid message")),
            other => panic!("expected error, got {:?}", other),
        }
    }
}
