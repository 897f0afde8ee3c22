//! Viewer WebSocket connection loop.
//!
//! A viewer subscribes to a device by sending any command naming it; the
//! first viewer to do so becomes that device's master. Commands from
//! non-master viewers register them as broadcast subscribers but trigger no
//! state change.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::collections::HashSet;
use tokio::sync::mpsc;

use crate::connection_hub::ConnectionHandle;
use crate::models::{error_payload, ViewerCommand};
use crate::state::AppState;

pub async fn handle_viewer_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    let handle = ConnectionHandle::new(tx.clone());
    let conn_id = handle.id();
    tracing::info!(connection_id = %conn_id, "Viewer socket connected");

    // Device ids this connection subscribed to, for cleanup on close
    let mut subscribed: HashSet<i32> = HashSet::new();

    while let Some(result) = receiver.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(connection_id = %conn_id, error = %e, "Viewer socket read error");
                break;
            }
        };

        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let cmd: ViewerCommand = match serde_json::from_str(&text) {
            Ok(cmd) => cmd,
            Err(e) => {
                let _ = tx.send(error_payload(&format!("invalid command: {e}")));
                continue;
            }
        };

        if subscribed.insert(cmd.device_id) {
            state.hub.register_viewer(cmd.device_id, handle.clone()).await;
        }

        let master_id = state.hub.register_master(cmd.device_id, handle.clone()).await;
        if master_id != conn_id {
            tracing::debug!(
                device_id = %cmd.device_id,
                connection_id = %conn_id,
                "Ignoring command from non-master viewer"
            );
            continue;
        }

        if let Err(e) = state.viewer_commands.handle_command(&cmd).await {
            tracing::warn!(device_id = %cmd.device_id, error = %e, "Viewer command rejected");
            let _ = tx.send(error_payload(&e.to_string()));
        }
    }

    for device_id in subscribed {
        state.hub.remove_viewer(device_id, conn_id).await;
    }
    send_task.abort();
    tracing::info!(connection_id = %conn_id, "Viewer socket closed");
}
