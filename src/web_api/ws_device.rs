//! Device WebSocket connection loop.
//!
//! One loop per connected device. The loop blocks on the socket read and on
//! the store/classifier calls made while handling a frame; other connections
//! run their own loops. Frames are handled fully, in arrival order.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;

use crate::connection_hub::ConnectionHandle;
use crate::models::{error_payload, DeviceFrame, Event};
use crate::state::AppState;

pub async fn handle_device_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Forward hub payloads and local replies onto the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    tracing::info!("Device socket connected");

    // Assigned on handshake; frames before it are ignored
    let mut device_id: Option<i32> = None;

    while let Some(result) = receiver.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "Device socket read error");
                break;
            }
        };

        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let frame: DeviceFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = tx.send(error_payload(&format!("invalid frame: {e}")));
                continue;
            }
        };

        if frame.event == Event::Handshake {
            let name = frame.device_name.clone().unwrap_or_default();
            match state.dispatcher.handshake(&name).await {
                Ok(id) => {
                    device_id = Some(id);
                    state
                        .hub
                        .register_device(id, ConnectionHandle::new(tx.clone()))
                        .await;
                    let _ = tx.send(
                        json!({ "event": Event::HandshakeOk, "device_id": id }).to_string(),
                    );
                }
                Err(e) => {
                    tracing::error!(device_name = %name, error = %e, "Device registration failed");
                    let _ = tx.send(error_payload(&format!("device registration failed: {e}")));
                }
            }
            continue;
        }

        let Some(id) = device_id else {
            continue;
        };

        if let Err(e) = state.dispatcher.handle_frame(id, &frame).await {
            tracing::warn!(device_id = %id, error = %e, "Device frame rejected");
            let _ = tx.send(error_payload(&e.to_string()));
        }
    }

    // Transport gone: clear the hub handle. The session registry is left
    // alone; the idle sweep collects whatever this device abandoned.
    if let Some(id) = device_id {
        state.hub.remove_device(id).await;
    }
    send_task.abort();
    tracing::info!(device_id = ?device_id, "Device socket closed");
}
