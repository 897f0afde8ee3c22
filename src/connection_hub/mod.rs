//! ConnectionHub - Device/Viewer WebSocket Routing
//!
//! ## Responsibilities
//!
//! - Track the single live device connection per device id
//! - Track every viewer connection per device id, plus the master viewer
//! - Fan out payloads to viewers; route commands to the device
//!
//! Handles hold an mpsc sender; the socket write loop lives in the
//! connection's own task. Dropping a handle ends that forward task, so a
//! displaced device connection is never leaked.
//!
//! The master slot is first-registration-wins and is cleared when that
//! viewer disconnects, so a later viewer can be elected.

use crate::{Error, Result};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Sender side of one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<String>,
}

impl ConnectionHandle {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn send(&self, payload: &str) -> std::result::Result<(), mpsc::error::SendError<String>> {
        self.tx.send(payload.to_string())
    }
}

#[derive(Default)]
struct HubInner {
    /// device id -> device connection (latest registration wins)
    devices: HashMap<i32, ConnectionHandle>,
    /// device id -> all viewer connections
    viewers: HashMap<i32, Vec<ConnectionHandle>>,
    /// device id -> master viewer connection
    masters: HashMap<i32, ConnectionHandle>,
}

/// Registry of live device/viewer connections keyed by device id.
pub struct ConnectionHub {
    inner: RwLock<HubInner>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HubInner::default()),
        }
    }

    /// Install the device connection, replacing any previous one.
    pub async fn register_device(&self, device_id: i32, handle: ConnectionHandle) {
        let mut inner = self.inner.write().await;
        if inner.devices.insert(device_id, handle).is_some() {
            tracing::info!(device_id = %device_id, "Device connection replaced");
        } else {
            tracing::info!(device_id = %device_id, "Device connected");
        }
    }

    /// Append a viewer connection for a device.
    pub async fn register_viewer(&self, device_id: i32, handle: ConnectionHandle) {
        let mut inner = self.inner.write().await;
        inner.viewers.entry(device_id).or_default().push(handle);
    }

    /// Claim the master slot if vacant. Returns the id of the connection
    /// currently designated master, so callers can detect non-mastery.
    pub async fn register_master(&self, device_id: i32, handle: ConnectionHandle) -> Uuid {
        let mut inner = self.inner.write().await;
        let master = inner.masters.entry(device_id).or_insert_with(|| {
            tracing::info!(device_id = %device_id, connection_id = %handle.id, "Master viewer elected");
            handle.clone()
        });
        master.id
    }

    /// Whether `conn_id` holds the master slot for `device_id`.
    pub async fn is_master(&self, device_id: i32, conn_id: Uuid) -> bool {
        self.inner
            .read()
            .await
            .masters
            .get(&device_id)
            .map(|m| m.id == conn_id)
            .unwrap_or(false)
    }

    /// Deliver a payload to the device connection. Silent no-op when the
    /// device is not connected; callers must not treat that as fatal.
    pub async fn send_to_device(&self, device_id: i32, payload: &str) -> Result<()> {
        let inner = self.inner.read().await;
        let Some(handle) = inner.devices.get(&device_id) else {
            return Ok(());
        };
        handle
            .send(payload)
            .map_err(|_| Error::Internal(format!("device {device_id} connection closed")))
    }

    /// Broadcast a payload to every viewer of a device. A failed handle is
    /// logged and skipped; the remaining handles still receive the payload.
    pub async fn send_to_viewers(&self, device_id: i32, payload: &str) {
        let inner = self.inner.read().await;
        let Some(handles) = inner.viewers.get(&device_id) else {
            return;
        };
        for handle in handles {
            if handle.send(payload).is_err() {
                tracing::warn!(
                    device_id = %device_id,
                    connection_id = %handle.id,
                    "Failed to deliver to viewer"
                );
            }
        }
    }

    /// Clear the device connection entry.
    pub async fn remove_device(&self, device_id: i32) {
        let mut inner = self.inner.write().await;
        if inner.devices.remove(&device_id).is_some() {
            tracing::info!(device_id = %device_id, "Device disconnected");
        }
    }

    /// Drop a viewer connection. Frees the master slot when that viewer held
    /// it, allowing re-election by the next registrant.
    pub async fn remove_viewer(&self, device_id: i32, conn_id: Uuid) {
        let mut inner = self.inner.write().await;
        if let Some(handles) = inner.viewers.get_mut(&device_id) {
            handles.retain(|h| h.id != conn_id);
            if handles.is_empty() {
                inner.viewers.remove(&device_id);
            }
        }
        if inner.masters.get(&device_id).map(|m| m.id) == Some(conn_id) {
            inner.masters.remove(&device_id);
            tracing::info!(device_id = %device_id, connection_id = %conn_id, "Master viewer released");
        }
    }

    /// Number of viewer connections for a device.
    pub async fn viewer_count(&self, device_id: i32) -> usize {
        self.inner
            .read()
            .await
            .viewers
            .get(&device_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(tx), rx)
    }

    #[tokio::test]
    async fn test_send_to_device_without_connection_is_ok() {
        let hub = ConnectionHub::new();
        assert!(hub.send_to_device(1, "payload").await.is_ok());
    }

    #[tokio::test]
    async fn test_latest_device_registration_wins() {
        let hub = ConnectionHub::new();
        let (first, mut first_rx) = handle();
        let (second, mut second_rx) = handle();

        hub.register_device(1, first).await;
        hub.register_device(1, second).await;

        hub.send_to_device(1, "hello").await.unwrap();
        assert_eq!(second_rx.recv().await.unwrap(), "hello");
        assert!(first_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_survives_broken_handle() {
        let hub = ConnectionHub::new();
        let (a, mut a_rx) = handle();
        let (broken, broken_rx) = handle();
        let (c, mut c_rx) = handle();
        drop(broken_rx);

        hub.register_viewer(1, a).await;
        hub.register_viewer(1, broken).await;
        hub.register_viewer(1, c).await;

        hub.send_to_viewers(1, "data").await;

        assert_eq!(a_rx.recv().await.unwrap(), "data");
        assert_eq!(c_rx.recv().await.unwrap(), "data");
    }

    #[tokio::test]
    async fn test_first_master_registration_wins() {
        let hub = ConnectionHub::new();
        let (first, _first_rx) = handle();
        let (second, _second_rx) = handle();
        let first_id = first.id();

        assert_eq!(hub.register_master(1, first).await, first_id);
        assert_eq!(hub.register_master(1, second.clone()).await, first_id);
        assert!(hub.is_master(1, first_id).await);
        assert!(!hub.is_master(1, second.id()).await);
    }

    #[tokio::test]
    async fn test_master_reelected_after_disconnect() {
        let hub = ConnectionHub::new();
        let (first, _first_rx) = handle();
        let (second, _second_rx) = handle();
        let first_id = first.id();
        let second_id = second.id();

        hub.register_viewer(1, first.clone()).await;
        hub.register_master(1, first).await;
        hub.register_viewer(1, second.clone()).await;
        assert_eq!(hub.register_master(1, second.clone()).await, first_id);

        hub.remove_viewer(1, first_id).await;
        assert_eq!(hub.register_master(1, second).await, second_id);
        assert!(hub.is_master(1, second_id).await);
    }

    #[tokio::test]
    async fn test_remove_viewer_keeps_others() {
        let hub = ConnectionHub::new();
        let (a, _a_rx) = handle();
        let (b, mut b_rx) = handle();
        let a_id = a.id();

        hub.register_viewer(1, a).await;
        hub.register_viewer(1, b).await;
        hub.remove_viewer(1, a_id).await;

        assert_eq!(hub.viewer_count(1).await, 1);
        hub.send_to_viewers(1, "still here").await;
        assert_eq!(b_rx.recv().await.unwrap(), "still here");
    }
}
