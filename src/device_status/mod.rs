//! DeviceStatusController - Device Lifecycle
//!
//! ## Responsibilities
//!
//! - Validate and apply idle/reserved/streaming transitions against the store
//! - Reject a transition into streaming when the device already streams
//!
//! The streaming transition is a single conditional update at the store, so
//! two controllers racing on the same device cannot both win.

use crate::models::DeviceStatus;
use crate::store::Store;
use crate::{Error, Result};
use std::sync::Arc;

pub struct DeviceStatusController {
    store: Arc<dyn Store>,
}

impl DeviceStatusController {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Apply a status transition. Into `Streaming` it is exclusive and fails
    /// with [`Error::DeviceBusy`] if the device already streams; every other
    /// target is an unconditional write. Both refresh the activity timestamp.
    pub async fn transition(&self, device_id: i32, target: DeviceStatus) -> Result<()> {
        match target {
            DeviceStatus::Streaming => {
                if self.store.try_begin_streaming(device_id).await? {
                    Ok(())
                } else {
                    Err(Error::DeviceBusy(format!(
                        "device {device_id} is already streaming"
                    )))
                }
            }
            other => self.store.set_device_status(device_id, other).await,
        }
    }

    /// Status write during an active stream. Failures are logged, never
    /// propagated; the stream must not abort on a progress marker.
    pub async fn refresh_streaming(&self, device_id: i32) {
        if let Err(e) = self
            .store
            .set_device_status(device_id, DeviceStatus::Streaming)
            .await
        {
            tracing::warn!(device_id = %device_id, error = %e, "Failed to refresh streaming status");
        }
    }
}
