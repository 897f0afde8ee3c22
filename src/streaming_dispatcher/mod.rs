//! StreamingDispatcher - Device Frame State Machine
//!
//! ## Responsibilities
//!
//! - Decide per frame: training data (persist) or live data (classify)
//! - Drive the training flow: begin / in-process / finish
//! - Relay resulting events to the device's viewers through the hub
//!
//! Frames from one device arrive on that device's own read loop, so the
//! dispatcher sees them strictly in wire order. A frame is handled fully
//! before the loop reads the next one.

use crate::classifier::Classifier;
use crate::connection_hub::ConnectionHub;
use crate::device_status::DeviceStatusController;
use crate::features;
use crate::models::{DeviceFrame, DeviceStatus, Event, ViewerEvent, MAX_REPETITIONS};
use crate::session_registry::SessionRegistry;
use crate::store::{NewTrainingRaw, Store};
use crate::{Error, Result};
use std::sync::Arc;

pub struct StreamingDispatcher {
    sessions: Arc<SessionRegistry>,
    hub: Arc<ConnectionHub>,
    store: Arc<dyn Store>,
    classifier: Arc<dyn Classifier>,
    device_status: Arc<DeviceStatusController>,
    /// When set, a classifier failure produces an explicit error event for
    /// the viewers instead of a zero-valued streaming_data event.
    classifier_error_events: bool,
}

impl StreamingDispatcher {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        hub: Arc<ConnectionHub>,
        store: Arc<dyn Store>,
        classifier: Arc<dyn Classifier>,
        device_status: Arc<DeviceStatusController>,
        classifier_error_events: bool,
    ) -> Self {
        Self {
            sessions,
            hub,
            store,
            classifier,
            device_status,
            classifier_error_events,
        }
    }

    /// Register a device by name. Registration is unconditional; the same
    /// name handshaking twice yields two device identities.
    pub async fn handshake(&self, device_name: &str) -> Result<i32> {
        let device = self.store.register_device(device_name).await?;
        tracing::info!(device_id = %device.id, device_name = %device_name, "Device registered");
        Ok(device.id)
    }

    /// Handle one raw-stream frame from a connected device.
    pub async fn handle_frame(&self, device_id: i32, frame: &DeviceFrame) -> Result<()> {
        match frame.event {
            Event::RawStreamBegin => self.handle_begin(device_id).await,
            Event::RawStreamInProcess => self.handle_in_process(device_id, frame).await,
            Event::RawStreamFinish => self.handle_finish(device_id).await,
            other => Err(Error::ProtocolViolation(format!(
                "unexpected device event {other:?}"
            ))),
        }
    }

    async fn handle_begin(&self, device_id: i32) -> Result<()> {
        let session = self.sessions.get(device_id).await.ok_or_else(|| {
            Error::ProtocolViolation(format!(
                "raw stream begin without an active session for device {device_id}"
            ))
        })?;

        self.mark_streaming(device_id).await;
        self.sessions.touch(device_id).await;

        self.emit(
            device_id,
            &ViewerEvent {
                event: Event::TrainingStarted,
                device_id,
                movement_id: Some(session.movement_id),
                rep: Some(session.rep),
                raw: None,
                class_id: None,
                class_name: None,
                prob: None,
            },
        )
        .await;

        Ok(())
    }

    async fn handle_in_process(&self, device_id: i32, frame: &DeviceFrame) -> Result<()> {
        match self.sessions.get(device_id).await {
            Some(session) => self.handle_training_window(device_id, frame, session).await,
            None => self.handle_live_window(device_id, frame).await,
        }
    }

    /// Training mode: persist the window, then relay the full ordered sample
    /// history collected so far for this training.
    async fn handle_training_window(
        &self,
        device_id: i32,
        frame: &DeviceFrame,
        session: crate::session_registry::TrainingSession,
    ) -> Result<()> {
        let row = NewTrainingRaw::from_window(&frame.raw, frame.timestamp.as_deref(), &session);
        self.store.insert_raw_sample(row).await?;

        let history = self
            .store
            .select_raw_samples(session.training_id, session.device_id)
            .await?;

        self.device_status.refresh_streaming(device_id).await;
        self.sessions.touch(device_id).await;

        self.emit(
            device_id,
            &ViewerEvent {
                event: Event::TrainingRawData,
                device_id,
                movement_id: Some(session.movement_id),
                rep: Some(session.rep),
                raw: Some(history),
                class_id: None,
                class_name: None,
                prob: None,
            },
        )
        .await;

        Ok(())
    }

    /// Live mode: no session, so the window is classified instead of stored.
    /// A classifier failure degrades the event rather than dropping the frame.
    async fn handle_live_window(&self, device_id: i32, frame: &DeviceFrame) -> Result<()> {
        self.device_status.refresh_streaming(device_id).await;

        let feature_vector = features::extract_features(&frame.raw);

        let event = match self.classifier.predict(&feature_vector).await {
            Ok(prediction) => ViewerEvent {
                event: Event::StreamingData,
                device_id,
                movement_id: None,
                rep: None,
                raw: None,
                class_id: Some(prediction.class_id),
                class_name: Some(prediction.class_name),
                prob: Some(prediction.probabilities),
            },
            Err(e) => {
                tracing::error!(device_id = %device_id, error = %e, "Classifier call failed");
                if self.classifier_error_events {
                    self.hub
                        .send_to_viewers(
                            device_id,
                            &crate::models::error_payload("classification unavailable"),
                        )
                        .await;
                    return Ok(());
                }
                ViewerEvent {
                    event: Event::StreamingData,
                    device_id,
                    movement_id: None,
                    rep: None,
                    raw: None,
                    class_id: Some(0),
                    class_name: Some(String::new()),
                    prob: Some(Vec::new()),
                }
            }
        };

        self.emit(device_id, &event).await;
        Ok(())
    }

    async fn handle_finish(&self, device_id: i32) -> Result<()> {
        let session = self.sessions.get(device_id).await.ok_or_else(|| {
            Error::ProtocolViolation(format!(
                "raw stream finish without an active session for device {device_id}"
            ))
        })?;

        if session.rep >= MAX_REPETITIONS {
            // Final repetition: release the device and discard the training.
            if let Err(e) = self
                .device_status
                .transition(device_id, DeviceStatus::Idle)
                .await
            {
                tracing::warn!(device_id = %device_id, error = %e, "Failed to idle device on finish");
            }
            if let Err(e) = self.store.delete_training(session.training_id).await {
                tracing::warn!(
                    training_id = %session.training_id,
                    error = %e,
                    "Failed to discard completed training"
                );
            }
            self.sessions.delete(device_id).await;
        } else {
            // More repetitions to come: hold the device and keep the session.
            if let Err(e) = self
                .device_status
                .transition(device_id, DeviceStatus::Reserved)
                .await
            {
                tracing::warn!(device_id = %device_id, error = %e, "Failed to reserve device on finish");
            }
            self.sessions.touch(device_id).await;
        }

        self.emit(
            device_id,
            &ViewerEvent {
                event: Event::TrainingCompleted,
                device_id,
                movement_id: Some(session.movement_id),
                rep: Some(session.rep),
                raw: None,
                class_id: None,
                class_name: None,
                prob: None,
            },
        )
        .await;

        Ok(())
    }

    /// Transition into streaming at the start of a stream. Busy or store
    /// failures are not fatal to the frame; the stream carries on.
    async fn mark_streaming(&self, device_id: i32) {
        if let Err(e) = self
            .device_status
            .transition(device_id, DeviceStatus::Streaming)
            .await
        {
            tracing::warn!(device_id = %device_id, error = %e, "Failed to mark device streaming");
        }
    }

    async fn emit(&self, device_id: i32, event: &ViewerEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize viewer event");
                return;
            }
        };
        self.hub.send_to_viewers(device_id, &payload).await;
    }
}
