//! ViewerCommands - Viewer-Initiated Control Flow
//!
//! ## Responsibilities
//!
//! - Validate start-training / start-streaming / stop commands against the
//!   session registry and device state
//! - Create or advance training sessions (strict +1 repetition sequence)
//! - Forward the resulting control command to the addressed device
//!
//! Mastery is enforced by the viewer connection loop before a command gets
//! here; this handler assumes the caller is the master viewer.

use crate::connection_hub::ConnectionHub;
use crate::device_status::DeviceStatusController;
use crate::models::{
    DeviceCommand, DeviceStatus, Event, ViewerCommand, MAX_REPETITIONS, TRAINING_STREAM_SECS,
};
use crate::session_registry::{SessionRegistry, TrainingSession};
use crate::store::Store;
use crate::{Error, Result};
use std::sync::Arc;

pub struct ViewerCommandHandler {
    sessions: Arc<SessionRegistry>,
    hub: Arc<ConnectionHub>,
    store: Arc<dyn Store>,
    device_status: Arc<DeviceStatusController>,
}

impl ViewerCommandHandler {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        hub: Arc<ConnectionHub>,
        store: Arc<dyn Store>,
        device_status: Arc<DeviceStatusController>,
    ) -> Self {
        Self {
            sessions,
            hub,
            store,
            device_status,
        }
    }

    /// Handle one command from the master viewer of a device.
    pub async fn handle_command(&self, cmd: &ViewerCommand) -> Result<()> {
        match cmd.event {
            Event::StartTraining => self.start_training(cmd).await,
            Event::StartStreaming => self.start_streaming(cmd).await,
            Event::StopTraining | Event::Stop => self.stop(cmd.device_id).await,
            other => Err(Error::Validation(format!(
                "unexpected viewer event {other:?}"
            ))),
        }
    }

    /// Start (or advance) a training session and tell the device to stream.
    async fn start_training(&self, cmd: &ViewerCommand) -> Result<()> {
        let rep = cmd
            .rep
            .ok_or_else(|| Error::Validation("rep is required for start_training".into()))?;
        let movement_id = cmd.movement_id.ok_or_else(|| {
            Error::Validation("movement_id is required for start_training".into())
        })?;

        if rep > MAX_REPETITIONS {
            return Err(Error::IncorrectRepetition(format!(
                "rep {rep} exceeds the maximum of {MAX_REPETITIONS}"
            )));
        }

        self.store.get_movement_by_id(movement_id).await?;

        let device = self.store.get_device_by_id(cmd.device_id).await?;
        if device.status == DeviceStatus::Streaming {
            return Err(Error::DeviceBusy(format!(
                "device {} is already streaming",
                cmd.device_id
            )));
        }

        match self.sessions.get(cmd.device_id).await {
            None => {
                if rep != 1 {
                    return Err(Error::IncorrectRepetition(format!(
                        "no active session; training must start at rep 1, got {rep}"
                    )));
                }
                let training_id = self
                    .store
                    .create_training(cmd.device_id, movement_id, rep)
                    .await?;
                self.sessions
                    .set(
                        cmd.device_id,
                        TrainingSession::new(training_id, cmd.device_id, movement_id, rep),
                    )
                    .await;
                tracing::info!(
                    device_id = %cmd.device_id,
                    training_id = %training_id,
                    movement_id = %movement_id,
                    "Training session created"
                );
            }
            Some(session) => {
                if session.movement_id != movement_id {
                    return Err(Error::MovementMismatch(format!(
                        "session is bound to movement {}, got {movement_id}",
                        session.movement_id
                    )));
                }
                if rep != session.rep + 1 {
                    return Err(Error::IncorrectRepetition(format!(
                        "expected rep {}, got {rep}",
                        session.rep + 1
                    )));
                }
                self.store
                    .update_training_repetition(session.training_id, rep)
                    .await?;
                self.sessions.update(cmd.device_id, |s| s.rep = rep).await;
                tracing::info!(
                    device_id = %cmd.device_id,
                    training_id = %session.training_id,
                    rep = %rep,
                    "Training session advanced"
                );
            }
        }

        self.send_command(
            cmd.device_id,
            &DeviceCommand::start_raw_stream(TRAINING_STREAM_SECS),
        )
        .await;
        Ok(())
    }

    /// Live classification stream, no training semantics.
    async fn start_streaming(&self, cmd: &ViewerCommand) -> Result<()> {
        self.store.get_device_by_id(cmd.device_id).await?;
        self.device_status
            .transition(cmd.device_id, DeviceStatus::Streaming)
            .await?;

        self.send_command(
            cmd.device_id,
            &DeviceCommand::start_raw_stream(TRAINING_STREAM_SECS * 60),
        )
        .await;
        Ok(())
    }

    /// Unconditional stop: idle the device and tell it to stop streaming.
    async fn stop(&self, device_id: i32) -> Result<()> {
        self.device_status
            .transition(device_id, DeviceStatus::Idle)
            .await?;

        self.send_command(device_id, &DeviceCommand::stop_raw_stream())
            .await;
        Ok(())
    }

    async fn send_command(&self, device_id: i32, command: &DeviceCommand) {
        let payload = match serde_json::to_string(command) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize device command");
                return;
            }
        };
        if let Err(e) = self.hub.send_to_device(device_id, &payload).await {
            tracing::warn!(device_id = %device_id, error = %e, "Failed to deliver device command");
        }
    }
}
