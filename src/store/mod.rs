//! Store - PostgreSQL Persistence
//!
//! ## Responsibilities
//!
//! - Devices: registration, listing, status writes (plain and conditional)
//! - Movement catalog lookups
//! - Trainings and their raw sample windows
//!
//! The trait keeps the protocol core testable without a database; the
//! process wires in [`PostgresStore`].

pub mod codec;
mod postgres;

pub use postgres::PostgresStore;

use crate::models::{Device, DeviceStatus, Movement, RawSample};
use crate::session_registry::TrainingSession;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One persisted raw training window, as stored.
#[derive(Debug, Clone)]
pub struct TrainingRawRow {
    pub id: i32,
    pub training_id: i32,
    pub device_id: i32,
    pub movement_id: i32,
    pub repetition: i32,
    pub ts: DateTime<Utc>,
    pub raw: Vec<u8>,
}

/// New raw window to persist, tied to a session's training and repetition.
#[derive(Debug, Clone)]
pub struct NewTrainingRaw {
    pub training_id: i32,
    pub device_id: i32,
    pub movement_id: i32,
    pub repetition: i32,
    pub ts: DateTime<Utc>,
    pub raw: Vec<u8>,
}

impl NewTrainingRaw {
    /// Build a row from a device frame's window and timestamp string.
    ///
    /// The timestamp arrives as decimal nanoseconds since epoch; anything
    /// unparseable falls back to the server clock.
    pub fn from_window(samples: &[i64], device_ts: Option<&str>, session: &TrainingSession) -> Self {
        let ts_nanos = device_ts
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or_else(|| Utc::now().timestamp_nanos_opt().unwrap_or(0));

        let secs = ts_nanos.div_euclid(1_000_000_000);
        let nanos = ts_nanos.rem_euclid(1_000_000_000) as u32;
        let ts = DateTime::from_timestamp(secs, nanos).unwrap_or_else(Utc::now);

        Self {
            training_id: session.training_id,
            device_id: session.device_id,
            movement_id: session.movement_id,
            repetition: session.rep,
            ts,
            raw: codec::encode_samples(samples),
        }
    }
}

/// Persistence operations consumed by the protocol core.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_movements(&self) -> Result<Vec<Movement>>;
    async fn get_movement_by_id(&self, movement_id: i32) -> Result<Movement>;

    async fn list_devices(&self) -> Result<Vec<Device>>;
    async fn get_device_by_id(&self, device_id: i32) -> Result<Device>;
    async fn register_device(&self, name: &str) -> Result<Device>;
    /// Unconditional status write; refreshes the activity timestamp.
    async fn set_device_status(&self, device_id: i32, status: DeviceStatus) -> Result<()>;
    /// Atomic conditional transition into `streaming`. Returns false when the
    /// device already streams (the row is left untouched).
    async fn try_begin_streaming(&self, device_id: i32) -> Result<bool>;

    async fn create_training(&self, device_id: i32, movement_id: i32, rep: i32) -> Result<i32>;
    async fn update_training_repetition(&self, training_id: i32, rep: i32) -> Result<()>;
    async fn mark_training_finished(&self, training_id: i32) -> Result<()>;
    async fn delete_training(&self, training_id: i32) -> Result<()>;

    async fn insert_raw_sample(&self, row: NewTrainingRaw) -> Result<()>;
    /// Full ordered sample history for one (training, device) pair.
    async fn select_raw_samples(&self, training_id: i32, device_id: i32)
        -> Result<Vec<RawSample>>;
    async fn get_all_raw_data(&self) -> Result<Vec<TrainingRawRow>>;
}
