//! PostgreSQL implementation of the [`Store`] trait.

use super::codec;
use super::{NewTrainingRaw, Store, TrainingRawRow};
use crate::models::{Device, DeviceStatus, Movement, RawSample};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Store backed by a PostgreSQL pool.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn get_movements(&self) -> Result<Vec<Movement>> {
        let rows = sqlx::query_as::<_, MovementRow>(
            r#"
            SELECT movement_id, name, description FROM movements ORDER BY movement_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Movement::from).collect())
    }

    async fn get_movement_by_id(&self, movement_id: i32) -> Result<Movement> {
        let row = sqlx::query_as::<_, MovementRow>(
            r#"
            SELECT movement_id, name, description FROM movements WHERE movement_id = $1
            "#,
        )
        .bind(movement_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Movement::from)
            .ok_or_else(|| Error::NotFound(format!("movement {movement_id}")))
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        let rows = sqlx::query_as::<_, DeviceRow>(
            r#"
            SELECT id, name, status, last_seen FROM devices ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Device::try_from).collect()
    }

    async fn get_device_by_id(&self, device_id: i32) -> Result<Device> {
        let row = sqlx::query_as::<_, DeviceRow>(
            r#"
            SELECT id, name, status, last_seen FROM devices WHERE id = $1
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("device {device_id}")))?
            .try_into()
    }

    async fn register_device(&self, name: &str) -> Result<Device> {
        let row = sqlx::query_as::<_, DeviceRow>(
            r#"
            INSERT INTO devices (name, status)
            VALUES ($1, 'idle')
            RETURNING id, name, status, last_seen
            "#,
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn set_device_status(&self, device_id: i32, status: DeviceStatus) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE devices SET status = $2, last_seen = NOW() WHERE id = $1
            "#,
        )
        .bind(device_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn try_begin_streaming(&self, device_id: i32) -> Result<bool> {
        // Single conditional update; exclusivity lives in the row predicate,
        // not in a read-then-write pair.
        let result = sqlx::query(
            r#"
            UPDATE devices
            SET status = 'streaming', last_seen = NOW()
            WHERE id = $1 AND status <> 'streaming'
            "#,
        )
        .bind(device_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_training(&self, device_id: i32, movement_id: i32, rep: i32) -> Result<i32> {
        let (id,): (i32,) = sqlx::query_as(
            r#"
            INSERT INTO training (device_id, movement_id, repetition)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(device_id)
        .bind(movement_id)
        .bind(rep)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn update_training_repetition(&self, training_id: i32, rep: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE training SET repetition = $2 WHERE id = $1
            "#,
        )
        .bind(training_id)
        .bind(rep)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_training_finished(&self, training_id: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE training SET finished = TRUE WHERE id = $1
            "#,
        )
        .bind(training_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_training(&self, training_id: i32) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM training WHERE id = $1
            "#,
        )
        .bind(training_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_raw_sample(&self, row: NewTrainingRaw) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO training_raw (training_id, device_id, movement_id, repetition, ts, raw)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(row.training_id)
        .bind(row.device_id)
        .bind(row.movement_id)
        .bind(row.repetition)
        .bind(row.ts)
        .bind(row.raw)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn select_raw_samples(
        &self,
        training_id: i32,
        device_id: i32,
    ) -> Result<Vec<RawSample>> {
        let rows: Vec<(DateTime<Utc>, Vec<u8>)> = sqlx::query_as(
            r#"
            SELECT ts, raw
            FROM training_raw
            WHERE training_id = $1 AND device_id = $2
            ORDER BY ts
            "#,
        )
        .bind(training_id)
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(ts, raw)| RawSample {
                timestamp: ts.to_rfc3339(),
                raw: codec::decode_samples(&raw),
            })
            .collect())
    }

    async fn get_all_raw_data(&self) -> Result<Vec<TrainingRawRow>> {
        let rows = sqlx::query_as::<_, RawDataRow>(
            r#"
            SELECT id, training_id, device_id, movement_id, repetition, ts, raw
            FROM training_raw
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(TrainingRawRow::from).collect())
    }
}

#[derive(sqlx::FromRow)]
struct MovementRow {
    movement_id: i32,
    name: String,
    description: String,
}

impl From<MovementRow> for Movement {
    fn from(row: MovementRow) -> Self {
        Self {
            movement_id: row.movement_id,
            name: row.name,
            description: row.description,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DeviceRow {
    id: i32,
    name: String,
    status: String,
    last_seen: DateTime<Utc>,
}

impl TryFrom<DeviceRow> for Device {
    type Error = Error;

    fn try_from(row: DeviceRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            name: row.name,
            status: row.status.parse()?,
            last_seen: row.last_seen,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RawDataRow {
    id: i32,
    training_id: i32,
    device_id: i32,
    movement_id: i32,
    repetition: i32,
    ts: DateTime<Utc>,
    raw: Vec<u8>,
}

impl From<RawDataRow> for TrainingRawRow {
    fn from(row: RawDataRow) -> Self {
        Self {
            id: row.id,
            training_id: row.training_id,
            device_id: row.device_id,
            movement_id: row.movement_id,
            repetition: row.repetition,
            ts: row.ts,
            raw: row.raw,
        }
    }
}
