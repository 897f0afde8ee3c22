//! SessionRegistry - Per-Device Training Sessions
//!
//! ## Responsibilities
//!
//! - Track the single active training session per device id
//! - Atomic get/set/update/delete under concurrent connection loops
//! - Idle sweep of sessions whose device went silent mid-training
//!
//! The registry is the sole owner of session state; other components go
//! through it and never hold references across awaits.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// One in-progress, repetition-bounded data-collection exercise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingSession {
    pub training_id: i32,
    pub device_id: i32,
    pub movement_id: i32,
    pub rep: i32,
    /// Refreshed on every accepted mutation; drives the idle sweep.
    pub last_activity: DateTime<Utc>,
}

impl TrainingSession {
    pub fn new(training_id: i32, device_id: i32, movement_id: i32, rep: i32) -> Self {
        Self {
            training_id,
            device_id,
            movement_id,
            rep,
            last_activity: Utc::now(),
        }
    }
}

/// In-memory mapping of device id to active training session.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<i32, TrainingSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Get the active session for a device, if any.
    pub async fn get(&self, device_id: i32) -> Option<TrainingSession> {
        self.sessions.read().await.get(&device_id).cloned()
    }

    /// Install or replace the session for a device.
    pub async fn set(&self, device_id: i32, session: TrainingSession) {
        self.sessions.write().await.insert(device_id, session);
    }

    /// Mutate the session in place. No-op when the device has none.
    pub async fn update<F>(&self, device_id: i32, mutator: F)
    where
        F: FnOnce(&mut TrainingSession),
    {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&device_id) {
            mutator(session);
            session.last_activity = Utc::now();
        }
    }

    /// Refresh the activity timestamp without other changes.
    pub async fn touch(&self, device_id: i32) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&device_id) {
            session.last_activity = Utc::now();
        }
    }

    pub async fn delete(&self, device_id: i32) {
        self.sessions.write().await.remove(&device_id);
    }

    /// Snapshot of all active sessions.
    pub async fn list(&self) -> Vec<TrainingSession> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Remove sessions idle longer than `max_age`, returning the affected
    /// device ids so the caller can reset device status.
    pub async fn sweep_idle(&self, max_age: Duration) -> Vec<i32> {
        let cutoff = Utc::now() - max_age;
        let mut sessions = self.sessions.write().await;
        let stale: Vec<i32> = sessions
            .iter()
            .filter(|(_, s)| s.last_activity < cutoff)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            sessions.remove(id);
        }
        stale
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
