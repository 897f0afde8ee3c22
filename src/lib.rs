//! emgserver - EMG Wearable Fleet Backend
//!
//! ## Architecture (9 Components)
//!
//! 1. SessionRegistry - per-device training-session state
//! 2. ConnectionHub - device/viewer WebSocket routing and fan-out
//! 3. DeviceStatusController - idle/reserved/streaming lifecycle
//! 4. Features - raw sample window -> 12-element feature vector
//! 5. StreamingDispatcher - training persist vs live classify per frame
//! 6. ViewerCommands - viewer command validation and device control
//! 7. Store - PostgreSQL persistence (devices, movements, trainings, raw)
//! 8. Classifier - external scoring service adapter
//! 9. WebAPI - REST + WebSocket endpoints
//!
//! ## Design Principles
//!
//! - Shared registries are injected process-scoped instances, no globals
//! - One read loop per connection; frames handled in arrival order per device
//! - Protocol errors keep the connection open; transport errors end the loop

pub mod classifier;
pub mod connection_hub;
pub mod device_status;
pub mod error;
pub mod features;
pub mod models;
pub mod session_registry;
pub mod state;
pub mod store;
pub mod streaming_dispatcher;
pub mod viewer_commands;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
