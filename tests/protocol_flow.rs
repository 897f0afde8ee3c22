//! End-to-end protocol tests over in-memory collaborator fakes.
//!
//! Drives the real dispatcher, command handler, session registry and hub;
//! only the store and the classifier are replaced.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use emgserver::classifier::{Classifier, Prediction};
use emgserver::connection_hub::{ConnectionHandle, ConnectionHub};
use emgserver::device_status::DeviceStatusController;
use emgserver::models::{
    Device, DeviceFrame, DeviceStatus, Event, Movement, RawSample, ViewerCommand,
};
use emgserver::session_registry::SessionRegistry;
use emgserver::store::{codec, NewTrainingRaw, Store, TrainingRawRow};
use emgserver::streaming_dispatcher::StreamingDispatcher;
use emgserver::viewer_commands::ViewerCommandHandler;
use emgserver::{Error, Result};

// ========================================
// Fakes
// ========================================

#[derive(Debug, Clone)]
struct TrainingRow {
    device_id: i32,
    movement_id: i32,
    rep: i32,
}

struct MemoryStore {
    devices: Mutex<HashMap<i32, Device>>,
    trainings: Mutex<HashMap<i32, TrainingRow>>,
    raw: Mutex<Vec<TrainingRawRow>>,
    movements: Vec<Movement>,
    next_device_id: AtomicI32,
    next_training_id: AtomicI32,
    next_raw_id: AtomicI32,
}

impl MemoryStore {
    /// Store whose first registered device gets id 7, with movements 1-3.
    fn new() -> Self {
        let movements = vec![
            Movement {
                movement_id: 1,
                name: "rest".into(),
                description: "relaxed forearm".into(),
            },
            Movement {
                movement_id: 2,
                name: "wave_in".into(),
                description: "wrist flexion".into(),
            },
            Movement {
                movement_id: 3,
                name: "fist".into(),
                description: "closed fist".into(),
            },
        ];
        Self {
            devices: Mutex::new(HashMap::new()),
            trainings: Mutex::new(HashMap::new()),
            raw: Mutex::new(Vec::new()),
            movements,
            next_device_id: AtomicI32::new(7),
            next_training_id: AtomicI32::new(100),
            next_raw_id: AtomicI32::new(1),
        }
    }

    fn device_status(&self, device_id: i32) -> Option<DeviceStatus> {
        self.devices
            .lock()
            .unwrap()
            .get(&device_id)
            .map(|d| d.status)
    }

    fn training_exists(&self, training_id: i32) -> bool {
        self.trainings.lock().unwrap().contains_key(&training_id)
    }

    fn training_rep(&self, training_id: i32) -> Option<i32> {
        self.trainings
            .lock()
            .unwrap()
            .get(&training_id)
            .map(|t| t.rep)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_movements(&self) -> Result<Vec<Movement>> {
        Ok(self.movements.clone())
    }

    async fn get_movement_by_id(&self, movement_id: i32) -> Result<Movement> {
        self.movements
            .iter()
            .find(|m| m.movement_id == movement_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("movement {movement_id}")))
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        let mut devices: Vec<Device> = self.devices.lock().unwrap().values().cloned().collect();
        devices.sort_by_key(|d| d.id);
        Ok(devices)
    }

    async fn get_device_by_id(&self, device_id: i32) -> Result<Device> {
        self.devices
            .lock()
            .unwrap()
            .get(&device_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("device {device_id}")))
    }

    async fn register_device(&self, name: &str) -> Result<Device> {
        let id = self.next_device_id.fetch_add(1, Ordering::SeqCst);
        let device = Device {
            id,
            name: name.to_string(),
            status: DeviceStatus::Idle,
            last_seen: Utc::now(),
        };
        self.devices.lock().unwrap().insert(id, device.clone());
        Ok(device)
    }

    async fn set_device_status(&self, device_id: i32, status: DeviceStatus) -> Result<()> {
        if let Some(device) = self.devices.lock().unwrap().get_mut(&device_id) {
            device.status = status;
            device.last_seen = Utc::now();
        }
        Ok(())
    }

    async fn try_begin_streaming(&self, device_id: i32) -> Result<bool> {
        let mut devices = self.devices.lock().unwrap();
        match devices.get_mut(&device_id) {
            Some(device) if device.status != DeviceStatus::Streaming => {
                device.status = DeviceStatus::Streaming;
                device.last_seen = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn create_training(&self, device_id: i32, movement_id: i32, rep: i32) -> Result<i32> {
        let id = self.next_training_id.fetch_add(1, Ordering::SeqCst);
        self.trainings.lock().unwrap().insert(
            id,
            TrainingRow {
                device_id,
                movement_id,
                rep,
            },
        );
        Ok(id)
    }

    async fn update_training_repetition(&self, training_id: i32, rep: i32) -> Result<()> {
        if let Some(training) = self.trainings.lock().unwrap().get_mut(&training_id) {
            training.rep = rep;
        }
        Ok(())
    }

    async fn mark_training_finished(&self, _training_id: i32) -> Result<()> {
        Ok(())
    }

    async fn delete_training(&self, training_id: i32) -> Result<()> {
        self.trainings.lock().unwrap().remove(&training_id);
        Ok(())
    }

    async fn insert_raw_sample(&self, row: NewTrainingRaw) -> Result<()> {
        let id = self.next_raw_id.fetch_add(1, Ordering::SeqCst);
        self.raw.lock().unwrap().push(TrainingRawRow {
            id,
            training_id: row.training_id,
            device_id: row.device_id,
            movement_id: row.movement_id,
            repetition: row.repetition,
            ts: row.ts,
            raw: row.raw,
        });
        Ok(())
    }

    async fn select_raw_samples(
        &self,
        training_id: i32,
        device_id: i32,
    ) -> Result<Vec<RawSample>> {
        let mut rows: Vec<TrainingRawRow> = self
            .raw
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.training_id == training_id && r.device_id == device_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.ts);
        Ok(rows
            .into_iter()
            .map(|r| RawSample {
                timestamp: r.ts.to_rfc3339(),
                raw: codec::decode_samples(&r.raw),
            })
            .collect())
    }

    async fn get_all_raw_data(&self) -> Result<Vec<TrainingRawRow>> {
        let mut rows = self.raw.lock().unwrap().clone();
        rows.sort_by_key(|r| r.id);
        Ok(rows)
    }
}

/// Classifier fake: serves a fixed prediction, or fails on demand.
struct FakeClassifier {
    prediction: Option<Prediction>,
}

impl FakeClassifier {
    fn fist() -> Self {
        Self {
            prediction: Some(Prediction {
                class_id: 3,
                class_name: "fist".into(),
                probabilities: vec![0.1, 0.1, 0.8],
            }),
        }
    }

    fn failing() -> Self {
        Self { prediction: None }
    }
}

#[async_trait]
impl Classifier for FakeClassifier {
    async fn predict(&self, _features: &[f64]) -> Result<Prediction> {
        self.prediction
            .clone()
            .ok_or_else(|| Error::Classifier("scoring service unreachable".into()))
    }
}

// ========================================
// Harness
// ========================================

struct Harness {
    store: Arc<MemoryStore>,
    sessions: Arc<SessionRegistry>,
    hub: Arc<ConnectionHub>,
    dispatcher: StreamingDispatcher,
    commands: ViewerCommandHandler,
}

impl Harness {
    fn new(classifier: FakeClassifier, classifier_error_events: bool) -> Self {
        let store = Arc::new(MemoryStore::new());
        let store_dyn: Arc<dyn Store> = store.clone();
        let classifier: Arc<dyn Classifier> = Arc::new(classifier);
        let sessions = Arc::new(SessionRegistry::new());
        let hub = Arc::new(ConnectionHub::new());
        let device_status = Arc::new(DeviceStatusController::new(store_dyn.clone()));

        let dispatcher = StreamingDispatcher::new(
            sessions.clone(),
            hub.clone(),
            store_dyn.clone(),
            classifier,
            device_status.clone(),
            classifier_error_events,
        );
        let commands = ViewerCommandHandler::new(
            sessions.clone(),
            hub.clone(),
            store_dyn,
            device_status,
        );

        Self {
            store,
            sessions,
            hub,
            dispatcher,
            commands,
        }
    }

    /// Connect a device handle and a master viewer handle for `device_id`.
    async fn connect(
        &self,
        device_id: i32,
    ) -> (
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let (device_tx, device_rx) = mpsc::unbounded_channel();
        self.hub
            .register_device(device_id, ConnectionHandle::new(device_tx))
            .await;

        let (viewer_tx, viewer_rx) = mpsc::unbounded_channel();
        let viewer = ConnectionHandle::new(viewer_tx);
        self.hub.register_viewer(device_id, viewer.clone()).await;
        self.hub.register_master(device_id, viewer).await;

        (device_rx, viewer_rx)
    }
}

fn start_training(device_id: i32, movement_id: i32, rep: i32) -> ViewerCommand {
    ViewerCommand {
        event: Event::StartTraining,
        device_id,
        movement_id: Some(movement_id),
        rep: Some(rep),
    }
}

fn raw_frame(event: Event, raw: Vec<i64>) -> DeviceFrame {
    DeviceFrame {
        event,
        device_name: None,
        timestamp: Some("1700000000000000000".to_string()),
        raw,
    }
}

fn recv_json(rx: &mut mpsc::UnboundedReceiver<String>) -> serde_json::Value {
    let payload = rx.try_recv().expect("expected a payload");
    serde_json::from_str(&payload).expect("payload is JSON")
}

// ========================================
// Scenarios
// ========================================

#[tokio::test]
async fn scenario_a_full_first_repetition() {
    let h = Harness::new(FakeClassifier::fist(), false);

    // Handshake assigns the first free id
    let device_id = h.dispatcher.handshake("armband-01").await.unwrap();
    assert_eq!(device_id, 7);
    let (mut device_rx, mut viewer_rx) = h.connect(device_id).await;

    // Viewer starts training: session created, device told to stream
    h.commands
        .handle_command(&start_training(device_id, 2, 1))
        .await
        .unwrap();

    let session = h.sessions.get(device_id).await.unwrap();
    assert_eq!(session.movement_id, 2);
    assert_eq!(session.rep, 1);
    assert!(h.store.training_exists(session.training_id));

    let cmd = recv_json(&mut device_rx);
    assert_eq!(cmd["event"], "start_raw_stream");
    assert!(cmd["duration"].as_i64().unwrap() > 0);
    assert!(cmd["server_time"].as_i64().unwrap() > 0);

    // Device begins: viewers see training_started
    h.dispatcher
        .handle_frame(device_id, &raw_frame(Event::RawStreamBegin, vec![]))
        .await
        .unwrap();
    let started = recv_json(&mut viewer_rx);
    assert_eq!(started["event"], "training_started");
    assert_eq!(started["movement_id"], 2);
    assert!(started.get("raw").is_none());

    // One window: persisted and echoed back in full history
    h.dispatcher
        .handle_frame(
            device_id,
            &raw_frame(Event::RawStreamInProcess, vec![1, 2, 3]),
        )
        .await
        .unwrap();
    let data = recv_json(&mut viewer_rx);
    assert_eq!(data["event"], "training_raw_data");
    assert_eq!(data["raw"].as_array().unwrap().len(), 1);
    assert_eq!(data["raw"][0]["raw"], serde_json::json!([1, 2, 3]));

    // Finish below the cap: device reserved, session retained
    h.dispatcher
        .handle_frame(device_id, &raw_frame(Event::RawStreamFinish, vec![]))
        .await
        .unwrap();
    let completed = recv_json(&mut viewer_rx);
    assert_eq!(completed["event"], "training_completed");
    assert_eq!(completed["rep"], 1);

    assert_eq!(h.store.device_status(device_id), Some(DeviceStatus::Reserved));
    let retained = h.sessions.get(device_id).await.unwrap();
    assert_eq!(retained.rep, 1);
    assert_eq!(retained.training_id, session.training_id);
}

#[tokio::test]
async fn scenario_b_strict_repetition_advance() {
    let h = Harness::new(FakeClassifier::fist(), false);
    let device_id = h.dispatcher.handshake("armband-01").await.unwrap();
    let (_device_rx, _viewer_rx) = h.connect(device_id).await;

    h.commands
        .handle_command(&start_training(device_id, 2, 1))
        .await
        .unwrap();
    let training_id = h.sessions.get(device_id).await.unwrap().training_id;

    // Advance by exactly one: accepted, store follows
    h.commands
        .handle_command(&start_training(device_id, 2, 2))
        .await
        .unwrap();
    assert_eq!(h.sessions.get(device_id).await.unwrap().rep, 2);
    assert_eq!(h.store.training_rep(training_id), Some(2));

    // Skipping ahead: rejected, session untouched
    let err = h
        .commands
        .handle_command(&start_training(device_id, 2, 4))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::IncorrectRepetition(_)));
    assert_eq!(h.sessions.get(device_id).await.unwrap().rep, 2);

    // Repeating the current rep: also rejected
    let err = h
        .commands
        .handle_command(&start_training(device_id, 2, 2))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::IncorrectRepetition(_)));
}

#[tokio::test]
async fn scenario_c_live_classification() {
    let h = Harness::new(FakeClassifier::fist(), false);
    let device_id = h.dispatcher.handshake("armband-01").await.unwrap();
    let (_device_rx, mut viewer_rx) = h.connect(device_id).await;

    let window: Vec<i64> = vec![
        12, -40, 33, 5, -17, 88, -3, 0, 21, -55, 47, 9, -26, 60, -11, 4,
    ];
    h.dispatcher
        .handle_frame(device_id, &raw_frame(Event::RawStreamInProcess, window))
        .await
        .unwrap();

    let data = recv_json(&mut viewer_rx);
    assert_eq!(data["event"], "streaming_data");
    assert_eq!(data["class_id"], 3);
    assert_eq!(data["class_name"], "fist");
    assert_eq!(data["prob"], serde_json::json!([0.1, 0.1, 0.8]));
    assert!(data.get("raw").is_none());

    assert_eq!(
        h.store.device_status(device_id),
        Some(DeviceStatus::Streaming)
    );
}

#[tokio::test]
async fn classifier_failure_degrades_output() {
    let h = Harness::new(FakeClassifier::failing(), false);
    let device_id = h.dispatcher.handshake("armband-01").await.unwrap();
    let (_device_rx, mut viewer_rx) = h.connect(device_id).await;

    h.dispatcher
        .handle_frame(device_id, &raw_frame(Event::RawStreamInProcess, vec![1, 2, 3]))
        .await
        .unwrap();

    let data = recv_json(&mut viewer_rx);
    assert_eq!(data["event"], "streaming_data");
    assert_eq!(data["class_id"], 0);
    assert_eq!(data["class_name"], "");
    assert_eq!(data["prob"], serde_json::json!([]));
}

#[tokio::test]
async fn classifier_failure_error_event_mode() {
    let h = Harness::new(FakeClassifier::failing(), true);
    let device_id = h.dispatcher.handshake("armband-01").await.unwrap();
    let (_device_rx, mut viewer_rx) = h.connect(device_id).await;

    h.dispatcher
        .handle_frame(device_id, &raw_frame(Event::RawStreamInProcess, vec![1, 2, 3]))
        .await
        .unwrap();

    let frame = recv_json(&mut viewer_rx);
    assert_eq!(frame["event"], "error");
}

#[tokio::test]
async fn final_repetition_releases_device_and_session() {
    let h = Harness::new(FakeClassifier::fist(), false);
    let device_id = h.dispatcher.handshake("armband-01").await.unwrap();
    let (mut device_rx, mut viewer_rx) = h.connect(device_id).await;

    for rep in 1..=5 {
        h.commands
            .handle_command(&start_training(device_id, 3, rep))
            .await
            .unwrap();
        let _ = device_rx.try_recv();

        h.dispatcher
            .handle_frame(device_id, &raw_frame(Event::RawStreamBegin, vec![]))
            .await
            .unwrap();
        h.dispatcher
            .handle_frame(device_id, &raw_frame(Event::RawStreamFinish, vec![]))
            .await
            .unwrap();
        let _ = recv_json(&mut viewer_rx);
        let completed = recv_json(&mut viewer_rx);
        assert_eq!(completed["event"], "training_completed");
    }

    // Fifth finish: idle device, no session, training discarded
    assert_eq!(h.store.device_status(device_id), Some(DeviceStatus::Idle));
    assert!(h.sessions.get(device_id).await.is_none());
    assert!(h.store.trainings.lock().unwrap().is_empty());
}

#[tokio::test]
async fn begin_and_finish_require_a_session() {
    let h = Harness::new(FakeClassifier::fist(), false);
    let device_id = h.dispatcher.handshake("armband-01").await.unwrap();
    let (_device_rx, _viewer_rx) = h.connect(device_id).await;

    let err = h
        .dispatcher
        .handle_frame(device_id, &raw_frame(Event::RawStreamBegin, vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ProtocolViolation(_)));

    let err = h
        .dispatcher
        .handle_frame(device_id, &raw_frame(Event::RawStreamFinish, vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ProtocolViolation(_)));
}

#[tokio::test]
async fn movement_must_match_active_session() {
    let h = Harness::new(FakeClassifier::fist(), false);
    let device_id = h.dispatcher.handshake("armband-01").await.unwrap();
    let (_device_rx, _viewer_rx) = h.connect(device_id).await;

    h.commands
        .handle_command(&start_training(device_id, 2, 1))
        .await
        .unwrap();

    let err = h
        .commands
        .handle_command(&start_training(device_id, 3, 2))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MovementMismatch(_)));
}

#[tokio::test]
async fn start_training_validates_inputs() {
    let h = Harness::new(FakeClassifier::fist(), false);
    let device_id = h.dispatcher.handshake("armband-01").await.unwrap();
    let (_device_rx, _viewer_rx) = h.connect(device_id).await;

    // Repetition over the cap
    let err = h
        .commands
        .handle_command(&start_training(device_id, 2, 6))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::IncorrectRepetition(_)));

    // Unknown movement
    let err = h
        .commands
        .handle_command(&start_training(device_id, 99, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    // First repetition must be 1 when no session exists
    let err = h
        .commands
        .handle_command(&start_training(device_id, 2, 2))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::IncorrectRepetition(_)));
}

#[tokio::test]
async fn streaming_device_rejects_commands() {
    let h = Harness::new(FakeClassifier::fist(), false);
    let device_id = h.dispatcher.handshake("armband-01").await.unwrap();
    let (mut device_rx, _viewer_rx) = h.connect(device_id).await;

    h.commands
        .handle_command(&ViewerCommand {
            event: Event::StartStreaming,
            device_id,
            movement_id: None,
            rep: None,
        })
        .await
        .unwrap();
    assert_eq!(
        h.store.device_status(device_id),
        Some(DeviceStatus::Streaming)
    );
    let cmd = recv_json(&mut device_rx);
    assert_eq!(cmd["event"], "start_raw_stream");

    // Second start while streaming: conditional transition loses
    let err = h
        .commands
        .handle_command(&ViewerCommand {
            event: Event::StartStreaming,
            device_id,
            movement_id: None,
            rep: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DeviceBusy(_)));

    // start_training is also refused while the device streams
    let err = h
        .commands
        .handle_command(&start_training(device_id, 2, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DeviceBusy(_)));
}

#[tokio::test]
async fn stop_idles_device_and_commands_device_stop() {
    let h = Harness::new(FakeClassifier::fist(), false);
    let device_id = h.dispatcher.handshake("armband-01").await.unwrap();
    let (mut device_rx, _viewer_rx) = h.connect(device_id).await;

    h.commands
        .handle_command(&ViewerCommand {
            event: Event::StartStreaming,
            device_id,
            movement_id: None,
            rep: None,
        })
        .await
        .unwrap();
    let _ = device_rx.try_recv();

    h.commands
        .handle_command(&ViewerCommand {
            event: Event::StopTraining,
            device_id,
            movement_id: None,
            rep: None,
        })
        .await
        .unwrap();

    assert_eq!(h.store.device_status(device_id), Some(DeviceStatus::Idle));
    let cmd = recv_json(&mut device_rx);
    assert_eq!(cmd["event"], "stop_raw_stream");
}

#[tokio::test]
async fn persisted_windows_come_back_in_wire_order() {
    let h = Harness::new(FakeClassifier::fist(), false);
    let device_id = h.dispatcher.handshake("armband-01").await.unwrap();
    let (_device_rx, mut viewer_rx) = h.connect(device_id).await;

    h.commands
        .handle_command(&start_training(device_id, 2, 1))
        .await
        .unwrap();
    h.dispatcher
        .handle_frame(device_id, &raw_frame(Event::RawStreamBegin, vec![]))
        .await
        .unwrap();
    let _ = recv_json(&mut viewer_rx);

    for (i, window) in [vec![1i64, 1, 1], vec![2, 2, 2], vec![3, 3, 3]]
        .into_iter()
        .enumerate()
    {
        let frame = DeviceFrame {
            event: Event::RawStreamInProcess,
            device_name: None,
            timestamp: Some(format!("{}", 1_700_000_000_000_000_000u64 + i as u64 * 1_000_000)),
            raw: window,
        };
        h.dispatcher.handle_frame(device_id, &frame).await.unwrap();
    }

    let _ = recv_json(&mut viewer_rx);
    let _ = recv_json(&mut viewer_rx);
    let last = recv_json(&mut viewer_rx);
    let history = last["raw"].as_array().unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0]["raw"], serde_json::json!([1, 1, 1]));
    assert_eq!(history[1]["raw"], serde_json::json!([2, 2, 2]));
    assert_eq!(history[2]["raw"], serde_json::json!([3, 3, 3]));
}

#[tokio::test]
async fn handshake_never_deduplicates_names() {
    let h = Harness::new(FakeClassifier::fist(), false);
    let first = h.dispatcher.handshake("armband-01").await.unwrap();
    let second = h.dispatcher.handshake("armband-01").await.unwrap();
    assert_ne!(first, second);
}
