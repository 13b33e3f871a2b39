//! HTTP API tests
//!
//! Drive the router end to end against the simulated backend: real platform
//! worker threads, real pending table, no sockets.
//!
//! Run with: `cargo test -p server --test api_tests`

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::create_platform_bridge;
use common::test_utils::{DEFAULT_TEST_TIMEOUT, with_timeout};
use protocol::{DeviceClass, OperationKind, PlatformError};
use serde_json::{Value, json};
use server::config::{BackendKind, ServerConfig};
use server::platform::{SimulatedBackend, WorkerPool, spawn_platform_workers};
use server::{ControlService, build_router};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tower::ServiceExt;

struct Harness {
    app: Router,
    backend: Arc<SimulatedBackend>,
    service: Arc<ControlService>,
    recordings: TempDir,
    _pool: WorkerPool,
}

fn harness_with(backend: SimulatedBackend, configure: impl FnOnce(&mut ServerConfig)) -> Harness {
    let recordings = tempfile::tempdir().unwrap();

    let mut config = ServerConfig::default();
    config.platform.backend = BackendKind::Simulated;
    config.enumeration.poll_interval_secs = 0;
    config.camera.output_dir = recordings.path().to_path_buf();
    configure(&mut config);

    let backend = Arc::new(backend);
    let (bridge, worker) = create_platform_bridge();
    let pool = spawn_platform_workers(worker, backend.clone(), 4).unwrap();
    let service = Arc::new(ControlService::new(&config, bridge));

    Harness {
        app: build_router(service.clone()),
        backend,
        service,
        recordings,
        _pool: pool,
    }
}

fn harness() -> Harness {
    harness_with(SimulatedBackend::with_fixtures(), |_| {})
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = with_timeout(DEFAULT_TEST_TIMEOUT, app.clone().oneshot(request))
        .await
        .expect("request timed out")
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::get(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

async fn post_empty(app: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::post(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

fn device_ids(body: &Value) -> Vec<String> {
    body["devices"]
        .as_array()
        .map(|devices| {
            devices
                .iter()
                .filter_map(|d| d["id"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn find_device<'a>(body: &'a Value, id: &str) -> Option<&'a Value> {
    body["devices"].as_array()?.iter().find(|d| d["id"] == id)
}

#[tokio::test]
async fn test_healthz() {
    let h = harness();
    let request = Request::get("/healthz").body(Body::empty()).unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_list_usb_devices_only_returns_usb_classes() {
    let h = harness();
    let (status, body) = get(&h.app, "/listUsbDevices").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(device_ids(&body), vec!["HID42", "HID43", "USB001"]);

    let drive = find_device(&body, "USB001").unwrap();
    assert_eq!(drive["driveLetter"], "E");
    assert_eq!(drive["vendorId"], "0781");
    assert_eq!(drive["connectionState"], "connected");
}

#[tokio::test]
async fn test_list_devices_filters_by_class() {
    let h = harness();
    let (status, body) = get(&h.app, "/listDevices?class=bluetooth").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        device_ids(&body),
        vec!["AC:80:0A:12:34:56", "D4:3B:04:AA:BB:CC"]
    );

    let (status, body) = get(&h.app, "/listDevices?class=toaster").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");
}

#[tokio::test]
async fn test_unavailable_class_is_reported_degraded() {
    let h = harness();
    h.backend.set_unavailable(DeviceClass::Bluetooth, true);

    let (status, body) = get(&h.app, "/listBluetoothDevices").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["degraded"], json!(["bluetooth"]));
    assert!(device_ids(&body).is_empty());

    // Other classes are unaffected
    let (_, body) = get(&h.app, "/listUsbDevices").await;
    assert!(body.get("degraded").is_none());
    assert_eq!(device_ids(&body).len(), 3);
}

#[tokio::test]
async fn test_degraded_class_keeps_previous_devices() {
    let h = harness();
    let (_, body) = get(&h.app, "/listBluetoothDevices?refresh=true").await;
    assert_eq!(device_ids(&body).len(), 2);

    h.backend.set_unavailable(DeviceClass::Bluetooth, true);
    let (_, body) = get(&h.app, "/listBluetoothDevices?refresh=true").await;
    assert_eq!(body["degraded"], json!(["bluetooth"]));
    assert_eq!(device_ids(&body).len(), 2);

    let delta = h.service.refresh().await;
    assert!(delta.departed.is_empty());
}

#[tokio::test]
async fn test_disable_then_enable_device() {
    let h = harness();

    let (status, body) = post(&h.app, "/disableUsbDevice", json!({"device_id": "HID42"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Device HID42 disabled");
    assert!(body["operationId"].as_u64().is_some());

    let (_, body) = get(&h.app, "/listUsbDevices").await;
    assert_eq!(find_device(&body, "HID42").unwrap()["enabledState"], "disabled");

    let (status, body) = post(&h.app, "/enableUsbDevice", json!({"device_id": "HID42"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Device HID42 enabled");
}

#[tokio::test]
async fn test_disable_accepts_legacy_field_names() {
    let h = harness();

    let (status, _) = post(&h.app, "/disableUsbDevice", json!({"deviceID": "HID42"})).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post(&h.app, "/disableUsbDevice", json!({"id": "HID42"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Device HID42 already disabled");
}

#[tokio::test]
async fn test_sequential_disables_do_not_conflict() {
    let h = harness();

    for _ in 0..2 {
        let (status, body) =
            post(&h.app, "/disableUsbDevice", json!({"device_id": "HID42"})).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
    }
}

#[tokio::test]
async fn test_concurrent_operations_on_one_device_conflict() {
    let h = harness_with(
        SimulatedBackend::with_fixtures().with_latency(Duration::from_millis(300)),
        |_| {},
    );
    // Warm the snapshot so both requests resolve without enumerating
    get(&h.app, "/listUsbDevices").await;

    let (first, second) = tokio::join!(
        post(&h.app, "/disableUsbDevice", json!({"device_id": "HID42"})),
        post(&h.app, "/disableUsbDevice", json!({"device_id": "HID42"})),
    );

    let mut statuses = vec![first.0, second.0];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::CONFLICT]);

    let rejected = if first.0 == StatusCode::CONFLICT {
        first.1
    } else {
        second.1
    };
    assert_eq!(rejected["code"], "conflict");
    assert_eq!(rejected["status"], "error");
}

#[tokio::test]
async fn test_operations_on_different_devices_run_in_parallel() {
    let h = harness_with(
        SimulatedBackend::with_fixtures().with_latency(Duration::from_millis(200)),
        |_| {},
    );
    get(&h.app, "/listUsbDevices").await;

    let (a, b) = tokio::join!(
        post(&h.app, "/disableUsbDevice", json!({"device_id": "HID42"})),
        post(&h.app, "/disableUsbDevice", json!({"device_id": "HID43"})),
    );
    assert_eq!(a.0, StatusCode::OK);
    assert_eq!(b.0, StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_device_is_not_found() {
    let h = harness();
    let (status, body) = post(&h.app, "/disableUsbDevice", json!({"device_id": "HID99"})).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_device_plugged_in_after_snapshot_is_found() {
    let h = harness();
    get(&h.app, "/listUsbDevices").await;

    h.backend.add_device(
        protocol::Device::new(DeviceClass::UsbHid, "HID77", "Trackball").with_path("1-7"),
    );

    let (status, _) = post(&h.app, "/disableUsbDevice", json!({"device_id": "HID77"})).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_malformed_body_is_invalid_request() {
    let h = harness();

    let request = Request::post("/disableUsbDevice")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert_eq!(body["code"], "invalid_request");

    let (status, body) = post(&h.app, "/disableUsbDevice", json!({"device": "HID42"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");

    let (status, body) = post(&h.app, "/disableUsbDevice", json!({"device_id": "  "})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");
}

#[tokio::test]
async fn test_eject_reports_departure() {
    let h = harness();
    get(&h.app, "/listUsbDevices").await;

    let (status, body) = post(&h.app, "/ejectUsbDrive", json!({"drive": "E"})).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["message"], "Drive E ejected safely");

    // The eject marked the snapshot stale, so this read re-enumerates
    let (_, body) = get(&h.app, "/listUsbDevices").await;
    assert!(!device_ids(&body).contains(&"USB001".to_string()));

    let (_, body) = get(&h.app, "/deviceChanges").await;
    let departed: Vec<&str> = body["delta"]["departed"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|d| d["id"].as_str())
        .collect();
    assert_eq!(departed, vec!["USB001"]);
}

#[tokio::test]
async fn test_eject_accepts_legacy_drive_letter_field() {
    let h = harness();
    let (status, _) = post(&h.app, "/ejectUsbDrive", json!({"driveLetter": "E:"})).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_busy_drive_needs_force_eject() {
    let h = harness();
    h.backend.set_busy("USB001", true);

    let (status, body) = post(&h.app, "/ejectUsbDrive", json!({"drive": "E"})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "busy");
    assert!(h.backend.device(DeviceClass::UsbStorage, "USB001").is_some());

    let (status, body) = post(&h.app, "/forceEjectUsbDrive", json!({"drive": "E"})).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert!(
        body["message"]
            .as_str()
            .unwrap()
            .contains("unflushed data")
    );
    assert!(h.backend.device(DeviceClass::UsbStorage, "USB001").is_none());
}

#[tokio::test]
async fn test_drive_is_reported_ejecting_while_eject_runs() {
    let h = harness_with(
        SimulatedBackend::with_fixtures().with_latency(Duration::from_millis(400)),
        |_| {},
    );
    get(&h.app, "/listUsbDevices").await;

    let app = h.app.clone();
    let eject = tokio::spawn(async move {
        post(&app, "/ejectUsbDrive", json!({"drive": "E"})).await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (_, body) = get(&h.app, "/listUsbDevices?refresh=true").await;
    assert_eq!(
        find_device(&body, "USB001").unwrap()["connectionState"],
        "ejecting"
    );

    let (status, _) = eject.await.unwrap();
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_eject_of_non_storage_device_is_not_found() {
    let h = harness();
    let (status, body) = post(&h.app, "/ejectUsbDrive", json!({"drive": "HID42"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_os_failure_is_reported_and_recorded() {
    let h = harness();
    h.backend
        .fail_next(OperationKind::Disable, PlatformError::Os("EACCES".into()));

    let (status, body) = post(&h.app, "/disableUsbDevice", json!({"device_id": "HID43"})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "os_failure");

    let (_, body) = get(&h.app, "/operations").await;
    let history = body["operations"].as_array().unwrap();
    let last = history.last().unwrap();
    assert_eq!(last["target"], "usb-hid/HID43");
    assert_eq!(last["status"], "failed");
    assert!(body["running"].as_array().unwrap().is_empty());

    // The failed operation released the device
    let (status, _) = post(&h.app, "/disableUsbDevice", json!({"device_id": "HID43"})).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_panicking_backend_call_releases_device() {
    let h = harness();
    h.backend.panic_next(OperationKind::Disable);

    let (status, body) = post(&h.app, "/disableUsbDevice", json!({"device_id": "HID42"})).await;
    assert!(status.is_server_error(), "{}", body);

    let (status, _) = post(&h.app, "/disableUsbDevice", json!({"device_id": "HID42"})).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_slow_operation_times_out_but_completes() {
    let h = harness_with(
        SimulatedBackend::with_fixtures().with_latency(Duration::from_millis(1500)),
        |config| config.operations.timeout_secs = 1,
    );
    get(&h.app, "/listUsbDevices").await;

    let (status, body) = post(&h.app, "/disableUsbDevice", json!({"device_id": "HID42"})).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["code"], "timeout");

    // Still running, so a second request conflicts
    let (status, _) = post(&h.app, "/disableUsbDevice", json!({"device_id": "HID42"})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    tokio::time::sleep(Duration::from_millis(800)).await;
    let device = h.backend.device(DeviceClass::UsbHid, "HID42").unwrap();
    assert_eq!(device.enabled_state, protocol::EnabledState::Disabled);
}

#[tokio::test]
async fn test_disable_all_reports_each_device() {
    let h = harness();
    h.backend
        .fail_next(OperationKind::Disable, PlatformError::Os("EPERM".into()));

    let (status, body) = post_empty(&h.app, "/disableAllUsbDevices").await;
    assert_eq!(status, StatusCode::OK);

    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    let failed: Vec<&Value> = results.iter().filter(|r| r["succeeded"] == false).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["code"], "os_failure");
    assert_eq!(body["message"], "Disabled 1 of 2 usb-hid devices");
}

#[tokio::test]
async fn test_disable_all_rejects_unsupported_class() {
    let h = harness();
    let (status, body) = post(&h.app, "/disableAllUsbDevices", json!({"class": "audio"})).await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(body["code"], "unsupported");
}

#[tokio::test]
async fn test_toggle_bluetooth() {
    let h = harness();

    let (status, body) = post(&h.app, "/toggleBluetooth", json!({"state": "off"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Bluetooth turned off");
    assert!(!h.backend.radio_on());

    let (_, body) = post(&h.app, "/toggleBluetooth", json!({"state": "disable"})).await;
    assert_eq!(body["message"], "Bluetooth already off");

    let (status, _) = post(&h.app, "/toggleBluetooth", json!({"state": "toggle"})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(h.backend.radio_on());

    let (status, body) = post(&h.app, "/toggleBluetooth", json!({"state": "sideways"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");
}

#[tokio::test]
async fn test_audio_info_and_volume() {
    let h = harness();

    let (status, body) = get(&h.app, "/getAudioInfo").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["info"]["totalDevices"], 2);

    let (status, _) = post(
        &h.app,
        "/setAudioVolume",
        json!({"device_id": "card1", "volume": 40}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.backend.volume("card1"), Some(40));

    let (status, body) = post(
        &h.app,
        "/setAudioVolume",
        json!({"device_id": "card1", "volume": 140}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");
}

#[tokio::test]
async fn test_toggle_mute_flips_state() {
    let h = harness();

    let (status, first) = post(&h.app, "/toggleAudioMute", json!({"device_id": "card0"})).await;
    assert_eq!(status, StatusCode::OK);
    let (_, second) = post(&h.app, "/toggleAudioMute", json!({"device_id": "card0"})).await;
    assert_ne!(first["message"], second["message"]);
}

#[tokio::test]
async fn test_stop_without_recording_is_state_violation() {
    let h = harness();
    let (status, body) = get(&h.app, "/stopRecording").await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "state_violation");
    assert_eq!(body["reason"], "not_recording");
}

#[tokio::test]
async fn test_recording_lifecycle() {
    let h = harness();

    let (_, body) = get(&h.app, "/isCameraOpen").await;
    assert_eq!(body["message"], "false");

    let (status, body) = post_empty(&h.app, "/startRecording?filename=desk").await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert!(h.backend.is_recording(0));

    let (_, body) = get(&h.app, "/isCameraOpen").await;
    assert_eq!(body["message"], "true");

    let (status, body) = post_empty(&h.app, "/startRecording").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["reason"], "already_recording");

    let (status, body) = get(&h.app, "/stopRecording").await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert!(!h.backend.is_recording(0));

    let saved = h.backend.finished_recordings();
    assert_eq!(saved, vec![h.recordings.path().join("desk.avi")]);
    assert!(saved[0].exists());

    let (status, body) = post_empty(&h.app, "/closeCamera").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Camera 0 closed");
}

#[tokio::test]
async fn test_recording_filename_cannot_escape_output_dir() {
    let h = harness();
    let (status, _) = post_empty(&h.app, "/startRecording?filename=../../etc/clip.avi").await;
    assert_eq!(status, StatusCode::OK);
    get(&h.app, "/stopRecording").await;

    assert_eq!(
        h.backend.finished_recordings(),
        vec![h.recordings.path().join("clip.avi")]
    );
}

#[tokio::test]
async fn test_timed_recording_stops_itself() {
    let h = harness_with(SimulatedBackend::with_fixtures(), |config| {
        config.camera.timed_recording_ms = 100;
    });

    let (status, body) = post_empty(&h.app, "/oneSecondCovertRecording").await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert!(h.backend.is_recording(0));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!h.backend.is_recording(0));
    assert_eq!(h.backend.finished_recordings().len(), 1);

    // Already stopped by the timer
    let (status, body) = get(&h.app, "/stopRecording").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["reason"], "not_recording");
}

#[tokio::test]
async fn test_camera_open_and_info() {
    let h = harness();

    let (status, body) = post_empty(&h.app, "/openCamera").await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["message"]["width"], 1280);

    let (status, body) = get(&h.app, "/getCameraInfo").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"]["name"], "Integrated Webcam");

    // Reopening the open camera returns its session
    let (status, body) = post(&h.app, "/openCamera", json!({"index": 0})).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["message"]["index"], 0);

    // Switching to a camera that is not there leaves none open
    let (status, _) = post(&h.app, "/openCamera", json!({"index": 3})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, body) = get(&h.app, "/isCameraOpen").await;
    assert_eq!(body["message"], "false");
}

#[tokio::test]
async fn test_missing_camera_is_not_found() {
    let h = harness_with(SimulatedBackend::empty(), |_| {});
    let (status, body) = post_empty(&h.app, "/openCamera").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_device_changes_after_hotplug() {
    let h = harness();
    h.service.refresh().await;

    h.backend.remove_device(DeviceClass::UsbHid, "HID43");
    h.backend.add_device(protocol::Device::new(
        DeviceClass::Audio,
        "card2",
        "HDMI Audio",
    ));
    h.service.refresh().await;

    let (status, body) = get(&h.app, "/deviceChanges").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["delta"]["departed"][0]["id"], "HID43");
    assert_eq!(body["delta"]["arrived"][0]["id"], "card2");
}

async fn wait_for(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !done() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn history_of(body: &Value, kind: &str) -> Vec<Value> {
    body["operations"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|op| op["kind"] == kind)
        .cloned()
        .collect()
}

#[tokio::test]
async fn test_slow_enumeration_does_not_undo_disable() {
    let h = harness();
    h.service.refresh().await;
    h.backend
        .set_enumerate_latency(DeviceClass::UsbHid, Duration::from_millis(300));

    // The HID listing is read before the disable lands and returned after it
    let service = h.service.clone();
    let poll = tokio::spawn(async move { service.refresh().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (status, body) = post(&h.app, "/disableUsbDevice", json!({"device_id": "HID42"})).await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let delta = poll.await.unwrap();
    assert!(delta.changed.iter().all(|d| d.id != "HID42"), "{:?}", delta);

    let (_, body) = get(&h.app, "/listUsbDevices").await;
    assert_eq!(find_device(&body, "HID42").unwrap()["enabledState"], "disabled");
}

#[tokio::test]
async fn test_enumeration_is_not_blocked_by_slow_mutations() {
    let h = harness_with(
        SimulatedBackend::with_fixtures().with_latency(Duration::from_millis(600)),
        |_| {},
    );
    h.service.refresh().await;

    // Occupy every mutation worker
    let mutations = async {
        tokio::join!(
            post(&h.app, "/disableUsbDevice", json!({"device_id": "HID42"})),
            post(&h.app, "/disableUsbDevice", json!({"device_id": "HID43"})),
            post(&h.app, "/toggleBluetooth", json!({"state": "toggle"})),
            post(&h.app, "/ejectUsbDrive", json!({"drive": "E"})),
        )
    };
    let enumeration = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let started = Instant::now();
        h.service.refresh().await;
        started.elapsed()
    };
    let (results, elapsed) = tokio::join!(mutations, enumeration);

    assert!(elapsed < Duration::from_millis(300), "enumeration took {:?}", elapsed);
    for (status, body) in [results.0, results.1, results.2, results.3] {
        assert_eq!(status, StatusCode::OK, "{}", body);
    }
}

#[tokio::test]
async fn test_take_frame_saves_image() {
    let h = harness();

    let (status, body) = get(&h.app, "/takeFrame?filename=desk").await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let path = h.recordings.path().join("desk.jpg");
    assert_eq!(body["message"], path.display().to_string());
    assert!(path.exists());
    assert_eq!(h.backend.captured_frames(), vec![path]);

    // The camera is only held for the capture
    let (_, body) = get(&h.app, "/isCameraOpen").await;
    assert_eq!(body["message"], "false");

    let (status, body) = get(&h.app, "/takeFrame").await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let message = body["message"].as_str().unwrap();
    assert!(message.contains("frame_") && message.ends_with(".jpg"), "{}", message);

    let (_, body) = get(&h.app, "/operations").await;
    let captures = history_of(&body, "capture-frame");
    assert_eq!(captures.len(), 2);
    assert!(captures.iter().all(|op| op["status"] == "succeeded"));
}

#[tokio::test]
async fn test_take_frame_refused_while_recording() {
    let h = harness();
    let (status, _) = post_empty(&h.app, "/startRecording").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get(&h.app, "/takeFrame").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["reason"], "already_recording");
    assert!(h.backend.is_recording(0));
    assert!(h.backend.captured_frames().is_empty());
}

#[tokio::test]
async fn test_take_frame_without_camera() {
    let h = harness_with(SimulatedBackend::empty(), |_| {});
    let (status, body) = get(&h.app, "/takeFrame").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_manual_stop_during_timed_stop() {
    let h = harness_with(SimulatedBackend::with_fixtures(), |config| {
        config.camera.timed_recording_ms = 100;
    });
    h.backend
        .set_operation_latency(OperationKind::StopRecording, Duration::from_millis(400));

    let (status, body) = post_empty(&h.app, "/oneSecondCovertRecording?filename=race").await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    // The timer has started stopping; the recorder is still finalizing
    tokio::time::sleep(Duration::from_millis(200)).await;
    let (status, body) = get(&h.app, "/stopRecording").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["reason"], "not_recording");

    wait_for(|| !h.backend.finished_recordings().is_empty()).await;
    assert_eq!(
        h.backend.finished_recordings(),
        vec![h.recordings.path().join("race.avi")]
    );

    let (_, body) = get(&h.app, "/operations").await;
    let stops = history_of(&body, "stop-recording");
    assert_eq!(stops.len(), 1, "{:?}", stops);
    assert_eq!(stops[0]["status"], "succeeded");
}

#[tokio::test]
async fn test_timer_after_manual_stop_is_ignored() {
    let h = harness_with(SimulatedBackend::with_fixtures(), |config| {
        config.camera.timed_recording_ms = 200;
    });
    h.backend
        .set_operation_latency(OperationKind::StopRecording, Duration::from_millis(400));

    let (status, _) = post_empty(&h.app, "/oneSecondCovertRecording?filename=manual").await;
    assert_eq!(status, StatusCode::OK);

    // Manual stop is still finalizing when the timer fires
    let (status, body) = get(&h.app, "/stopRecording").await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(h.backend.finished_recordings().len(), 1);
    let (_, body) = get(&h.app, "/operations").await;
    let stops = history_of(&body, "stop-recording");
    assert_eq!(stops.len(), 1, "{:?}", stops);
    assert_eq!(stops[0]["status"], "succeeded");
}

#[tokio::test]
async fn test_camera_info_conflicts_with_recording_start() {
    let h = harness();
    h.backend
        .set_operation_latency(OperationKind::OpenCamera, Duration::from_millis(300));

    let start = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        post_empty(&h.app, "/startRecording?filename=overlap").await
    };
    let ((info_status, info), (start_status, start)) =
        tokio::join!(get(&h.app, "/getCameraInfo"), start);

    assert_eq!(info_status, StatusCode::OK, "{}", info);
    assert_eq!(start_status, StatusCode::CONFLICT, "{}", start);
    assert_eq!(start["code"], "conflict");
    assert!(!h.backend.is_recording(0));

    let (_, body) = get(&h.app, "/operations").await;
    let opens = history_of(&body, "open-camera");
    assert_eq!(opens.len(), 1);
    assert_eq!(opens[0]["target"], "camera/video0");

    // Once the info query has released the camera, recording proceeds
    let (status, body) = post_empty(&h.app, "/startRecording?filename=overlap").await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert!(h.backend.is_recording(0));
}
