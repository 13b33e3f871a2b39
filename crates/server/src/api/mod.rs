//! HTTP routes
//!
//! Every route answers with a [`protocol::Envelope`], including malformed
//! requests, which get `invalid_request` instead of axum's plain-text
//! rejections.

mod response;

use crate::control::{BulkOutcome, ControlService};
use crate::devices::{CompletedOperation, DeviceDelta, PendingOperation, RecordingRequest};
use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use protocol::{
    AudioInfo, CameraRequest, ClassRequest, DeviceClass, DeviceRequest, DriveRequest, EjectMode,
    Envelope, FrameParams, RadioRequest, RecordingParams, VolumeRequest,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use response::OperationRef;
use response::{failure, invalid, outcome, success};

type AppState = Arc<ControlService>;

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    #[serde(default)]
    refresh: bool,
    class: Option<DeviceClass>,
}

#[derive(Debug, Serialize)]
struct BulkResults {
    results: Vec<BulkOutcome>,
}

#[derive(Debug, Serialize)]
struct AudioPayload {
    info: AudioInfo,
}

#[derive(Debug, Serialize)]
struct ChangesPayload {
    delta: Option<DeviceDelta>,
}

#[derive(Debug, Serialize)]
struct OperationsPayload {
    running: Vec<PendingOperation>,
    operations: Vec<CompletedOperation>,
}

pub fn build_router(service: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/listDevices", get(list_devices))
        .route("/listUsbDevices", get(list_usb_devices))
        .route("/disableUsbDevice", post(disable_usb_device))
        .route("/enableUsbDevice", post(enable_usb_device))
        .route("/disableAllUsbDevices", post(disable_all_usb_devices))
        .route("/ejectUsbDrive", post(eject_usb_drive))
        .route("/forceEjectUsbDrive", post(force_eject_usb_drive))
        .route("/listBluetoothDevices", get(list_bluetooth_devices))
        .route("/toggleBluetooth", post(toggle_bluetooth))
        .route("/listAudioDevices", get(list_audio_devices))
        .route("/getAudioInfo", get(get_audio_info))
        .route("/setAudioVolume", post(set_audio_volume))
        .route("/toggleAudioMute", post(toggle_audio_mute))
        .route("/getCameraInfo", get(get_camera_info))
        .route("/isCameraOpen", get(is_camera_open))
        .route("/openCamera", post(open_camera))
        .route("/closeCamera", post(close_camera))
        .route("/startRecording", post(start_recording))
        .route("/stopRecording", get(stop_recording))
        .route("/oneSecondCovertRecording", post(covert_recording))
        .route("/takeFrame", get(take_frame))
        .route("/deviceChanges", get(device_changes))
        .route("/operations", get(operations))
        .with_state(service)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Body that may be absent entirely; an empty body yields the default
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| invalid(e.to_string()))
}

fn list_query(query: Result<Query<ListQuery>, QueryRejection>) -> Result<ListQuery, Response> {
    query.map(|Query(q)| q).map_err(|e| invalid(e.body_text()))
}

async fn list_devices(
    State(service): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Response {
    let query = match list_query(query) {
        Ok(q) => q,
        Err(response) => return response,
    };
    let wanted = query.class;
    let list = service
        .list(|class| wanted.is_none_or(|w| w == class), query.refresh)
        .await;
    success(Envelope::data(list))
}

async fn list_usb_devices(
    State(service): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Response {
    match list_query(query) {
        Ok(query) => success(Envelope::data(
            service.list(|class| class.is_usb(), query.refresh).await,
        )),
        Err(response) => response,
    }
}

async fn list_bluetooth_devices(
    State(service): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Response {
    match list_query(query) {
        Ok(query) => success(Envelope::data(
            service
                .list(|class| class == DeviceClass::Bluetooth, query.refresh)
                .await,
        )),
        Err(response) => response,
    }
}

async fn list_audio_devices(
    State(service): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Response {
    match list_query(query) {
        Ok(query) => success(Envelope::data(
            service
                .list(|class| class == DeviceClass::Audio, query.refresh)
                .await,
        )),
        Err(response) => response,
    }
}

async fn disable_usb_device(
    State(service): State<AppState>,
    payload: Result<Json<DeviceRequest>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(req)) => outcome(service.set_usb_enabled(&req.device_id, false).await),
        Err(e) => invalid(e.body_text()),
    }
}

async fn enable_usb_device(
    State(service): State<AppState>,
    payload: Result<Json<DeviceRequest>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(req)) => outcome(service.set_usb_enabled(&req.device_id, true).await),
        Err(e) => invalid(e.body_text()),
    }
}

async fn disable_all_usb_devices(State(service): State<AppState>, body: Bytes) -> Response {
    let req: ClassRequest = match optional_body(&body) {
        Ok(req) => req,
        Err(response) => return response,
    };
    let class = req.class.unwrap_or(DeviceClass::UsbHid);

    match service.disable_all(class).await {
        Ok(results) => {
            let failed = results.iter().filter(|r| !r.succeeded).count();
            let message = if failed == 0 {
                format!("Disabled {} {} devices", results.len(), class)
            } else {
                format!(
                    "Disabled {} of {} {} devices",
                    results.len() - failed,
                    results.len(),
                    class
                )
            };
            success(Envelope::data(BulkResults { results }).with_message(message))
        }
        Err(e) => failure(e),
    }
}

async fn eject_usb_drive(
    State(service): State<AppState>,
    payload: Result<Json<DriveRequest>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(req)) => outcome(service.eject(&req.drive, EjectMode::Safe).await),
        Err(e) => invalid(e.body_text()),
    }
}

async fn force_eject_usb_drive(
    State(service): State<AppState>,
    payload: Result<Json<DriveRequest>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(req)) => outcome(service.eject(&req.drive, EjectMode::Force).await),
        Err(e) => invalid(e.body_text()),
    }
}

async fn toggle_bluetooth(
    State(service): State<AppState>,
    payload: Result<Json<RadioRequest>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(req)) => outcome(service.set_bluetooth(req.state).await),
        Err(e) => invalid(e.body_text()),
    }
}

async fn get_audio_info(State(service): State<AppState>) -> Response {
    match service.audio_info().await {
        Ok(info) => success(Envelope::data(AudioPayload { info })),
        Err(e) => failure(e),
    }
}

async fn set_audio_volume(
    State(service): State<AppState>,
    payload: Result<Json<VolumeRequest>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(req)) => outcome(service.set_volume(&req.device_id, req.volume).await),
        Err(e) => invalid(e.body_text()),
    }
}

async fn toggle_audio_mute(
    State(service): State<AppState>,
    payload: Result<Json<DeviceRequest>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(req)) => outcome(service.toggle_mute(&req.device_id).await),
        Err(e) => invalid(e.body_text()),
    }
}

async fn get_camera_info(State(service): State<AppState>) -> Response {
    match service.camera_info().await {
        Ok(info) => success(Envelope::message(info)),
        Err(e) => failure(e),
    }
}

async fn is_camera_open(State(service): State<AppState>) -> Response {
    success(Envelope::message(service.is_camera_open().to_string()))
}

async fn open_camera(State(service): State<AppState>, body: Bytes) -> Response {
    let req: CameraRequest = match optional_body(&body) {
        Ok(req) => req,
        Err(response) => return response,
    };
    match service.open_camera(req.index).await {
        Ok(info) => success(Envelope::message(info)),
        Err(e) => failure(e),
    }
}

async fn close_camera(State(service): State<AppState>) -> Response {
    match service.close_camera().await {
        Ok(message) => success(Envelope::message(message)),
        Err(e) => failure(e),
    }
}

fn recording_request(
    params: Result<Query<RecordingParams>, QueryRejection>,
) -> Result<RecordingRequest, Response> {
    let Query(params) = params.map_err(|e| invalid(e.body_text()))?;
    Ok(RecordingRequest {
        filename: params.filename,
        fps: params.fps,
    })
}

async fn start_recording(
    State(service): State<AppState>,
    params: Result<Query<RecordingParams>, QueryRejection>,
) -> Response {
    match recording_request(params) {
        Ok(request) => outcome(service.start_recording(request).await),
        Err(response) => response,
    }
}

async fn stop_recording(State(service): State<AppState>) -> Response {
    outcome(service.stop_recording().await)
}

async fn covert_recording(
    State(service): State<AppState>,
    params: Result<Query<RecordingParams>, QueryRejection>,
) -> Response {
    match recording_request(params) {
        Ok(request) => outcome(service.timed_recording(request).await),
        Err(response) => response,
    }
}

/// The message is the saved image path
async fn take_frame(
    State(service): State<AppState>,
    params: Result<Query<FrameParams>, QueryRejection>,
) -> Response {
    match params {
        Ok(Query(params)) => outcome(service.take_frame(params.filename.as_deref()).await),
        Err(e) => invalid(e.body_text()),
    }
}

async fn device_changes(State(service): State<AppState>) -> Response {
    success(Envelope::data(ChangesPayload {
        delta: service.last_change(),
    }))
}

async fn operations(State(service): State<AppState>) -> Response {
    success(Envelope::data(OperationsPayload {
        running: service.running_operations(),
        operations: service.operation_history(),
    }))
}
