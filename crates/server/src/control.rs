//! Control service
//!
//! Coordinates the device-state core for the HTTP layer: serves reads from
//! the cached snapshot (refreshing it at most once at a time), resolves
//! request targets against it, and hands mutations to the executor.

use crate::config::ServerConfig;
use crate::devices::{
    CommandExecutor, CompletedOperation, DeviceDelta, DeviceEnumerator, IdentityResolver,
    OperationError, OperationResult, PendingOperation, PendingTable, RecordingRequest,
    SequenceCounter, Snapshot, StateReconciler,
};
use common::PlatformBridge;
use protocol::{
    AudioInfo, CameraInfo, Device, DeviceClass, DeviceList, EjectMode, ErrorCode, OperationKind,
    RadioState,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Per-device outcome of a bulk disable
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOutcome {
    pub device_id: String,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    pub message: String,
}

pub struct ControlService {
    enumerator: DeviceEnumerator,
    reconciler: Arc<StateReconciler>,
    executor: CommandExecutor,
    pending: PendingTable,
    refresh_lock: Mutex<()>,
    /// Completed refreshes, to detect one finishing while a caller waited
    refreshes: AtomicU64,
    snapshot_ttl: Duration,
    poll_interval: Duration,
}

impl ControlService {
    pub fn new(config: &ServerConfig, bridge: PlatformBridge) -> Self {
        let sequence = SequenceCounter::default();
        let pending = PendingTable::new(config.operations.history_limit);
        let reconciler = Arc::new(StateReconciler::new(sequence.clone()));
        let identity = IdentityResolver::new(config.enumeration.identity.clone());

        let enumerator =
            DeviceEnumerator::new(bridge.clone(), identity, pending.clone(), sequence);
        let executor = CommandExecutor::new(
            bridge,
            reconciler.clone(),
            pending.clone(),
            config.camera.clone(),
            config.operations.timeout(),
        );

        Self {
            enumerator,
            reconciler,
            executor,
            pending,
            refresh_lock: Mutex::new(()),
            refreshes: AtomicU64::new(0),
            snapshot_ttl: config.enumeration.snapshot_ttl(),
            poll_interval: Duration::from_secs(config.enumeration.poll_interval_secs),
        }
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    pub fn reconciler(&self) -> &StateReconciler {
        &self.reconciler
    }

    /// The current snapshot, re-enumerating if it is stale, expired, or `force`d
    ///
    /// Concurrent callers share one refresh instead of each querying the OS.
    pub async fn snapshot(&self, force: bool) -> Arc<Snapshot> {
        if !force && self.reconciler.is_fresh(self.snapshot_ttl) {
            if let Some(snapshot) = self.reconciler.current() {
                return snapshot;
            }
        }

        let seen = self.refreshes.load(Ordering::Acquire);
        let _refresh = self.refresh_lock.lock().await;

        // A refresh that completed while we waited is as recent as our own would be
        let refreshed_meanwhile = self.refreshes.load(Ordering::Acquire) != seen;
        if refreshed_meanwhile || (!force && self.reconciler.is_fresh(self.snapshot_ttl)) {
            if let Some(snapshot) = self.reconciler.current() {
                return snapshot;
            }
        }

        self.reconcile_now().await;
        self.reconciler
            .current()
            .unwrap_or_else(|| Arc::new(Snapshot::new(0, Vec::new(), BTreeSet::new())))
    }

    /// Enumerate every class and fold the result into the reconciler
    pub async fn refresh(&self) -> DeviceDelta {
        let _refresh = self.refresh_lock.lock().await;
        self.reconcile_now().await
    }

    async fn reconcile_now(&self) -> DeviceDelta {
        let snapshot = self.enumerator.enumerate(None).await;
        for class in snapshot.degraded() {
            warn!("Enumeration degraded for {}", class);
        }
        let delta = self.reconciler.reconcile(snapshot);
        self.refreshes.fetch_add(1, Ordering::AcqRel);
        delta
    }

    /// Devices of the classes accepted by `filter`
    pub async fn list(&self, filter: impl Fn(DeviceClass) -> bool, refresh: bool) -> DeviceList {
        let snapshot = self.snapshot(refresh).await;
        DeviceList {
            devices: snapshot
                .devices()
                .iter()
                .filter(|d| filter(d.class))
                .cloned()
                .collect(),
            degraded: snapshot
                .degraded()
                .iter()
                .copied()
                .filter(|c| filter(*c))
                .collect(),
        }
    }

    /// Find `id` among `classes`, refreshing once if the cached snapshot lacks it
    async fn resolve(&self, classes: &[DeviceClass], id: &str) -> Result<Device, OperationError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(OperationError::InvalidRequest("device id is empty".into()));
        }

        let cached = self.snapshot(false).await;
        if let Some(device) = cached.find_in(classes, id) {
            return Ok(device.clone());
        }

        debug!("{} not in snapshot {}, re-enumerating", id, cached.sequence);
        self.snapshot(true)
            .await
            .find_in(classes, id)
            .cloned()
            .ok_or_else(|| OperationError::NotFound(format!("device {}", id)))
    }

    async fn resolve_drive(&self, drive: &str) -> Result<Device, OperationError> {
        if drive.trim().is_empty() {
            return Err(OperationError::InvalidRequest("drive is empty".into()));
        }

        let cached = self.snapshot(false).await;
        if let Some(device) = cached.find_drive(drive) {
            return Ok(device.clone());
        }

        self.snapshot(true)
            .await
            .find_drive(drive)
            .cloned()
            .ok_or_else(|| OperationError::NotFound(format!("drive {}", drive)))
    }

    pub async fn set_usb_enabled(
        &self,
        device_id: &str,
        enabled: bool,
    ) -> Result<OperationResult, OperationError> {
        let device = self
            .resolve(&[DeviceClass::UsbHid, DeviceClass::UsbStorage], device_id)
            .await?;
        let kind = if enabled {
            OperationKind::Enable
        } else {
            OperationKind::Disable
        };
        self.executor.execute(&device, kind).await
    }

    pub async fn eject(
        &self,
        drive: &str,
        mode: EjectMode,
    ) -> Result<OperationResult, OperationError> {
        let device = self.resolve_drive(drive).await?;
        self.executor.eject(&device, mode).await
    }

    /// Disable every device of `class`, one at a time
    ///
    /// Each device goes through the executor and its per-device guard; a
    /// device with an operation in flight is reported as a conflict.
    pub async fn disable_all(&self, class: DeviceClass) -> Result<Vec<BulkOutcome>, OperationError> {
        if !class.supports_enable() {
            return Err(OperationError::Unsupported(format!(
                "{} devices cannot be disabled",
                class
            )));
        }

        let snapshot = self.snapshot(false).await;
        let targets: Vec<Device> = snapshot.devices_of(class).cloned().collect();

        let mut outcomes = Vec::with_capacity(targets.len());
        for device in targets {
            let outcome = match self.executor.set_enabled(&device, false).await {
                Ok(result) => BulkOutcome {
                    device_id: device.id.clone(),
                    succeeded: true,
                    code: None,
                    message: result.message,
                },
                Err(e) => BulkOutcome {
                    device_id: device.id.clone(),
                    succeeded: false,
                    code: Some(e.code()),
                    message: e.to_string(),
                },
            };
            outcomes.push(outcome);
        }

        info!(
            "Bulk disable of {}: {}/{} succeeded",
            class,
            outcomes.iter().filter(|o| o.succeeded).count(),
            outcomes.len()
        );
        Ok(outcomes)
    }

    pub async fn set_bluetooth(&self, state: RadioState) -> Result<OperationResult, OperationError> {
        self.executor.set_radio(state).await
    }

    pub async fn audio_info(&self) -> Result<AudioInfo, OperationError> {
        self.enumerator.audio_info().await
    }

    pub async fn set_volume(
        &self,
        device_id: &str,
        volume: u8,
    ) -> Result<OperationResult, OperationError> {
        let device = self.resolve(&[DeviceClass::Audio], device_id).await?;
        self.executor.set_volume(&device, volume).await
    }

    pub async fn toggle_mute(&self, device_id: &str) -> Result<OperationResult, OperationError> {
        let device = self.resolve(&[DeviceClass::Audio], device_id).await?;
        self.executor.execute(&device, OperationKind::ToggleMute).await
    }

    pub fn is_camera_open(&self) -> bool {
        self.executor.camera().is_open()
    }

    pub async fn camera_info(&self) -> Result<CameraInfo, OperationError> {
        self.executor.camera_info().await
    }

    pub async fn open_camera(&self, index: Option<u32>) -> Result<CameraInfo, OperationError> {
        self.executor.open_camera(index).await
    }

    pub async fn close_camera(&self) -> Result<String, OperationError> {
        self.executor.close_camera().await
    }

    pub async fn start_recording(
        &self,
        request: RecordingRequest,
    ) -> Result<OperationResult, OperationError> {
        self.executor.start_recording(request).await
    }

    pub async fn stop_recording(&self) -> Result<OperationResult, OperationError> {
        self.executor.stop_recording().await
    }

    pub async fn take_frame(
        &self,
        filename: Option<&str>,
    ) -> Result<OperationResult, OperationError> {
        self.executor.take_frame(filename).await
    }

    pub async fn timed_recording(
        &self,
        request: RecordingRequest,
    ) -> Result<OperationResult, OperationError> {
        self.executor.timed_recording(request).await
    }

    pub fn last_change(&self) -> Option<DeviceDelta> {
        self.reconciler.last_change()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceDelta> {
        self.reconciler.subscribe()
    }

    pub fn running_operations(&self) -> Vec<PendingOperation> {
        self.pending.running()
    }

    pub fn operation_history(&self) -> Vec<CompletedOperation> {
        self.pending.history()
    }

    /// Refresh the snapshot on a fixed interval until aborted
    ///
    /// Returns `None` when polling is disabled.
    pub fn spawn_poller(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.poll_interval.is_zero() {
            info!("Background device polling disabled");
            return None;
        }

        let service = Arc::clone(self);
        let period = self.poll_interval;
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let delta = service.refresh().await;
                if !delta.is_empty() {
                    debug!(
                        "Poll {}: +{} -{} ~{}",
                        delta.to_sequence,
                        delta.arrived.len(),
                        delta.departed.len(),
                        delta.changed.len()
                    );
                }
            }
        }))
    }

    /// Release owned device state at teardown
    pub async fn shutdown(&self) {
        self.executor.shutdown().await;
        let running = self.pending.running();
        if !running.is_empty() {
            warn!(
                "{} operations still running at shutdown; they will not survive the restart",
                running.len()
            );
        }
    }
}
