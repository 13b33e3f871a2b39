//! Platform worker threads
//!
//! Two fixed pools of OS threads pull [`PlatformCommand`]s from their lane's
//! queue and run them against the backend. Slow OS calls therefore never
//! block the Tokio runtime, calls for different devices run in parallel,
//! and enumeration is never queued behind a mutation.

use crate::platform::DeviceBackend;
use common::{Lane, PlatformBridge, PlatformCommand, PlatformWorker, PlatformWorkers};
use protocol::DeviceClass;
use std::any::Any;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Query threads; one per device class so a full enumeration fans out at once
pub const QUERY_WORKERS: usize = DeviceClass::ALL.len();

/// One worker thread's loop
pub struct PlatformWorkerThread {
    name: String,
    backend: Arc<dyn DeviceBackend>,
    worker: PlatformWorker,
}

impl PlatformWorkerThread {
    pub fn new(name: String, backend: Arc<dyn DeviceBackend>, worker: PlatformWorker) -> Self {
        Self {
            name,
            backend,
            worker,
        }
    }

    /// Process commands until `Shutdown` arrives or the queue closes
    pub fn run(self) {
        debug!("{} started", self.name);

        loop {
            match self.worker.recv_command() {
                Ok(PlatformCommand::Shutdown) => break,
                Ok(cmd) => self.handle_command(cmd),
                Err(e) => {
                    debug!("{}: command queue closed ({})", self.name, e);
                    break;
                }
            }
        }

        debug!("{} stopped", self.name);
    }

    /// Handle one command, surviving a panic in the backend
    ///
    /// The responder is dropped while unwinding, so the waiting caller sees
    /// the worker as gone and gets an error instead of hanging.
    fn handle_command(&self, cmd: PlatformCommand) {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handle_command_inner(cmd)
        }));

        if let Err(panic) = result {
            error!(
                "Panic in {} while handling a platform command: {}",
                self.name,
                panic_message(panic.as_ref())
            );
        }
    }

    fn handle_command_inner(&self, cmd: PlatformCommand) {
        let backend = self.backend.as_ref();

        match cmd {
            PlatformCommand::Enumerate { class, response } => {
                let _ = response.send(backend.enumerate(class));
            }

            PlatformCommand::SetEnabled {
                device,
                enabled,
                response,
            } => {
                debug!("Setting {} enabled={}", device.key(), enabled);
                let _ = response.send(backend.set_enabled(&device, enabled));
            }

            PlatformCommand::Eject {
                device,
                mode,
                response,
            } => {
                debug!("Ejecting {} ({:?})", device.key(), mode);
                let _ = response.send(backend.eject(&device, mode));
            }

            PlatformCommand::RadioPowered { response } => {
                let _ = response.send(backend.radio_powered());
            }

            PlatformCommand::SetRadioPower { on, response } => {
                let _ = response.send(backend.set_radio_power(on));
            }

            PlatformCommand::OpenCamera { index, response } => {
                let _ = response.send(backend.open_camera(index));
            }

            PlatformCommand::CloseCamera { index, response } => {
                let _ = response.send(backend.close_camera(index));
            }

            PlatformCommand::StartRecording { spec, response } => {
                debug!(
                    "Recording camera {} at {}x{}@{} to {}",
                    spec.index,
                    spec.width,
                    spec.height,
                    spec.fps,
                    spec.output_path.display()
                );
                let _ = response.send(backend.start_recording(&spec));
            }

            PlatformCommand::StopRecording { index, response } => {
                let _ = response.send(backend.stop_recording(index));
            }

            PlatformCommand::CaptureFrame { spec, response } => {
                debug!(
                    "Capturing a frame from camera {} to {}",
                    spec.index,
                    spec.output_path.display()
                );
                let _ = response.send(backend.capture_frame(&spec));
            }

            PlatformCommand::AudioInfo { response } => {
                let _ = response.send(backend.audio_info());
            }

            PlatformCommand::SetVolume {
                device,
                level,
                response,
            } => {
                let _ = response.send(backend.set_volume(&device, level));
            }

            PlatformCommand::ToggleMute { device, response } => {
                let _ = response.send(backend.toggle_mute(&device));
            }

            PlatformCommand::Shutdown => {
                // Intercepted by run()
                warn!("{} received a stray Shutdown", self.name);
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Handles of the running worker threads
pub struct WorkerPool {
    queries: Vec<JoinHandle<()>>,
    mutations: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Threads serving mutations
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn query_workers(&self) -> usize {
        self.queries.len()
    }

    /// Stop every worker and wait for the threads to exit
    pub async fn shutdown(self, bridge: &PlatformBridge) -> common::Result<()> {
        bridge.shutdown(Lane::Query, self.queries.len()).await?;
        bridge.shutdown(Lane::Mutation, self.mutations.len()).await?;

        let handles: Vec<JoinHandle<()>> =
            self.queries.into_iter().chain(self.mutations).collect();
        tokio::task::spawn_blocking(move || {
            for handle in handles {
                if let Err(panic) = handle.join() {
                    error!(
                        "Platform worker thread panicked: {}",
                        panic_message(panic.as_ref())
                    );
                }
            }
        })
        .await
        .map_err(|e| common::Error::Other(e.to_string()))?;

        info!("Platform workers stopped");
        Ok(())
    }
}

fn spawn_lane(
    prefix: &str,
    worker: &PlatformWorker,
    backend: &Arc<dyn DeviceBackend>,
    count: usize,
) -> common::Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::with_capacity(count);
    for i in 0..count {
        let name = format!("{}-{}", prefix, i);
        let thread = PlatformWorkerThread::new(name.clone(), backend.clone(), worker.clone());
        let handle = std::thread::Builder::new()
            .name(name)
            .spawn(move || thread.run())?;
        handles.push(handle);
    }
    Ok(handles)
}

/// Spawn the query threads and `count` mutation threads
pub fn spawn_platform_workers(
    workers: PlatformWorkers,
    backend: Arc<dyn DeviceBackend>,
    count: usize,
) -> common::Result<WorkerPool> {
    let queries = spawn_lane("platform-query", &workers.queries, &backend, QUERY_WORKERS)?;
    let mutations = spawn_lane("platform-worker", &workers.mutations, &backend, count)?;

    info!(
        "Started {} query and {} mutation workers on the {} backend",
        queries.len(),
        mutations.len(),
        backend.name()
    );
    Ok(WorkerPool { queries, mutations })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::SimulatedBackend;
    use common::create_platform_bridge;
    use protocol::OperationKind;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_workers_serve_requests_and_stop() {
        let (bridge, worker) = create_platform_bridge();
        let backend = Arc::new(SimulatedBackend::with_fixtures());
        let pool = spawn_platform_workers(worker, backend, 2).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.query_workers(), QUERY_WORKERS);

        let devices = bridge
            .request(|response| PlatformCommand::Enumerate {
                class: DeviceClass::UsbStorage,
                response,
            })
            .await
            .unwrap();
        assert!(!devices.is_empty());

        pool.shutdown(&bridge).await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_command_does_not_kill_worker() {
        let (bridge, worker) = create_platform_bridge();
        let backend = Arc::new(SimulatedBackend::with_fixtures());
        backend.panic_next(OperationKind::ToggleRadio);
        let pool = spawn_platform_workers(worker, backend.clone(), 1).unwrap();

        let err = bridge
            .request(|response| PlatformCommand::SetRadioPower { on: true, response })
            .await
            .unwrap_err();
        assert!(matches!(err, common::Error::WorkerDropped));

        // The single worker is still alive
        let powered = bridge
            .request(|response| PlatformCommand::RadioPowered { response })
            .await
            .unwrap();
        assert!(powered);

        pool.shutdown(&bridge).await.unwrap();
    }

    #[tokio::test]
    async fn test_enumeration_is_not_queued_behind_mutations() {
        let (bridge, worker) = create_platform_bridge();
        let backend =
            Arc::new(SimulatedBackend::with_fixtures().with_latency(Duration::from_millis(500)));
        let pool = spawn_platform_workers(worker, backend, 1).unwrap();

        // Occupy the only mutation worker and queue another behind it
        let mut slow = Vec::new();
        for on in [false, true] {
            let bridge = bridge.clone();
            slow.push(tokio::spawn(async move {
                bridge
                    .request(|response| PlatformCommand::SetRadioPower { on, response })
                    .await
            }));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        let devices = bridge
            .request(|response| PlatformCommand::Enumerate {
                class: DeviceClass::UsbHid,
                response,
            })
            .await
            .unwrap();
        assert_eq!(devices.len(), 2);
        assert!(
            started.elapsed() < Duration::from_millis(300),
            "enumeration waited {:?}",
            started.elapsed()
        );

        for task in slow {
            task.await.unwrap().unwrap();
        }
        pool.shutdown(&bridge).await.unwrap();
    }
}
