//! Async channel bridge between Tokio runtime and platform worker threads
//!
//! OS device calls are blocking and potentially slow. They run on pools of
//! dedicated threads pulling from multi-consumer channels, so calls for
//! different devices proceed in parallel while request handling on the
//! runtime never blocks.
//!
//! Commands travel on one of two lanes. Read-only queries (enumeration,
//! radio and audio status) have their own queue and threads, so a slow
//! eject or recording stop never delays an enumeration.

use async_channel::{Receiver, Sender, bounded};
use protocol::{
    AudioInfo, CameraInfo, Device, DeviceClass, EjectMode, PlatformError, RecordingSpec,
    Transition,
};
use tokio::sync::oneshot;
use tracing::debug;

/// One-shot reply channel carried by every command
pub type Responder<T> = oneshot::Sender<Result<T, PlatformError>>;

/// Commands from Tokio runtime to the platform workers
#[derive(Debug)]
pub enum PlatformCommand {
    /// Enumerate currently attached devices of one class
    Enumerate {
        class: DeviceClass,
        response: Responder<Vec<Device>>,
    },

    /// Enable or disable a device
    SetEnabled {
        device: Device,
        enabled: bool,
        response: Responder<Transition>,
    },

    /// Detach a storage device from the host
    Eject {
        device: Device,
        mode: EjectMode,
        response: Responder<()>,
    },

    /// Query Bluetooth radio power
    RadioPowered { response: Responder<bool> },

    /// Switch Bluetooth radio power
    SetRadioPower {
        on: bool,
        response: Responder<Transition>,
    },

    /// Open a camera handle
    OpenCamera {
        index: u32,
        response: Responder<CameraInfo>,
    },

    /// Release a camera handle
    CloseCamera {
        index: u32,
        response: Responder<()>,
    },

    /// Begin capturing video to a file
    StartRecording {
        spec: RecordingSpec,
        response: Responder<()>,
    },

    /// Finish a capture and flush the output file
    StopRecording {
        index: u32,
        response: Responder<()>,
    },

    /// Grab a single frame into an image file
    CaptureFrame {
        spec: RecordingSpec,
        response: Responder<()>,
    },

    /// Summarize the audio subsystem
    AudioInfo { response: Responder<AudioInfo> },

    /// Set an audio endpoint volume (percent)
    SetVolume {
        device: Device,
        level: u8,
        response: Responder<()>,
    },

    /// Toggle mute on an audio endpoint; replies with the new muted state
    ToggleMute {
        device: Device,
        response: Responder<bool>,
    },

    /// Stop one worker thread
    Shutdown,
}

/// Queue a command is served from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// Read-only queries
    Query,
    /// Everything that changes device state
    Mutation,
}

impl PlatformCommand {
    pub fn lane(&self) -> Lane {
        match self {
            PlatformCommand::Enumerate { .. }
            | PlatformCommand::RadioPowered { .. }
            | PlatformCommand::AudioInfo { .. } => Lane::Query,
            _ => Lane::Mutation,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            PlatformCommand::Enumerate { .. } => "enumerate",
            PlatformCommand::SetEnabled { .. } => "set-enabled",
            PlatformCommand::Eject { .. } => "eject",
            PlatformCommand::RadioPowered { .. } => "radio-powered",
            PlatformCommand::SetRadioPower { .. } => "set-radio-power",
            PlatformCommand::OpenCamera { .. } => "open-camera",
            PlatformCommand::CloseCamera { .. } => "close-camera",
            PlatformCommand::StartRecording { .. } => "start-recording",
            PlatformCommand::StopRecording { .. } => "stop-recording",
            PlatformCommand::CaptureFrame { .. } => "capture-frame",
            PlatformCommand::AudioInfo { .. } => "audio-info",
            PlatformCommand::SetVolume { .. } => "set-volume",
            PlatformCommand::ToggleMute { .. } => "toggle-mute",
            PlatformCommand::Shutdown => "shutdown",
        }
    }
}

/// Handle for Tokio runtime (async)
#[derive(Clone)]
pub struct PlatformBridge {
    query_tx: Sender<PlatformCommand>,
    mutation_tx: Sender<PlatformCommand>,
}

impl PlatformBridge {
    fn sender(&self, lane: Lane) -> &Sender<PlatformCommand> {
        match lane {
            Lane::Query => &self.query_tx,
            Lane::Mutation => &self.mutation_tx,
        }
    }

    /// Send a command to the worker pool serving its lane
    pub async fn send_command(&self, cmd: PlatformCommand) -> crate::Result<()> {
        self.sender(cmd.lane())
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Send a command and wait for its reply
    ///
    /// A worker that panics while handling the command drops the responder;
    /// that surfaces here as [`crate::Error::WorkerDropped`].
    pub async fn request<T>(
        &self,
        build: impl FnOnce(Responder<T>) -> PlatformCommand,
    ) -> crate::Result<T> {
        let (tx, rx) = oneshot::channel();
        let cmd = build(tx);
        let name = cmd.name();
        self.send_command(cmd).await?;

        let reply = rx.await.map_err(|_| {
            debug!("Worker dropped the reply to {}", name);
            crate::Error::WorkerDropped
        })?;
        Ok(reply?)
    }

    /// Ask `workers` threads serving `lane` to exit
    pub async fn shutdown(&self, lane: Lane, workers: usize) -> crate::Result<()> {
        let sender = self.sender(lane);
        for _ in 0..workers {
            sender
                .send(PlatformCommand::Shutdown)
                .await
                .map_err(|e| crate::Error::Channel(e.to_string()))?;
        }
        Ok(())
    }
}

/// Handle for a platform worker thread (blocking)
///
/// Cloned once per worker; all clones consume the same queue.
#[derive(Clone)]
pub struct PlatformWorker {
    cmd_rx: Receiver<PlatformCommand>,
}

impl PlatformWorker {
    /// Receive a command from Tokio runtime (blocking)
    pub fn recv_command(&self) -> crate::Result<PlatformCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Worker ends of both lanes
pub struct PlatformWorkers {
    pub queries: PlatformWorker,
    pub mutations: PlatformWorker,
}

/// Create the channel bridge between Tokio and the worker pools
///
/// Returns (PlatformBridge for Tokio, PlatformWorkers for worker threads)
pub fn create_platform_bridge() -> (PlatformBridge, PlatformWorkers) {
    let (query_tx, query_rx) = bounded(256);
    let (mutation_tx, mutation_rx) = bounded(256);
    (
        PlatformBridge {
            query_tx,
            mutation_tx,
        },
        PlatformWorkers {
            queries: PlatformWorker { cmd_rx: query_rx },
            mutations: PlatformWorker {
                cmd_rx: mutation_rx,
            },
        },
    )
}
