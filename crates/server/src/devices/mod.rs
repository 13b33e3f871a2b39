//! Device-state core
//!
//! - [`DeviceEnumerator`] turns platform queries into snapshots
//! - [`StateReconciler`] retains the latest snapshot and computes deltas
//! - [`CommandExecutor`] runs mutations, at most one per target at a time
//!
//! The reconciler's snapshot and the [`PendingTable`] are the only shared
//! mutable state; nothing else writes to them.

pub mod camera;
pub mod enumerator;
pub mod error;
pub mod executor;
pub mod identity;
pub mod pending;
pub mod reconciler;
pub mod snapshot;

pub use camera::{CameraController, CameraSession, RecordingState};
pub use enumerator::DeviceEnumerator;
pub use error::OperationError;
pub use executor::{CommandExecutor, OperationResult, RADIO_TARGET, RecordingRequest};
pub use identity::{IdentityResolver, IdentityScheme};
pub use pending::{
    CompletedOperation, OperationStatus, PendingGuard, PendingOperation, PendingTable,
};
pub use reconciler::StateReconciler;
pub use snapshot::{DeviceDelta, SequenceCounter, Snapshot};
