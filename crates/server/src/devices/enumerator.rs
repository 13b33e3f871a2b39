//! Device enumerator
//!
//! Queries the platform for attached devices, one worker call per class, and
//! folds the results into a [`Snapshot`]. Enumeration is read-only and never
//! waits on a pending operation.

use crate::devices::error::OperationError;
use crate::devices::identity::IdentityResolver;
use crate::devices::pending::PendingTable;
use crate::devices::snapshot::{SequenceCounter, Snapshot};
use common::{PlatformBridge, PlatformCommand};
use protocol::{AudioInfo, ConnectionState, Device, DeviceClass, PlatformError};
use std::collections::BTreeSet;
use tokio::task::JoinSet;
use tracing::{debug, warn};

pub struct DeviceEnumerator {
    bridge: PlatformBridge,
    identity: IdentityResolver,
    pending: PendingTable,
    sequence: SequenceCounter,
}

impl DeviceEnumerator {
    pub fn new(
        bridge: PlatformBridge,
        identity: IdentityResolver,
        pending: PendingTable,
        sequence: SequenceCounter,
    ) -> Self {
        Self {
            bridge,
            identity,
            pending,
            sequence,
        }
    }

    /// Enumerate one class, or every class when `class` is `None`
    ///
    /// Never fails: a class the platform does not support contributes no
    /// devices, and a class whose query failed is listed as degraded. The
    /// snapshot is numbered before the first query is sent.
    pub async fn enumerate(&self, class: Option<DeviceClass>) -> Snapshot {
        let sequence = self.sequence.next();
        let classes: Vec<DeviceClass> = match class {
            Some(class) => vec![class],
            None => DeviceClass::ALL.to_vec(),
        };

        let mut queries = JoinSet::new();
        for class in classes {
            let bridge = self.bridge.clone();
            queries.spawn(async move {
                let result = bridge
                    .request(|response| PlatformCommand::Enumerate { class, response })
                    .await;
                (class, result)
            });
        }

        let mut devices = Vec::new();
        let mut degraded = BTreeSet::new();
        let mut queried = BTreeSet::new();
        while let Some(joined) = queries.join_next().await {
            let (class, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("Enumeration task failed: {}", e);
                    continue;
                }
            };
            queried.insert(class);

            match result {
                Ok(found) => {
                    debug!("Enumerated {} {} devices", found.len(), class);
                    devices.extend(self.identity.resolve(class, found));
                }
                Err(common::Error::Platform(PlatformError::Unsupported(reason))) => {
                    debug!("Skipping {}: {}", class, reason);
                }
                Err(e) => {
                    warn!("Enumeration of {} failed: {}", class, e);
                    degraded.insert(class);
                }
            }
        }

        // A task that died never reported; treat its class as failed
        if class.is_none() {
            for class in DeviceClass::ALL {
                if !queried.contains(&class) {
                    degraded.insert(class);
                }
            }
        }

        overlay_ejecting(&mut devices, self.pending.ejecting(), &degraded, class);
        Snapshot::new(sequence, devices, degraded)
    }

    pub async fn audio_info(&self) -> Result<AudioInfo, OperationError> {
        Ok(self
            .bridge
            .request(|response| PlatformCommand::AudioInfo { response })
            .await?)
    }
}

/// Report devices with an eject in flight as `Ejecting`
///
/// A drive the OS already dropped is kept in the listing until its eject
/// operation completes.
fn overlay_ejecting(
    devices: &mut Vec<Device>,
    ejecting: Vec<Device>,
    degraded: &BTreeSet<DeviceClass>,
    only: Option<DeviceClass>,
) {
    for subject in ejecting {
        if only.is_some_and(|class| class != subject.class) || degraded.contains(&subject.class)
        {
            continue;
        }

        match devices
            .iter_mut()
            .find(|d| d.class == subject.class && d.id == subject.id)
        {
            Some(device) => device.connection_state = ConnectionState::Ejecting,
            None => {
                let mut device = subject;
                device.connection_state = ConnectionState::Ejecting;
                devices.push(device);
            }
        }
    }
}
