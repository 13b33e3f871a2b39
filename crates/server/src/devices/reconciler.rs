//! State reconciler
//!
//! Holds the most recent snapshot and computes arrival/departure/change
//! deltas between consecutive enumerations. It is the source of truth for
//! "is device X still present"; it knows nothing about who consumes deltas.
//!
//! Sequence numbers order enumerations against confirmed mutations. An
//! enumeration is numbered when its OS queries start, and every amendment
//! takes the next number, so an enumeration that read the OS before a
//! mutation completed never overwrites that mutation's result.

use crate::devices::snapshot::{DeviceDelta, SequenceCounter, Snapshot};
use protocol::{Device, DeviceClass};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Capacity of the delta broadcast channel
const DELTA_CHANNEL_CAPACITY: usize = 64;

type DeviceKey = (DeviceClass, String);

#[derive(Default)]
struct Retained {
    snapshot: Option<Arc<Snapshot>>,
    /// Sequence of the last confirmed mutation per device, until an
    /// enumeration started after it has been reconciled
    amended: BTreeMap<DeviceKey, u64>,
}

pub struct StateReconciler {
    retained: RwLock<Retained>,
    last_change: RwLock<Option<DeviceDelta>>,
    /// Sequence at which a mutation made the retained snapshot untrustworthy
    /// for pollers; 0 when it is trustworthy
    stale_since: AtomicU64,
    sequence: SequenceCounter,
    events: broadcast::Sender<DeviceDelta>,
}

impl StateReconciler {
    pub fn new(sequence: SequenceCounter) -> Self {
        let (events, _) = broadcast::channel(DELTA_CHANNEL_CAPACITY);
        Self {
            retained: RwLock::new(Retained::default()),
            last_change: RwLock::new(None),
            stale_since: AtomicU64::new(0),
            sequence,
            events,
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Retained> {
        self.retained
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The retained snapshot, if any enumeration has been reconciled yet
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.retained
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .snapshot
            .clone()
    }

    /// Whether the retained snapshot may still be served without re-enumerating
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.stale_since.load(Ordering::Acquire) == 0
            && self.current().is_some_and(|snapshot| snapshot.age() < ttl)
    }

    /// Require an enumeration started from now on before serving from cache
    pub fn mark_stale(&self) {
        let mark = self.sequence.next();
        self.stale_since.fetch_max(mark, Ordering::AcqRel);
    }

    /// Subscribe to every non-empty delta
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceDelta> {
        self.events.subscribe()
    }

    /// Most recent non-empty delta
    pub fn last_change(&self) -> Option<DeviceDelta> {
        self.last_change
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replace the retained snapshot with `incoming` and report what changed
    ///
    /// Devices of a class that failed to enumerate in `incoming` are carried
    /// over from the previous snapshot instead of being reported departed.
    /// Devices amended after `incoming` started keep their amended state.
    pub fn reconcile(&self, incoming: Snapshot) -> DeviceDelta {
        let mut retained = self.write();
        let started = incoming.sequence;
        self.clear_stale_before(started);

        let Some(previous) = retained.snapshot.clone() else {
            let delta = DeviceDelta {
                from_sequence: None,
                to_sequence: incoming.sequence,
                arrived: incoming.devices().to_vec(),
                departed: Vec::new(),
                changed: Vec::new(),
            };
            debug!(
                "Initial snapshot {} with {} devices",
                incoming.sequence,
                incoming.len()
            );
            retained.snapshot = Some(Arc::new(incoming));
            drop(retained);
            self.publish(&delta);
            return delta;
        };

        let merged = carry_over_degraded(&previous, incoming);
        let mut merged = keep_newer_amendments(&previous, merged, &retained.amended);
        retained.amended.retain(|_, amended_at| *amended_at > started);
        if merged.sequence <= previous.sequence {
            // Started before the last amendment; keep sequences increasing
            merged = merged.supersede(self.sequence.next(), merged.devices().to_vec());
        }

        let old: BTreeMap<(DeviceClass, &str), &Device> = previous
            .devices()
            .iter()
            .map(|d| ((d.class, d.id.as_str()), d))
            .collect();
        let new: BTreeMap<(DeviceClass, &str), &Device> = merged
            .devices()
            .iter()
            .map(|d| ((d.class, d.id.as_str()), d))
            .collect();

        let mut delta = DeviceDelta {
            from_sequence: Some(previous.sequence),
            to_sequence: merged.sequence,
            ..DeviceDelta::default()
        };

        for (key, device) in &old {
            match new.get(key) {
                None => delta.departed.push((*device).clone()),
                Some(now) if *now != *device => delta.changed.push((*now).clone()),
                Some(_) => {}
            }
        }
        for (key, device) in &new {
            if !old.contains_key(key) {
                delta.arrived.push((*device).clone());
            }
        }

        retained.snapshot = Some(Arc::new(merged));
        drop(retained);

        self.publish(&delta);
        delta
    }

    /// Apply a confirmed mutation to the retained snapshot
    ///
    /// The snapshot is superseded, never modified in place. Returns false if
    /// the device is not in the retained snapshot.
    pub fn amend(&self, class: DeviceClass, id: &str, apply: impl FnOnce(&mut Device)) -> bool {
        let mut retained = self.write();

        let Some(snapshot) = retained.snapshot.as_ref() else {
            return false;
        };

        let mut devices = snapshot.devices().to_vec();
        let Some(device) = devices.iter_mut().find(|d| d.class == class && d.id == id) else {
            return false;
        };
        apply(device);

        let sequence = self.sequence.next();
        let next = snapshot.supersede(sequence, devices);
        retained.snapshot = Some(Arc::new(next));
        retained.amended.insert((class, id.to_string()), sequence);
        true
    }

    /// Clear the stale mark if an enumeration started after it
    fn clear_stale_before(&self, started: u64) {
        let mark = self.stale_since.load(Ordering::Acquire);
        if mark != 0 && started > mark {
            // A newer mark set meanwhile stays in place
            let _ = self
                .stale_since
                .compare_exchange(mark, 0, Ordering::AcqRel, Ordering::Acquire);
        }
    }

    fn publish(&self, delta: &DeviceDelta) {
        if delta.is_empty() {
            return;
        }

        for device in &delta.arrived {
            info!("Device arrived: {} ({})", device.key(), device.display_name);
        }
        for device in &delta.departed {
            info!("Device departed: {} ({})", device.key(), device.display_name);
        }
        for device in &delta.changed {
            info!("Device changed: {} ({})", device.key(), device.display_name);
        }

        *self
            .last_change
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(delta.clone());

        // No subscribers is fine
        let _ = self.events.send(delta.clone());
    }
}

/// Keep previous devices of classes that `incoming` could not enumerate
fn carry_over_degraded(previous: &Snapshot, incoming: Snapshot) -> Snapshot {
    if incoming.degraded().is_empty() {
        return incoming;
    }

    let carried: Vec<Device> = previous
        .devices()
        .iter()
        .filter(|d| incoming.is_degraded(d.class))
        .filter(|d| incoming.find(d.class, &d.id).is_none())
        .cloned()
        .collect();

    if carried.is_empty() {
        return incoming;
    }

    debug!(
        "Carrying {} devices of degraded classes into snapshot {}",
        carried.len(),
        incoming.sequence
    );
    let mut devices = incoming.devices().to_vec();
    devices.extend(carried);
    incoming.supersede(incoming.sequence, devices)
}

/// Keep the retained state of devices amended after `incoming` started
fn keep_newer_amendments(
    previous: &Snapshot,
    incoming: Snapshot,
    amended: &BTreeMap<DeviceKey, u64>,
) -> Snapshot {
    let newer: Vec<&DeviceKey> = amended
        .iter()
        .filter(|(_, amended_at)| **amended_at > incoming.sequence)
        .map(|(key, _)| key)
        .collect();
    if newer.is_empty() {
        return incoming;
    }

    let is_newer = |d: &Device| newer.iter().any(|(class, id)| *class == d.class && *id == d.id);
    let mut devices: Vec<Device> = incoming
        .devices()
        .iter()
        .filter(|d| !is_newer(d))
        .cloned()
        .collect();
    devices.extend(
        newer
            .iter()
            .filter_map(|(class, id)| previous.find(*class, id))
            .cloned(),
    );

    debug!(
        "Snapshot {} predates {} amendments; keeping the amended state",
        incoming.sequence,
        newer.len()
    );
    incoming.supersede(incoming.sequence, devices)
}
