//! In-flight operation tracking
//!
//! At most one [`PendingOperation`] exists per target at any time. A second
//! request for the same target fails fast instead of queueing. The entry is
//! owned by a [`PendingGuard`] and removed when the guard drops, so every
//! exit path (success, OS error, panic, abandoned caller) frees the target.

use protocol::{Device, OperationKind};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Running,
    Succeeded,
    Failed,
}

/// A mutating command currently dispatched to the platform
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    pub id: u64,
    pub target: String,
    pub kind: OperationKind,
    pub started_at_ms: u64,
    pub status: OperationStatus,
    /// Device being acted on, kept so enumeration can report it mid-eject
    #[serde(skip)]
    pub subject: Option<Device>,
}

/// A finished operation, kept for later inspection
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedOperation {
    pub id: u64,
    pub target: String,
    pub kind: OperationKind,
    pub status: OperationStatus,
    pub message: String,
    pub started_at_ms: u64,
    pub duration_ms: u64,
}

struct PendingInner {
    running: HashMap<String, PendingOperation>,
    history: VecDeque<CompletedOperation>,
    history_limit: usize,
    next_id: u64,
}

#[derive(Clone)]
pub struct PendingTable {
    inner: Arc<Mutex<PendingInner>>,
}

impl PendingTable {
    pub fn new(history_limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PendingInner {
                running: HashMap::new(),
                history: VecDeque::new(),
                history_limit,
                next_id: 1,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PendingInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register an operation on `target`, or return the one already running
    pub fn try_begin(
        &self,
        target: &str,
        kind: OperationKind,
        subject: Option<Device>,
    ) -> Result<PendingGuard, PendingOperation> {
        let mut inner = self.lock();

        if let Some(existing) = inner.running.get(target) {
            return Err(existing.clone());
        }

        let id = inner.next_id;
        inner.next_id += 1;
        inner.running.insert(
            target.to_string(),
            PendingOperation {
                id,
                target: target.to_string(),
                kind,
                started_at_ms: unix_millis(),
                status: OperationStatus::Running,
                subject,
            },
        );
        debug!("Operation {} ({}) started on {}", id, kind, target);

        Ok(PendingGuard {
            table: self.clone(),
            target: target.to_string(),
            id,
            started: Instant::now(),
            outcome: None,
        })
    }

    /// Kind of the operation running on `target`, if any
    pub fn in_flight(&self, target: &str) -> Option<OperationKind> {
        self.lock().running.get(target).map(|op| op.kind)
    }

    /// Devices with an eject currently in flight
    pub fn ejecting(&self) -> Vec<Device> {
        self.lock()
            .running
            .values()
            .filter(|op| op.kind.is_eject())
            .filter_map(|op| op.subject.clone())
            .collect()
    }

    pub fn running(&self) -> Vec<PendingOperation> {
        let mut ops: Vec<_> = self.lock().running.values().cloned().collect();
        ops.sort_by_key(|op| op.id);
        ops
    }

    /// Completed operations, oldest first
    pub fn history(&self) -> Vec<CompletedOperation> {
        self.lock().history.iter().cloned().collect()
    }

    fn finish(&self, target: &str, id: u64, elapsed_ms: u64, status: OperationStatus, message: String) {
        let mut inner = self.lock();

        let Some(op) = inner.running.remove(target) else {
            return;
        };
        debug_assert_eq!(op.id, id);

        if inner.history_limit > 0 {
            while inner.history.len() >= inner.history_limit {
                inner.history.pop_front();
            }
            inner.history.push_back(CompletedOperation {
                id: op.id,
                target: op.target,
                kind: op.kind,
                status,
                message,
                started_at_ms: op.started_at_ms,
                duration_ms: elapsed_ms,
            });
        }
    }
}

/// Ownership of one in-flight operation
pub struct PendingGuard {
    table: PendingTable,
    target: String,
    id: u64,
    started: Instant,
    outcome: Option<(OperationStatus, String)>,
}

impl PendingGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Record how the operation ended; applied when the guard drops
    pub fn complete(&mut self, succeeded: bool, message: impl Into<String>) {
        let status = if succeeded {
            OperationStatus::Succeeded
        } else {
            OperationStatus::Failed
        };
        self.outcome = Some((status, message.into()));
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let (status, message) = self
            .outcome
            .take()
            .unwrap_or((OperationStatus::Failed, "operation aborted".to_string()));
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        debug!(
            "Operation {} on {} finished: {:?}",
            self.id, self.target, status
        );
        self.table
            .finish(&self.target, self.id, elapsed_ms, status, message);
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
