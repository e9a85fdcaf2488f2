//! Outbound task dispatch port
//!
//! Long-running host actions (power, delete past `UNINITIALIZED`,
//! install-completion notification) are handed to an external task
//! executor via a fire-and-forget enqueue. The core does not track task
//! ids, does not wait, and does not retry; a failed enqueue surfaces
//! immediately as an error. Task outcomes come back later through the
//! state-update operations.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::observability::Logger;

/// A task handed to the external executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TaskRequest {
    /// Delete a host and notify its clusters, out of band
    DeleteHost {
        initiator: String,
        host_id: i64,
        cluster_ids: Vec<i64>,
    },
    /// Power a host on
    PowerOnHost { host_id: i64 },
    /// Power a host off
    PowerOffHost { host_id: i64 },
    /// Reset a host
    ResetHost { host_id: i64 },
    /// A host finished OS installation; per-cluster readiness maps attached
    OsInstalled {
        host_id: i64,
        clusterhost_ready: BTreeMap<i64, bool>,
        cluster_os_ready: BTreeMap<i64, bool>,
    },
}

impl TaskRequest {
    /// Task name on the external executor
    pub fn task_name(&self) -> &'static str {
        match self {
            TaskRequest::DeleteHost { .. } => "delete-host",
            TaskRequest::PowerOnHost { .. } => "poweron-host",
            TaskRequest::PowerOffHost { .. } => "poweroff-host",
            TaskRequest::ResetHost { .. } => "reset-host",
            TaskRequest::OsInstalled { .. } => "os-installed-notification",
        }
    }
}

/// Fire-and-forget outbound port to the task executor
pub trait TaskDispatcher: Send + Sync {
    /// Enqueue a task; no delivery guarantee, no response channel
    fn enqueue(&self, request: TaskRequest) -> Result<()>;
}

/// Dispatcher that records requests in memory.
///
/// Used for wiring the core without a real task executor, and by tests to
/// observe what was dispatched.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<TaskRequest>>,
}

impl RecordingDispatcher {
    /// Create an empty dispatcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests enqueued so far
    pub fn sent(&self) -> Vec<TaskRequest> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

impl TaskDispatcher for RecordingDispatcher {
    fn enqueue(&self, request: TaskRequest) -> Result<()> {
        Logger::info("task_enqueued", &[("task", request.task_name().to_string())]);
        self.sent
            .lock()
            .map_err(|e| Error::database_exception(format!("dispatcher lock poisoned: {}", e)))?
            .push(request);
        Ok(())
    }
}
