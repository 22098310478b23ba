//! Execution Tracker (C5) — outstanding `execution_id → dispatch` table
//! with timeout indexing. No persistence: a restart drops every pending
//! record (accepted limitation, §7).

use std::collections::HashMap;

use chrono::{Duration, NaiveDateTime};
use parking_lot::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PendingExecution {
    pub execution_id: Uuid,
    pub module_id: u64,
    pub workflow_id: String,
    pub workflow_name: String,
    pub module_name: String,
    pub sent_time: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct Expired {
    pub execution: PendingExecution,
    pub elapsed_seconds: f64,
}

#[derive(Default)]
pub struct ExecutionTracker {
    pending: Mutex<HashMap<Uuid, PendingExecution>>,
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        execution_id: Uuid,
        module_id: u64,
        workflow_id: String,
        workflow_name: String,
        module_name: String,
        sent_time: NaiveDateTime,
    ) {
        self.pending.lock().insert(
            execution_id,
            PendingExecution {
                execution_id,
                module_id,
                workflow_id,
                workflow_name,
                module_name,
                sent_time,
            },
        );
    }

    /// Idempotent removal; returns the removed record if one existed.
    pub fn clear(&self, execution_id: Uuid) -> Option<PendingExecution> {
        self.pending.lock().remove(&execution_id)
    }

    /// Removes and returns every entry with `sent_time < now - timeout`.
    pub fn sweep(&self, now: NaiveDateTime, timeout: Duration) -> Vec<Expired> {
        let mut pending = self.pending.lock();
        let threshold = now - timeout;
        let expired_ids: Vec<Uuid> = pending
            .iter()
            .filter(|(_, p)| p.sent_time < threshold)
            .map(|(id, _)| *id)
            .collect();

        expired_ids
            .into_iter()
            .filter_map(|id| {
                pending.remove(&id).map(|execution| {
                    let elapsed_seconds = (now - execution.sent_time).num_milliseconds() as f64 / 1000.0;
                    Expired {
                        execution,
                        elapsed_seconds,
                    }
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
