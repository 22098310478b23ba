//! Workflow data model and the external persistence port workflows are read
//! from. Storage itself is out of scope (§6); [`InMemoryWorkflowStore`] is a
//! reference implementation for tests and simple deployments.

use std::collections::HashMap;

use orc_core::TimeUnit;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: u64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "d_enable")]
    pub enable: bool,
    pub execute_cron_list: Vec<String>,
    #[serde(default)]
    pub execute_shift_time: i64,
    pub execute_shift_unit: TimeUnit,
    /// Each entry is either a bare `module_hash` string, or an object
    /// carrying `module_hash` or `name` plus `args`. Kept as raw JSON since
    /// the three shapes don't share a single typed representation cleanly —
    /// see [`resolve_invocation`].
    pub execute_modules: Vec<Value>,
}

fn d_enable() -> bool {
    true
}

pub fn job_id(workflow_id: u64) -> String {
    format!("workflow_{workflow_id}")
}

/// One resolved step of `execute_modules`, after interpreting the three
/// on-wire shapes (§4.6.a/b).
#[derive(Debug, Clone)]
pub enum ResolvedInvocation {
    ByHash { module_hash: String, args: Value },
    ByName { name: String, args: Value },
    /// Neither `module_hash` nor `name` present in an object entry.
    Invalid,
}

/// Interprets one `execute_modules` entry per §4.6:
/// - a bare JSON string is a `module_hash` with empty args;
/// - an object uses `module_hash` if present, else falls back to `name`;
/// - an object with neither is reported `Invalid` (→ `ModuleInfoInvalid`).
pub fn resolve_invocation(entry: &Value) -> ResolvedInvocation {
    match entry {
        Value::String(hash) => ResolvedInvocation::ByHash {
            module_hash: hash.clone(),
            args: Value::Object(Default::default()),
        },
        Value::Object(map) => {
            let args = map.get("args").cloned().unwrap_or(Value::Object(Default::default()));
            if let Some(hash) = map.get("module_hash").and_then(Value::as_str) {
                ResolvedInvocation::ByHash {
                    module_hash: hash.to_string(),
                    args,
                }
            } else if let Some(name) = map.get("name").and_then(Value::as_str) {
                ResolvedInvocation::ByName {
                    name: name.to_string(),
                    args,
                }
            } else {
                ResolvedInvocation::Invalid
            }
        }
        _ => ResolvedInvocation::Invalid,
    }
}

pub trait WorkflowStore: Send + Sync {
    fn all(&self) -> Vec<Workflow>;
    fn get(&self, workflow_id: u64) -> Option<Workflow>;
}

/// In-memory reference implementation. Real deployments back this with the
/// external persistence port (§6); this crate never talks to a database.
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    inner: RwLock<HashMap<u64, Workflow>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, workflow: Workflow) {
        self.inner.write().insert(workflow.workflow_id, workflow);
    }

    pub fn remove(&self, workflow_id: u64) -> bool {
        self.inner.write().remove(&workflow_id).is_some()
    }
}

impl WorkflowStore for InMemoryWorkflowStore {
    fn all(&self) -> Vec<Workflow> {
        self.inner.read().values().cloned().collect()
    }

    fn get(&self, workflow_id: u64) -> Option<Workflow> {
        self.inner.read().get(&workflow_id).cloned()
    }
}
