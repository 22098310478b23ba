//! Notifier Port (C8) — the abstract outbound notification interface
//! consumed by C6 (dispatch failures) and C7 (watchdog sweeps).
//!
//! The `kind` set is closed: every variant below has a fixed, documented
//! field set and a rendered subject/body pair. Implementations must never
//! let delivery failure propagate to the caller — log it and move on.

use chrono::NaiveDateTime;
use uuid::Uuid;

mod email;
pub mod testing;

pub use email::EmailNotifier;

#[derive(Debug, Clone)]
pub enum NotificationKind {
    ExecutionFailure {
        workflow_name: String,
        workflow_id: String,
        module_name: String,
        module_id: u64,
        error_message: String,
        failure_time: NaiveDateTime,
    },
    ModuleNotFound {
        workflow_name: String,
        workflow_id: String,
        module_id: Option<u64>,
        module_name: Option<String>,
        failure_time: NaiveDateTime,
    },
    ModuleNameNotFound {
        workflow_name: String,
        workflow_id: String,
        module_name: String,
        failure_time: NaiveDateTime,
    },
    ModuleInfoInvalid {
        workflow_name: String,
        workflow_id: String,
        module_info: String,
        failure_time: NaiveDateTime,
    },
    ExecutionException {
        workflow_name: String,
        workflow_id: String,
        module_id: Option<u64>,
        module_name: Option<String>,
        exception_message: String,
        failure_time: NaiveDateTime,
    },
    ExecutionTimeout {
        workflow_name: String,
        workflow_id: String,
        module_name: String,
        module_id: u64,
        execution_id: Uuid,
        elapsed_seconds: f64,
        timeout_seconds: u64,
        failure_time: NaiveDateTime,
    },
}

impl NotificationKind {
    /// Renders this notification to a (subject, body) pair.
    pub fn render(&self) -> (String, String) {
        match self {
            NotificationKind::ExecutionFailure {
                workflow_name,
                workflow_id,
                module_name,
                module_id,
                error_message,
                failure_time,
            } => (
                format!("[workflow failure] {workflow_name} - {module_name}"),
                format!(
                    "workflow module execution failure\n\n\
                     workflow: {workflow_name} (id: {workflow_id})\n\
                     module: {module_name} (id: {module_id})\n\
                     time: {failure_time}\n\
                     error: {error_message}\n"
                ),
            ),
            NotificationKind::ModuleNotFound {
                workflow_name,
                workflow_id,
                module_id,
                module_name,
                failure_time,
            } => (
                format!("[workflow failure] {workflow_name} - module not found or offline"),
                format!(
                    "workflow module execution failure\n\n\
                     workflow: {workflow_name} (id: {workflow_id})\n\
                     module_id: {}\n\
                     module_name: {}\n\
                     time: {failure_time}\n\
                     error: module not found or offline\n",
                    module_id.map(|v| v.to_string()).unwrap_or_else(|| "unknown".into()),
                    module_name.clone().unwrap_or_else(|| "unknown".into()),
                ),
            ),
            NotificationKind::ModuleNameNotFound {
                workflow_name,
                workflow_id,
                module_name,
                failure_time,
            } => (
                format!("[workflow failure] {workflow_name} - module name not found"),
                format!(
                    "workflow module execution failure\n\n\
                     workflow: {workflow_name} (id: {workflow_id})\n\
                     module_name: {module_name}\n\
                     time: {failure_time}\n\
                     error: module name not registered\n"
                ),
            ),
            NotificationKind::ModuleInfoInvalid {
                workflow_name,
                workflow_id,
                module_info,
                failure_time,
            } => (
                format!("[workflow failure] {workflow_name} - invalid module entry"),
                format!(
                    "workflow module execution failure\n\n\
                     workflow: {workflow_name} (id: {workflow_id})\n\
                     module_info: {module_info}\n\
                     time: {failure_time}\n\
                     error: module entry has neither module_hash nor name\n"
                ),
            ),
            NotificationKind::ExecutionException {
                workflow_name,
                workflow_id,
                module_id,
                module_name,
                exception_message,
                failure_time,
            } => (
                format!("[workflow failure] {workflow_name} - dispatch exception"),
                format!(
                    "workflow module execution failure\n\n\
                     workflow: {workflow_name} (id: {workflow_id})\n\
                     module_id: {}\n\
                     module_name: {}\n\
                     time: {failure_time}\n\
                     error: {exception_message}\n",
                    module_id.map(|v| v.to_string()).unwrap_or_else(|| "unknown".into()),
                    module_name.clone().unwrap_or_else(|| "unknown".into()),
                ),
            ),
            NotificationKind::ExecutionTimeout {
                workflow_name,
                workflow_id,
                module_name,
                module_id,
                execution_id,
                elapsed_seconds,
                timeout_seconds,
                failure_time,
            } => (
                format!("[workflow timeout] {workflow_name} - {module_name}"),
                format!(
                    "workflow module execution timeout\n\n\
                     workflow: {workflow_name} (id: {workflow_id})\n\
                     module: {module_name} (id: {module_id})\n\
                     execution_id: {execution_id}\n\
                     elapsed: {elapsed_seconds:.1}s (timeout: {timeout_seconds}s)\n\
                     time: {failure_time}\n\
                     error: module did not return a result before the timeout\n"
                ),
            ),
        }
    }
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, kind: NotificationKind);
}
