//! Dependency-injection struct handed to every axum handler. Fields are
//! grouped by concern, each wrapped in `Arc` so cloning `AppState` per
//! request is cheap — mirrors the teacher's `AppState`.

use std::sync::Arc;

use orc_core::{Clock, Config};
use orc_notify::Notifier;
use orc_registry::{ExecutionTracker, ModuleRegistry, SessionHub};
use orc_scheduler::{InMemoryWorkflowStore, WorkflowScheduler};

#[derive(Clone)]
pub struct AppState {
    // Config & time
    pub config: Arc<Config>,
    pub clock: Clock,

    // Stateful core (C3, C4, C5)
    pub registry: Arc<ModuleRegistry>,
    pub tracker: Arc<ExecutionTracker>,
    pub hub: Arc<SessionHub>,

    // Timed half (C2, C6, C7)
    pub scheduler: Arc<WorkflowScheduler>,
    pub workflows: Arc<InMemoryWorkflowStore>,

    // Notifier port (C8)
    pub notifier: Arc<dyn Notifier>,
}
