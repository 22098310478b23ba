//! Cron Union Trigger, Workflow model, Workflow Scheduler, and Watchdogs
//! (C2, C6, C7) — the timed half of the orchestrator. The stateful core
//! (module registry, execution tracker, session hub) lives in `orc-registry`;
//! this crate drives it on a schedule.

pub mod cron;
pub mod scheduler;
pub mod watchdog;
pub mod workflow;

pub use cron::{validate_cron, CronUnionTrigger};
pub use scheduler::{ListedJob, WorkflowScheduler};
pub use watchdog::{JobLogStore, Watchdogs};
pub use workflow::{job_id, resolve_invocation, InMemoryWorkflowStore, ResolvedInvocation, Workflow, WorkflowStore};
