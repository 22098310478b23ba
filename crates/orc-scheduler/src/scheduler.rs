//! Workflow Scheduler (C6) — job table over [`Workflow`]s, the
//! reload/reconciliation primitive, and the `execute_workflow` fire handler.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{NaiveDateTime, Timelike};
use orc_core::{Clock, TimeUnit};
use orc_notify::{NotificationKind, Notifier};
use orc_protocol::{ExecuteMeta, OutboundMessage};
use orc_registry::{ModuleRegistry, SessionHub};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::cron::CronUnionTrigger;
use crate::workflow::{job_id, resolve_invocation, ResolvedInvocation, Workflow, WorkflowStore};

/// Per-workflow in-flight run counter. `max_instances=1` is hardcoded per
/// §4.6/§9 — the three-way setting (no misfire replay, coalesce, single
/// instance) is not configurable per workflow.
#[derive(Default)]
struct ConcurrencyGuard {
    counts: Mutex<HashMap<u64, Arc<AtomicU32>>>,
}

impl ConcurrencyGuard {
    fn try_acquire(&self, workflow_id: u64) -> bool {
        let counter = self
            .counts
            .lock()
            .entry(workflow_id)
            .or_insert_with(|| Arc::new(AtomicU32::new(0)))
            .clone();
        if counter.load(Ordering::SeqCst) >= 1 {
            return false;
        }
        counter.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn release(&self, workflow_id: u64) {
        if let Some(counter) = self.counts.lock().get(&workflow_id) {
            counter.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

struct RegisteredJob {
    workflow_id: u64,
    trigger: CronUnionTrigger,
    shift_time: i64,
    shift_unit: TimeUnit,
    /// Coalesce dedupe: the last `S`-naive minute this job fired for. A
    /// ticking scheduler without this would re-fire every tick within the
    /// same matching minute.
    last_fired_minute: Option<NaiveDateTime>,
}

pub struct ListedJob {
    pub job_id: String,
    pub workflow_id: u64,
    pub next_run_time: Option<NaiveDateTime>,
    pub trigger_description: String,
    pub workflow_not_found: bool,
}

pub struct WorkflowScheduler {
    store: Arc<dyn WorkflowStore>,
    registry: Arc<ModuleRegistry>,
    hub: Arc<SessionHub>,
    tracker: Arc<orc_registry::ExecutionTracker>,
    notifier: Arc<dyn Notifier>,
    clock: Clock,
    jobs: RwLock<HashMap<String, RegisteredJob>>,
    concurrency: ConcurrencyGuard,
}

impl WorkflowScheduler {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        registry: Arc<ModuleRegistry>,
        hub: Arc<SessionHub>,
        tracker: Arc<orc_registry::ExecutionTracker>,
        notifier: Arc<dyn Notifier>,
        clock: Clock,
    ) -> Self {
        Self {
            store,
            registry,
            hub,
            tracker,
            notifier,
            clock,
            jobs: RwLock::new(HashMap::new()),
            concurrency: ConcurrencyGuard::default(),
        }
    }

    /// Registers `workflow` if `enable`. A cron list with no valid
    /// expression logs a warning and registers nothing (§7).
    pub fn add_job(&self, workflow: &Workflow) {
        if !workflow.enable {
            return;
        }
        let trigger = CronUnionTrigger::new(&workflow.execute_cron_list);
        if trigger.is_empty() {
            tracing::warn!(workflow_id = workflow.workflow_id, "no valid cron expression; workflow not scheduled");
            return;
        }
        self.jobs.write().insert(
            job_id(workflow.workflow_id),
            RegisteredJob {
                workflow_id: workflow.workflow_id,
                trigger,
                shift_time: workflow.execute_shift_time,
                shift_unit: workflow.execute_shift_unit,
                last_fired_minute: None,
            },
        );
    }

    pub fn remove_job(&self, workflow_id: u64) {
        self.jobs.write().remove(&job_id(workflow_id));
    }

    /// Reconciliation primitive (§4.6): after this call the registered job
    /// set equals exactly `{w : w.enable}`, with orphans (jobs whose
    /// workflow no longer exists) purged.
    pub fn reload_all(&self) {
        let all = self.store.all();
        let valid_ids: HashSet<String> = all.iter().map(|w| job_id(w.workflow_id)).collect();

        self.jobs.write().retain(|id, _| valid_ids.contains(id));

        for workflow in &all {
            if workflow.enable {
                self.add_job(workflow);
            }
        }
    }

    fn next_fire_time(&self, job: &RegisteredJob, now_local: NaiveDateTime) -> Option<NaiveDateTime> {
        let anchor_local = self.clock.shift(now_local, -job.shift_time, job.shift_unit);
        let anchor_scheduler = self.clock.to_scheduler_naive(anchor_local);
        let next_scheduler = job.trigger.next_fire(anchor_scheduler)?;
        let next_local = self.clock.from_scheduler_naive(next_scheduler);
        Some(self.clock.shift(next_local, job.shift_time, job.shift_unit))
    }

    pub fn list_jobs(&self, now_local: NaiveDateTime) -> Vec<ListedJob> {
        self.jobs
            .read()
            .values()
            .map(|job| ListedJob {
                job_id: job_id(job.workflow_id),
                workflow_id: job.workflow_id,
                next_run_time: self.next_fire_time(job, now_local),
                trigger_description: format!(
                    "shift={}{:?}",
                    job.shift_time, job.shift_unit
                ),
                workflow_not_found: self.store.get(job.workflow_id).is_none(),
            })
            .collect()
    }

    /// Scans registered jobs for ones due at `now_local`, marking them fired
    /// so a second tick within the same minute does not re-fire (coalesce).
    /// Returns the workflow ids to execute.
    pub fn due_workflow_ids(&self, now_local: NaiveDateTime) -> Vec<u64> {
        let mut due = Vec::new();
        let mut jobs = self.jobs.write();
        for job in jobs.values_mut() {
            let target_local = self.clock.shift(now_local, -job.shift_time, job.shift_unit);
            let target_scheduler = self.clock.to_scheduler_naive(target_local);
            let minute = target_scheduler
                .with_second(0)
                .and_then(|d| d.with_nanosecond(0))
                .unwrap_or(target_scheduler);
            if job.trigger.matches(&minute) && job.last_fired_minute != Some(minute) {
                job.last_fired_minute = Some(minute);
                due.push(job.workflow_id);
            }
        }
        due
    }

    /// `max_instances=1` gate; the caller should skip firing when this
    /// returns `false` and must call [`release`](Self::release) once the
    /// run completes.
    pub fn try_acquire(&self, workflow_id: u64) -> bool {
        self.concurrency.try_acquire(workflow_id)
    }

    pub fn release(&self, workflow_id: u64) {
        self.concurrency.release(workflow_id);
    }

    /// Fire handler (§4.6). Dispatches every `execute_modules` entry in
    /// order; a failure on one entry is isolated and does not abort the
    /// rest of the workflow.
    pub async fn execute_workflow(&self, workflow_id: u64) {
        let Some(workflow) = self.store.get(workflow_id) else {
            tracing::warn!(workflow_id, "execute_workflow: workflow not found");
            return;
        };

        for entry in &workflow.execute_modules {
            self.dispatch_entry(&workflow, entry).await;
        }
    }

    async fn dispatch_entry(&self, workflow: &Workflow, entry: &serde_json::Value) {
        let now = self.clock.now_local();
        let failure_time = now;

        match resolve_invocation(entry) {
            ResolvedInvocation::Invalid => {
                self.notifier
                    .notify(NotificationKind::ModuleInfoInvalid {
                        workflow_name: workflow.name.clone(),
                        workflow_id: workflow.workflow_id.to_string(),
                        module_info: entry.to_string(),
                        failure_time,
                    })
                    .await;
            }
            ResolvedInvocation::ByName { name, args } => match self.registry.lookup_by_name(&name) {
                None => {
                    self.notifier
                        .notify(NotificationKind::ModuleNameNotFound {
                            workflow_name: workflow.name.clone(),
                            workflow_id: workflow.workflow_id.to_string(),
                            module_name: name,
                            failure_time,
                        })
                        .await;
                }
                Some(module) => self.dispatch_to_module(workflow, module, args, now).await,
            },
            ResolvedInvocation::ByHash { module_hash, args } => {
                match self.registry.lookup_by_hash(&module_hash) {
                    None => {
                        self.notifier
                            .notify(NotificationKind::ModuleNotFound {
                                workflow_name: workflow.name.clone(),
                                workflow_id: workflow.workflow_id.to_string(),
                                module_id: None,
                                module_name: None,
                                failure_time,
                            })
                            .await;
                    }
                    Some(module) => self.dispatch_to_module(workflow, module, args, now).await,
                }
            }
        }
    }

    async fn dispatch_to_module(
        &self,
        workflow: &Workflow,
        module: orc_registry::Module,
        args: serde_json::Value,
        now: NaiveDateTime,
    ) {
        if !module.alive {
            self.notifier
                .notify(NotificationKind::ModuleNotFound {
                    workflow_name: workflow.name.clone(),
                    workflow_id: workflow.workflow_id.to_string(),
                    module_id: Some(module.module_id),
                    module_name: Some(module.name.clone()),
                    failure_time: now,
                })
                .await;
            return;
        }

        let result = self.try_dispatch(workflow, &module, args, now);
        if let Err(exception_message) = result {
            self.notifier
                .notify(NotificationKind::ExecutionException {
                    workflow_name: workflow.name.clone(),
                    workflow_id: workflow.workflow_id.to_string(),
                    module_id: Some(module.module_id),
                    module_name: Some(module.name.clone()),
                    exception_message,
                    failure_time: now,
                })
                .await;
        }
    }

    /// The fallible core of one dispatch (§4.6.d-g), isolated behind a
    /// `Result` so a failure here emits `ExecutionException` instead of
    /// aborting the workflow's remaining entries.
    fn try_dispatch(
        &self,
        workflow: &Workflow,
        module: &orc_registry::Module,
        args: serde_json::Value,
        now: NaiveDateTime,
    ) -> Result<(), String> {
        self.registry.mark_executed(module.module_id, now);

        let execution_id = Uuid::new_v4();
        let message = OutboundMessage::Execute {
            meta: ExecuteMeta {
                execution_id,
                execution_time: now.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
                workflow_id: workflow.workflow_id.to_string(),
                workflow_name: workflow.name.clone(),
            },
            args,
        };
        let payload = serde_json::to_value(&message).map_err(|e| e.to_string())?;

        self.hub.send_to_module(module.module_id, &payload);
        self.tracker.record(
            execution_id,
            module.module_id,
            workflow.workflow_id.to_string(),
            workflow.name.clone(),
            module.name.clone(),
            now,
        );
        Ok(())
    }
}
