//! Watchdogs (C7) — three periodic sweeps, each scheduled under C6 with
//! `max_instances=1`: stale-session reap, execution-timeout reap, and
//! weekly job-log GC.

use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use orc_notify::{NotificationKind, Notifier};
use orc_registry::{ExecutionTracker, ModuleRegistry, SessionHub};

/// External execution-history store the job-log GC sweep purges against.
/// Storage itself is out of scope (§6) — this crate only owns the cadence
/// and the cutoff computation.
pub trait JobLogStore: Send + Sync {
    fn purge_older_than(&self, cutoff: NaiveDateTime);
}

const JOB_LOG_RETENTION_SECONDS: i64 = 604_800;

pub struct Watchdogs {
    registry: Arc<ModuleRegistry>,
    hub: Arc<SessionHub>,
    tracker: Arc<ExecutionTracker>,
    notifier: Arc<dyn Notifier>,
}

impl Watchdogs {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        hub: Arc<SessionHub>,
        tracker: Arc<ExecutionTracker>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            registry,
            hub,
            tracker,
            notifier,
        }
    }

    /// §4.7.1: a module is expired if its session group has zero members
    /// (the transport already dropped it) or `last_alive_time` is before
    /// `now_local - W` (or null). No outbound notification — routine
    /// hygiene. Returns the number of modules reaped.
    ///
    /// The two cases are handled separately because they disagree on
    /// whether the hub still needs cleanup: a zero-member group is already
    /// gone from the hub's perspective (`force_reap` only needs to update
    /// the registry), while a non-empty but stale group means the
    /// transport's read loop never noticed its peer died — that channel is
    /// still sitting in the hub and must be evicted here, since nothing
    /// else will ever call `on_disconnect` for it.
    pub fn stale_session_sweep(&self, now_local: NaiveDateTime, session_alive_timeout_seconds: i64) -> usize {
        let threshold = now_local - Duration::seconds(session_alive_timeout_seconds);

        let empty_group_ids: Vec<u64> = self
            .registry
            .alive_modules()
            .into_iter()
            .filter(|m| self.hub.group_len(m.module_id) == 0)
            .map(|m| m.module_id)
            .collect();
        let mut reaped = self.registry.force_reap(&empty_group_ids).len();

        let stale = self.registry.reap_stale(threshold);
        for module in &stale {
            self.hub.clear_group(module.module_id);
        }
        reaped += stale.len();

        reaped
    }

    /// §4.7.2: sweeps the execution tracker for entries past `E` seconds
    /// and emits one `ExecutionTimeout` notification per expired entry.
    pub async fn execution_timeout_sweep(&self, now_local: NaiveDateTime, execution_timeout_seconds: u64) {
        let expired = self
            .tracker
            .sweep(now_local, Duration::seconds(execution_timeout_seconds as i64));

        for exp in expired {
            self.notifier
                .notify(NotificationKind::ExecutionTimeout {
                    workflow_name: exp.execution.workflow_name,
                    workflow_id: exp.execution.workflow_id,
                    module_name: exp.execution.module_name,
                    module_id: exp.execution.module_id,
                    execution_id: exp.execution.execution_id,
                    elapsed_seconds: exp.elapsed_seconds,
                    timeout_seconds: execution_timeout_seconds,
                    failure_time: now_local,
                })
                .await;
        }
    }

    /// §4.7.3: weekly (`Mon 00:00`) purge of externally-stored execution
    /// history older than 604,800 seconds.
    pub fn job_log_gc(&self, now_local: NaiveDateTime, job_log: &dyn JobLogStore) {
        let cutoff = now_local - Duration::seconds(JOB_LOG_RETENTION_SECONDS);
        job_log.purge_older_than(cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use orc_notify::testing::RecordingNotifier;
    use parking_lot::Mutex;
    use uuid::Uuid;

    fn t(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 7, 28).unwrap().and_hms_opt(h, m, s).unwrap()
    }

    fn build() -> (Watchdogs, Arc<ModuleRegistry>, Arc<SessionHub>, Arc<ExecutionTracker>, Arc<RecordingNotifier>) {
        let registry = Arc::new(ModuleRegistry::new());
        let tracker = Arc::new(ExecutionTracker::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let hub = Arc::new(SessionHub::new(registry.clone(), tracker.clone(), notifier.clone()));
        let watchdogs = Watchdogs::new(registry.clone(), hub.clone(), tracker.clone(), notifier.clone());
        (watchdogs, registry, hub, tracker, notifier)
    }

    #[test]
    fn stale_session_sweep_reaps_modules_with_no_channel() {
        let (watchdogs, registry, _, _, _) = build();
        let (_, hash) = registry.register("M", None, vec![], vec![], "h").unwrap();
        registry.bind_session(&hash, "sess-1", t(9, 0, 0)).unwrap();
        // Alive per the registry, but no channel was ever bound into the
        // hub's group — treated as already disconnected.
        let reaped = watchdogs.stale_session_sweep(t(9, 0, 5), 120);
        assert_eq!(reaped, 1);
        assert!(!registry.lookup_by_hash(&hash).unwrap().alive);
    }

    #[test]
    fn stale_session_sweep_reaps_past_last_alive_threshold() {
        use orc_registry::ModuleChannel;

        struct NoopChannel;
        impl ModuleChannel for NoopChannel {
            fn send_text(&self, _: String) {}
            fn close(&self) {}
        }

        let (watchdogs, registry, hub, _, _) = build();
        let (_, hash) = registry.register("M", None, vec![], vec![], "h").unwrap();
        let handle = hub.accept(&format!("hash={hash}"), Arc::new(NoopChannel), t(9, 0, 0)).unwrap();
        let _ = handle;

        // Session group is non-empty, so only the last_alive_time check applies.
        let reaped = watchdogs.stale_session_sweep(t(9, 3, 0), 120);
        assert_eq!(reaped, 1);
    }

    #[test]
    fn stale_session_sweep_clears_hub_group_for_stale_timestamp_zombies() {
        use orc_registry::ModuleChannel;

        struct NoopChannel;
        impl ModuleChannel for NoopChannel {
            fn send_text(&self, _: String) {}
            fn close(&self) {}
        }

        let (watchdogs, registry, hub, _, _) = build();
        let (_, hash) = registry.register("M", None, vec![], vec![], "h").unwrap();
        let handle = hub.accept(&format!("hash={hash}"), Arc::new(NoopChannel), t(9, 0, 0)).unwrap();

        // The transport's read loop never observed the peer vanish, so the
        // channel is still in the hub's group when the sweep runs.
        assert_eq!(hub.group_len(handle.module_id), 1);
        let reaped = watchdogs.stale_session_sweep(t(9, 3, 0), 120);
        assert_eq!(reaped, 1);
        assert_eq!(hub.group_len(handle.module_id), 0);
    }

    #[test]
    fn stale_session_sweep_leaves_fresh_modules_with_channels_alone() {
        use orc_registry::ModuleChannel;

        struct NoopChannel;
        impl ModuleChannel for NoopChannel {
            fn send_text(&self, _: String) {}
            fn close(&self) {}
        }

        let (watchdogs, registry, hub, _, _) = build();
        let (_, hash) = registry.register("M", None, vec![], vec![], "h").unwrap();
        hub.accept(&format!("hash={hash}"), Arc::new(NoopChannel), t(9, 0, 0)).unwrap();

        let reaped = watchdogs.stale_session_sweep(t(9, 0, 5), 120);
        assert_eq!(reaped, 0);
        assert!(registry.lookup_by_hash(&hash).unwrap().alive);
    }

    #[tokio::test]
    async fn execution_timeout_sweep_emits_one_notification_per_expired_entry() {
        let (watchdogs, _, _, tracker, notifier) = build();
        tracker.record(Uuid::new_v4(), 1, "1".into(), "W".into(), "M".into(), t(9, 0, 0));
        tracker.record(Uuid::new_v4(), 2, "1".into(), "W".into(), "M2".into(), t(9, 4, 0));

        watchdogs.execution_timeout_sweep(t(9, 5, 0), 120).await;
        assert_eq!(notifier.count(), 1);
        assert_eq!(tracker.len(), 1);
    }

    #[tokio::test]
    async fn execution_timeout_sweep_with_nothing_pending_notifies_nothing() {
        let (watchdogs, _, _, _, notifier) = build();
        watchdogs.execution_timeout_sweep(t(9, 0, 0), 120).await;
        assert_eq!(notifier.count(), 0);
    }

    #[test]
    fn job_log_gc_computes_week_old_cutoff() {
        struct RecordingStore {
            seen_cutoff: Mutex<Option<NaiveDateTime>>,
        }
        impl JobLogStore for RecordingStore {
            fn purge_older_than(&self, cutoff: NaiveDateTime) {
                *self.seen_cutoff.lock() = Some(cutoff);
            }
        }

        let (watchdogs, _, _, _, _) = build();
        let store = RecordingStore { seen_cutoff: Mutex::new(None) };
        let now = t(0, 0, 0) + Duration::days(30);
        watchdogs.job_log_gc(now, &store);
        assert_eq!(*store.seen_cutoff.lock(), Some(now - Duration::seconds(JOB_LOG_RETENTION_SECONDS)));
    }
}
