//! Session Hub (C4) — per-module duplex channels, group fan-out, and
//! server-initiated close. The hub is transport-agnostic: it speaks to
//! bound connections only through [`ModuleChannel`], leaving the concrete
//! bidirectional transport (§6, out of scope) to the host application.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use orc_notify::{NotificationKind, Notifier};
use orc_protocol::ResultFrame;

use crate::module::ModuleRegistry;
use crate::tracker::ExecutionTracker;

/// A single bound duplex channel. Sends are fire-and-forget: per §5, an
/// outbound send to an unreachable peer silently drops rather than pushing
/// back on the caller — the corresponding pending execution is reaped by
/// the execution-timeout watchdog instead.
pub trait ModuleChannel: Send + Sync {
    fn send_text(&self, payload: String);
    fn close(&self);
}

#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub module_id: u64,
    pub session_token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MissingHash,
    NotFound,
    AlreadyAlive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Empty/whitespace payload or a literal ping/pong — no reply sent.
    Dropped,
}

/// Extracts `hash=<value>` from a transport query string, per the transport
/// port's `hash=<value>` contract in §6.
pub fn extract_hash(query: &str) -> Option<String> {
    query
        .split('&')
        .find_map(|part| part.strip_prefix("hash="))
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

fn is_heartbeat_noise(payload: &str) -> bool {
    let trimmed = payload.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case("ping") || trimmed.eq_ignore_ascii_case("pong")
}

/// One channel bound into a group, tagged with the session that bound it so
/// a later disconnect can remove just this entry instead of the whole group.
struct GroupMember {
    session_token: String,
    channel: Arc<dyn ModuleChannel>,
}

pub struct SessionHub {
    registry: Arc<ModuleRegistry>,
    tracker: Arc<ExecutionTracker>,
    notifier: Arc<dyn Notifier>,
    groups: RwLock<HashMap<u64, Vec<GroupMember>>>,
}

impl SessionHub {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        tracker: Arc<ExecutionTracker>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            registry,
            tracker,
            notifier,
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Binds a freshly-accepted connection to its module. `session_token` is
    /// a fresh UUID per §9 ("session identity" design note) — never derived
    /// from connection object identity.
    pub fn accept(
        &self,
        query: &str,
        channel: Arc<dyn ModuleChannel>,
        now: NaiveDateTime,
    ) -> Result<SessionHandle, RejectReason> {
        let module_hash = extract_hash(query).ok_or(RejectReason::MissingHash)?;
        let session_token = Uuid::new_v4().to_string();
        let module = self
            .registry
            .bind_session(&module_hash, &session_token, now)
            .map_err(|e| match e {
                orc_core::error::Error::Conflict(_) => RejectReason::AlreadyAlive,
                _ => RejectReason::NotFound,
            })?;

        self.groups.write().entry(module.module_id).or_default().push(GroupMember {
            session_token: session_token.clone(),
            channel,
        });

        Ok(SessionHandle {
            module_id: module.module_id,
            session_token,
        })
    }

    /// Processes one inbound frame. Malformed JSON never disconnects the
    /// session (P6); it yields an error reply instead.
    pub async fn on_message(
        &self,
        handle: &SessionHandle,
        payload: &str,
        now: NaiveDateTime,
    ) -> Result<String, MessageOutcome> {
        self.registry.touch(&handle.session_token, now);

        if is_heartbeat_noise(payload) {
            return Err(MessageOutcome::Dropped);
        }

        let value: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(_) => {
                return Ok(serde_json::json!({
                    "status": "error",
                    "message": "JSON format error",
                })
                .to_string());
            }
        };

        self.handle_result(handle, value, now).await;
        Ok("receive result".to_string())
    }

    /// The "result handler" of §4.4: matches `execution_id` against the
    /// tracker and, on a recognized failure status, emits an
    /// `ExecutionFailure` notification.
    async fn handle_result(&self, handle: &SessionHandle, value: Value, now: NaiveDateTime) {
        let frame: ResultFrame = match serde_json::from_value(value) {
            Ok(f) => f,
            Err(_) => return,
        };

        let cleared = frame
            .execution_id()
            .and_then(|s| Uuid::parse_str(s).ok())
            .and_then(|id| self.tracker.clear(id));

        if !frame.is_result_like() || frame.failure_status().is_none() {
            return;
        }

        let Some(module) = self.registry.lookup_by_session(&handle.session_token) else {
            return;
        };

        let (workflow_name, workflow_id, module_name) = match &cleared {
            Some(p) => (p.workflow_name.clone(), p.workflow_id.clone(), p.module_name.clone()),
            None => ("unknown".to_string(), "unknown".to_string(), module.name.clone()),
        };

        self.notifier
            .notify(NotificationKind::ExecutionFailure {
                workflow_name,
                workflow_id,
                module_name,
                module_id: module.module_id,
                error_message: frame.error_text().unwrap_or_else(|| "unknown error".into()),
                failure_time: now,
            })
            .await;
    }

    /// Removes only the one channel tied to `handle.session_token`, leaving
    /// any other channel concurrently bound to the same `module_id` (e.g. a
    /// reconnect that raced ahead of this disconnect) untouched.
    pub fn on_disconnect(&self, handle: &SessionHandle) {
        self.registry.unbind(&handle.session_token);
        let mut groups = self.groups.write();
        if let Some(members) = groups.get_mut(&handle.module_id) {
            members.retain(|m| m.session_token != handle.session_token);
            if members.is_empty() {
                groups.remove(&handle.module_id);
            }
        }
    }

    /// Unconditionally drops every channel bound to `module_id`, without
    /// touching the registry. Used by the stale-session watchdog once it has
    /// independently decided a module's session is dead (§4.7.1) — the
    /// transport-side channel must be evicted even though no `on_disconnect`
    /// ever fired for it.
    pub fn clear_group(&self, module_id: u64) {
        self.groups.write().remove(&module_id);
    }

    /// Serializes `message` and delivers it to every channel bound to
    /// `module_id`. Silently drops if the group is empty.
    pub fn send_to_module(&self, module_id: u64, message: &Value) {
        let payload = message.to_string();
        if let Some(members) = self.groups.read().get(&module_id) {
            for member in members {
                member.channel.send_text(payload.clone());
            }
        }
    }

    /// Instructs every channel bound to `module_id` to close. The channel
    /// implementation is responsible for calling [`SessionHub::on_disconnect`]
    /// once the close completes.
    pub fn close_module(&self, module_id: u64) {
        if let Some(members) = self.groups.read().get(&module_id) {
            for member in members {
                member.channel.close();
            }
        }
    }

    pub fn group_len(&self, module_id: u64) -> usize {
        self.groups.read().get(&module_id).map(Vec::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use orc_notify::testing::RecordingNotifier;
    use parking_lot::Mutex;

    fn t(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 7, 28)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[derive(Default)]
    struct FakeChannel {
        sent: Mutex<Vec<String>>,
        closed: Mutex<bool>,
    }

    impl ModuleChannel for FakeChannel {
        fn send_text(&self, payload: String) {
            self.sent.lock().push(payload);
        }
        fn close(&self) {
            *self.closed.lock() = true;
        }
    }

    fn build() -> (SessionHub, Arc<ModuleRegistry>, Arc<ExecutionTracker>, Arc<RecordingNotifier>) {
        let registry = Arc::new(ModuleRegistry::new());
        let tracker = Arc::new(ExecutionTracker::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let hub = SessionHub::new(registry.clone(), tracker.clone(), notifier.clone());
        (hub, registry, tracker, notifier)
    }

    #[test]
    fn extract_hash_reads_query_param() {
        assert_eq!(extract_hash("hash=abc"), Some("abc".to_string()));
        assert_eq!(extract_hash("node_id=1&hash=abc"), Some("abc".to_string()));
        assert_eq!(extract_hash(""), None);
        assert_eq!(extract_hash("hash="), None);
        assert_eq!(extract_hash("foo=bar"), None);
    }

    #[test]
    fn accept_missing_hash_is_rejected() {
        let (hub, _, _, _) = build();
        let channel = Arc::new(FakeChannel::default());
        let err = hub.accept("", channel, t(9, 0, 0)).unwrap_err();
        assert_eq!(err, RejectReason::MissingHash);
    }

    #[test]
    fn accept_unknown_hash_is_rejected() {
        let (hub, _, _, _) = build();
        let channel = Arc::new(FakeChannel::default());
        let err = hub.accept("hash=ghost", channel, t(9, 0, 0)).unwrap_err();
        assert_eq!(err, RejectReason::NotFound);
    }

    #[test]
    fn accept_duplicate_bind_is_rejected() {
        let (hub, registry, _, _) = build();
        let (_, hash) = registry.register("M", None, vec![], vec![], "h").unwrap();
        let c1 = Arc::new(FakeChannel::default());
        let c2 = Arc::new(FakeChannel::default());
        hub.accept(&format!("hash={hash}"), c1, t(9, 0, 0)).unwrap();
        let err = hub.accept(&format!("hash={hash}"), c2, t(9, 0, 1)).unwrap_err();
        assert_eq!(err, RejectReason::AlreadyAlive);
    }

    #[tokio::test]
    async fn on_message_drops_heartbeat_noise() {
        let (hub, registry, _, _) = build();
        let (_, hash) = registry.register("M", None, vec![], vec![], "h").unwrap();
        let channel = Arc::new(FakeChannel::default());
        let handle = hub.accept(&format!("hash={hash}"), channel, t(9, 0, 0)).unwrap();
        for noise in ["", "  ", "ping", "PONG", "Ping"] {
            let outcome = hub.on_message(&handle, noise, t(9, 0, 1)).await;
            assert_eq!(outcome, Err(MessageOutcome::Dropped));
        }
    }

    #[tokio::test]
    async fn on_message_malformed_json_replies_error_but_stays_connected() {
        let (hub, registry, _, _) = build();
        let (_, hash) = registry.register("M", None, vec![], vec![], "h").unwrap();
        let channel = Arc::new(FakeChannel::default());
        let handle = hub.accept(&format!("hash={hash}"), channel, t(9, 0, 0)).unwrap();
        let reply = hub.on_message(&handle, "{not json", t(9, 0, 1)).await.unwrap();
        assert!(reply.contains("error"));
        // Module is still bound — malformed JSON does not disconnect.
        assert!(registry.lookup_by_hash(&hash).unwrap().alive);
    }

    #[tokio::test]
    async fn on_message_valid_json_replies_receive_result() {
        let (hub, registry, _, _) = build();
        let (_, hash) = registry.register("M", None, vec![], vec![], "h").unwrap();
        let channel = Arc::new(FakeChannel::default());
        let handle = hub.accept(&format!("hash={hash}"), channel, t(9, 0, 0)).unwrap();
        let reply = hub.on_message(&handle, r#"{"foo":"bar"}"#, t(9, 0, 1)).await.unwrap();
        assert_eq!(reply, "receive result");
    }

    #[tokio::test]
    async fn on_message_advances_last_alive_time_even_when_dropped() {
        let (hub, registry, _, _) = build();
        let (_, hash) = registry.register("M", None, vec![], vec![], "h").unwrap();
        let channel = Arc::new(FakeChannel::default());
        let handle = hub.accept(&format!("hash={hash}"), channel, t(9, 0, 0)).unwrap();
        let _ = hub.on_message(&handle, "ping", t(9, 30, 0)).await;
        let module = registry.lookup_by_hash(&hash).unwrap();
        assert_eq!(module.last_alive_time, Some(t(9, 30, 0)));
    }

    #[tokio::test]
    async fn failure_result_clears_pending_and_notifies() {
        let (hub, registry, tracker, notifier) = build();
        let (module_id, hash) = registry.register("M", None, vec![], vec![], "h").unwrap();
        let channel = Arc::new(FakeChannel::default());
        let handle = hub.accept(&format!("hash={hash}"), channel, t(9, 0, 0)).unwrap();

        let exec_id = Uuid::new_v4();
        tracker.record(exec_id, module_id, "1".into(), "W".into(), "M".into(), t(9, 0, 0));

        let payload = serde_json::json!({"execution_id": exec_id.to_string(), "status": "failed", "error": "boom"}).to_string();
        hub.on_message(&handle, &payload, t(9, 0, 5)).await.unwrap();

        assert!(tracker.is_empty());
        assert_eq!(notifier.count(), 1);
    }

    #[tokio::test]
    async fn success_result_clears_pending_without_notifying() {
        let (hub, registry, tracker, notifier) = build();
        let (module_id, hash) = registry.register("M", None, vec![], vec![], "h").unwrap();
        let channel = Arc::new(FakeChannel::default());
        let handle = hub.accept(&format!("hash={hash}"), channel, t(9, 0, 0)).unwrap();

        let exec_id = Uuid::new_v4();
        tracker.record(exec_id, module_id, "1".into(), "W".into(), "M".into(), t(9, 0, 0));

        let payload = serde_json::json!({"execution_id": exec_id.to_string(), "status": "success"}).to_string();
        hub.on_message(&handle, &payload, t(9, 0, 5)).await.unwrap();

        assert!(tracker.is_empty());
        assert_eq!(notifier.count(), 0);
    }

    #[test]
    fn send_to_module_fans_out_to_all_group_members() {
        let (hub, registry, _, _) = build();
        let (module_id, hash) = registry.register("M", None, vec![], vec![], "h").unwrap();
        let channel = Arc::new(FakeChannel::default());
        hub.accept(&format!("hash={hash}"), channel.clone(), t(9, 0, 0)).unwrap();
        hub.send_to_module(module_id, &serde_json::json!({"a": 1}));
        assert_eq!(channel.sent.lock().len(), 1);
    }

    #[test]
    fn send_to_module_with_no_members_silently_drops() {
        let (hub, _, _, _) = build();
        hub.send_to_module(999, &serde_json::json!({"a": 1}));
    }

    #[test]
    fn close_module_closes_every_member_channel() {
        let (hub, registry, _, _) = build();
        let (module_id, hash) = registry.register("M", None, vec![], vec![], "h").unwrap();
        let channel = Arc::new(FakeChannel::default());
        hub.accept(&format!("hash={hash}"), channel.clone(), t(9, 0, 0)).unwrap();
        hub.close_module(module_id);
        assert!(*channel.closed.lock());
    }

    #[test]
    fn on_disconnect_unbinds_and_clears_group() {
        let (hub, registry, _, _) = build();
        let (module_id, hash) = registry.register("M", None, vec![], vec![], "h").unwrap();
        let channel = Arc::new(FakeChannel::default());
        let handle = hub.accept(&format!("hash={hash}"), channel, t(9, 0, 0)).unwrap();
        hub.on_disconnect(&handle);
        assert!(!registry.lookup_by_hash(&hash).unwrap().alive);
        assert_eq!(hub.group_len(module_id), 0);
    }

    #[test]
    fn on_disconnect_removes_only_its_own_channel() {
        // Simulates a reconnect racing ahead of the old connection's
        // cleanup: two channels end up bound to the same module_id before
        // either disconnects. Disconnecting the first must not evict the
        // second.
        let (hub, registry, _, _) = build();
        let (_, hash) = registry.register("M", None, vec![], vec![], "h").unwrap();
        let module_id = registry.lookup_by_hash(&hash).unwrap().module_id;

        let c1 = Arc::new(FakeChannel::default());
        let handle1 = hub.accept(&format!("hash={hash}"), c1, t(9, 0, 0)).unwrap();

        // Force a second channel into the same group directly; `accept`
        // itself would reject a second bind while the module is alive, but
        // a stale reap followed by a fresh reconnect can leave two channels
        // bound before the old one's `on_disconnect` ever runs.
        let c2 = Arc::new(FakeChannel::default());
        hub.groups.write().entry(module_id).or_default().push(GroupMember {
            session_token: "other-session".to_string(),
            channel: c2.clone(),
        });
        assert_eq!(hub.group_len(module_id), 2);

        hub.on_disconnect(&handle1);

        assert_eq!(hub.group_len(module_id), 1);
        hub.send_to_module(module_id, &serde_json::json!({"a": 1}));
        assert_eq!(c2.sent.lock().len(), 1);
    }

    #[test]
    fn clear_group_drops_every_channel_regardless_of_count() {
        let (hub, registry, _, _) = build();
        let (module_id, hash) = registry.register("M", None, vec![], vec![], "h").unwrap();
        let channel = Arc::new(FakeChannel::default());
        hub.accept(&format!("hash={hash}"), channel, t(9, 0, 0)).unwrap();
        assert_eq!(hub.group_len(module_id), 1);

        hub.clear_group(module_id);
        assert_eq!(hub.group_len(module_id), 0);

        // Idempotent on an already-empty or unknown module_id.
        hub.clear_group(module_id);
        hub.clear_group(999);
    }
}
