//! Module Registry (C3) — source of truth for module identity, liveness,
//! and session binding.
//!
//! Invariants upheld here:
//! - **M1** `alive ⇔ session_id ≠ null`.
//! - **M2** `module_id` and `module_hash` are both unique.
//! - **M3** at most one session is bound to a module at a time; duplicate
//!   connect is rejected by [`ModuleRegistry::bind_session`] at bind time.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use orc_core::error::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataRequirement {
    pub table_kind: String,
    pub table_name: String,
    pub table_columns: Vec<String>,
    pub time_begin: i64,
    pub time_end: i64,
    pub time_unit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub module_id: u64,
    pub module_hash: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(default = "d_priority")]
    pub priority: i32,
    pub alive: bool,
    pub session_id: Option<String>,
    pub last_login_time: Option<NaiveDateTime>,
    pub last_alive_time: Option<NaiveDateTime>,
    pub last_execution_time: Option<NaiveDateTime>,
    #[serde(default)]
    pub input_data: Vec<DataRequirement>,
    #[serde(default)]
    pub output_data: Vec<DataRequirement>,
}

fn d_priority() -> i32 {
    100
}

/// Deterministic stand-in for the source's `hash(f"{name}:{description}:{model_hash}")` —
/// Python's builtin `hash()` is process-salted and unsuitable as a durable
/// unique key. A SHA-256 digest of the same triple is stable across restarts
/// while preserving "same inputs produce the same module_hash".
pub fn stable_hash(name: &str, description: &str, model_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b":");
    hasher.update(description.as_bytes());
    hasher.update(b":");
    hasher.update(model_hash.as_bytes());
    hex::encode(hasher.finalize())
}

struct Inner {
    modules: HashMap<u64, Module>,
    by_hash: HashMap<String, u64>,
    by_session: HashMap<String, u64>,
    next_id: u64,
}

/// Owns the registry table exclusively; all mutation goes through its
/// methods so invariants M1–M3 hold under concurrent access.
pub struct ModuleRegistry {
    inner: RwLock<Inner>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                modules: HashMap::new(),
                by_hash: HashMap::new(),
                by_session: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    pub fn register(
        &self,
        name: &str,
        description: Option<&str>,
        input_data: Vec<DataRequirement>,
        output_data: Vec<DataRequirement>,
        model_hash: &str,
    ) -> Result<(u64, String), Error> {
        let module_hash = stable_hash(name, description.unwrap_or(""), model_hash);
        let mut inner = self.inner.write();
        if inner.by_hash.contains_key(&module_hash) {
            return Err(Error::AlreadyRegistered(module_hash));
        }
        let module_id = inner.next_id;
        inner.next_id += 1;
        let module = Module {
            module_id,
            module_hash: module_hash.clone(),
            name: name.to_string(),
            description: description.map(str::to_string),
            priority: d_priority(),
            alive: false,
            session_id: None,
            last_login_time: None,
            last_alive_time: None,
            last_execution_time: None,
            input_data,
            output_data,
        };
        inner.by_hash.insert(module_hash.clone(), module_id);
        inner.modules.insert(module_id, module);
        Ok((module_id, module_hash))
    }

    pub fn bind_session(
        &self,
        module_hash: &str,
        session_token: &str,
        now: NaiveDateTime,
    ) -> Result<Module, Error> {
        let mut inner = self.inner.write();
        let module_id = *inner
            .by_hash
            .get(module_hash)
            .ok_or_else(|| Error::NotFound(module_hash.to_string()))?;
        let module = inner.modules.get_mut(&module_id).expect("index invariant");
        if module.alive {
            return Err(Error::Conflict(module_hash.to_string()));
        }
        module.alive = true;
        module.session_id = Some(session_token.to_string());
        module.last_login_time = Some(now);
        module.last_alive_time = Some(now);
        let snapshot = module.clone();
        inner.by_session.insert(session_token.to_string(), module_id);
        Ok(snapshot)
    }

    /// Advances `last_alive_time`; no-op if the session is unknown.
    pub fn touch(&self, session_token: &str, now: NaiveDateTime) -> bool {
        let mut inner = self.inner.write();
        let Some(&module_id) = inner.by_session.get(session_token) else {
            return false;
        };
        if let Some(module) = inner.modules.get_mut(&module_id) {
            module.last_alive_time = Some(now);
            true
        } else {
            false
        }
    }

    /// Clears `session_id`, sets `alive=false`; no-op if session unknown.
    pub fn unbind(&self, session_token: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(module_id) = inner.by_session.remove(session_token) else {
            return false;
        };
        if let Some(module) = inner.modules.get_mut(&module_id) {
            module.alive = false;
            module.session_id = None;
        }
        true
    }

    pub fn lookup_by_hash(&self, module_hash: &str) -> Option<Module> {
        let inner = self.inner.read();
        let module_id = *inner.by_hash.get(module_hash)?;
        inner.modules.get(&module_id).cloned()
    }

    /// Non-unique `name` resolves to the first match by insertion order
    /// (module_id is assigned monotonically and never reused, so "first by
    /// insertion order" is simply the smallest matching `module_id`).
    pub fn lookup_by_name(&self, name: &str) -> Option<Module> {
        let inner = self.inner.read();
        let mut matches: Vec<&Module> = inner.modules.values().filter(|m| m.name == name).collect();
        matches.sort_by_key(|m| m.module_id);
        if matches.len() > 1 {
            tracing::warn!(
                name,
                count = matches.len(),
                winner_module_id = matches[0].module_id,
                "multiple modules share name; resolving to first by insertion order"
            );
        }
        matches.first().map(|m| (*m).clone())
    }

    pub fn lookup_by_session(&self, session_token: &str) -> Option<Module> {
        let inner = self.inner.read();
        let module_id = *inner.by_session.get(session_token)?;
        inner.modules.get(&module_id).cloned()
    }

    pub fn lookup_by_id(&self, module_id: u64) -> Option<Module> {
        self.inner.read().modules.get(&module_id).cloned()
    }

    pub fn mark_executed(&self, module_id: u64, now: NaiveDateTime) {
        let mut inner = self.inner.write();
        if let Some(module) = inner.modules.get_mut(&module_id) {
            module.last_execution_time = Some(now);
        }
    }

    /// Batch-reaps every `alive=true` module whose `last_alive_time` is
    /// before `threshold` or null. Returns the reaped set.
    pub fn reap_stale(&self, threshold: NaiveDateTime) -> Vec<Module> {
        let stale_ids: Vec<u64> = {
            let inner = self.inner.read();
            inner
                .modules
                .values()
                .filter(|m| m.alive && m.last_alive_time.map(|t| t < threshold).unwrap_or(true))
                .map(|m| m.module_id)
                .collect()
        };
        self.force_reap(&stale_ids)
    }

    /// Every currently `alive=true` module.
    pub fn alive_modules(&self) -> Vec<Module> {
        self.inner.read().modules.values().filter(|m| m.alive).cloned().collect()
    }

    /// Unconditionally reaps the given ids (clears `alive`/`session_id`,
    /// drops the session mapping). Ids that are not alive are ignored. Used
    /// by callers that compute expiry by criteria other than a single
    /// `last_alive_time` threshold, e.g. the stale-session watchdog's
    /// empty-session-group check.
    pub fn force_reap(&self, module_ids: &[u64]) -> Vec<Module> {
        let mut inner = self.inner.write();
        let mut reaped = Vec::with_capacity(module_ids.len());
        for &id in module_ids {
            if let Some(module) = inner.modules.get_mut(&id) {
                if !module.alive {
                    continue;
                }
                if let Some(session_id) = module.session_id.take() {
                    inner.by_session.remove(&session_id);
                }
                module.alive = false;
                reaped.push(module.clone());
            }
        }
        reaped
    }

    pub fn len(&self) -> usize {
        self.inner.read().modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
