//! Module Registry, Execution Tracker, and Session Hub (C3, C5, C4) — the
//! stateful core the scheduler and transport layers are built around.

pub mod hub;
pub mod module;
pub mod tracker;

pub use hub::{MessageOutcome, ModuleChannel, RejectReason, SessionHandle, SessionHub};
pub use module::{stable_hash, DataRequirement, Module, ModuleRegistry};
pub use tracker::{Expired, ExecutionTracker, PendingExecution};
