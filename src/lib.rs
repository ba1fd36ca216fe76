//! Durable keyed workflow-stage actors.
//!
//! This crate exposes named workflow processes (ordered stage pipelines) as
//! independently addressable state machines, each identified by a
//! (workflow-type, instance-key) pair. It provides:
//!
//! - Public data model: `ActorIdentity`, `ActorRecord`, `OperationEnvelope`,
//!   `CallEvent`
//! - A `StageCatalog` registry of workflow-types and their ordered stages
//! - A `Runtime` that routes durably enqueued operations to single-writer
//!   actor tasks, one logical thread per identity
//! - A `RequestCoordinator` that turns one client call into exactly one
//!   operation against the target actor and awaits its durable result,
//!   replayable from a per-call journal after a crash
//! - Pluggable `StateStore` providers (in-memory and filesystem)
//!
//! Concurrency correctness comes from routing, not locks: operations for the
//! same identity are applied strictly one at a time in durable-enqueue order,
//! while distinct identities proceed fully in parallel.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

pub mod boundary;
pub mod catalog;
pub mod providers;
pub mod runtime;

pub use catalog::{CatalogConfig, StageCatalog, StageCatalogBuilder};
pub use runtime::coordinator::{CallStatus, ClientCall, RequestCoordinator};
pub use runtime::Runtime;

/// Separator used by `list-stages` when joining the full stage sequence.
pub const STAGE_SEPARATOR: &str = ";";

/// Stable identity of one workflow actor instance.
///
/// Two identities are equal iff both components match exactly
/// (case-sensitive).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorIdentity {
    pub workflow: String,
    pub key: String,
}

impl ActorIdentity {
    pub fn new(workflow: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            workflow: workflow.into(),
            key: key.into(),
        }
    }
}

impl std::fmt::Display for ActorIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.workflow, self.key)
    }
}

/// Durable state owned exclusively by one workflow actor.
///
/// `current_index` is the position in the workflow's stage catalog. The
/// `completions` ledger records the result of logical calls already applied,
/// keyed by call id; redelivery of an applied call short-circuits to the
/// recorded result instead of mutating again. The ledger is bounded: past
/// [`ActorRecord::COMPLETION_RETENTION`] entries the oldest are evicted, so
/// dedup covers a window of recent calls rather than all of history (and one
/// record save stays a fixed-size write). Absence of a persisted record is
/// the initial state (`current_index = 0`), never an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorRecord {
    pub current_index: u32,
    #[serde(default)]
    pub completions: HashMap<String, Option<String>>,
    /// Ledger insertion order, oldest first; drives retention eviction.
    #[serde(default)]
    pub completion_order: VecDeque<String>,
}

impl ActorRecord {
    /// Completions retained per actor; the oldest entry is evicted when a
    /// new completion would exceed this. A retry older than the retained
    /// window is no longer deduplicated.
    pub const COMPLETION_RETENTION: usize = 256;

    /// Record one applied call's result, evicting the oldest entries past
    /// the retention bound.
    pub fn record_completion(&mut self, call_id: &str, result: Option<String>) {
        if self.completions.insert(call_id.to_string(), result).is_none() {
            self.completion_order.push_back(call_id.to_string());
        }
        while self.completion_order.len() > Self::COMPLETION_RETENTION {
            if let Some(oldest) = self.completion_order.pop_front() {
                self.completions.remove(&oldest);
            }
        }
    }
}

/// One durably enqueued request to read or mutate a single actor's state.
///
/// `operation` is dispatched case-insensitively by the actor; unrecognized
/// names are silent no-ops. `value` is meaningful only for `set`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationEnvelope {
    pub call_id: String,
    pub workflow: String,
    pub key: String,
    pub operation: String,
    pub value: i64,
}

impl OperationEnvelope {
    pub fn identity(&self) -> ActorIdentity {
        ActorIdentity::new(self.workflow.clone(), self.key.clone())
    }
}

/// Append-only journal entries recording one coordinator invocation's
/// decisions, keyed by call id. Replaying a coordinator consumes this journal
/// and skips steps already taken, so a restart never dispatches a second
/// distinct operation for the same logical call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallEvent {
    /// The client call was received and validated.
    CallStarted {
        workflow: String,
        operation: String,
        key: String,
        value: i64,
    },
    /// The operation envelope was durably enqueued to the actor.
    OperationEnqueued,
    /// The actor's reply was observed and returned to the caller.
    ResultObserved { result: Option<String> },
}

/// Failures surfaced by the storage provider. These are transient from the
/// caller's perspective: mutations are redelivery-safe and retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("storage io: {0}")]
    Io(String),
    #[error("corrupt stored data: {0}")]
    Corrupt(String),
}

/// Error taxonomy for the request path.
///
/// Unrecognized operation names and out-of-range `set` values are
/// deliberately NOT represented here: both are silent no-ops at the actor
/// (preserved for client compatibility), not errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    /// Workflow-type not registered in the stage catalog.
    #[error("unknown workflow: {workflow}")]
    UnknownWorkflow { workflow: String },
    /// Malformed client input, rejected at the boundary before any operation
    /// is dispatched.
    #[error("malformed input: {0}")]
    MalformedInput(String),
    /// Storage failure after redelivery-safe retries were exhausted.
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
    /// The runtime shut down before the call completed.
    #[error("runtime shut down before the call completed")]
    Shutdown,
}
