//! Storage providers.
//!
//! The actor model issues abstract load/save/enqueue calls against a
//! `StateStore`; the physical engine behind it is a collaborator. Two
//! reference providers are included: an in-memory store for tests and a
//! filesystem store that survives process restarts.

use crate::{ActorIdentity, ActorRecord, CallEvent, OperationEnvelope, StoreError};

pub mod fs;
pub mod in_memory;

/// Hard cap on events in one call's decision journal. A healthy call writes
/// three; hitting the cap means a replay loop is appending without making
/// progress, and providers fail the append rather than grow the file.
pub const CALL_JOURNAL_CAP: usize = 64;

/// Durable storage consumed by the runtime and coordinator.
///
/// Contract:
/// - `load`/`save` are durable and linearizable per identity; `save` writes
///   the index and the completions ledger atomically, so a crash between a
///   mutation and its queue ack is recovered by redelivery finding the
///   completion. `load` returning `None` means the initial state, never an
///   error.
/// - `enqueue_operation` is idempotent on `call_id` while the envelope is
///   still queued or locked; replaying a coordinator may safely re-issue it.
/// - The queue is peek-lock: a dequeued envelope stays invisible until it is
///   acked (done) or abandoned (redelivered at the front, preserving
///   per-identity order).
#[async_trait::async_trait]
pub trait StateStore: Send + Sync {
    /// Load the persisted record for an identity, `None` if absent.
    async fn load(&self, identity: &ActorIdentity) -> Result<Option<ActorRecord>, StoreError>;

    /// Durably persist the record for an identity (atomic over index and
    /// completions ledger).
    async fn save(&self, identity: &ActorIdentity, record: &ActorRecord) -> Result<(), StoreError>;

    /// Read the decision journal for one coordinator call.
    async fn read_call(&self, call_id: &str) -> Result<Vec<CallEvent>, StoreError>;

    /// Append events to a call's decision journal. Fails once the journal
    /// would exceed [`CALL_JOURNAL_CAP`] events.
    async fn append_call(&self, call_id: &str, events: Vec<CallEvent>) -> Result<(), StoreError>;

    /// Enqueue an operation envelope; idempotent on `call_id` for
    /// still-visible or locked envelopes.
    async fn enqueue_operation(&self, envelope: OperationEnvelope) -> Result<(), StoreError>;

    /// Dequeue the next envelope under a peek-lock token, if any.
    async fn dequeue_peek_lock(&self) -> Option<(OperationEnvelope, String)>;

    /// Acknowledge a peek-locked envelope as done.
    async fn ack(&self, token: &str) -> Result<(), StoreError>;

    /// Return a peek-locked envelope to the front of the queue for
    /// redelivery.
    async fn abandon(&self, token: &str) -> Result<(), StoreError>;

    /// Remove all stored data.
    async fn reset(&self);

    /// List identities with a persisted record.
    async fn list_identities(&self) -> Vec<ActorIdentity>;

    /// Human-readable dump of all persisted records, for diagnostics.
    async fn dump_all_pretty(&self) -> String;
}
