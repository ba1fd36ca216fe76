//! Workflow actor state machine.
//!
//! One actor owns one `ActorRecord`, addressed by `ActorIdentity`. The
//! runtime guarantees `apply` runs one-at-a-time per identity, so state reads
//! and writes for the same identity never interleave. State is reloaded from
//! the store before every operation rather than trusting in-memory state that
//! may have been lost across a restart.

use tracing::debug;

use crate::catalog::StageCatalog;
use crate::providers::StateStore;
use crate::{ActorIdentity, OperationEnvelope, WorkflowError, STAGE_SEPARATOR};

/// Apply one operation to the identity's durable state and return its result
/// (`None` for operations that produce no result).
///
/// Exactly-once: a call id already present in the completions ledger
/// short-circuits to the recorded result without re-applying. Otherwise the
/// mutation and its completion entry are persisted in a single atomic save
/// before the result is considered final.
///
/// Dispatch is case-insensitive on the operation name. Unrecognized names and
/// out-of-range `set` values are intentionally permissive: an explicit branch
/// returning "no mutation, no result", never an error.
pub async fn apply(
    store: &dyn StateStore,
    catalog: &StageCatalog,
    identity: &ActorIdentity,
    envelope: &OperationEnvelope,
) -> Result<Option<String>, WorkflowError> {
    // Absence of persisted state is the initial state, not an error
    let mut record = store.load(identity).await?.unwrap_or_default();

    if let Some(prior) = record.completions.get(&envelope.call_id) {
        debug!(identity = %identity, call_id = %envelope.call_id, "redelivery of applied call; returning recorded result");
        return Ok(prior.clone());
    }

    let stages = catalog.stages_for(&identity.workflow)?;
    let last = stages.len() - 1;
    let index = (record.current_index as usize).min(last);

    let result = match envelope.operation.to_lowercase().as_str() {
        "get" => Some(stages[index].clone()),
        "advance" => {
            let next = if index < last { index + 1 } else { index };
            record.current_index = next as u32;
            Some(stages[next].clone())
        }
        "set" => {
            if envelope.value >= 0 && (envelope.value as usize) <= last {
                record.current_index = envelope.value as u32;
            }
            // out-of-range value: silent no-op, state unchanged
            None
        }
        // "activities" is the wire alias legacy clients send
        "activities" | "list-stages" => Some(stages.join(STAGE_SEPARATOR)),
        other => {
            debug!(identity = %identity, operation = %other, "unrecognized operation; no mutation, no result");
            None
        }
    };

    record.record_completion(&envelope.call_id, result.clone());
    store.save(identity, &record).await?;
    Ok(result)
}
