//! Request coordinator: per-request, replayable control flow.
//!
//! One coordinator invocation turns one inbound client call into exactly one
//! operation delivered to the target actor and returns its result
//! synchronously. Every decision (call received, operation enqueued, result
//! observed) is journaled durably under the call id, so a coordinator that is
//! interrupted and restarted replays the journal instead of dispatching a
//! second distinct operation. At-most-once dispatch per logical call is the
//! combination of idempotent enqueue and the actor's completions ledger.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::Runtime;
use crate::{ActorIdentity, CallEvent, OperationEnvelope, WorkflowError};

/// One parsed client call. The boundary layer assigns the call id; the same
/// id re-presented (retry, replay after a crash) observes the original
/// operation's result rather than dispatching a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCall {
    pub call_id: String,
    pub workflow: String,
    pub operation: String,
    pub key: String,
    pub value: i64,
}

impl ClientCall {
    /// Read path: `{workflow, operation, key}` with an implicit value of 0.
    pub fn read(
        call_id: impl Into<String>,
        workflow: impl Into<String>,
        operation: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            workflow: workflow.into(),
            operation: operation.into(),
            key: key.into(),
            value: 0,
        }
    }

    /// Write path: `{workflow, key, value}` from a body payload. Always
    /// dispatches `advance`; the integer rides along as the operation input
    /// but `advance` does not use it. A write advances exactly one stage
    /// regardless of the integer, which legacy clients rely on.
    pub fn write(
        call_id: impl Into<String>,
        workflow: impl Into<String>,
        key: impl Into<String>,
        value: i64,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            workflow: workflow.into(),
            operation: "advance".to_string(),
            key: key.into(),
            value,
        }
    }
}

/// Outcome of a bounded wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallStatus {
    /// The actor applied the operation; `None` for operations that produce
    /// no result.
    Completed(Option<String>),
    /// The wait expired. The operation stays dispatched and completes in the
    /// background; re-presenting the same call id observes its result.
    Pending,
}

/// Stateless per-request coordinator over a shared runtime. Many instances
/// may target the same actor; the actor serializes them.
pub struct RequestCoordinator {
    runtime: Arc<Runtime>,
}

impl RequestCoordinator {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    /// Execute a call, waiting unboundedly for the actor's durable result.
    pub async fn execute(&self, call: ClientCall) -> Result<Option<String>, WorkflowError> {
        match self.drive(call, None).await? {
            CallStatus::Completed(result) => Ok(result),
            CallStatus::Pending => unreachable!("unbounded wait cannot return pending"),
        }
    }

    /// Execute a call with a caller-supplied wait bound. On expiry the
    /// underlying operation is left to complete asynchronously and
    /// `CallStatus::Pending` is returned; the mutation is never aborted.
    pub async fn execute_with_timeout(
        &self,
        call: ClientCall,
        timeout: Duration,
    ) -> Result<CallStatus, WorkflowError> {
        self.drive(call, Some(timeout)).await
    }

    /// Replayable control flow: identity resolution, at-most-once dispatch,
    /// await, return. Each step consults the durable call journal first.
    async fn drive(
        &self,
        call: ClientCall,
        timeout: Option<Duration>,
    ) -> Result<CallStatus, WorkflowError> {
        let store = self.runtime.store();
        let journal = store.read_call(&call.call_id).await?;

        // Already finished on a previous run: return the recorded result
        if let Some(result) = journal.iter().find_map(|e| match e {
            CallEvent::ResultObserved { result } => Some(result.clone()),
            _ => None,
        }) {
            debug!(call_id = %call.call_id, "replay: result already observed");
            return Ok(CallStatus::Completed(result));
        }

        // Unknown workflow is rejected before anything is dispatched
        self.runtime.catalog().stages_for(&call.workflow)?;

        if !journal
            .iter()
            .any(|e| matches!(e, CallEvent::CallStarted { .. }))
        {
            store
                .append_call(
                    &call.call_id,
                    vec![CallEvent::CallStarted {
                        workflow: call.workflow.clone(),
                        operation: call.operation.clone(),
                        key: call.key.clone(),
                        value: call.value,
                    }],
                )
                .await?;
        }

        // Register the waiter before enqueueing so the actor's notification
        // cannot be missed
        let rx = self.runtime.register_waiter(&call.call_id).await;

        if !journal
            .iter()
            .any(|e| matches!(e, CallEvent::OperationEnqueued))
        {
            // Enqueue before journaling the decision: if we crash between the
            // two, the replayed enqueue is idempotent and the completions
            // ledger absorbs any redelivery
            store
                .enqueue_operation(OperationEnvelope {
                    call_id: call.call_id.clone(),
                    workflow: call.workflow.clone(),
                    key: call.key.clone(),
                    operation: call.operation.clone(),
                    value: call.value,
                })
                .await?;
            store
                .append_call(&call.call_id, vec![CallEvent::OperationEnqueued])
                .await?;
            debug!(call_id = %call.call_id, workflow = %call.workflow, key = %call.key, operation = %call.operation, "operation enqueued");
        }

        // The completion may already be durable (replay after the actor
        // committed but before this coordinator observed the reply)
        let identity = ActorIdentity::new(call.workflow.clone(), call.key.clone());
        if let Ok(Some(record)) = store.load(&identity).await {
            if let Some(result) = record.completions.get(&call.call_id) {
                let result = result.clone();
                store
                    .append_call(
                        &call.call_id,
                        vec![CallEvent::ResultObserved {
                            result: result.clone(),
                        }],
                    )
                    .await?;
                debug!(call_id = %call.call_id, "replay: observed already-persisted result");
                return Ok(CallStatus::Completed(result));
            }
        }

        let outcome = match timeout {
            None => rx.await.map_err(|_| WorkflowError::Shutdown)?,
            Some(t) => match tokio::time::timeout(t, rx).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_closed)) => return Err(WorkflowError::Shutdown),
                Err(_elapsed) => {
                    debug!(call_id = %call.call_id, "wait expired; operation left pending");
                    return Ok(CallStatus::Pending);
                }
            },
        };

        let result = outcome?;
        store
            .append_call(
                &call.call_id,
                vec![CallEvent::ResultObserved {
                    result: result.clone(),
                }],
            )
            .await?;
        Ok(CallStatus::Completed(result))
    }
}
