//! In-process runtime hosting the workflow actors.
//!
//! A background dispatcher dequeues durably enqueued operation envelopes
//! under peek-lock and routes them to per-identity inboxes. Actor tasks are
//! spawned lazily on first delivery, process their inbox serially, and
//! dehydrate after an idle period; the next delivery rehydrates them. The
//! peek-lock token is acked only after the actor's save is durable, so a
//! crash in the window between mutation and ack is recovered by redelivery,
//! which the completions ledger deduplicates.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub mod actor;
pub mod coordinator;

use crate::catalog::StageCatalog;
use crate::providers::in_memory::InMemoryStateStore;
use crate::providers::StateStore;
use crate::{ActorIdentity, OperationEnvelope, WorkflowError};

/// Result of one applied operation as observed by a waiting coordinator.
pub type CallOutcome = Result<Option<String>, WorkflowError>;

type Inbox = mpsc::UnboundedSender<(OperationEnvelope, String)>;

/// Runtime hosting one lazily activated, single-threaded actor task per
/// identity, fed from the store's durable operation queue.
pub struct Runtime {
    store: Arc<dyn StateStore>,
    catalog: StageCatalog,
    inboxes: Mutex<HashMap<ActorIdentity, Inbox>>,
    joins: Mutex<Vec<JoinHandle<()>>>,
    actor_joins: Mutex<Vec<JoinHandle<()>>>,
    result_waiters: Mutex<HashMap<String, Vec<oneshot::Sender<CallOutcome>>>>,
}

impl Runtime {
    const POLLER_IDLE_SLEEP_MS: u64 = 10;
    const ACTOR_IDLE_DEHYDRATE_MS: u64 = 100;
    const STORE_RETRY_LIMIT: u32 = 3;
    const STORE_RETRY_DELAY_MS: u64 = 20;
    const STORE_RETRY_MAX_DELAY_MS: u64 = 500;

    /// Start a new runtime using the in-memory state store.
    pub async fn start(catalog: StageCatalog) -> Arc<Self> {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::default());
        Self::start_with_store(store, catalog).await
    }

    /// Start a new runtime with a custom `StateStore` implementation.
    pub async fn start_with_store(store: Arc<dyn StateStore>, catalog: StageCatalog) -> Arc<Self> {
        // Install a default subscriber if none set (ok to call many times)
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .try_init();

        let runtime = Arc::new(Self {
            store,
            catalog,
            inboxes: Mutex::new(HashMap::new()),
            joins: Mutex::new(Vec::new()),
            actor_joins: Mutex::new(Vec::new()),
            result_waiters: Mutex::new(HashMap::new()),
        });

        let handle = runtime.clone().start_operation_dispatcher();
        runtime.joins.lock().await.push(handle);

        info!(
            workflows = runtime.catalog.workflow_names().len(),
            "runtime started"
        );
        runtime
    }

    pub fn store(&self) -> Arc<dyn StateStore> {
        self.store.clone()
    }

    pub fn catalog(&self) -> &StageCatalog {
        &self.catalog
    }

    /// Build a coordinator over this runtime.
    pub fn coordinator(self: &Arc<Self>) -> coordinator::RequestCoordinator {
        coordinator::RequestCoordinator::new(self.clone())
    }

    /// Current stage name for an identity, read directly from the store.
    /// Diagnostic helper; normal reads go through the coordinator.
    pub async fn current_stage(&self, identity: &ActorIdentity) -> Result<String, WorkflowError> {
        let stages = self.catalog.stages_for(&identity.workflow)?;
        let record = self.store.load(identity).await?.unwrap_or_default();
        let index = (record.current_index as usize).min(stages.len() - 1);
        Ok(stages[index].clone())
    }

    fn start_operation_dispatcher(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if let Some((envelope, token)) = self.store.dequeue_peek_lock().await {
                    self.deliver(envelope, token).await;
                } else {
                    tokio::time::sleep(std::time::Duration::from_millis(
                        Self::POLLER_IDLE_SLEEP_MS,
                    ))
                    .await;
                }
            }
        })
    }

    /// Route an envelope to its identity's inbox, activating the actor if it
    /// is not resident. The lookup and send happen under the inbox lock so a
    /// dehydrating actor cannot drop a delivery.
    async fn deliver(self: &Arc<Self>, envelope: OperationEnvelope, token: String) {
        let identity = envelope.identity();
        let mut inboxes = self.inboxes.lock().await;
        if let Some(tx) = inboxes.get(&identity) {
            if tx.send((envelope.clone(), token.clone())).is_ok() {
                return;
            }
            // Receiver side is gone without unregistering (actor task
            // aborted); replace it below
            inboxes.remove(&identity);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send((envelope, token));
        inboxes.insert(identity.clone(), tx);
        drop(inboxes);
        let rt = self.clone();
        let handle = tokio::spawn(async move { rt.run_actor(identity, rx).await });
        self.actor_joins.lock().await.push(handle);
    }

    /// Single-threaded actor loop: apply operations strictly in arrival
    /// order, then dehydrate after an idle period.
    async fn run_actor(
        self: Arc<Self>,
        identity: ActorIdentity,
        mut rx: mpsc::UnboundedReceiver<(OperationEnvelope, String)>,
    ) {
        debug!(identity = %identity, "actor activated");
        loop {
            let next = tokio::time::timeout(
                std::time::Duration::from_millis(Self::ACTOR_IDLE_DEHYDRATE_MS),
                rx.recv(),
            )
            .await;
            match next {
                Ok(Some((envelope, token))) => {
                    self.process_operation(&identity, envelope, token).await;
                }
                Ok(None) => break,
                Err(_idle) => {
                    // The unregister decision races deliveries, so it is
                    // made under the inboxes lock: a delivery is either
                    // drained here (and processed after the lock drops) or
                    // lands on a freshly spawned actor, never both. The
                    // actor only dehydrates with a verifiably empty inbox.
                    let mut inboxes = self.inboxes.lock().await;
                    match rx.try_recv() {
                        Ok((envelope, token)) => {
                            drop(inboxes);
                            self.process_operation(&identity, envelope, token).await;
                        }
                        Err(_empty) => {
                            inboxes.remove(&identity);
                            debug!(identity = %identity, "actor dehydrated");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Apply one envelope with retries, notify waiters, then settle the
    /// peek-lock token.
    async fn process_operation(
        self: &Arc<Self>,
        identity: &ActorIdentity,
        envelope: OperationEnvelope,
        token: String,
    ) {
        let call_id = envelope.call_id.clone();
        let mut attempts = 0u32;
        let outcome = loop {
            match actor::apply(self.store.as_ref(), &self.catalog, identity, &envelope).await {
                Ok(result) => break Ok(result),
                Err(WorkflowError::Storage(e)) => {
                    attempts += 1;
                    if attempts >= Self::STORE_RETRY_LIMIT {
                        break Err(WorkflowError::Storage(e));
                    }
                    warn!(identity = %identity, call_id = %call_id, error = %e, attempts, "store failure applying operation; retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(
                        Self::STORE_RETRY_DELAY_MS,
                    ))
                    .await;
                }
                Err(e) => break Err(e),
            }
        };

        match &outcome {
            Ok(result) => {
                debug!(identity = %identity, call_id = %call_id, operation = %envelope.operation, result = ?result, "operation applied");
                self.complete_call(&call_id, outcome.clone()).await;
                if let Err(e) = self.store.ack(&token).await {
                    warn!(identity = %identity, call_id = %call_id, error = %e, "ack failed; completions ledger will absorb the redelivery");
                }
            }
            Err(WorkflowError::Storage(e)) => {
                // Surface the transient error, then hold this identity's
                // inbox until the mutation commits: round-tripping through
                // the shared queue would let envelopes already sitting in
                // the inbox overtake it, breaking per-identity
                // durable-enqueue order
                warn!(identity = %identity, call_id = %call_id, error = %e, "store retries exhausted; holding inbox until the mutation commits");
                self.complete_call(&call_id, outcome.clone()).await;
                let mut delay = Self::STORE_RETRY_DELAY_MS;
                loop {
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                    match actor::apply(self.store.as_ref(), &self.catalog, identity, &envelope)
                        .await
                    {
                        Ok(result) => {
                            debug!(identity = %identity, call_id = %call_id, result = ?result, "operation applied after store recovery");
                            break;
                        }
                        Err(WorkflowError::Storage(e)) => {
                            warn!(identity = %identity, call_id = %call_id, error = %e, "store still failing; retrying");
                            delay = (delay * 2).min(Self::STORE_RETRY_MAX_DELAY_MS);
                        }
                        Err(_) => break,
                    }
                }
                if let Err(e) = self.store.ack(&token).await {
                    warn!(identity = %identity, call_id = %call_id, error = %e, "ack failed; completions ledger will absorb the redelivery");
                }
            }
            Err(e) => {
                // Non-retryable (workflow vanished from the catalog);
                // redelivery cannot help
                warn!(identity = %identity, call_id = %call_id, error = %e, "operation rejected");
                self.complete_call(&call_id, outcome.clone()).await;
                let _ = self.store.ack(&token).await;
            }
        }
    }

    /// Register interest in a call's outcome. Must be paired with a ledger
    /// re-check by the caller: the completion may already be durable.
    pub(crate) async fn register_waiter(&self, call_id: &str) -> oneshot::Receiver<CallOutcome> {
        let (tx, rx) = oneshot::channel();
        self.result_waiters
            .lock()
            .await
            .entry(call_id.to_string())
            .or_default()
            .push(tx);
        rx
    }

    async fn complete_call(&self, call_id: &str, outcome: CallOutcome) {
        if let Some(waiters) = self.result_waiters.lock().await.remove(call_id) {
            for w in waiters {
                let _ = w.send(outcome.clone());
            }
        }
    }

    /// Abort background tasks. Channels are dropped with the runtime.
    pub async fn shutdown(self: Arc<Self>) {
        let mut joins = self.joins.lock().await;
        for j in joins.drain(..) {
            j.abort();
        }
        let mut actor_joins = self.actor_joins.lock().await;
        for j in actor_joins.drain(..) {
            j.abort();
        }
    }

    /// Await completion of all outstanding actor tasks (they exit on idle).
    pub async fn drain_actors(self: Arc<Self>) {
        let mut joins = self.actor_joins.lock().await;
        while let Some(j) = joins.pop() {
            let _ = j.await;
        }
    }
}
