//! In-memory state store for tests and single-process use.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use super::StateStore;
use crate::{ActorIdentity, ActorRecord, CallEvent, OperationEnvelope, StoreError};

#[derive(Default)]
struct Inner {
    records: HashMap<ActorIdentity, ActorRecord>,
    calls: HashMap<String, Vec<CallEvent>>,
    queue: VecDeque<OperationEnvelope>,
    locked: HashMap<String, OperationEnvelope>,
    token_seq: u64,
}

/// Mutex-guarded maps with a `VecDeque` queue. Durability is process-scoped;
/// use the filesystem provider when state must survive restarts.
#[derive(Default)]
pub struct InMemoryStateStore {
    inner: Mutex<Inner>,
}

#[async_trait::async_trait]
impl StateStore for InMemoryStateStore {
    async fn load(&self, identity: &ActorIdentity) -> Result<Option<ActorRecord>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.records.get(identity).cloned())
    }

    async fn save(&self, identity: &ActorIdentity, record: &ActorRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.records.insert(identity.clone(), record.clone());
        Ok(())
    }

    async fn read_call(&self, call_id: &str) -> Result<Vec<CallEvent>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.calls.get(call_id).cloned().unwrap_or_default())
    }

    async fn append_call(&self, call_id: &str, events: Vec<CallEvent>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let journal = inner.calls.entry(call_id.to_string()).or_default();
        if journal.len() + events.len() > super::CALL_JOURNAL_CAP {
            return Err(StoreError::Io(format!(
                "call journal cap exceeded for {call_id}"
            )));
        }
        journal.extend(events);
        Ok(())
    }

    async fn enqueue_operation(&self, envelope: OperationEnvelope) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let already_present = inner.queue.iter().any(|e| e.call_id == envelope.call_id)
            || inner.locked.values().any(|e| e.call_id == envelope.call_id);
        if !already_present {
            inner.queue.push_back(envelope);
        }
        Ok(())
    }

    async fn dequeue_peek_lock(&self) -> Option<(OperationEnvelope, String)> {
        let mut inner = self.inner.lock().unwrap();
        let envelope = inner.queue.pop_front()?;
        inner.token_seq += 1;
        let token = format!("mem-{}", inner.token_seq);
        inner.locked.insert(token.clone(), envelope.clone());
        Some((envelope, token))
    }

    async fn ack(&self, token: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.locked.remove(token);
        Ok(())
    }

    async fn abandon(&self, token: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(envelope) = inner.locked.remove(token) {
            inner.queue.push_front(envelope);
        }
        Ok(())
    }

    async fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = Inner::default();
    }

    async fn list_identities(&self) -> Vec<ActorIdentity> {
        let inner = self.inner.lock().unwrap();
        inner.records.keys().cloned().collect()
    }

    async fn dump_all_pretty(&self) -> String {
        let inner = self.inner.lock().unwrap();
        let mut out = String::new();
        for (identity, record) in inner.records.iter() {
            out.push_str(&format!(
                "identity={identity} index={} completions={}\n",
                record.current_index,
                record.completions.len()
            ));
        }
        out
    }
}
