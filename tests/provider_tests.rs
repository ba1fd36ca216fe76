use stageflow::providers::fs::FsStateStore;
use stageflow::providers::in_memory::InMemoryStateStore;
use stageflow::providers::{StateStore, CALL_JOURNAL_CAP};
use stageflow::{ActorIdentity, ActorRecord, CallEvent, OperationEnvelope};
use std::sync::Arc;

fn envelope(call_id: &str, key: &str) -> OperationEnvelope {
    OperationEnvelope {
        call_id: call_id.to_string(),
        workflow: "Yeast".to_string(),
        key: key.to_string(),
        operation: "advance".to_string(),
        value: 0,
    }
}

fn sample_record() -> ActorRecord {
    let mut record = ActorRecord {
        current_index: 3,
        ..Default::default()
    };
    record
        .completions
        .insert("c1".to_string(), Some("QC".to_string()));
    record.completions.insert("c2".to_string(), None);
    record
}

// Contract shared by every provider.
async fn check_store_contract(store: Arc<dyn StateStore>) {
    let identity = ActorIdentity::new("Yeast", "contract-key");

    // Absent state is None, never an error
    assert_eq!(store.load(&identity).await.unwrap(), None);

    // Record round-trip keeps index and ledger together
    let record = sample_record();
    store.save(&identity, &record).await.unwrap();
    assert_eq!(store.load(&identity).await.unwrap(), Some(record.clone()));

    // Overwrite is last-writer-wins
    let mut updated = record.clone();
    updated.current_index = 4;
    store.save(&identity, &updated).await.unwrap();
    assert_eq!(
        store.load(&identity).await.unwrap().unwrap().current_index,
        4
    );

    // Call journal is append-only and ordered
    assert!(store.read_call("j1").await.unwrap().is_empty());
    store
        .append_call(
            "j1",
            vec![CallEvent::CallStarted {
                workflow: "Yeast".to_string(),
                operation: "get".to_string(),
                key: "contract-key".to_string(),
                value: 0,
            }],
        )
        .await
        .unwrap();
    store
        .append_call("j1", vec![CallEvent::OperationEnqueued])
        .await
        .unwrap();
    let journal = store.read_call("j1").await.unwrap();
    assert_eq!(journal.len(), 2);
    assert!(matches!(journal[0], CallEvent::CallStarted { .. }));
    assert!(matches!(journal[1], CallEvent::OperationEnqueued));

    // Journal appends fail past the cap instead of growing forever
    store
        .append_call("j-cap", vec![CallEvent::OperationEnqueued; CALL_JOURNAL_CAP])
        .await
        .unwrap();
    assert!(store
        .append_call("j-cap", vec![CallEvent::OperationEnqueued])
        .await
        .is_err());
    assert_eq!(store.read_call("j-cap").await.unwrap().len(), CALL_JOURNAL_CAP);

    // FIFO dequeue under peek-lock
    store.enqueue_operation(envelope("q1", "a")).await.unwrap();
    store.enqueue_operation(envelope("q2", "b")).await.unwrap();
    let (first, t1) = store.dequeue_peek_lock().await.unwrap();
    assert_eq!(first.call_id, "q1");
    store.ack(&t1).await.unwrap();
    let (second, t2) = store.dequeue_peek_lock().await.unwrap();
    assert_eq!(second.call_id, "q2");

    // Abandon re-fronts, preserving order ahead of later arrivals
    store.enqueue_operation(envelope("q3", "c")).await.unwrap();
    store.abandon(&t2).await.unwrap();
    let (redelivered, t2b) = store.dequeue_peek_lock().await.unwrap();
    assert_eq!(redelivered.call_id, "q2");
    store.ack(&t2b).await.unwrap();
    let (third, t3) = store.dequeue_peek_lock().await.unwrap();
    assert_eq!(third.call_id, "q3");
    store.ack(&t3).await.unwrap();
    assert!(store.dequeue_peek_lock().await.is_none());

    // Enqueue is idempotent on call id, including while the envelope is
    // held under lock
    store.enqueue_operation(envelope("q4", "d")).await.unwrap();
    store.enqueue_operation(envelope("q4", "d")).await.unwrap();
    let (held, t4) = store.dequeue_peek_lock().await.unwrap();
    assert_eq!(held.call_id, "q4");
    store.enqueue_operation(envelope("q4", "d")).await.unwrap();
    assert!(store.dequeue_peek_lock().await.is_none());
    store.ack(&t4).await.unwrap();

    // Identities enumerate what was saved
    let ids = store.list_identities().await;
    assert_eq!(ids, vec![identity.clone()]);
    assert!(store.dump_all_pretty().await.contains("contract-key"));

    // Reset wipes everything
    store.reset().await;
    assert!(store.list_identities().await.is_empty());
}

#[tokio::test]
async fn in_memory_store_contract() {
    check_store_contract(Arc::new(InMemoryStateStore::default())).await;
}

#[tokio::test]
async fn fs_store_contract() {
    let td = tempfile::tempdir().unwrap();
    check_store_contract(Arc::new(FsStateStore::new(td.path(), true))).await;
}

#[tokio::test]
async fn fs_store_survives_reopen() {
    let td = tempfile::tempdir().unwrap();
    let identity = ActorIdentity::new("Gateway", "durable-key");
    let record = sample_record();

    {
        let store = FsStateStore::new(td.path(), true);
        store.save(&identity, &record).await.unwrap();
        store
            .enqueue_operation(envelope("reopen-1", "durable-key"))
            .await
            .unwrap();
        store
            .append_call("reopen-1", vec![CallEvent::OperationEnqueued])
            .await
            .unwrap();
    }

    let store = FsStateStore::new(td.path(), false);
    assert_eq!(store.load(&identity).await.unwrap(), Some(record));
    let (queued, token) = store.dequeue_peek_lock().await.unwrap();
    assert_eq!(queued.call_id, "reopen-1");
    store.ack(&token).await.unwrap();
    assert_eq!(store.read_call("reopen-1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn fs_store_reset_on_create_wipes_previous_data() {
    let td = tempfile::tempdir().unwrap();
    let identity = ActorIdentity::new("Yeast", "wiped");
    {
        let store = FsStateStore::new(td.path(), true);
        store.save(&identity, &sample_record()).await.unwrap();
    }
    let store = FsStateStore::new(td.path(), true);
    assert_eq!(store.load(&identity).await.unwrap(), None);
}

#[tokio::test]
async fn fs_store_sanitizes_hostile_identity_components() {
    let td = tempfile::tempdir().unwrap();
    let store = FsStateStore::new(td.path(), true);
    let identity = ActorIdentity::new("Yeast", "../../../etc/passwd");
    let record = sample_record();

    store.save(&identity, &record).await.unwrap();

    // The record file landed under the store root, not outside it
    let escaped = td.path().parent().unwrap().join("etc").join("passwd.json");
    assert!(!escaped.exists());

    // Identity components with spaces and symbols round-trip
    let lab_identity = ActorIdentity::new("Yeast", "Plate #7 (rep A)");
    store.save(&lab_identity, &record).await.unwrap();
    assert_eq!(store.load(&lab_identity).await.unwrap(), Some(record));
}
