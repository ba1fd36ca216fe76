use stageflow::providers::StateStore;
use stageflow::ActorIdentity;
use std::sync::Arc;

/// Poll the store until the identity's completions ledger holds `call_id`,
/// returning the recorded result. `None` on timeout.
#[allow(dead_code)]
pub async fn wait_for_completion(
    store: Arc<dyn StateStore>,
    identity: &ActorIdentity,
    call_id: &str,
    timeout_ms: u64,
) -> Option<Option<String>> {
    let deadline = std::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
    loop {
        if let Ok(Some(record)) = store.load(identity).await {
            if let Some(result) = record.completions.get(call_id) {
                return Some(result.clone());
            }
        }
        if std::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}

/// Poll the store until the identity's stage index reaches `want`.
#[allow(dead_code)]
pub async fn wait_for_index(
    store: Arc<dyn StateStore>,
    identity: &ActorIdentity,
    want: u32,
    timeout_ms: u64,
) -> bool {
    let deadline = std::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
    loop {
        if let Ok(Some(record)) = store.load(identity).await {
            if record.current_index == want {
                return true;
            }
        }
        if std::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
