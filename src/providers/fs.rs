//! Filesystem-backed state store.
//!
//! Layout under the root directory:
//! - `records/{workflow}/{key}.json` — one JSON `ActorRecord` per identity,
//!   written atomically via tmp+rename
//! - `calls/{call_id}.jsonl` — append-only JSONL call journals
//! - `op-queue.jsonl` — the durable operation queue
//! - `.locks/{token}.lock` — peek-locked envelopes held out of the queue

use std::path::{Path, PathBuf};
use tokio::fs;

use super::StateStore;
use crate::{ActorIdentity, ActorRecord, CallEvent, OperationEnvelope, StoreError};

/// Simple filesystem provider writing JSON/JSONL files. Suitable for local
/// operation and crash-recovery tests; state survives process restarts.
#[derive(Clone)]
pub struct FsStateStore {
    root: PathBuf,
    queue_file: PathBuf,
}

fn io_err(e: std::io::Error) -> StoreError {
    StoreError::Io(e.to_string())
}

/// Keep path components filename-safe. Identity components are arbitrary
/// client strings and must not escape the store root.
fn sanitize(part: &str) -> String {
    let cleaned: String = part
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ' | '&') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned
    }
}

impl FsStateStore {
    /// Create a new store rooted at the given directory path.
    /// If `reset_on_create` is true, delete any existing data under the root
    /// first.
    pub fn new(root: impl AsRef<Path>, reset_on_create: bool) -> Self {
        let path = root.as_ref().to_path_buf();
        if reset_on_create {
            let _ = std::fs::remove_dir_all(&path);
        }
        let queue_file = path.join("op-queue.jsonl");
        // best-effort create
        let _ = std::fs::create_dir_all(path.join("records"));
        let _ = std::fs::create_dir_all(path.join("calls"));
        let _ = std::fs::create_dir_all(path.join(".locks"));
        let _ = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&queue_file);
        Self {
            root: path,
            queue_file,
        }
    }

    fn record_path(&self, identity: &ActorIdentity) -> PathBuf {
        self.root
            .join("records")
            .join(sanitize(&identity.workflow))
            .join(format!("{}.json", sanitize(&identity.key)))
    }

    fn call_path(&self, call_id: &str) -> PathBuf {
        self.root
            .join("calls")
            .join(format!("{}.jsonl", sanitize(call_id)))
    }

    fn lock_path(&self, token: &str) -> PathBuf {
        self.root.join(".locks").join(format!("{token}.lock"))
    }

    fn read_queue(&self) -> Vec<OperationEnvelope> {
        let content = std::fs::read_to_string(&self.queue_file).unwrap_or_default();
        content
            .lines()
            .filter_map(|l| serde_json::from_str::<OperationEnvelope>(l).ok())
            .collect()
    }

    fn write_queue(&self, items: &[OperationEnvelope]) -> Result<(), StoreError> {
        // Rewrite atomically via tmp+rename
        let tmp = self.queue_file.with_extension("jsonl.tmp");
        {
            use std::io::Write as _;
            let mut tf = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)
                .map_err(io_err)?;
            for it in items {
                let line = serde_json::to_string(it).map_err(|e| StoreError::Corrupt(e.to_string()))?;
                tf.write_all(line.as_bytes()).map_err(io_err)?;
                tf.write_all(b"\n").map_err(io_err)?;
            }
        }
        std::fs::rename(&tmp, &self.queue_file).map_err(io_err)?;
        Ok(())
    }

    fn locked_envelopes(&self) -> Vec<OperationEnvelope> {
        let mut out = Vec::new();
        if let Ok(rd) = std::fs::read_dir(self.root.join(".locks")) {
            for ent in rd.flatten() {
                if let Ok(data) = std::fs::read_to_string(ent.path()) {
                    if let Ok(envelope) = serde_json::from_str::<OperationEnvelope>(&data) {
                        out.push(envelope);
                    }
                }
            }
        }
        out
    }
}

#[async_trait::async_trait]
impl StateStore for FsStateStore {
    async fn load(&self, identity: &ActorIdentity) -> Result<Option<ActorRecord>, StoreError> {
        let path = self.record_path(identity);
        match fs::read_to_string(&path).await {
            Ok(data) => {
                let record = serde_json::from_str::<ActorRecord>(&data)
                    .map_err(|e| StoreError::Corrupt(format!("{identity}: {e}")))?;
                Ok(Some(record))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(e)),
        }
    }

    async fn save(&self, identity: &ActorIdentity, record: &ActorRecord) -> Result<(), StoreError> {
        let path = self.record_path(identity);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let data =
            serde_json::to_string_pretty(record).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        // tmp+rename keeps index and completions ledger atomic
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, data).await.map_err(io_err)?;
        fs::rename(&tmp, &path).await.map_err(io_err)?;
        Ok(())
    }

    async fn read_call(&self, call_id: &str) -> Result<Vec<CallEvent>, StoreError> {
        let path = self.call_path(call_id);
        let data = match fs::read_to_string(&path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(e)),
        };
        let mut out = Vec::new();
        for line in data.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let ev = serde_json::from_str::<CallEvent>(line)
                .map_err(|e| StoreError::Corrupt(format!("call {call_id}: {e}")))?;
            out.push(ev);
        }
        Ok(out)
    }

    async fn append_call(&self, call_id: &str, events: Vec<CallEvent>) -> Result<(), StoreError> {
        use tokio::io::AsyncWriteExt;
        let path = self.call_path(call_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let existing = match fs::read_to_string(&path).await {
            Ok(d) => d.lines().filter(|l| !l.trim().is_empty()).count(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(io_err(e)),
        };
        if existing + events.len() > super::CALL_JOURNAL_CAP {
            return Err(StoreError::Io(format!(
                "call journal cap exceeded for {call_id}"
            )));
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_err)?;
        for ev in events {
            let line =
                serde_json::to_string(&ev).map_err(|e| StoreError::Corrupt(e.to_string()))?;
            file.write_all(line.as_bytes()).await.map_err(io_err)?;
            file.write_all(b"\n").await.map_err(io_err)?;
        }
        file.flush().await.map_err(io_err)?;
        Ok(())
    }

    async fn enqueue_operation(&self, envelope: OperationEnvelope) -> Result<(), StoreError> {
        // Idempotent enqueue: skip when the same call id is still queued or
        // locked in flight
        let mut items = self.read_queue();
        let in_flight = items.iter().any(|e| e.call_id == envelope.call_id)
            || self
                .locked_envelopes()
                .iter()
                .any(|e| e.call_id == envelope.call_id);
        if in_flight {
            return Ok(());
        }
        items.push(envelope);
        self.write_queue(&items)
    }

    async fn dequeue_peek_lock(&self) -> Option<(OperationEnvelope, String)> {
        let mut items = self.read_queue();
        if items.is_empty() {
            return None;
        }
        let first = items.remove(0);
        self.write_queue(&items).ok()?;
        // Persist the locked item under a fresh token so a crash can
        // re-inspect what was in flight
        let now_ns = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let pid = std::process::id();
        let token = format!("{now_ns:x}-{pid:x}");
        let line = serde_json::to_string(&first).ok()?;
        let _ = std::fs::create_dir_all(self.root.join(".locks"));
        let _ = std::fs::write(self.lock_path(&token), line);
        Some((first, token))
    }

    async fn ack(&self, token: &str) -> Result<(), StoreError> {
        let path = self.lock_path(token);
        if path.exists() {
            std::fs::remove_file(&path).map_err(io_err)?;
        }
        Ok(())
    }

    async fn abandon(&self, token: &str) -> Result<(), StoreError> {
        let path = self.lock_path(token);
        if !path.exists() {
            return Ok(());
        }
        let data = std::fs::read_to_string(&path).map_err(io_err)?;
        let envelope: OperationEnvelope =
            serde_json::from_str(&data).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        // Re-enqueue at the front to preserve per-identity order
        let mut items = self.read_queue();
        items.insert(0, envelope);
        self.write_queue(&items)?;
        std::fs::remove_file(&path).map_err(io_err)?;
        Ok(())
    }

    async fn reset(&self) {
        let _ = fs::remove_dir_all(&self.root).await;
    }

    async fn list_identities(&self) -> Vec<ActorIdentity> {
        let mut out = Vec::new();
        let records = self.root.join("records");
        if let Ok(mut workflows) = fs::read_dir(&records).await {
            while let Ok(Some(wf_ent)) = workflows.next_entry().await {
                let workflow = match wf_ent.file_name().to_str() {
                    Some(n) => n.to_string(),
                    None => continue,
                };
                if let Ok(mut keys) = fs::read_dir(wf_ent.path()).await {
                    while let Ok(Some(key_ent)) = keys.next_entry().await {
                        if let Some(name) = key_ent.file_name().to_str() {
                            if let Some(stem) = name.strip_suffix(".json") {
                                out.push(ActorIdentity::new(workflow.clone(), stem.to_string()));
                            }
                        }
                    }
                }
            }
        }
        out
    }

    async fn dump_all_pretty(&self) -> String {
        let mut out = String::new();
        for identity in self.list_identities().await {
            out.push_str(&format!("identity={identity}\n"));
            if let Ok(Some(record)) = self.load(&identity).await {
                out.push_str(&format!(
                    "  index={} completions={}\n",
                    record.current_index,
                    record.completions.len()
                ));
            }
        }
        out
    }
}
