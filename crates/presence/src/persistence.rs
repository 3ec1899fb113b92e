//! Append-only JSONL persistence.
//!
//! Records are grouped by kind into `walks.jsonl`, `alerts.jsonl`,
//! `locations.jsonl`, and `presence.jsonl` under `<state_path>/records`.
//! Each append runs on `spawn_blocking` so file I/O never stalls the
//! runtime, and [`PersistenceWriter`] feeds every store from one queue so
//! lines land in the order their events happened.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use st_domain::error::{Error, Result};
use st_domain::trace::TraceEvent;

use crate::collaborators::{PersistenceRecord, PersistenceStore};

pub struct JsonlPersistence {
    base_dir: PathBuf,
}

impl JsonlPersistence {
    /// Create the records directory under `state_path`.
    pub fn new(state_path: &Path) -> Result<Self> {
        let base_dir = state_path.join("records");
        std::fs::create_dir_all(&base_dir).map_err(Error::Io)?;
        tracing::info!(path = %base_dir.display(), "persistence store ready");
        Ok(Self { base_dir })
    }

    /// File a record kind is appended to.
    pub fn path_for(&self, record: &PersistenceRecord) -> PathBuf {
        let file = match record {
            PersistenceRecord::WalkStarted { .. }
            | PersistenceRecord::PathPoint { .. }
            | PersistenceRecord::WalkEnded { .. } => "walks.jsonl",
            PersistenceRecord::Alert { .. } => "alerts.jsonl",
            PersistenceRecord::Location { .. } => "locations.jsonl",
            PersistenceRecord::Presence { .. } => "presence.jsonl",
        };
        self.base_dir.join(file)
    }
}

#[async_trait]
impl PersistenceStore for JsonlPersistence {
    async fn append(&self, record: PersistenceRecord) -> Result<()> {
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        let path = self.path_for(&record);

        tokio::task::spawn_blocking(move || {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(Error::Io)?;
            file.write_all(line.as_bytes()).map_err(Error::Io)?;
            Ok::<(), Error>(())
        })
        .await
        .map_err(|e| Error::Persistence(format!("spawn_blocking join: {e}")))?
    }
}

/// Fire-and-forget front of a [`PersistenceStore`].
///
/// One background task drains the queue and appends records one at a time,
/// so the store sees them in queue order.  A failed write is logged and
/// dropped; in-memory state is never rolled back.
#[derive(Clone)]
pub struct PersistenceWriter {
    queue: mpsc::UnboundedSender<PersistenceRecord>,
}

impl PersistenceWriter {
    /// Start the writer task.  Must be called inside a tokio runtime.
    pub fn spawn(store: Arc<dyn PersistenceStore>) -> Self {
        let (queue, mut rx) = mpsc::unbounded_channel::<PersistenceRecord>();
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let name = record.name();
                if let Err(e) = store.append(record).await {
                    tracing::warn!(record = name, error = %e, "persistence write failed");
                    TraceEvent::PersistenceFailed {
                        record: name.to_owned(),
                        error: e.to_string(),
                    }
                    .emit();
                }
            }
            tracing::debug!("persistence writer stopped");
        });
        Self { queue }
    }

    /// Queue a record.  Never blocks.
    pub fn append(&self, record: PersistenceRecord) {
        if let Err(e) = self.queue.send(record) {
            tracing::warn!(record = e.0.name(), "persistence writer gone, record dropped");
        }
    }
}
