use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use poller_actor::{PublishError, PublishSink, Snapshot};

/// Writes each snapshot as a JSON document, replacing the previous one atomically.
/// Without a path snapshots are only logged.
#[derive(Debug, Clone)]
pub struct StatePublisher {
    path: Option<PathBuf>,
}

impl StatePublisher {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn write(&self, snapshot: &Snapshot) -> Result<(), PublishError> {
        let Some(path) = &self.path else {
            debug!(paths = snapshot.len(), "snapshot (no state path configured)");
            return Ok(());
        };

        let payload = serde_json::to_vec_pretty(snapshot)?;
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, &payload).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), bytes = payload.len(), "snapshot written");
        Ok(())
    }
}

#[async_trait]
impl PublishSink for StatePublisher {
    async fn publish(&mut self, snapshot: &Snapshot) -> Result<(), PublishError> {
        self.write(snapshot).await
    }
}
