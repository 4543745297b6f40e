//! State Management - status snapshot file for observability

use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Writes the live engine's status to `<state_dir>/status.json`
pub struct StateManager {
    state_dir: PathBuf,
}

impl StateManager {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            state_dir: state_dir.as_ref().to_path_buf(),
        }
    }

    pub fn status_path(&self) -> PathBuf {
        self.state_dir.join("status.json")
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.state_dir).await?;
        Ok(())
    }

    /// Write atomically: temp file, then rename over the old snapshot
    pub async fn write_status<T: Serialize>(&self, status: &T) -> anyhow::Result<()> {
        let path = self.status_path();
        let tmp = self.state_dir.join("status.json.tmp");
        let json = serde_json::to_string_pretty(status)?;
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &path).await?;
        debug!("Wrote {}", path.display());
        Ok(())
    }
}
