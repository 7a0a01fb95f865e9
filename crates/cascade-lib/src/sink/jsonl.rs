//! Persistence sink appending aggregates to a JSON lines file

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

use super::PersistenceSink;
use crate::error::SinkError;
use crate::models::MetricAggregate;

/// Appends one JSON object per aggregate, flushing after each line
pub struct JsonlPersistenceSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlPersistenceSink {
    /// Open (or create) the output file in append mode
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        info!(path = %path.display(), "Opened aggregate output file");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PersistenceSink for JsonlPersistenceSink {
    async fn persist(&self, aggregate: &MetricAggregate) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(aggregate)
            .map_err(|e| SinkError::Persistence(format!("serialize aggregate: {}", e)))?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .map_err(|e| SinkError::Persistence(format!("write {}: {}", self.path.display(), e)))?;
        file.flush()
            .await
            .map_err(|e| SinkError::Persistence(format!("flush {}: {}", self.path.display(), e)))?;

        Ok(())
    }
}
