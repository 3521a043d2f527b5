//! Append-only JSONL event sink, shared across every session and gateway in
//! the process.

use std::path::Path;

use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};
use tracing::warn;

use crate::{error::Result, event::Event};

pub struct EventLogger {
    file: Mutex<File>,
}

impl EventLogger {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path).await?;
        Ok(Self { file: Mutex::new(file) })
    }

    pub async fn log(&self, event: &Event) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(err) => {
                warn!(error = ?err, "failed to serialise event for logging");
                return;
            }
        };

        let mut file = self.file.lock().await;
        if let Err(err) = file.write_all(line.as_bytes()).await {
            warn!(error = ?err, "failed to append event to log");
            return;
        }
        let _ = file.write_all(b"\n").await;
    }

    pub async fn flush(&self) {
        let mut file = self.file.lock().await;
        let _ = file.flush().await;
    }
}
