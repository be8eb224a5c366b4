use async_trait::async_trait;
use dashmap::DashMap;
use shared::message::StreamId;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tidewater_core::buffer::BufferedRecord;
use tidewater_core::{BatchResult, Destination, StreamSyncSummary};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Appends each stream's records to `<output_dir>/<namespace>.<name>.jsonl`,
/// one serialized `data` object per line.
pub struct JsonlDestination {
  output_dir: PathBuf,
  files: DashMap<StreamId, Arc<Mutex<File>>>,
}

impl JsonlDestination {
  pub fn new(output_dir: impl AsRef<Path>) -> Self {
    Self {
      output_dir: output_dir.as_ref().to_path_buf(),
      files: DashMap::new(),
    }
  }

  fn path_for(&self, stream: &StreamId) -> PathBuf {
    let name: String = stream
      .qualified()
      .chars()
      .map(|c| if std::path::is_separator(c) { '_' } else { c })
      .collect();
    self.output_dir.join(format!("{}.jsonl", name))
  }

  async fn file_for(&self, stream: &StreamId) -> anyhow::Result<Arc<Mutex<File>>> {
    let existing = self.files.get(stream).map(|f| Arc::clone(f.value()));
    if let Some(file) = existing {
      return Ok(file);
    }
    let path = self.path_for(stream);
    let file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(&path)
      .await?;
    debug!(stream = %stream, path = %path.display(), "opened stream output");
    let entry = self
      .files
      .entry(stream.clone())
      .or_insert_with(|| Arc::new(Mutex::new(file)));
    Ok(Arc::clone(entry.value()))
  }
}

#[async_trait]
impl Destination for JsonlDestination {
  async fn on_start(&self) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&self.output_dir).await?;
    info!(dir = %self.output_dir.display(), "jsonl destination ready");
    Ok(())
  }

  async fn flush(&self, stream: &StreamId, batch: &[BufferedRecord]) -> anyhow::Result<BatchResult> {
    let mut buf = Vec::with_capacity(batch.iter().map(|r| r.payload.len() + 1).sum());
    for record in batch {
      buf.extend_from_slice(&record.payload);
      buf.push(b'\n');
    }

    let file = self.file_for(stream).await?;
    let mut out = file.lock().await;
    out.write_all(&buf).await?;
    out.flush().await?;

    Ok(BatchResult::new(batch.len() as u64, buf.len() as u64))
  }

  async fn on_close(&self, summaries: &HashMap<StreamId, StreamSyncSummary>) -> anyhow::Result<()> {
    let files: Vec<_> = self.files.iter().map(|e| Arc::clone(e.value())).collect();
    for file in files {
      file.lock().await.sync_all().await?;
    }
    for (stream, summary) in summaries {
      info!(
        stream = %stream,
        records = summary.records_flushed,
        bytes = summary.bytes_flushed,
        batches = summary.batches,
        "stream synced"
      );
    }
    Ok(())
  }
}
