//! Routes output records to per-kind writers.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use log::{debug, warn};
use tokio::sync::mpsc;

use crate::constants::OUTPUT_EXTENSION;
use crate::models::{OutputRecord, RecordKind};
use crate::output::filenames::FileNamePolicy;
use crate::output::writer::JsonDataWriter;

/// What one pass wrote: totals for logging and the files to bundle.
#[derive(Debug, Default)]
pub struct RouterSummary {
    pub records_written: u64,
    pub counts: HashMap<RecordKind, u64>,
    pub files: Vec<PathBuf>,
}

/// Drains the output channel into one writer per record kind. Writers are
/// created lazily, so a kind that never produces has no writer and no file.
pub struct OutputRouter {
    policy: FileNamePolicy,
    collection_methods: u32,
    pretty: bool,
    no_output: bool,
    writers: HashMap<RecordKind, JsonDataWriter>,
}

impl OutputRouter {
    pub fn new(
        policy: FileNamePolicy,
        collection_methods: u32,
        pretty: bool,
        no_output: bool,
    ) -> Self {
        Self {
            policy,
            collection_methods,
            pretty,
            no_output,
            writers: HashMap::new(),
        }
    }

    /// Pump records until the channel closes, then flush every writer.
    /// A routing failure still flushes whatever earlier records queued
    /// before the error is reported.
    pub async fn run(mut self, mut rx: mpsc::Receiver<OutputRecord>) -> Result<RouterSummary> {
        while let Some(record) = rx.recv().await {
            if let Err(e) = self.route(record) {
                warn!("Output routing failed, flushing partial results");
                let _ = self.finish();
                return Err(e);
            }
        }
        self.finish()
    }

    fn route(&mut self, record: OutputRecord) -> Result<()> {
        let kind = record.kind;
        if !self.writers.contains_key(&kind) {
            let path = self.policy.resolve(kind.data_type(), OUTPUT_EXTENSION);
            debug!("Opening writer for {} at {}", kind, path.display());
            let writer = JsonDataWriter::create(
                kind,
                path,
                self.collection_methods,
                self.pretty,
                self.no_output,
            )?;
            self.writers.insert(kind, writer);
        }
        self.writers
            .get_mut(&kind)
            .expect("writer inserted above")
            .accept(record.value)
    }

    fn finish(&mut self) -> Result<RouterSummary> {
        let mut summary = RouterSummary::default();
        let mut first_error = None;
        for writer in self.writers.values_mut() {
            if let Err(e) = writer.flush() {
                warn!("Failed to flush {} writer: {}", writer.kind(), e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
                continue;
            }
            summary.records_written += writer.count();
            summary.counts.insert(writer.kind(), writer.count());
            if writer.file_created() {
                summary.files.push(writer.path().to_path_buf());
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use tempfile::TempDir;

    fn policy(dir: &TempDir) -> FileNamePolicy {
        FileNamePolicy::new(dir.path().to_path_buf(), None, false, Utc::now())
    }

    #[tokio::test]
    async fn test_records_partition_by_kind() {
        let dir = TempDir::new().unwrap();
        let router = OutputRouter::new(policy(&dir), 0, false, false);
        let (tx, rx) = mpsc::channel(8);

        tx.send(OutputRecord::new(RecordKind::User, json!({"n": 1})))
            .await
            .unwrap();
        tx.send(OutputRecord::new(RecordKind::Computer, json!({"n": 2})))
            .await
            .unwrap();
        tx.send(OutputRecord::new(RecordKind::User, json!({"n": 3})))
            .await
            .unwrap();
        drop(tx);

        let summary = router.run(rx).await.unwrap();
        assert_eq!(summary.records_written, 3);
        assert_eq!(summary.counts[&RecordKind::User], 2);
        assert_eq!(summary.counts[&RecordKind::Computer], 1);
        assert_eq!(summary.files.len(), 2);
    }

    #[tokio::test]
    async fn test_no_records_no_files() {
        let dir = TempDir::new().unwrap();
        let router = OutputRouter::new(policy(&dir), 0, false, false);
        let (tx, rx) = mpsc::channel::<OutputRecord>(8);
        drop(tx);

        let summary = router.run(rx).await.unwrap();
        assert!(summary.files.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_no_output_counts_without_files() {
        let dir = TempDir::new().unwrap();
        let router = OutputRouter::new(policy(&dir), 0, false, true);
        let (tx, rx) = mpsc::channel(8);
        tx.send(OutputRecord::new(RecordKind::Group, json!({"n": 1})))
            .await
            .unwrap();
        drop(tx);

        let summary = router.run(rx).await.unwrap();
        assert_eq!(summary.records_written, 1);
        assert!(summary.files.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
