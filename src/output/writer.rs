//! Per-kind JSON output writer.
//!
//! Each writer owns one output file and streams an envelope of the form
//! `{"data":[...],"meta":{...}}`. The file is created lazily on the first
//! record, so kinds that produce nothing leave nothing on disk.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde_json::Value;

use crate::constants::WRITER_FLUSH_THRESHOLD;
use crate::models::{MetaTag, RecordKind};

pub struct JsonDataWriter {
    kind: RecordKind,
    path: PathBuf,
    queue: Vec<Value>,
    file: Option<BufWriter<std::fs::File>>,
    count: u64,
    records_written: u64,
    collection_methods: u32,
    pretty: bool,
    no_op: bool,
    flushed: bool,
}

impl JsonDataWriter {
    /// Create a writer for one record kind. A pre-existing file at the
    /// resolved path is a run-fatal collision; the timestamp prefix makes
    /// that effectively impossible outside clock manipulation.
    pub fn create(
        kind: RecordKind,
        path: PathBuf,
        collection_methods: u32,
        pretty: bool,
        no_op: bool,
    ) -> Result<Self> {
        if !no_op && path.exists() {
            bail!("output file {} already exists", path.display());
        }
        Ok(Self {
            kind,
            path,
            queue: Vec::new(),
            file: None,
            count: 0,
            records_written: 0,
            collection_methods,
            pretty,
            no_op,
            flushed: false,
        })
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// True once the backing file exists on disk.
    pub fn file_created(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue one record, writing the queue through when it fills up.
    pub fn accept(&mut self, value: Value) -> Result<()> {
        self.count += 1;
        if self.no_op {
            return Ok(());
        }
        self.queue.push(value);
        if self.queue.len() >= WRITER_FLUSH_THRESHOLD {
            self.write_queued()?;
        }
        Ok(())
    }

    /// Drain the queue and close the envelope. Idempotent: later calls are
    /// no-ops, and a writer that never saw a record never touches disk.
    pub fn flush(&mut self) -> Result<()> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        if self.no_op || (self.queue.is_empty() && self.file.is_none()) {
            return Ok(());
        }
        self.write_queued()?;

        let meta = MetaTag::new(self.count, self.collection_methods, self.kind.data_type());
        let meta_json = if self.pretty {
            indent(&serde_json::to_string_pretty(&meta)?, 2)
        } else {
            serde_json::to_string(&meta)?
        };
        let pretty = self.pretty;
        let file = self.file.as_mut().expect("file exists after write_queued");
        if pretty {
            write!(file, "\n  ],\n  \"meta\": {}\n}}", meta_json.trim_start())?;
        } else {
            write!(file, "],\"meta\":{}}}", meta_json)?;
        }
        file.flush()
            .context(format!("Failed to flush {}", self.path.display()))?;
        Ok(())
    }

    fn write_queued(&mut self) -> Result<()> {
        if self.queue.is_empty() {
            return Ok(());
        }
        self.ensure_file()?;
        let pretty = self.pretty;
        let queue = std::mem::take(&mut self.queue);
        let file = self.file.as_mut().expect("file created above");
        for value in queue {
            if self.records_written > 0 {
                if pretty {
                    write!(file, ",\n")?;
                } else {
                    write!(file, ",")?;
                }
            }
            if pretty {
                write!(file, "{}", indent(&serde_json::to_string_pretty(&value)?, 4))?;
            } else {
                write!(file, "{}", serde_json::to_string(&value)?)?;
            }
            self.records_written += 1;
        }
        Ok(())
    }

    fn ensure_file(&mut self) -> Result<()> {
        if self.file.is_some() {
            return Ok(());
        }
        // create_new makes the collision check atomic.
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .context(format!("Failed to create {}", self.path.display()))?;
        let mut writer = BufWriter::new(file);
        if self.pretty {
            write!(writer, "{{\n  \"data\": [\n")?;
        } else {
            write!(writer, "{{\"data\":[")?;
        }
        self.file = Some(writer);
        Ok(())
    }
}

/// Indent every line of a rendered JSON fragment.
fn indent(text: &str, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    text.lines()
        .map(|line| format!("{}{}", pad, line))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn new_writer(dir: &TempDir, pretty: bool, no_op: bool) -> JsonDataWriter {
        JsonDataWriter::create(
            RecordKind::User,
            dir.path().join("users.json"),
            0b11,
            pretty,
            no_op,
        )
        .unwrap()
    }

    #[test]
    fn test_count_matches_data_length() {
        let dir = TempDir::new().unwrap();
        let mut writer = new_writer(&dir, false, false);
        for i in 0..150 {
            writer.accept(json!({"ObjectIdentifier": format!("S-1-5-21-0-0-0-{}", i)})).unwrap();
        }
        writer.flush().unwrap();

        let content = std::fs::read_to_string(dir.path().join("users.json")).unwrap();
        let parsed: Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["data"].as_array().unwrap().len(), 150);
        assert_eq!(parsed["meta"]["count"], 150);
        assert_eq!(parsed["meta"]["type"], "users");
        assert_eq!(parsed["meta"]["version"], crate::constants::DATA_VERSION);
        assert_eq!(parsed["meta"]["collection_methods"], 3);
    }

    #[test]
    fn test_no_records_creates_no_file() {
        let dir = TempDir::new().unwrap();
        let mut writer = new_writer(&dir, false, false);
        writer.flush().unwrap();
        assert!(!dir.path().join("users.json").exists());
    }

    #[test]
    fn test_no_op_writer_never_touches_disk() {
        let dir = TempDir::new().unwrap();
        let mut writer = new_writer(&dir, false, true);
        writer.accept(json!({"a": 1})).unwrap();
        writer.flush().unwrap();
        assert_eq!(writer.count(), 1);
        assert!(!dir.path().join("users.json").exists());
    }

    #[test]
    fn test_flush_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut writer = new_writer(&dir, false, false);
        writer.accept(json!({"a": 1})).unwrap();
        writer.flush().unwrap();
        writer.flush().unwrap();

        let content = std::fs::read_to_string(dir.path().join("users.json")).unwrap();
        assert!(serde_json::from_str::<Value>(&content).is_ok());
    }

    #[test]
    fn test_existing_file_is_a_collision() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("users.json"), "{}").unwrap();
        assert!(JsonDataWriter::create(
            RecordKind::User,
            dir.path().join("users.json"),
            0,
            false,
            false,
        )
        .is_err());
    }

    #[test]
    fn test_pretty_output_parses_and_preserves_order() {
        let dir = TempDir::new().unwrap();
        let mut writer = new_writer(&dir, true, false);
        writer.accept(json!({"ObjectIdentifier": "first"})).unwrap();
        writer.accept(json!({"ObjectIdentifier": "second"})).unwrap();
        writer.flush().unwrap();

        let content = std::fs::read_to_string(dir.path().join("users.json")).unwrap();
        assert!(content.contains('\n'));
        let parsed: Value = serde_json::from_str(&content).unwrap();
        let data = parsed["data"].as_array().unwrap();
        assert_eq!(data[0]["ObjectIdentifier"], "first");
        assert_eq!(data[1]["ObjectIdentifier"], "second");
    }
}
