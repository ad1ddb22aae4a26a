//! Output file name resolution.
//!
//! Every file of one pass shares the same timestamp prefix, so two passes
//! (or a base pass and its loop passes) can never collide on disk.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::constants::{FILE_TIMESTAMP_FORMAT, RANDOM_FILENAME_LEN};

/// Naming policy for one collection pass.
#[derive(Debug, Clone)]
pub struct FileNamePolicy {
    pub directory: PathBuf,
    pub prefix: Option<String>,
    pub randomize: bool,
    timestamp: String,
}

impl FileNamePolicy {
    pub fn new(
        directory: PathBuf,
        prefix: Option<String>,
        randomize: bool,
        started: DateTime<Utc>,
    ) -> Self {
        Self {
            directory,
            prefix,
            randomize,
            timestamp: started.format(FILE_TIMESTAMP_FORMAT).to_string(),
        }
    }

    /// Resolve `<timestamp>_<prefix_><base>.<ext>`, replacing the base with
    /// a random name when filename randomization is on.
    pub fn resolve(&self, base: &str, extension: &str) -> PathBuf {
        let base = if self.randomize {
            random_name()
        } else {
            base.to_string()
        };
        self.directory
            .join(format!("{}.{}", self.stem(&base), extension))
    }

    /// Resolve a complete file name (extension included), e.g. a configured
    /// zip name. Only the timestamp/prefix scheme is applied.
    pub fn resolve_raw(&self, name: &str) -> PathBuf {
        self.directory.join(self.stem(name))
    }

    fn stem(&self, base: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}_{}_{}", self.timestamp, prefix, base),
            None => format!("{}_{}", self.timestamp, base),
        }
    }
}

fn random_name() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_FILENAME_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn policy(prefix: Option<&str>, randomize: bool) -> FileNamePolicy {
        let started = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 45).unwrap();
        FileNamePolicy::new(
            PathBuf::from("/tmp/out"),
            prefix.map(str::to_string),
            randomize,
            started,
        )
    }

    #[test]
    fn test_timestamp_and_type_name() {
        let path = policy(None, false).resolve("users", "json");
        assert_eq!(path, PathBuf::from("/tmp/out/20240301123045_users.json"));
    }

    #[test]
    fn test_prefix_is_inserted() {
        let path = policy(Some("corp"), false).resolve("computers", "json");
        assert_eq!(
            path,
            PathBuf::from("/tmp/out/20240301123045_corp_computers.json")
        );
    }

    #[test]
    fn test_randomized_names_hide_the_type() {
        let path = policy(None, true).resolve("users", "json");
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(!name.contains("users"));
        assert!(name.starts_with("20240301123045_"));
        assert!(name.ends_with(".json"));
    }

    #[test]
    fn test_raw_name_keeps_extension() {
        let path = policy(Some("corp"), false).resolve_raw("BloodHound.zip");
        assert_eq!(
            path,
            PathBuf::from("/tmp/out/20240301123045_corp_BloodHound.zip")
        );
    }
}
