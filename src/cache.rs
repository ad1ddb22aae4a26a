//! Persistent resolver cache.
//!
//! The cache remembers name→SID resolutions, SID→type labels and related
//! lookups across runs so repeated enumeration of the same environment does
//! not re-resolve every principal. It is a single JSON document on disk and
//! a set of maps behind one lock in memory. All keys are uppercased before
//! insertion and lookup.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::constants::CACHE_EXTENSION;
use crate::models::RecordKind;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct CacheMaps {
    #[serde(default)]
    value_to_id: HashMap<String, String>,
    #[serde(default)]
    id_to_type: HashMap<String, RecordKind>,
    #[serde(default)]
    host_resolution: HashMap<String, String>,
    #[serde(default)]
    machine_sids: HashMap<String, String>,
    #[serde(default)]
    sid_to_domain: HashMap<String, String>,
    #[serde(default)]
    global_catalog: HashMap<String, Vec<String>>,
}

/// Per-map entry counts, logged after load and before save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub value_to_id: usize,
    pub id_to_type: usize,
    pub host_resolution: usize,
    pub machine_sids: usize,
    pub sid_to_domain: usize,
    pub global_catalog: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} name mappings, {} type mappings, {} host resolutions, {} machine SIDs, {} domain mappings, {} GC mappings",
            self.value_to_id,
            self.id_to_type,
            self.host_resolution,
            self.machine_sids,
            self.sid_to_domain,
            self.global_catalog
        )
    }
}

/// Thread-safe resolver cache. Reads take the shared lock, writes the
/// exclusive lock; every entry point uppercases its key.
#[derive(Debug, Default)]
pub struct ResolverCache {
    maps: RwLock<CacheMaps>,
}

impl ResolverCache {
    /// Load the cache from `path`. A missing file, an `invalidate` request
    /// or a parse failure all produce an empty cache; parse failures log a
    /// warning since they lose prior resolutions.
    pub fn load(path: &Path, invalidate: bool) -> Self {
        if invalidate {
            info!("Cache invalidation requested, starting from an empty cache");
            return Self::default();
        }
        if !path.exists() {
            debug!("No cache file at {}, starting fresh", path.display());
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<CacheMaps>(&content) {
                Ok(maps) => {
                    let cache = Self {
                        maps: RwLock::new(maps),
                    };
                    info!("Loaded cache from {}: {}", path.display(), cache.stats());
                    cache
                }
                Err(e) => {
                    warn!(
                        "Cache file {} could not be parsed ({}), starting fresh",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(e) => {
                warn!(
                    "Cache file {} could not be read ({}), starting fresh",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Persist the cache as a single JSON document.
    pub fn save(&self, path: &Path) -> Result<()> {
        let maps = self.maps.read().expect("cache lock poisoned");
        let json = serde_json::to_string(&*maps).context("Failed to serialize cache")?;
        drop(maps);
        fs::write(path, json)
            .context(format!("Failed to write cache file {}", path.display()))?;
        info!("Saved cache to {}: {}", path.display(), self.stats());
        Ok(())
    }

    pub fn add_value_to_id(&self, name: &str, id: &str) {
        let mut maps = self.maps.write().expect("cache lock poisoned");
        maps.value_to_id
            .insert(name.to_uppercase(), id.to_uppercase());
    }

    pub fn get_value_to_id(&self, name: &str) -> Option<String> {
        let maps = self.maps.read().expect("cache lock poisoned");
        maps.value_to_id.get(&name.to_uppercase()).cloned()
    }

    pub fn add_id_type(&self, id: &str, kind: RecordKind) {
        let mut maps = self.maps.write().expect("cache lock poisoned");
        maps.id_to_type.insert(id.to_uppercase(), kind);
    }

    pub fn get_id_type(&self, id: &str) -> Option<RecordKind> {
        let maps = self.maps.read().expect("cache lock poisoned");
        maps.id_to_type.get(&id.to_uppercase()).copied()
    }

    pub fn add_host_resolution(&self, host: &str, sid: &str) {
        let mut maps = self.maps.write().expect("cache lock poisoned");
        maps.host_resolution
            .insert(host.to_uppercase(), sid.to_uppercase());
    }

    pub fn get_host_resolution(&self, host: &str) -> Option<String> {
        let maps = self.maps.read().expect("cache lock poisoned");
        maps.host_resolution.get(&host.to_uppercase()).cloned()
    }

    pub fn add_machine_sid(&self, host_sid: &str, machine_sid: &str) {
        let mut maps = self.maps.write().expect("cache lock poisoned");
        maps.machine_sids
            .insert(host_sid.to_uppercase(), machine_sid.to_uppercase());
    }

    pub fn get_machine_sid(&self, host_sid: &str) -> Option<String> {
        let maps = self.maps.read().expect("cache lock poisoned");
        maps.machine_sids.get(&host_sid.to_uppercase()).cloned()
    }

    pub fn add_sid_to_domain(&self, sid: &str, domain: &str) {
        let mut maps = self.maps.write().expect("cache lock poisoned");
        maps.sid_to_domain
            .insert(sid.to_uppercase(), domain.to_uppercase());
    }

    pub fn get_sid_to_domain(&self, sid: &str) -> Option<String> {
        let maps = self.maps.read().expect("cache lock poisoned");
        maps.sid_to_domain.get(&sid.to_uppercase()).cloned()
    }

    pub fn add_global_catalog(&self, name: &str, sids: Vec<String>) {
        let mut maps = self.maps.write().expect("cache lock poisoned");
        maps.global_catalog.insert(name.to_uppercase(), sids);
    }

    pub fn get_global_catalog(&self, name: &str) -> Option<Vec<String>> {
        let maps = self.maps.read().expect("cache lock poisoned");
        maps.global_catalog.get(&name.to_uppercase()).cloned()
    }

    /// Per-map entry counts for logging.
    pub fn stats(&self) -> CacheStats {
        let maps = self.maps.read().expect("cache lock poisoned");
        CacheStats {
            value_to_id: maps.value_to_id.len(),
            id_to_type: maps.id_to_type.len(),
            host_resolution: maps.host_resolution.len(),
            machine_sids: maps.machine_sids.len(),
            sid_to_domain: maps.sid_to_domain.len(),
            global_catalog: maps.global_catalog.len(),
        }
    }
}

/// Resolve the cache file path for this run.
///
/// An explicit cache name wins; otherwise the file is named after the
/// configured DNS name of this host, falling back to a base64-encoded
/// machine identifier.
pub fn cache_file_path(
    output_dir: &Path,
    cache_name: Option<&str>,
    real_dns_name: Option<&str>,
) -> PathBuf {
    if let Some(name) = cache_name {
        return output_dir.join(name);
    }
    let stem = match real_dns_name {
        Some(dns) => dns.to_string(),
        None => machine_identifier(),
    };
    output_dir.join(format!("{}.{}", stem, CACHE_EXTENSION))
}

/// Stable identifier for this machine: the hostname, base64-encoded so the
/// result is always a safe file name component.
fn machine_identifier() -> String {
    let name = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "localhost".to_string());
    BASE64.encode(name.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn populated_cache() -> ResolverCache {
        let cache = ResolverCache::default();
        cache.add_value_to_id("admin@example.local", "S-1-5-21-1-2-3-500");
        cache.add_id_type("S-1-5-21-1-2-3-500", RecordKind::User);
        cache.add_host_resolution("ws01.example.local", "S-1-5-21-1-2-3-1104");
        cache.add_machine_sid("S-1-5-21-1-2-3-1104", "S-1-5-21-9-9-9");
        cache.add_sid_to_domain("S-1-5-21-1-2-3", "EXAMPLE.LOCAL");
        cache.add_global_catalog(
            "admin",
            vec!["S-1-5-21-1-2-3-500".to_string(), "S-1-5-21-4-5-6-500".to_string()],
        );
        cache
    }

    #[test]
    fn test_keys_are_uppercased() {
        let cache = populated_cache();
        assert_eq!(
            cache.get_value_to_id("ADMIN@EXAMPLE.LOCAL"),
            Some("S-1-5-21-1-2-3-500".to_string())
        );
        assert_eq!(
            cache.get_host_resolution("WS01.example.LOCAL"),
            Some("S-1-5-21-1-2-3-1104".to_string())
        );
    }

    #[test]
    fn test_round_trip_preserves_all_maps() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.cache");

        let cache = populated_cache();
        cache.save(&path).unwrap();

        let reloaded = ResolverCache::load(&path, false);
        assert_eq!(reloaded.stats(), cache.stats());
        assert_eq!(
            reloaded.get_id_type("S-1-5-21-1-2-3-500"),
            Some(RecordKind::User)
        );
        assert_eq!(
            reloaded.get_sid_to_domain("S-1-5-21-1-2-3"),
            Some("EXAMPLE.LOCAL".to_string())
        );
        assert_eq!(
            reloaded.get_global_catalog("ADMIN").map(|v| v.len()),
            Some(2)
        );
    }

    #[test]
    fn test_invalidate_ignores_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.cache");
        populated_cache().save(&path).unwrap();

        let cache = ResolverCache::load(&path, true);
        assert_eq!(cache.stats().value_to_id, 0);
    }

    #[test]
    fn test_corrupt_file_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.cache");
        fs::write(&path, "{not json").unwrap();

        let cache = ResolverCache::load(&path, false);
        assert_eq!(cache.stats().id_to_type, 0);
    }

    #[test]
    fn test_missing_file_starts_fresh() {
        let cache = ResolverCache::load(Path::new("/nonexistent/path.cache"), false);
        assert_eq!(cache.stats().host_resolution, 0);
    }

    #[test]
    fn test_cache_file_path_resolution() {
        let dir = Path::new("/tmp/out");
        assert_eq!(
            cache_file_path(dir, Some("custom.bin"), Some("dc01.example.local")),
            dir.join("custom.bin")
        );
        assert_eq!(
            cache_file_path(dir, None, Some("dc01.example.local")),
            dir.join("dc01.example.local.cache")
        );
        // Fallback is base64 of the hostname, which never contains a path
        // separator.
        let fallback = cache_file_path(dir, None, None);
        assert!(fallback.starts_with(dir));
        assert!(fallback.to_string_lossy().ends_with(".cache"));
    }
}
