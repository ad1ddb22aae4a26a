//! Resolver cache behavior across full runs.

use std::sync::Arc;

use clap::Parser;
use tempfile::TempDir;

use adhound::cache::ResolverCache;
use adhound::cli::Args;
use adhound::context::RunContext;
use adhound::links;
use adhound::models::RecordKind;
use adhound::test_utils::{user_object, MockDirectory};

const CACHE_NAME: &str = "test.cache";

fn populated_mock() -> MockDirectory {
    let mut mock = MockDirectory::new("example.local", "S-1-5-21-1-1-1");
    mock.add_object(
        "example.local",
        user_object("jdoe", "S-1-5-21-1-1-1-1105", "example.local"),
    );
    mock
}

fn context_for(extra: &[&str], mock: MockDirectory, dir: &TempDir) -> RunContext {
    let out = dir.path().to_string_lossy().to_string();
    let mut argv = vec![
        "adhound",
        "--domain",
        "example.local",
        "--output-directory",
        out.as_str(),
        "--cache-name",
        CACHE_NAME,
        "--no-zip",
    ];
    argv.extend_from_slice(extra);
    let args = Args::parse_from(argv);
    RunContext::new(&args, Arc::new(mock)).unwrap()
}

#[tokio::test]
async fn test_cache_grows_but_never_shrinks() {
    let dir = TempDir::new().unwrap();
    let cache_path = dir.path().join(CACHE_NAME);

    // Seed a cache with an entry no run would produce.
    let seeded = ResolverCache::default();
    seeded.add_value_to_id("legacy@example.local", "S-1-5-21-1-1-1-4000");
    seeded.add_id_type("S-1-5-21-1-1-1-4000", RecordKind::Group);
    seeded.save(&cache_path).unwrap();

    let mut ctx = context_for(&[], populated_mock(), &dir);
    links::run_chain(&mut ctx).await;
    assert!(!ctx.is_faulted);

    let reloaded = ResolverCache::load(&cache_path, false);
    // The pre-existing entry survived...
    assert_eq!(
        reloaded.get_value_to_id("LEGACY@EXAMPLE.LOCAL"),
        Some("S-1-5-21-1-1-1-4000".to_string())
    );
    // ...and the run added what it saw.
    assert_eq!(
        reloaded.get_value_to_id("JDOE@EXAMPLE.LOCAL"),
        Some("S-1-5-21-1-1-1-1105".to_string())
    );
    assert_eq!(
        reloaded.get_id_type("S-1-5-21-1-1-1-1105"),
        Some(RecordKind::User)
    );
}

#[tokio::test]
async fn test_rebuild_cache_discards_previous_entries() {
    let dir = TempDir::new().unwrap();
    let cache_path = dir.path().join(CACHE_NAME);

    let seeded = ResolverCache::default();
    seeded.add_value_to_id("stale@example.local", "S-1-5-21-1-1-1-4000");
    seeded.save(&cache_path).unwrap();

    let mut ctx = context_for(&["--rebuild-cache"], populated_mock(), &dir);
    links::run_chain(&mut ctx).await;
    assert!(!ctx.is_faulted);

    // A fresh cache file was written without the stale entry.
    assert!(cache_path.exists());
    let reloaded = ResolverCache::load(&cache_path, false);
    assert_eq!(reloaded.get_value_to_id("STALE@EXAMPLE.LOCAL"), None);
    assert_eq!(
        reloaded.get_value_to_id("JDOE@EXAMPLE.LOCAL"),
        Some("S-1-5-21-1-1-1-1105".to_string())
    );
}

#[tokio::test]
async fn test_corrupt_cache_file_degrades_to_empty() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(CACHE_NAME), "definitely not json").unwrap();

    let mut ctx = context_for(&[], populated_mock(), &dir);
    links::run_chain(&mut ctx).await;
    // A bad cache file is a warning, never a fault.
    assert!(!ctx.is_faulted);

    let reloaded = ResolverCache::load(&dir.path().join(CACHE_NAME), false);
    assert_eq!(
        reloaded.get_value_to_id("JDOE@EXAMPLE.LOCAL"),
        Some("S-1-5-21-1-1-1-1105".to_string())
    );
}
