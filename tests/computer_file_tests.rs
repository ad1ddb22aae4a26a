//! Explicit host-list collection scenarios.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use serde_json::Value;
use tempfile::TempDir;
use zip::ZipArchive;

use adhound::cli::Args;
use adhound::context::RunContext;
use adhound::links;
use adhound::test_utils::{computer_object, MockDirectory};

fn context_for(list: &Path, mock: MockDirectory, dir: &TempDir) -> RunContext {
    let out = dir.path().to_string_lossy().to_string();
    let list = list.to_string_lossy().to_string();
    let args = Args::parse_from([
        "adhound",
        "--domain",
        "example.local",
        "--output-directory",
        out.as_str(),
        "--computer-file",
        list.as_str(),
    ]);
    RunContext::new(&args, Arc::new(mock)).unwrap()
}

fn read_computers(dir: &Path) -> Value {
    let zip_path = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.to_string_lossy().ends_with(".zip"))
        .expect("bundle missing");
    let mut archive = ZipArchive::new(File::open(zip_path).unwrap()).unwrap();
    let name = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .find(|n| n.ends_with("computers.json"))
        .expect("no computers.json in bundle");
    let mut entry = archive.by_name(&name).unwrap();
    let mut content = String::new();
    std::io::Read::read_to_string(&mut entry, &mut content).unwrap();
    serde_json::from_str(&content).unwrap()
}

#[tokio::test]
async fn test_mixed_host_list_produces_resolvable_records_only() {
    let dir = TempDir::new().unwrap();
    let list = dir.path().join("hosts.txt");
    std::fs::write(&list, "host1\nS-1-5-21-1-1-1-2000\nnotreal\n").unwrap();

    let mut mock = MockDirectory::new("example.local", "S-1-5-21-1-1-1");
    mock.add_host("example.local", "host1", "S-1-5-21-1-1-1-1104");
    mock.add_entry(computer_object("HOST1$", "S-1-5-21-1-1-1-1104", "example.local"));
    mock.add_entry(computer_object("FS01$", "S-1-5-21-1-1-1-2000", "example.local"));

    let mut ctx = context_for(&list, mock, &dir);
    links::run_chain(&mut ctx).await;
    // The unresolvable line logs a warning; the run still succeeds.
    assert!(!ctx.is_faulted);

    let computers = read_computers(dir.path());
    assert_eq!(computers["meta"]["count"], 2);
    assert_eq!(computers["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_record_count_bounded_by_input_lines() {
    let dir = TempDir::new().unwrap();
    let list = dir.path().join("hosts.txt");
    // Three non-empty lines, blank lines ignored.
    std::fs::write(&list, "\nhost1\n\nhost2\nhost3\n\n").unwrap();

    let mut mock = MockDirectory::new("example.local", "S-1-5-21-1-1-1");
    mock.add_host("example.local", "host1", "S-1-5-21-1-1-1-1104");
    mock.add_entry(computer_object("HOST1$", "S-1-5-21-1-1-1-1104", "example.local"));

    let mut ctx = context_for(&list, mock, &dir);
    links::run_chain(&mut ctx).await;
    assert!(!ctx.is_faulted);

    let computers = read_computers(dir.path());
    let count = computers["meta"]["count"].as_u64().unwrap();
    assert!(count <= 3);
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_missing_host_file_faults_the_run() {
    let dir = TempDir::new().unwrap();
    let mock = MockDirectory::new("example.local", "S-1-5-21-1-1-1");
    let mut ctx = context_for(Path::new("/nonexistent/hosts.txt"), mock, &dir);
    links::run_chain(&mut ctx).await;
    assert!(ctx.is_faulted);
}
