//! Statically enforces the import layering rule (§6.5): `domain` stays a
//! dependency-free leaf, `storage::*` never reaches up into the CLI, and the
//! CLI calls into the public api modules instead of `storage` directly for
//! the flows that have one.

use std::fs;
use std::path::Path;

fn read(path: &str) -> String {
    fs::read_to_string(Path::new(env!("CARGO_MANIFEST_DIR")).join(path)).unwrap_or_else(|e| panic!("reading {path}: {e}"))
}

fn forbidden_use(source: &str, needle: &str) -> bool {
    source.lines().any(|line| {
        let trimmed = line.trim_start();
        trimmed.starts_with("use ") && trimmed.contains(needle)
    })
}

#[test]
fn domain_does_not_import_storage_adapters_or_cli() {
    let source = read("src/domain.rs");
    assert!(!forbidden_use(&source, "crate::storage"), "domain.rs must not import storage");
    assert!(!forbidden_use(&source, "crate::adapters"), "domain.rs must not import adapters");
    assert!(!forbidden_use(&source, "crate::cli"), "domain.rs must not import cli");
    assert!(!forbidden_use(&source, "::cli::"), "domain.rs must not import cli");
}

#[test]
fn storage_modules_do_not_import_cli() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("src/storage");
    for entry in fs::read_dir(&dir).expect("reading src/storage") {
        let entry = entry.expect("dir entry");
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("rs") {
            continue;
        }
        let source = fs::read_to_string(&path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()));
        assert!(
            !forbidden_use(&source, "crate::cli") && !forbidden_use(&source, "::cli::"),
            "{} must not import cli",
            path.display()
        );
    }
}

#[test]
fn cli_calls_public_api_modules_for_their_flows() {
    let source = read("src/cli.rs");
    assert!(source.contains("retrieval::search"), "cli.rs must route search through retrieval::search");
    assert!(source.contains("ingest::run_ingest"), "cli.rs must route ingest through ingest::run_ingest");
    assert!(source.contains("doctor::run_all") || source.contains("doctor::find_check"), "cli.rs must route doctor through the doctor module");
    assert!(source.contains("backfill::backfill_"), "cli.rs must route backfill through the backfill module");
}

#[test]
fn embeddings_modules_do_not_import_cli() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("src/embeddings");
    for entry in fs::read_dir(&dir).expect("reading src/embeddings") {
        let entry = entry.expect("dir entry");
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("rs") {
            continue;
        }
        let source = fs::read_to_string(&path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()));
        assert!(
            !forbidden_use(&source, "crate::cli") && !forbidden_use(&source, "::cli::"),
            "{} must not import cli",
            path.display()
        );
    }
}
