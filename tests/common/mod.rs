//! Common test utilities

use std::path::PathBuf;
use tempfile::TempDir;

/// Write `contents` to a fresh `proctor.toml`; keep the `TempDir` alive
pub fn write_config(contents: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("proctor.toml");
    std::fs::write(&path, contents).unwrap();
    (dir, path)
}

/// The sample configuration shipped at the repository root
pub fn sample_config_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("proctor.toml")
}
