//! Build lock files: a small JSON report written next to every artifact.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Summary of a completed build, for provenance and quick sanity checks.
#[derive(Debug, Serialize, Deserialize)]
pub struct BuildLock {
    pub input: PathBuf,
    pub output: PathBuf,
    pub mode: String,
    pub num_docs: u32,
    pub num_color_classes: u64,
    pub num_threads: usize,
    pub created_unix: u64,
}

impl BuildLock {
    pub fn new(
        input: &Path,
        output: &Path,
        mode: &str,
        num_docs: u32,
        num_color_classes: u64,
        num_threads: usize,
    ) -> Self {
        let created_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            mode: mode.to_string(),
            num_docs,
            num_color_classes,
            num_threads,
            created_unix,
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Precondition(format!("lock serialization failed: {e}")))?;
        std::fs::write(path, json).map_err(|e| Error::io(path, e))
    }

    pub fn read(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        serde_json::from_str(&json).map_err(|e| Error::format(path, format!("bad lock file: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("build.lock.json");
        let lock = BuildLock::new(
            Path::new("in.txt"),
            Path::new("out.cidx"),
            "differential",
            8,
            42,
            2,
        );
        lock.write(&path).unwrap();
        let loaded = BuildLock::read(&path).unwrap();
        assert_eq!(loaded.mode, "differential");
        assert_eq!(loaded.num_color_classes, 42);
    }
}
