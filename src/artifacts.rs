//! Run-directory artifact conventions
//!
//! Each pipeline run writes its artifacts into one directory under the
//! canonical file names below. The pipeline only requires that each
//! artifact round-trips through its documented JSON shape; the directory
//! layout itself is a runner convention.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const PARSED_CHAPTER: &str = "parsed_chapter.json";
pub const ACTIVE_ONTOLOGY: &str = "active_ontology.json";
pub const EXTRACTED_PAYLOAD: &str = "extracted_graph_payload.json";
pub const EXTRACTION_META: &str = "extraction_meta.json";
pub const RESOLUTION_PLAN: &str = "resolution_plan.json";
pub const DIFF_REPORT: &str = "diff_report.json";
pub const COMMIT_REPORT: &str = "commit_report.json";

/// Errors from artifact IO.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("artifact serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Write `contents` to `path` atomically: a temp file in the same
/// directory, then a rename over the target. Readers never observe a
/// partially written artifact.
pub fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// A single run's artifact directory.
#[derive(Debug, Clone)]
pub struct RunDir {
    root: PathBuf,
}

impl RunDir {
    /// Create (or reuse) the directory at `root`.
    pub fn create(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Serialize `value` as pretty JSON and write it atomically.
    pub fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf, ArtifactError> {
        let path = self.path(name);
        let body = serde_json::to_vec_pretty(value)?;
        atomic_write(&path, &body)?;
        Ok(path)
    }

    pub fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<T, ArtifactError> {
        let body = std::fs::read_to_string(self.path(name))?;
        Ok(serde_json::from_str(&body)?)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path(name).exists()
    }
}
