//! Mirrors (spec.md §4.9) — human-readable markdown copies of accepted
//! entries, written on insert (not merge). Informational only: the Store
//! remains the source of truth and reconstructing it from mirrors is not
//! required.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::warn;

use crate::error::{MemoryError, Result};
use crate::types::{MemoryEntry, MemoryKind};

pub struct MirrorWriter {
    workspace_root: PathBuf,
}

impl MirrorWriter {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self { workspace_root: workspace_root.into() }
    }

    /// Append a one-line mirror of a freshly-inserted entry to the path
    /// appropriate for its kind (spec.md §4.9). Mirror failures are logged
    /// but never propagated as fatal to the caller (Capture §4.5 step 7).
    pub fn mirror(&self, entry: &MemoryEntry) -> Result<()> {
        let path = self.path_for(entry);
        if let Err(e) = self.append_line(&path, entry) {
            warn!(error = %e, id = entry.id, "mirror write failed — canonical store is still authoritative");
            return Err(MemoryError::MirrorIoError(e.to_string()));
        }
        Ok(())
    }

    fn path_for(&self, entry: &MemoryEntry) -> PathBuf {
        let base = self.workspace_root.join("memory");
        match entry.kind {
            MemoryKind::Episodic => base.join("episodic").join(format!("{}.md", entry.created_at.format("%Y-%m-%d"))),
            MemoryKind::Preference => base.join("semantic").join("preferences.md"),
            MemoryKind::Fact => base.join("semantic").join("facts.md"),
            MemoryKind::Decision => base.join("semantic").join("decisions.md"),
        }
    }

    fn append_line(&self, path: &Path, entry: &MemoryEntry) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let line = format!(
            "[{}] ({}) {}\n",
            entry.created_at.to_rfc3339(),
            entry.scope_key,
            entry.text
        );
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())
    }
}
