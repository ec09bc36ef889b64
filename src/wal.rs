//! WAL Writer (spec.md §4.7) — append-only per-session markdown markers,
//! pre and post generation. Not a database write-ahead log; see GLOSSARY.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{instrument, warn};

use crate::error::{MemoryError, Result};

const MAX_SAFE_KEY_LEN: usize = 120;
const SAFE_KEY_TRUNCATE_LEN: usize = 112;

pub struct WalWriter {
    state_dir: PathBuf,
}

impl WalWriter {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self { state_dir: state_dir.into() }
    }

    /// Write a `PRE` marker before generation begins.
    #[instrument(skip(self, turn_meta))]
    pub fn append_pre(&self, session_key: &str, turn_meta: &str) -> Result<()> {
        self.append(session_key, "PRE", turn_meta)
    }

    /// Write a `POST` marker after generation completes.
    #[instrument(skip(self, assistant_summary))]
    pub fn append_post(&self, session_key: &str, assistant_summary: &str) -> Result<()> {
        self.append(session_key, "POST", assistant_summary)
    }

    fn append(&self, session_key: &str, marker: &str, body: &str) -> Result<()> {
        let path = self.path_for(session_key);
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(error = %e, "WAL: failed to create state dir");
                return Err(MemoryError::WalIoError(e.to_string()));
            }
        }

        let line = format!("[{}] {} {}\n", Utc::now().to_rfc3339(), marker, body.replace('\n', " "));

        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| f.write_all(line.as_bytes()));

        if let Err(e) = result {
            warn!(error = %e, session = %session_key, "WAL append failed — turn continues");
            return Err(MemoryError::WalIoError(e.to_string()));
        }
        Ok(())
    }

    fn path_for(&self, session_key: &str) -> PathBuf {
        self.state_dir.join(format!("{}.md", safe_key(session_key)))
    }
}

/// Lowercase, replace any non-`[a-z0-9_-]` with `_`, and bound length to
/// `MAX_SAFE_KEY_LEN` with a stable truncation-hash suffix on overflow, so
/// two long keys sharing a 112-char prefix never alias to the same file.
pub fn safe_key(session_key: &str) -> String {
    let lowered = session_key.to_lowercase();
    let sanitized: String = lowered
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();

    if sanitized.chars().count() <= MAX_SAFE_KEY_LEN {
        return sanitized;
    }

    let truncated: String = sanitized.chars().take(SAFE_KEY_TRUNCATE_LEN).collect();
    format!("{}_{}", truncated, fnv1a_hex8(session_key))
}

/// Cheap, stable, dependency-free 32-bit FNV-1a hash rendered as 8 hex chars.
fn fnv1a_hex8(s: &str) -> String {
    const FNV_OFFSET: u32 = 0x811c9dc5;
    const FNV_PRIME: u32 = 0x01000193;
    let mut hash = FNV_OFFSET;
    for byte in s.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    format!("{:08x}", hash)
}

/// Read back all lines of a session's WAL file, in file order — used by
/// property test P7 (`PRE_i` precedes `POST_i` precedes `PRE_{i+1}`).
pub fn read_lines(state_dir: &Path, session_key: &str) -> std::io::Result<Vec<String>> {
    let path = state_dir.join(format!("{}.md", safe_key(session_key)));
    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(contents.lines().map(String::from).collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn safe_key_lowercases_and_replaces_unsafe_chars() {
        assert_eq!(safe_key("Channel:CLI:Chat/42"), "channel_cli_chat_42");
    }

    #[test]
    fn safe_key_truncates_long_keys_with_hash_suffix() {
        let long_key = "x".repeat(200);
        let safe = safe_key(&long_key);
        assert!(safe.chars().count() <= MAX_SAFE_KEY_LEN);
        assert!(safe.ends_with(&fnv1a_hex8(&long_key)));
    }

    #[test]
    fn distinct_long_keys_sharing_a_prefix_do_not_alias() {
        let a = format!("{}-a", "x".repeat(130));
        let b = format!("{}-b", "x".repeat(130));
        assert_ne!(safe_key(&a), safe_key(&b));
    }

    #[test]
    fn pre_then_post_ordering_is_preserved_in_file() {
        let dir = tempdir().unwrap();
        let wal = WalWriter::new(dir.path());
        wal.append_pre("session-1", "turn 1").unwrap();
        wal.append_post("session-1", "reply 1").unwrap();
        wal.append_pre("session-1", "turn 2").unwrap();
        wal.append_post("session-1", "reply 2").unwrap();

        let lines = read_lines(dir.path(), "session-1").unwrap();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("PRE"));
        assert!(lines[1].contains("POST"));
        assert!(lines[2].contains("PRE"));
        assert!(lines[3].contains("POST"));
    }

    #[test]
    fn wal_io_error_does_not_panic_when_path_unwritable() {
        // Pointing state_dir at a file (not a directory) makes create_dir_all fail.
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a dir").unwrap();
        let wal = WalWriter::new(blocker.join("nested"));
        let result = wal.append_pre("s", "turn");
        assert!(result.is_err());
    }
}
