//! Backfill (spec.md §6/§9) — one-time import of the legacy semantic/episodic
//! markdown files into the Store, guarded by a `memory_meta` marker so it
//! never re-runs.
//!
//! The legacy files are the same ones [`crate::mirrors`] writes going
//! forward (`workspace/memory/semantic/{preferences,facts,decisions}.md`,
//! `workspace/memory/episodic/*.md`), one line per entry in the format
//! `"[{rfc3339}] ({scope_key}) {text}"`. Reading them back is the mirror
//! image of `MirrorWriter::mirror`'s append.

use std::path::Path;

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::error::Result;
use crate::store::{NewEntry, Store};
use crate::types::{EntrySource, MemoryKind};

const BACKFILL_MARKER_KEY: &str = "backfill_complete";

/// Default confidence/importance for imported rows: high enough to clear the
/// capture gate's defaults (so they show up in recall) but not `1.0`, since
/// these were never run through the Safety Filter or Extractor.
const BACKFILL_CONFIDENCE: f64 = 0.9;
const BACKFILL_IMPORTANCE: f64 = 0.5;

/// Import every legacy semantic/episodic file under `workspace_root/memory`
/// into `store`, tagged `source=backfill`. No-op (returns 0) if a prior run
/// already set the `backfill_complete` marker.
#[instrument(skip(store, workspace_root))]
pub fn run(store: &Store, workspace_root: &Path, scope_key: &str, retention_days_for: impl Fn(MemoryKind) -> i64) -> Result<usize> {
    if store.get_meta(BACKFILL_MARKER_KEY)?.is_some() {
        info!("backfill already complete, skipping");
        return Ok(0);
    }

    let mut imported = 0;
    let semantic_dir = workspace_root.join("memory/semantic");
    imported += import_file(store, &semantic_dir.join("preferences.md"), MemoryKind::Preference, scope_key, &retention_days_for)?;
    imported += import_file(store, &semantic_dir.join("facts.md"), MemoryKind::Fact, scope_key, &retention_days_for)?;
    imported += import_file(store, &semantic_dir.join("decisions.md"), MemoryKind::Decision, scope_key, &retention_days_for)?;

    let episodic_dir = workspace_root.join("memory/episodic");
    if let Ok(entries) = std::fs::read_dir(&episodic_dir) {
        for entry in entries.filter_map(|e| e.ok()) {
            if entry.path().extension().and_then(|e| e.to_str()) == Some("md") {
                imported += import_file(store, &entry.path(), MemoryKind::Episodic, scope_key, &retention_days_for)?;
            }
        }
    }

    store.set_meta(BACKFILL_MARKER_KEY, &Utc::now().to_rfc3339())?;
    info!(imported, "backfill complete");
    Ok(imported)
}

fn import_file(
    store: &Store,
    path: &Path,
    kind: MemoryKind,
    fallback_scope_key: &str,
    retention_days_for: &impl Fn(MemoryKind) -> i64,
) -> Result<usize> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            warn!(error = %e, path = %path.display(), "backfill: failed to read legacy file");
            return Ok(0);
        }
    };

    let mut count = 0;
    for line in contents.lines() {
        let Some((scope_key, text)) = parse_line(line, fallback_scope_key) else { continue };
        store.upsert(NewEntry {
            kind,
            scope_key,
            text,
            channel: "backfill".to_string(),
            chat_id: None,
            sender_id: None,
            importance: BACKFILL_IMPORTANCE,
            confidence: BACKFILL_CONFIDENCE,
            source: EntrySource::Backfill,
            now: Utc::now(),
            retention_days: retention_days_for(kind),
        })?;
        count += 1;
    }
    Ok(count)
}

/// Parse one `"[{rfc3339}] ({scope_key}) {text}"` mirror line. Lines that
/// don't carry a `(scope_key)` segment fall back to `fallback_scope_key`
/// (tolerates the hand-edited legacy `MEMORY.md` format, which has no
/// scope-key convention of its own).
fn parse_line(line: &str, fallback_scope_key: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let after_timestamp = match line.find("] ") {
        Some(idx) if line.starts_with('[') => &line[idx + 2..],
        _ => line,
    };
    if let Some(rest) = after_timestamp.strip_prefix('(') {
        if let Some(close) = rest.find(')') {
            let scope_key = rest[..close].to_string();
            let text = rest[close + 1..].trim().to_string();
            if !text.is_empty() {
                return Some((scope_key, text));
            }
        }
    }
    let text = after_timestamp.trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some((fallback_scope_key.to_string(), text))
    }
}
